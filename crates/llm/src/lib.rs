//! Completion service clients.
//!
//! The rest of the workspace treats text generation as a black box behind
//! [`LlmClient`]: an ordered message list goes in, and either one completion
//! or a finite stream of text fragments comes out.

pub mod client;
pub mod config;
pub mod openai;
pub mod retry;
pub mod scripted;

pub use client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, Role, TokenStream, TokenUsage};
pub use config::{build_llm_client, LlmConfig, SemaphoredClient};
pub use openai::OpenAiClient;
pub use retry::{RetryConfig, RetryingClient};
pub use scripted::{Script, ScriptedLlmClient};
