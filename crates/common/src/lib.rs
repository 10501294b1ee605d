//! Common types shared across the mnemo crates.
//!
//! Everything that crosses a crate boundary lives here: the error taxonomy,
//! conversation turns, and the request/response/stream shapes of the agent.

pub mod error;
pub mod message;
pub mod models;

pub use error::{MnemoError, Result};
pub use message::{ConversationMessage, MessageRole};
pub use models::{AgentRequest, AgentResponse, Context, StreamChunk, MAX_MESSAGE_CHARS};
