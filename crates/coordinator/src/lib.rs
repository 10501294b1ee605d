//! The mnemo request pipeline.
//!
//! ```text
//! AgentRequest
//!      │
//!      ▼
//! authenticate ──► load ──► detect ──► execute ──┬──► save ──► AgentResponse
//!  (session)     (memory)  (commands) (commands) │               / StreamChunks
//!                                                 └─► respond ─┘
//!                                          (skipped when a command
//!                                           owned the turn)
//! ```
//!
//! Each stage takes an [`AgentState`] by value and returns the next one.

pub mod config;
pub mod deletion;
pub mod detector;
pub mod executor;
pub mod memory_io;
pub mod pipeline;
pub mod render;
pub mod responder;
pub mod session;
pub mod state;

pub use config::{AgentConfig, MnemoConfig, SessionConfig};
pub use deletion::{DeletionCheck, DeletionDecision};
pub use detector::{CommandDetector, CommandTag, Detection, ExplicitCommand};
pub use executor::{CommandAction, CommandExecutor, CommandReply, ReplyStatus};
pub use memory_io::{decode_value, MemoryManager};
pub use pipeline::{ChunkStream, Coordinator};
pub use responder::{ContextProvider, ResponseGenerator};
pub use session::{SessionAuthenticator, SessionBinding};
pub use state::AgentState;
