//! Two-tier memory for the mnemo agent.
//!
//! - **Session cache**: per-session context with a TTL, held in Redis and
//!   degrading to an in-process map when Redis cannot be reached.
//! - **Durable store**: per-user long-term key/value records and session
//!   rows, held in SQLite.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                    MEMORY SYSTEM                      │
//! ├───────────────────────────────────────────────────────┤
//! │                                                       │
//! │  ┌─────────────────────────────────────────────────┐  │
//! │  │        FallbackSessionStore (ephemeral)         │  │
//! │  │   Redis  "session:{id}" -> {"context": {...}}   │  │
//! │  │      └── on error ──► in-process HashMap        │  │
//! │  └─────────────────────────────────────────────────┘  │
//! │                                                       │
//! │  ┌─────────────────────────────────────────────────┐  │
//! │  │           SqliteStore (durable)                 │  │
//! │  │   memories(user_id, key, value, ...)            │  │
//! │  │   sessions(session_id, user_id, expires_at)     │  │
//! │  └─────────────────────────────────────────────────┘  │
//! │                                                       │
//! └───────────────────────────────────────────────────────┘
//! ```

pub mod durable;
pub mod redis_store;
pub mod session_store;
pub mod sqlite;
pub mod types;

pub use durable::{InMemoryStore, MemoryStore, SessionRepository, UnavailableStore};
pub use redis_store::RedisSessionStore;
pub use session_store::{FallbackSessionStore, InMemorySessionStore, SessionStore};
pub use sqlite::SqliteStore;
pub use types::{MemoryRecord, SessionRecord, StoreConfig};
