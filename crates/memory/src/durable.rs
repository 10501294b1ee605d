//! Durable per-user memory and session rows.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemo_common::{MnemoError, Result};
use parking_lot::RwLock;

use crate::types::{MemoryRecord, SessionRecord};

/// Long-term key/value records, scoped by user.
///
/// `(user_id, key)` is unique in practice but not enforced: `upsert`
/// queries first and updates the oldest match, `delete` removes every match.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// All records for a user in insertion order.
    async fn query_by_user(&self, user_id: i64) -> Result<Vec<MemoryRecord>>;

    async fn get(&self, user_id: i64, key: &str) -> Result<Option<MemoryRecord>>;

    async fn upsert(&self, user_id: i64, key: &str, value: &str) -> Result<()>;

    /// Returns the number of rows removed.
    async fn delete(&self, user_id: i64, key: &str) -> Result<u64>;

    async fn delete_all(&self, user_id: i64) -> Result<u64>;

    async fn health_check(&self) -> Result<()>;
}

/// Session rows backing the authenticator.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_active(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>>;

    /// Create the row, or overwrite an existing (typically expired) row in place.
    async fn upsert_session(
        &self,
        session_id: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord>;

    /// Returns false when no row matched.
    async fn extend(&self, session_id: &str, expires_at: DateTime<Utc>) -> Result<bool>;
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    memories: Vec<MemoryRecord>,
    sessions: HashMap<String, SessionRecord>,
}

/// Process-local implementation of both durable traits.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn query_by_user(&self, user_id: i64) -> Result<Vec<MemoryRecord>> {
        Ok(self
            .tables
            .read()
            .memories
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get(&self, user_id: i64, key: &str) -> Result<Option<MemoryRecord>> {
        Ok(self
            .tables
            .read()
            .memories
            .iter()
            .find(|m| m.user_id == user_id && m.key == key)
            .cloned())
    }

    async fn upsert(&self, user_id: i64, key: &str, value: &str) -> Result<()> {
        let now = Utc::now();
        let mut tables = self.tables.write();
        if let Some(existing) = tables
            .memories
            .iter_mut()
            .find(|m| m.user_id == user_id && m.key == key)
        {
            existing.value = value.to_string();
            existing.updated_at = now;
            return Ok(());
        }
        tables.next_id += 1;
        let id = tables.next_id;
        tables.memories.push(MemoryRecord {
            id,
            user_id,
            key: key.to_string(),
            value: value.to_string(),
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }

    async fn delete(&self, user_id: i64, key: &str) -> Result<u64> {
        let mut tables = self.tables.write();
        let before = tables.memories.len();
        tables
            .memories
            .retain(|m| !(m.user_id == user_id && m.key == key));
        Ok((before - tables.memories.len()) as u64)
    }

    async fn delete_all(&self, user_id: i64) -> Result<u64> {
        let mut tables = self.tables.write();
        let before = tables.memories.len();
        tables.memories.retain(|m| m.user_id != user_id);
        Ok((before - tables.memories.len()) as u64)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn find_active(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>> {
        Ok(self
            .tables
            .read()
            .sessions
            .get(session_id)
            .filter(|s| s.is_active(now))
            .cloned())
    }

    async fn upsert_session(
        &self,
        session_id: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        let record = SessionRecord {
            session_id: session_id.to_string(),
            user_id,
            created_at: Utc::now(),
            expires_at,
        };
        self.tables
            .write()
            .sessions
            .insert(session_id.to_string(), record.clone());
        Ok(record)
    }

    async fn extend(&self, session_id: &str, expires_at: DateTime<Utc>) -> Result<bool> {
        match self.tables.write().sessions.get_mut(session_id) {
            Some(session) => {
                session.expires_at = expires_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Stand-in for a database that could not be opened. Every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

fn unavailable<T>() -> Result<T> {
    Err(MnemoError::Store("durable store unavailable".into()))
}

#[async_trait]
impl MemoryStore for UnavailableStore {
    async fn query_by_user(&self, _user_id: i64) -> Result<Vec<MemoryRecord>> {
        unavailable()
    }
    async fn get(&self, _user_id: i64, _key: &str) -> Result<Option<MemoryRecord>> {
        unavailable()
    }
    async fn upsert(&self, _user_id: i64, _key: &str, _value: &str) -> Result<()> {
        unavailable()
    }
    async fn delete(&self, _user_id: i64, _key: &str) -> Result<u64> {
        unavailable()
    }
    async fn delete_all(&self, _user_id: i64) -> Result<u64> {
        unavailable()
    }
    async fn health_check(&self) -> Result<()> {
        unavailable()
    }
}

#[async_trait]
impl SessionRepository for UnavailableStore {
    async fn find_active(
        &self,
        _session_id: &str,
        _now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>> {
        unavailable()
    }
    async fn upsert_session(
        &self,
        _session_id: &str,
        _user_id: i64,
        _expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        unavailable()
    }
    async fn extend(&self, _session_id: &str, _expires_at: DateTime<Utc>) -> Result<bool> {
        unavailable()
    }
}
