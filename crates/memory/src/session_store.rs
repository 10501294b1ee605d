//! Ephemeral per-session context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mnemo_common::{Context, MnemoError, Result};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::redis_store::RedisSessionStore;

/// Cache of per-session context blobs.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Context>>;
    async fn set(&self, session_id: &str, context: &Context, ttl_secs: u64) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// True when the cache is serving from process memory instead of its backend.
    fn is_fallback(&self) -> bool;

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Process-local session cache. TTLs are accepted and ignored, so it always
/// reports itself as running in fallback mode.
#[derive(Default)]
pub struct InMemorySessionStore {
    entries: RwLock<HashMap<String, Context>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Context>> {
        Ok(self.entries.read().get(session_id).cloned())
    }

    async fn set(&self, session_id: &str, context: &Context, _ttl_secs: u64) -> Result<()> {
        self.entries
            .write()
            .insert(session_id.to_string(), context.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.entries.write().remove(session_id);
        Ok(())
    }

    fn is_fallback(&self) -> bool {
        true
    }
}

/// Redis-backed session cache that degrades to process memory.
///
/// Once Redis fails (at connect time or on any later call) the store stays
/// in fallback mode for the rest of the process. Context written before the
/// switch is not carried over.
pub struct FallbackSessionStore {
    redis: Option<RedisSessionStore>,
    local: InMemorySessionStore,
    degraded: AtomicBool,
}

impl FallbackSessionStore {
    /// Try Redis within `timeout`; start in fallback mode on failure or when no URL is given.
    pub async fn connect(redis_url: Option<&str>, timeout: Duration) -> Self {
        let Some(url) = redis_url.filter(|u| !u.trim().is_empty()) else {
            info!("No Redis URL configured, session cache is in-process only");
            return Self::in_memory();
        };

        match RedisSessionStore::connect(url, timeout).await {
            Ok(redis) => {
                info!("Session cache connected to Redis");
                Self {
                    redis: Some(redis),
                    local: InMemorySessionStore::new(),
                    degraded: AtomicBool::new(false),
                }
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, session cache falling back to process memory");
                Self::in_memory()
            }
        }
    }

    pub fn in_memory() -> Self {
        Self {
            redis: None,
            local: InMemorySessionStore::new(),
            degraded: AtomicBool::new(true),
        }
    }

    fn active_redis(&self) -> Option<&RedisSessionStore> {
        if self.degraded.load(Ordering::Acquire) {
            None
        } else {
            self.redis.as_ref()
        }
    }

    fn degrade(&self, error: &MnemoError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(error = %error, "Redis call failed, session cache switching to process memory");
        }
    }
}

#[async_trait]
impl SessionStore for FallbackSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Context>> {
        if let Some(redis) = self.active_redis() {
            match redis.get(session_id).await {
                Ok(found) => return Ok(found),
                Err(e) => self.degrade(&e),
            }
        }
        self.local.get(session_id).await
    }

    async fn set(&self, session_id: &str, context: &Context, ttl_secs: u64) -> Result<()> {
        if let Some(redis) = self.active_redis() {
            match redis.set(session_id, context, ttl_secs).await {
                Ok(()) => return Ok(()),
                Err(e) => self.degrade(&e),
            }
        }
        self.local.set(session_id, context, ttl_secs).await
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        if let Some(redis) = self.active_redis() {
            match redis.delete(session_id).await {
                Ok(()) => return Ok(()),
                Err(e) => self.degrade(&e),
            }
        }
        self.local.delete(session_id).await
    }

    fn is_fallback(&self) -> bool {
        self.active_redis().is_none()
    }

    async fn health_check(&self) -> Result<()> {
        match self.active_redis() {
            Some(redis) => redis.ping().await,
            None => Ok(()),
        }
    }
}
