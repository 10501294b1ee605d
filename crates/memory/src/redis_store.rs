//! Redis session cache.

use std::time::Duration;

use async_trait::async_trait;
use mnemo_common::{Context, MnemoError, Result};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, warn};

use crate::session_store::SessionStore;

const KEY_PREFIX: &str = "session:";

fn cache_err(op: &str, e: redis::RedisError) -> MnemoError {
    MnemoError::Cache(format!("Redis {op} failed: {e}"))
}

/// Session contexts stored as `session:{id}` -> `{"context": {...}}` with `SET EX`.
#[derive(Clone)]
pub struct RedisSessionStore {
    manager: ConnectionManager,
}

impl RedisSessionStore {
    /// Connect and verify with `PING`, giving up after roughly `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| MnemoError::Cache(format!("Invalid Redis URL: {e}")))?;

        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(timeout)
            .set_response_timeout(timeout)
            .set_number_of_retries(1)
            .set_max_delay(timeout.as_millis() as u64);

        let manager = tokio::time::timeout(
            timeout * 2,
            ConnectionManager::new_with_config(client, config),
        )
        .await
        .map_err(|_| MnemoError::Cache(format!("Redis connect timed out after {timeout:?}")))?
        .map_err(|e| cache_err("connect", e))?;

        let store = Self { manager };
        store.ping().await?;
        Ok(store)
    }

    fn key(session_id: &str) -> String {
        format!("{KEY_PREFIX}{session_id}")
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_err("PING", e))?;
        Ok(())
    }
}

/// Pull the context mapping out of a stored blob. Malformed blobs read as absent.
fn decode_blob(session_id: &str, raw: &str) -> Option<Context> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(mut blob)) => match blob.remove("context") {
            Some(Value::Object(context)) => Some(context),
            _ => Some(Context::new()),
        },
        Ok(_) | Err(_) => {
            warn!(session_id, "Discarding malformed session blob");
            None
        }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Context>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn
            .get(Self::key(session_id))
            .await
            .map_err(|e| cache_err("GET", e))?;
        Ok(raw.and_then(|raw| decode_blob(session_id, &raw)))
    }

    async fn set(&self, session_id: &str, context: &Context, ttl_secs: u64) -> Result<()> {
        let blob = serde_json::json!({ "context": context });
        let payload = serde_json::to_string(&blob)?;
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(Self::key(session_id), payload, ttl_secs.max(1))
            .await
            .map_err(|e| cache_err("SET", e))?;
        debug!(session_id, ttl_secs, "Session context cached");
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .del(Self::key(session_id))
            .await
            .map_err(|e| cache_err("DEL", e))?;
        Ok(())
    }

    fn is_fallback(&self) -> bool {
        false
    }

    async fn health_check(&self) -> Result<()> {
        self.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(RedisSessionStore::key("abc"), "session:abc");
    }

    #[test]
    fn blob_context_is_extracted() {
        let ctx = decode_blob("s", r#"{"context":{"pending_clear":true}}"#).unwrap();
        assert_eq!(ctx.get("pending_clear"), Some(&Value::Bool(true)));
    }

    #[test]
    fn blob_without_context_is_empty() {
        assert_eq!(decode_blob("s", r#"{"other":1}"#), Some(Context::new()));
    }

    #[test]
    fn garbage_blob_is_absent() {
        assert!(decode_blob("s", "not json").is_none());
        assert!(decode_blob("s", "[1,2]").is_none());
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let result = RedisSessionStore::connect("redis://127.0.0.1:1/0", Duration::from_millis(200)).await;
        assert!(matches!(result, Err(MnemoError::Cache(_))));
    }
}
