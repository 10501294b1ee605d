//! Record types and store configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A durable, user-scoped key/value fact.
///
/// `value` is opaque text, conventionally JSON-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub user_id: i64,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Binding of a session identifier to a user, valid until `expires_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Connection settings for both store tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,

    /// `None` runs the session cache purely in-process.
    pub redis_url: Option<String>,

    /// Bounded window for establishing either connection.
    pub connect_timeout_ms: u64,

    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://mnemo.db".into(),
            redis_url: Some("redis://127.0.0.1:6379/0".into()),
            connect_timeout_ms: 2_000,
            max_connections: 5,
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn session_activity_is_strict() {
        let now = Utc::now();
        let session = SessionRecord {
            session_id: "s".into(),
            user_id: 1,
            created_at: now,
            expires_at: now,
        };
        assert!(!session.is_active(now));
        assert!(session.is_active(now - Duration::seconds(1)));
    }

    #[test]
    fn store_config_defaults() {
        let config: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.database_url, "sqlite://mnemo.db");
        assert_eq!(config.connect_timeout_ms, 2_000);
        assert!(config.redis_url.is_some());
    }
}
