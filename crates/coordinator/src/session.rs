//! Session authentication.
//!
//! Every request is bound to a session id and a user id. A durable-store
//! failure never rejects a request: it is served under the default user and
//! the state is marked degraded.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use mnemo_common::Result;
use mnemo_memory::SessionRepository;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::state::AgentState;

/// Longest session lifetime accepted from configuration (ten years).
const MAX_TIMEOUT_SECS: u64 = 315_360_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBinding {
    pub session_id: String,
    pub user_id: i64,
    pub degraded: bool,
}

pub struct SessionAuthenticator {
    repo: Arc<dyn SessionRepository>,
    config: SessionConfig,
}

impl SessionAuthenticator {
    pub fn new(repo: Arc<dyn SessionRepository>, config: SessionConfig) -> Self {
        Self { repo, config }
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.config.timeout_secs.min(MAX_TIMEOUT_SECS) as i64;
        now + TimeDelta::seconds(secs)
    }

    /// Resolve the caller's session, creating one when needed.
    ///
    /// A blank or missing id gets a fresh UUID. An unknown or expired id is
    /// (re)created under the default user with a full timeout.
    pub async fn authenticate(&self, requested: Option<&str>) -> SessionBinding {
        let session_id = requested
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let now = Utc::now();
        let expires_at = self.expiry_from(now);

        match self.repo.find_active(&session_id, now).await {
            Ok(Some(record)) => {
                if self.config.renew_on_access {
                    if let Err(e) = self.repo.extend(&session_id, expires_at).await {
                        warn!(error = %e, session_id = %session_id, "Failed to renew session");
                    }
                }
                debug!(session_id = %session_id, user_id = record.user_id, "Session resumed");
                SessionBinding {
                    session_id,
                    user_id: record.user_id,
                    degraded: false,
                }
            }
            Ok(None) => {
                match self
                    .repo
                    .upsert_session(&session_id, self.config.default_user_id, expires_at)
                    .await
                {
                    Ok(record) => {
                        info!(session_id = %session_id, user_id = record.user_id, "Session created");
                        SessionBinding {
                            session_id,
                            user_id: record.user_id,
                            degraded: false,
                        }
                    }
                    Err(e) => self.degraded(session_id, e),
                }
            }
            Err(e) => self.degraded(session_id, e),
        }
    }

    fn degraded(&self, session_id: String, error: mnemo_common::MnemoError) -> SessionBinding {
        warn!(
            error = %error,
            session_id = %session_id,
            user_id = self.config.default_user_id,
            "Durable store unavailable, continuing with default user"
        );
        SessionBinding {
            session_id,
            user_id: self.config.default_user_id,
            degraded: true,
        }
    }

    /// Push an active session's expiry one full timeout past now.
    ///
    /// Returns `false` when the session does not exist.
    pub async fn extend_session(&self, session_id: &str) -> Result<bool> {
        let extended = self.repo.extend(session_id, self.expiry_from(Utc::now())).await?;
        debug!(session_id, extended, "Session extension");
        Ok(extended)
    }

    /// True when the session exists and has not expired.
    pub async fn validate_session(&self, session_id: &str) -> Result<bool> {
        Ok(self.repo.find_active(session_id, Utc::now()).await?.is_some())
    }

    /// Pipeline stage: bind the state to a session.
    pub async fn bind(&self, state: AgentState, requested: Option<&str>) -> AgentState {
        let binding = self.authenticate(requested).await;
        state.with_session(binding.session_id, binding.user_id, binding.degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_memory::{InMemoryStore, UnavailableStore};

    fn config() -> SessionConfig {
        SessionConfig {
            timeout_secs: 60,
            default_user_id: 7,
            renew_on_access: true,
        }
    }

    #[tokio::test]
    async fn missing_id_creates_session() {
        let repo = Arc::new(InMemoryStore::new());
        let auth = SessionAuthenticator::new(repo.clone(), config());

        let binding = auth.authenticate(None).await;
        assert!(!binding.degraded);
        assert_eq!(binding.user_id, 7);
        assert!(Uuid::parse_str(&binding.session_id).is_ok());
        assert!(auth.validate_session(&binding.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn blank_id_is_treated_as_missing() {
        let auth = SessionAuthenticator::new(Arc::new(InMemoryStore::new()), config());
        let binding = auth.authenticate(Some("   ")).await;
        assert!(Uuid::parse_str(&binding.session_id).is_ok());
    }

    #[tokio::test]
    async fn existing_session_keeps_its_user() {
        let repo = Arc::new(InMemoryStore::new());
        repo.upsert_session("s-1", 42, Utc::now() + TimeDelta::seconds(30))
            .await
            .unwrap();
        let auth = SessionAuthenticator::new(repo, config());

        let binding = auth.authenticate(Some("s-1")).await;
        assert_eq!(binding.session_id, "s-1");
        assert_eq!(binding.user_id, 42);
    }

    #[tokio::test]
    async fn expired_session_is_recreated_for_default_user() {
        let repo = Arc::new(InMemoryStore::new());
        repo.upsert_session("old", 42, Utc::now() - TimeDelta::seconds(5))
            .await
            .unwrap();
        let auth = SessionAuthenticator::new(repo, config());

        let binding = auth.authenticate(Some("old")).await;
        assert_eq!(binding.session_id, "old");
        assert_eq!(binding.user_id, 7);
        assert!(auth.validate_session("old").await.unwrap());
    }

    #[tokio::test]
    async fn renewal_moves_expiry_forward() {
        let repo = Arc::new(InMemoryStore::new());
        let soon = Utc::now() + TimeDelta::seconds(2);
        repo.upsert_session("s", 1, soon).await.unwrap();
        let auth = SessionAuthenticator::new(repo.clone(), config());

        auth.authenticate(Some("s")).await;
        let record = repo
            .find_active("s", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(record.expires_at > soon + TimeDelta::seconds(30));
    }

    #[tokio::test]
    async fn unavailable_store_degrades() {
        let auth = SessionAuthenticator::new(Arc::new(UnavailableStore), config());
        let binding = auth.authenticate(Some("abc")).await;
        assert_eq!(binding.session_id, "abc");
        assert_eq!(binding.user_id, 7);
        assert!(binding.degraded);
        assert!(auth.validate_session("abc").await.is_err());
    }

    #[tokio::test]
    async fn extend_unknown_session_is_false() {
        let auth = SessionAuthenticator::new(Arc::new(InMemoryStore::new()), config());
        assert!(!auth.extend_session("nope").await.unwrap());
    }
}
