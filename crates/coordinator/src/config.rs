//! Application configuration.
//!
//! One [`MnemoConfig`] value is built at startup (TOML file, then environment
//! overrides) and handed to each component at construction.

use std::path::Path;

use mnemo_common::{MnemoError, Result};
use mnemo_llm::LlmConfig;
use mnemo_memory::StoreConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MnemoConfig {
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub session: SessionConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session row lifetime and session-context TTL, in seconds.
    pub timeout_secs: u64,

    /// User bound to new sessions and used when the durable store is down.
    pub default_user_id: i64,

    /// Push an active session's expiry forward on every request.
    pub renew_on_access: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3600,
            default_user_id: 1,
            renew_on_access: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub command_prefix: char,
    /// Prior turns sent to the completion service.
    pub history_window: usize,
    /// Turns retained in session context.
    pub history_capacity: usize,
    pub memory_summary_keys: usize,
    pub conversation_snapshot_messages: usize,
    pub recall_preview_limit: usize,
    pub recall_preview_chars: usize,
    pub deletion_preview_chars: usize,
    pub assistant_name: String,
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command_prefix: '/',
            history_window: 3,
            history_capacity: 20,
            memory_summary_keys: 5,
            conversation_snapshot_messages: 5,
            recall_preview_limit: 5,
            recall_preview_chars: 200,
            deletion_preview_chars: 80,
            assistant_name: "Mnemo".into(),
            system_prompt: Some(
                "You are Mnemo, a personal assistant with long-term memory. \
                 Be concise and friendly. When the user's saved memories are listed, \
                 use them where they are relevant."
                    .into(),
            ),
        }
    }
}

impl MnemoConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MnemoError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| MnemoError::Config(format!("Invalid config: {e}")))
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("MNEMO_DATABASE_URL") {
            self.store.database_url = url;
        }
        if let Some(url) = lookup("MNEMO_REDIS_URL") {
            self.store.redis_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(raw) = lookup("MNEMO_SESSION_TIMEOUT") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => self.session.timeout_secs = secs,
                _ => warn!(value = %raw, "Ignoring invalid MNEMO_SESSION_TIMEOUT"),
            }
        }
        if let Some(model) = lookup("MNEMO_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("MNEMO_LLM_API_URL") {
            self.llm.api_url = Some(url);
        }
        if self.llm.api_key.is_none() {
            self.llm.api_key = lookup("GROQ_API_KEY")
                .or_else(|| lookup("OPENAI_API_KEY"))
                .filter(|k| !k.is_empty());
        }
    }

    /// Configuration safe to expose to clients.
    pub fn public_view(&self) -> serde_json::Value {
        serde_json::json!({
            "llm": {
                "provider": self.llm.provider,
                "model": self.llm.model,
                "max_tokens": self.llm.max_tokens,
                "temperature": self.llm.temperature,
                "configured": self.llm.is_configured(),
            },
            "session": {
                "timeout_secs": self.session.timeout_secs,
                "renew_on_access": self.session.renew_on_access,
            },
            "agent": {
                "command_prefix": self.agent.command_prefix.to_string(),
                "history_window": self.agent.history_window,
                "assistant_name": self.agent.assistant_name,
            },
            "store": {
                "session_cache": if self.store.redis_url.is_some() { "redis" } else { "memory" },
            },
        })
    }
}
