//! Request, response and stream shapes of the agent.

use serde::{Deserialize, Serialize};

use crate::error::{MnemoError, Result};

/// Free-form mapping used for session context and long-term memory values.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// Upper bound on inbound message length, in characters.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

/// An inbound chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub allow_external_search: bool,
}

impl AgentRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            allow_external_search: false,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Trim the message and check its length.
    pub fn validate(mut self) -> Result<Self> {
        let trimmed = self.message.trim();
        if trimmed.is_empty() {
            return Err(MnemoError::Validation("message must not be empty".into()));
        }
        let chars = trimmed.chars().count();
        if chars > MAX_MESSAGE_CHARS {
            return Err(MnemoError::Validation(format!(
                "message is {chars} characters, limit is {MAX_MESSAGE_CHARS}"
            )));
        }
        self.message = trimmed.to_string();
        self.session_id = self
            .session_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(self)
    }
}

/// Result of a single-shot run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub response: String,
    pub session_id: String,
    pub user_id: Option<i64>,
    pub context: Context,
}

/// One element of a streamed response.
///
/// A stream is zero or more incremental chunks followed by exactly one
/// terminating chunk whose `final_response` is the concatenation of every
/// preceding token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub token: String,
    pub session_id: String,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_response: Option<String>,
}

impl StreamChunk {
    pub fn token(session_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            session_id: session_id.into(),
            is_complete: false,
            final_response: None,
        }
    }

    pub fn complete(session_id: impl Into<String>, final_response: impl Into<String>) -> Self {
        Self {
            token: String::new(),
            session_id: session_id.into(),
            is_complete: true,
            final_response: Some(final_response.into()),
        }
    }
}
