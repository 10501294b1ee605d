//! Per-request agent state.
//!
//! Pipeline stages take an [`AgentState`] by value and return a new one;
//! the `with_*` methods are the only way stages change it.

use mnemo_common::{ConversationMessage, Context, MessageRole};
use serde_json::Value;

use crate::detector::{CommandTag, Detection, ExplicitCommand};

/// Set when a remember-class intent was detected this turn.
pub const PROCESSING_REMEMBER: &str = "processing_remember";
pub const PROCESSING_RECALL: &str = "processing_recall";
pub const PROCESSING_DELETE: &str = "processing_delete";
pub const CLEAR_CONTEXT: &str = "clear_context";
/// Set when the command executor owned the turn's output.
pub const COMMAND_HANDLED: &str = "command_handled";
/// Survives across turns until the next non-clear turn.
pub const PENDING_CLEAR: &str = "pending_clear";
pub const HISTORY: &str = "history";
pub const SEARCH_RESULTS: &str = "search_results";

/// Flags that describe only the current turn and are never persisted.
pub const TURN_FLAGS: &[&str] = &[
    PROCESSING_REMEMBER,
    PROCESSING_RECALL,
    PROCESSING_DELETE,
    CLEAR_CONTEXT,
    COMMAND_HANDLED,
];

#[derive(Debug, Clone, Default)]
pub struct AgentState {
    pub user_id: Option<i64>,
    pub session_id: Option<String>,
    /// Loaded history followed by this turn's messages.
    pub messages: Vec<ConversationMessage>,
    pub context: Context,
    /// Decoded long-term records in store order.
    pub long_term_memory: Context,
    pub detected_commands: Vec<CommandTag>,
    pub explicit_command: Option<ExplicitCommand>,
    /// The session could not be bound through the durable store.
    pub degraded_session: bool,
    pub allow_external_search: bool,
}

impl AgentState {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            messages: vec![ConversationMessage::user(message)],
            ..Default::default()
        }
    }

    pub fn with_session(self, session_id: String, user_id: i64, degraded: bool) -> Self {
        Self {
            session_id: Some(session_id),
            user_id: Some(user_id),
            degraded_session: degraded,
            ..self
        }
    }

    pub fn with_context(self, context: Context) -> Self {
        Self { context, ..self }
    }

    pub fn with_long_term_memory(self, long_term_memory: Context) -> Self {
        Self {
            long_term_memory,
            ..self
        }
    }

    /// Put earlier turns in front of the current message.
    pub fn with_history(mut self, history: Vec<ConversationMessage>) -> Self {
        let mut messages = history;
        messages.append(&mut self.messages);
        Self { messages, ..self }
    }

    /// Drop every message before the current user message.
    pub fn without_history(mut self) -> Self {
        let current = self
            .messages
            .iter()
            .rposition(|m| m.role == MessageRole::User)
            .unwrap_or(0);
        self.messages.drain(..current);
        self.context.remove(HISTORY);
        self
    }

    pub fn with_detection(mut self, detection: Detection) -> Self {
        for tag in &detection.tags {
            if let Some(flag) = tag.context_flag() {
                self.context.insert(flag.to_string(), Value::Bool(true));
            }
        }
        Self {
            detected_commands: detection.tags,
            explicit_command: detection.explicit,
            ..self
        }
    }

    pub fn with_flag(mut self, flag: &str, on: bool) -> Self {
        if on {
            self.context.insert(flag.to_string(), Value::Bool(true));
        } else {
            self.context.remove(flag);
        }
        self
    }

    pub fn with_context_value(mut self, key: &str, value: Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }

    pub fn with_reply(mut self, text: impl Into<String>) -> Self {
        self.messages.push(ConversationMessage::assistant(text));
        self
    }

    pub fn flag(&self, flag: &str) -> bool {
        self.context.get(flag).and_then(Value::as_bool).unwrap_or(false)
    }

    /// The latest user message.
    pub fn current_message(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// Messages before the current user message.
    pub fn history(&self) -> &[ConversationMessage] {
        let current = self
            .messages
            .iter()
            .rposition(|m| m.role == MessageRole::User)
            .unwrap_or(self.messages.len());
        &self.messages[..current]
    }

    /// The assistant reply produced this turn, if any.
    pub fn reply(&self) -> Option<&str> {
        let current = self
            .messages
            .iter()
            .rposition(|m| m.role == MessageRole::User)?;
        self.messages[current + 1..]
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content.as_str())
    }

    pub fn is_handled(&self) -> bool {
        self.flag(COMMAND_HANDLED)
    }

    /// Context as it should be persisted: turn flags stripped.
    pub fn persistable_context(&self) -> Context {
        let mut context = self.context.clone();
        for flag in TURN_FLAGS {
            context.remove(*flag);
        }
        context
    }

    /// Context as returned to the caller: everything except the raw history.
    pub fn visible_context(&self) -> Context {
        let mut context = self.context.clone();
        context.remove(HISTORY);
        context
    }
}
