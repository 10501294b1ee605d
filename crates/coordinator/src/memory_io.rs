//! Loading and saving memory around a turn.
//!
//! Session context (including bounded history) lives in the session cache;
//! long-term records live in the durable store. Load failures degrade to
//! empty values and save failures are logged: neither fails the turn.

use std::sync::Arc;

use chrono::Utc;
use mnemo_common::{ConversationMessage, Context, MessageRole, Result};
use mnemo_memory::{MemoryStore, SessionStore};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, SessionConfig};
use crate::state::{AgentState, HISTORY};

pub struct MemoryManager {
    sessions: Arc<dyn SessionStore>,
    store: Arc<dyn MemoryStore>,
    session_ttl_secs: u64,
    history_capacity: usize,
    snapshot_messages: usize,
}

/// Decode a stored value, keeping it as raw text when it is not JSON.
pub fn decode_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

impl MemoryManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        store: Arc<dyn MemoryStore>,
        session: &SessionConfig,
        agent: &AgentConfig,
    ) -> Self {
        Self {
            sessions,
            store,
            session_ttl_secs: session.timeout_secs,
            history_capacity: agent.history_capacity,
            snapshot_messages: agent.conversation_snapshot_messages,
        }
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub async fn load_session_context(&self, session_id: &str) -> Context {
        match self.sessions.get(session_id).await {
            Ok(Some(context)) => context,
            Ok(None) => Context::new(),
            Err(e) => {
                warn!(error = %e, session_id, "Failed to load session context");
                Context::new()
            }
        }
    }

    pub async fn load_long_term_memory(&self, user_id: i64) -> Context {
        match self.store.query_by_user(user_id).await {
            Ok(records) => records
                .into_iter()
                .map(|r| (r.key, decode_value(&r.value)))
                .collect(),
            Err(e) => {
                warn!(error = %e, user_id, "Failed to load long-term memory");
                Context::new()
            }
        }
    }

    /// Pipeline stage: pull session context, history and long-term memory.
    pub async fn load(&self, state: AgentState) -> AgentState {
        let Some(session_id) = state.session_id.clone() else {
            return state;
        };
        let context = self.load_session_context(&session_id).await;
        let history = restore_history(&context);
        let long_term = match state.user_id {
            Some(user_id) => self.load_long_term_memory(user_id).await,
            None => Context::new(),
        };
        debug!(
            session_id = %session_id,
            history = history.len(),
            memories = long_term.len(),
            "Memory loaded"
        );
        state
            .with_context(context)
            .with_history(history)
            .with_long_term_memory(long_term)
    }

    /// Cache the context for one session timeout. Failures are logged.
    pub async fn save_session_context(&self, session_id: &str, context: &Context) {
        if let Err(e) = self
            .sessions
            .set(session_id, context, self.session_ttl_secs)
            .await
        {
            warn!(error = %e, session_id, "Failed to save session context");
        }
    }

    pub async fn save_record(&self, user_id: i64, key: &str, value: &Value) -> Result<()> {
        self.store.upsert(user_id, key, &value.to_string()).await?;
        info!(user_id, key, "Memory saved");
        Ok(())
    }

    pub async fn delete_record(&self, user_id: i64, key: &str) -> Result<u64> {
        let deleted = self.store.delete(user_id, key).await?;
        info!(user_id, key, deleted, "Memory deleted");
        Ok(deleted)
    }

    pub async fn delete_all(&self, user_id: i64) -> Result<u64> {
        let deleted = self.store.delete_all(user_id).await?;
        info!(user_id, deleted, "All memories deleted");
        Ok(deleted)
    }

    /// Save the tail of the conversation plus the session context under a
    /// timestamped `conversation_*` key. Returns the key and stored value.
    pub async fn save_conversation_snapshot(
        &self,
        user_id: i64,
        messages: &[ConversationMessage],
        context: &Context,
    ) -> Result<(String, Value)> {
        let key = format!("conversation_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let turns: Vec<&ConversationMessage> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .collect();
        let start = turns.len().saturating_sub(self.snapshot_messages);
        let tail: Vec<Value> = turns[start..]
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();
        let mut context = context.clone();
        context.remove(HISTORY);
        let value = json!({"messages": tail, "context": context});

        self.save_record(user_id, &key, &value).await?;
        Ok((key, value))
    }

    /// Pipeline stage: persist bounded history and session context.
    ///
    /// Never writes long-term memory; durable writes belong to the executor.
    pub async fn save(&self, state: AgentState) -> AgentState {
        let Some(session_id) = state.session_id.clone() else {
            return state;
        };

        let history = self.bounded_history(&state.messages);
        let mut context = state.persistable_context();
        match serde_json::to_value(&history) {
            Ok(value) => {
                context.insert(HISTORY.to_string(), value);
            }
            Err(e) => warn!(error = %e, "Failed to encode history"),
        }

        self.save_session_context(&session_id, &context).await;
        state
    }

    fn bounded_history<'a>(&self, messages: &'a [ConversationMessage]) -> &'a [ConversationMessage] {
        let start = messages.len().saturating_sub(self.history_capacity);
        &messages[start..]
    }
}

fn restore_history(context: &Context) -> Vec<ConversationMessage> {
    match context.get(HISTORY) {
        None => Vec::new(),
        Some(value) => match serde_json::from_value::<Vec<ConversationMessage>>(value.clone()) {
            Ok(history) => history
                .into_iter()
                .filter(|m| m.role != MessageRole::System)
                .collect(),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable session history");
                Vec::new()
            }
        },
    }
}
