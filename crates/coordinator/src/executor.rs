//! Command execution.
//!
//! Turns a detected command into a store operation and a user-facing reply.
//! The first detected tag owns the turn; the rest are left to the response
//! stage. Store failures become `Failed` replies, never pipeline errors.

use std::sync::Arc;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::deletion::{DeletionCheck, DeletionDecision};
use crate::detector::CommandTag;
use crate::memory_io::MemoryManager;
use crate::render::{render_value, truncate};
use crate::state::{AgentState, COMMAND_HANDLED, PENDING_CLEAR};

static KEY_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^([A-Za-z0-9_.\-]+)\s*[:=]\s*(\S.*)$").unwrap());

static CONFIRM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bconfirm(ed)?\b").unwrap());

/// What the executor will do this turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    Save { argument: Option<String> },
    Recall { key: Option<String> },
    DeleteKey { key: Option<String> },
    /// Free-form deletion request; goes through the safety check.
    InferredDelete,
    Clear { confirmed: bool },
    Help,
    Unknown { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Done,
    NotFound,
    NeedsConfirmation,
    Refused,
    Usage,
    Unknown,
    Failed,
    Info,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub action: CommandAction,
    pub status: ReplyStatus,
    pub text: String,
    pub deleted: Option<u64>,
    pub saved_key: Option<String>,
}

impl CommandReply {
    fn new(action: &CommandAction, status: ReplyStatus, text: impl Into<String>) -> Self {
        Self {
            action: action.clone(),
            status,
            text: text.into(),
            deleted: None,
            saved_key: None,
        }
    }

    fn deleted(mut self, count: u64) -> Self {
        self.deleted = Some(count);
        self
    }

    fn saved(mut self, key: impl Into<String>) -> Self {
        self.saved_key = Some(key.into());
        self
    }
}

pub struct CommandExecutor {
    memory: Arc<MemoryManager>,
    deletion: DeletionCheck,
    config: AgentConfig,
    default_user_id: i64,
}

impl CommandExecutor {
    pub fn new(
        memory: Arc<MemoryManager>,
        deletion: DeletionCheck,
        config: AgentConfig,
        default_user_id: i64,
    ) -> Self {
        Self {
            memory,
            deletion,
            config,
            default_user_id,
        }
    }

    /// Pick the action for this turn, if any.
    pub fn plan(&self, state: &AgentState) -> Option<CommandAction> {
        if let Some(explicit) = &state.explicit_command {
            let argument = explicit.argument.clone();
            return Some(match explicit.tag() {
                Some(CommandTag::Remember) => CommandAction::Save { argument },
                Some(CommandTag::Recall) => CommandAction::Recall { key: argument },
                Some(CommandTag::Delete) => CommandAction::DeleteKey { key: argument },
                Some(CommandTag::Clear) => CommandAction::Clear {
                    confirmed: argument.is_some_and(|a| is_confirmation(&a)),
                },
                Some(CommandTag::Help) => CommandAction::Help,
                None => CommandAction::Unknown {
                    name: explicit.name.clone(),
                },
            });
        }

        let action = match state.detected_commands.first()? {
            CommandTag::Remember => CommandAction::Save { argument: None },
            CommandTag::Recall => CommandAction::Recall { key: None },
            CommandTag::Delete => CommandAction::InferredDelete,
            CommandTag::Clear => CommandAction::Clear {
                confirmed: is_confirmation(state.current_message()),
            },
            CommandTag::Help => CommandAction::Help,
        };
        Some(action)
    }

    /// Pipeline stage. Returns the state and the reply when a command ran.
    pub async fn execute(&self, state: AgentState) -> (AgentState, Option<CommandReply>) {
        let Some(action) = self.plan(&state) else {
            return (state.with_flag(PENDING_CLEAR, false), None);
        };
        let user_id = state.user_id.unwrap_or(self.default_user_id);

        let (state, reply) = match &action {
            CommandAction::Save { argument } => self.save(state, user_id, &action, argument.as_deref()).await,
            CommandAction::Recall { key } => {
                let reply = self.recall(&state, &action, key.as_deref());
                (state, reply)
            }
            CommandAction::DeleteKey { key } => match key {
                Some(key) => self.delete_key(state, user_id, &action, key).await,
                None => (state, self.delete_usage(&action)),
            },
            CommandAction::InferredDelete => self.inferred_delete(state, user_id, &action).await,
            CommandAction::Clear { confirmed } => self.clear(state, user_id, &action, *confirmed).await,
            CommandAction::Help => (state, CommandReply::new(&action, ReplyStatus::Info, self.help_text())),
            CommandAction::Unknown { name } => {
                let text = format!(
                    "Unknown command '{p}{name}'. Type {p}help to see what I can do.",
                    p = self.config.command_prefix
                );
                (state, CommandReply::new(&action, ReplyStatus::Unknown, text))
            }
        };

        info!(
            session_id = state.session_id.as_deref().unwrap_or(""),
            user_id,
            action = ?reply.action,
            status = ?reply.status,
            "Command executed"
        );

        let state = if matches!(action, CommandAction::Clear { .. }) {
            state
        } else {
            state.with_flag(PENDING_CLEAR, false)
        };
        let state = state
            .with_flag(COMMAND_HANDLED, true)
            .with_reply(reply.text.clone());
        (state, Some(reply))
    }

    async fn save(
        &self,
        mut state: AgentState,
        user_id: i64,
        action: &CommandAction,
        argument: Option<&str>,
    ) -> (AgentState, CommandReply) {
        let (key, value, snapshot) = match argument {
            Some(arg) => match KEY_VALUE.captures(arg) {
                Some(caps) => (caps[1].to_string(), Value::String(caps[2].trim().to_string()), false),
                None => (
                    format!("note_{}", Utc::now().format("%Y%m%d_%H%M%S")),
                    Value::String(arg.to_string()),
                    false,
                ),
            },
            None => {
                let result = self
                    .memory
                    .save_conversation_snapshot(user_id, &state.messages, &state.persistable_context())
                    .await;
                match result {
                    Ok((key, value)) => (key, value, true),
                    Err(e) => return (state, save_failed(action, &e)),
                }
            }
        };

        if !snapshot {
            if let Err(e) = self.memory.save_record(user_id, &key, &value).await {
                return (state, save_failed(action, &e));
            }
        }
        state.long_term_memory.insert(key.clone(), value);

        let text = if snapshot {
            format!("I've saved our conversation to your long-term memory as '{key}'.")
        } else {
            format!("Saved to long-term memory as '{key}'.")
        };
        (state, CommandReply::new(action, ReplyStatus::Done, text).saved(key))
    }

    fn recall(&self, state: &AgentState, action: &CommandAction, key: Option<&str>) -> CommandReply {
        let memories = &state.long_term_memory;
        if let Some(key) = key {
            return match memories.get(key) {
                Some(value) => CommandReply::new(
                    action,
                    ReplyStatus::Done,
                    format!("Memory '{key}': {}", render_value(value)),
                ),
                None => CommandReply::new(
                    action,
                    ReplyStatus::NotFound,
                    format!("I don't have a memory named '{key}'."),
                ),
            };
        }

        if memories.is_empty() {
            return CommandReply::new(
                action,
                ReplyStatus::Info,
                "I don't have any memories stored about you yet.",
            );
        }

        let mut text = String::from("Here's what I remember about you:");
        for (key, value) in memories.iter().take(self.config.recall_preview_limit) {
            let preview = truncate(&render_value(value), self.config.recall_preview_chars);
            text.push_str(&format!("\n- {key}: {preview}"));
        }
        let hidden = memories.len().saturating_sub(self.config.recall_preview_limit);
        if hidden > 0 {
            text.push_str(&format!("\n...and {hidden} more."));
        }
        CommandReply::new(action, ReplyStatus::Done, text)
    }

    fn delete_usage(&self, action: &CommandAction) -> CommandReply {
        let p = self.config.command_prefix;
        CommandReply::new(
            action,
            ReplyStatus::Usage,
            format!(
                "Tell me which memory to delete, for example `{p}delete favorite_color`. \
                 Use `{p}recall` to see your saved keys."
            ),
        )
    }

    async fn delete_key(
        &self,
        mut state: AgentState,
        user_id: i64,
        action: &CommandAction,
        key: &str,
    ) -> (AgentState, CommandReply) {
        let reply = match self.memory.delete_record(user_id, key).await {
            Ok(0) => CommandReply::new(
                action,
                ReplyStatus::NotFound,
                format!("No memory named '{key}' was found, so nothing was deleted."),
            )
            .deleted(0),
            Ok(count) => {
                state.long_term_memory.remove(key);
                CommandReply::new(action, ReplyStatus::Done, format!("Deleted memory '{key}'."))
                    .deleted(count)
            }
            Err(e) => {
                warn!(error = %e, user_id, key, "Delete failed");
                CommandReply::new(
                    action,
                    ReplyStatus::Failed,
                    format!("I couldn't delete '{key}' right now ({e})."),
                )
            }
        };
        (state, reply)
    }

    async fn delete_everything(
        &self,
        mut state: AgentState,
        user_id: i64,
        action: &CommandAction,
    ) -> (AgentState, Result<u64, CommandReply>) {
        match self.memory.delete_all(user_id).await {
            Ok(count) => {
                state.long_term_memory.clear();
                (state, Ok(count))
            }
            Err(e) => {
                warn!(error = %e, user_id, "Delete-all failed");
                let reply = CommandReply::new(
                    action,
                    ReplyStatus::Failed,
                    format!("I couldn't delete your memories right now ({e}). Nothing was removed."),
                );
                (state, Err(reply))
            }
        }
    }

    async fn inferred_delete(
        &self,
        state: AgentState,
        user_id: i64,
        action: &CommandAction,
    ) -> (AgentState, CommandReply) {
        let decision = self
            .deletion
            .decide(state.current_message(), &state.long_term_memory)
            .await;

        match decision {
            DeletionDecision::DeleteAll => {
                let (state, result) = self.delete_everything(state, user_id, action).await;
                let reply = match result {
                    Ok(0) => CommandReply::new(
                        action,
                        ReplyStatus::Info,
                        "You don't have any saved memories to delete.",
                    )
                    .deleted(0),
                    Ok(count) => CommandReply::new(
                        action,
                        ReplyStatus::Done,
                        format!("Deleted all {count} of your saved memories."),
                    )
                    .deleted(count),
                    Err(reply) => reply,
                };
                (state, reply)
            }
            DeletionDecision::DeleteKey(key) => self.delete_key(state, user_id, action, &key).await,
            DeletionDecision::Refuse(reason) => {
                let p = self.config.command_prefix;
                let reply = CommandReply::new(
                    action,
                    ReplyStatus::Refused,
                    format!(
                        "I didn't delete anything: {reason}. \
                         To remove a specific memory, use `{p}delete <key>`."
                    ),
                );
                (state, reply)
            }
        }
    }

    async fn clear(
        &self,
        state: AgentState,
        user_id: i64,
        action: &CommandAction,
        confirmed: bool,
    ) -> (AgentState, CommandReply) {
        if confirmed && state.flag(PENDING_CLEAR) {
            let (state, result) = self.delete_everything(state, user_id, action).await;
            let state = state.with_flag(PENDING_CLEAR, false);
            return match result {
                Ok(count) => (
                    state.without_history(),
                    CommandReply::new(
                        action,
                        ReplyStatus::Done,
                        format!("Cleared {count} saved memories and reset our conversation."),
                    )
                    .deleted(count),
                ),
                Err(reply) => (state, reply),
            };
        }

        let p = self.config.command_prefix;
        let count = state.long_term_memory.len();
        let reply = CommandReply::new(
            action,
            ReplyStatus::NeedsConfirmation,
            format!(
                "This will permanently delete all {count} of your saved memories and reset our \
                 conversation. Reply `{p}clear confirm` to proceed."
            ),
        );
        (state.with_flag(PENDING_CLEAR, true), reply)
    }

    fn help_text(&self) -> String {
        let p = self.config.command_prefix;
        format!(
            "I'm {name}. Here's what I can do:\n\
             - `{p}remember key=value` saves a fact; `{p}remember <text>` saves a note; \
             `{p}remember` alone saves our recent conversation\n\
             - `{p}recall` lists what I remember; `{p}recall <key>` shows one memory\n\
             - `{p}delete <key>` removes one memory\n\
             - `{p}clear` erases all memories and resets our conversation (asks to confirm)\n\
             - `{p}help` shows this message\n\
             You can also just ask, for example \"remember this\" or \"what do you remember about me?\"",
            name = self.config.assistant_name
        )
    }
}

fn is_confirmation(text: &str) -> bool {
    CONFIRM.is_match(&text.to_lowercase())
}

fn save_failed(action: &CommandAction, error: &mnemo_common::MnemoError) -> CommandReply {
    warn!(error = %error, "Save failed");
    CommandReply::new(
        action,
        ReplyStatus::Failed,
        format!("I couldn't save that right now ({error}). Nothing was stored."),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::detector::CommandDetector;
    use mnemo_llm::{Script, ScriptedLlmClient};
    use mnemo_memory::{InMemorySessionStore, InMemoryStore, MemoryStore, UnavailableStore};
    use serde_json::json;

    struct Fixture {
        executor: CommandExecutor,
        store: Arc<InMemoryStore>,
        llm: Arc<ScriptedLlmClient>,
    }

    fn fixture() -> Fixture {
        fixture_with(ScriptedLlmClient::new())
    }

    fn fixture_with(llm: ScriptedLlmClient) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let llm = Arc::new(llm);
        let agent = AgentConfig::default();
        let memory = Arc::new(MemoryManager::new(
            Arc::new(InMemorySessionStore::new()),
            store.clone(),
            &SessionConfig::default(),
            &agent,
        ));
        let executor = CommandExecutor::new(memory, DeletionCheck::new(llm.clone(), 80), agent, 1);
        Fixture { executor, store, llm }
    }

    fn state(message: &str) -> AgentState {
        let detection = CommandDetector::default().detect(message);
        AgentState::new(message)
            .with_session("s".into(), 1, false)
            .with_detection(detection)
    }

    async fn seed(store: &InMemoryStore, key: &str, value: Value) {
        store.upsert(1, key, &value.to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn plain_chat_is_not_handled() {
        let f = fixture();
        let (state, reply) = f
            .executor
            .execute(state("hello").with_flag(PENDING_CLEAR, true))
            .await;
        assert!(reply.is_none());
        assert!(!state.is_handled());
        assert!(!state.flag(PENDING_CLEAR));
    }

    #[tokio::test]
    async fn save_key_value() {
        let f = fixture();
        let (state, reply) = f.executor.execute(state("/remember favorite_color = blue")).await;
        let reply = reply.unwrap();
        assert_eq!(reply.status, ReplyStatus::Done);
        assert_eq!(reply.saved_key.as_deref(), Some("favorite_color"));
        assert!(state.is_handled());
        assert_eq!(state.long_term_memory["favorite_color"], json!("blue"));

        let record = f.store.get(1, "favorite_color").await.unwrap().unwrap();
        assert_eq!(record.value, r#""blue""#);
    }

    #[tokio::test]
    async fn save_colon_form_and_free_note() {
        let f = fixture();
        let (_, reply) = f.executor.execute(state("/save dentist: Tuesday 3pm")).await;
        assert_eq!(reply.unwrap().saved_key.as_deref(), Some("dentist"));

        let (_, reply) = f.executor.execute(state("/remember buy more coffee")).await;
        let key = reply.unwrap().saved_key.unwrap();
        assert!(key.starts_with("note_"), "{key}");
    }

    #[tokio::test]
    async fn natural_remember_saves_snapshot() {
        let f = fixture();
        let (state, reply) = f
            .executor
            .execute(state("Please remember this: my sister is called Ana"))
            .await;
        let reply = reply.unwrap();
        let key = reply.saved_key.unwrap();
        assert!(key.starts_with("conversation_"));
        let saved = &state.long_term_memory[&key];
        assert_eq!(
            saved["messages"][0]["content"],
            "Please remember this: my sister is called Ana"
        );
    }

    #[tokio::test]
    async fn save_failure_is_reported() {
        let agent = AgentConfig::default();
        let memory = Arc::new(MemoryManager::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(UnavailableStore),
            &SessionConfig::default(),
            &agent,
        ));
        let executor = CommandExecutor::new(
            memory,
            DeletionCheck::new(Arc::new(ScriptedLlmClient::new()), 80),
            agent,
            1,
        );
        let (state, reply) = executor.execute(state("/remember k=v")).await;
        assert_eq!(reply.unwrap().status, ReplyStatus::Failed);
        assert!(state.long_term_memory.is_empty());
    }

    #[tokio::test]
    async fn recall_lists_with_preview_limit() {
        let f = fixture();
        let mut s = state("/recall");
        for i in 0..7 {
            s.long_term_memory.insert(format!("k{i}"), json!(format!("v{i}")));
        }
        let (_, reply) = f.executor.execute(s).await;
        let text = reply.unwrap().text;
        assert!(text.contains("- k0: v0"));
        assert!(text.contains("- k4: v4"));
        assert!(!text.contains("k5"));
        assert!(text.ends_with("...and 2 more."));
    }

    #[tokio::test]
    async fn recall_empty_and_missing_key() {
        let f = fixture();
        let (_, reply) = f.executor.execute(state("what do you remember about me?")).await;
        assert_eq!(reply.unwrap().status, ReplyStatus::Info);

        let (_, reply) = f.executor.execute(state("/recall nothing_here")).await;
        assert_eq!(reply.unwrap().status, ReplyStatus::NotFound);
    }

    #[tokio::test]
    async fn recall_truncates_long_values() {
        let f = fixture();
        let mut s = state("/recall");
        s.long_term_memory.insert("essay".into(), json!("x".repeat(500)));
        let (_, reply) = f.executor.execute(s).await;
        let text = reply.unwrap().text;
        assert!(text.contains(&format!("{}...", "x".repeat(200))));
        assert!(!text.contains(&"x".repeat(201)));
    }

    #[tokio::test]
    async fn delete_existing_and_missing_keys() {
        let f = fixture();
        seed(&f.store, "favorite_color", json!("blue")).await;

        let mut s = state("/delete favorite_color");
        s.long_term_memory.insert("favorite_color".into(), json!("blue"));
        let (s, reply) = f.executor.execute(s).await;
        let reply = reply.unwrap();
        assert_eq!(reply.status, ReplyStatus::Done);
        assert_eq!(reply.deleted, Some(1));
        assert!(s.long_term_memory.is_empty());

        let (_, reply) = f.executor.execute(state("/delete favorite_color")).await;
        let reply = reply.unwrap();
        assert_eq!(reply.status, ReplyStatus::NotFound);
        assert_eq!(reply.deleted, Some(0));
    }

    #[tokio::test]
    async fn delete_without_key_is_usage() {
        let f = fixture();
        let (_, reply) = f.executor.execute(state("/delete")).await;
        assert_eq!(reply.unwrap().status, ReplyStatus::Usage);
    }

    #[tokio::test]
    async fn explicit_delete_all_is_a_literal_key() {
        let f = fixture();
        seed(&f.store, "a", json!(1)).await;
        let (_, reply) = f.executor.execute(state("/delete all")).await;
        assert_eq!(reply.unwrap().status, ReplyStatus::NotFound);
        assert_eq!(f.store.query_by_user(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn inferred_delete_all_fast_path() {
        let f = fixture();
        seed(&f.store, "a", json!(1)).await;
        seed(&f.store, "b", json!(2)).await;
        let (_, reply) = f.executor.execute(state("delete all my memories")).await;
        let reply = reply.unwrap();
        assert_eq!(reply.action, CommandAction::InferredDelete);
        assert_eq!(reply.deleted, Some(2));
        assert_eq!(f.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn inferred_delete_refusal_deletes_nothing() {
        let f = fixture_with(
            ScriptedLlmClient::new().then(Script::Reply("I will delete everything for you!".into())),
        );
        seed(&f.store, "dentist", json!("Tue")).await;
        let mut s = state("delete my saved dentist thing or whatever");
        s.long_term_memory.insert("dentist".into(), json!("Tue"));
        let (_, reply) = f.executor.execute(s).await;
        assert_eq!(reply.unwrap().status, ReplyStatus::Refused);
        assert_eq!(f.store.query_by_user(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn inferred_delete_single_key() {
        let f = fixture_with(ScriptedLlmClient::new().then(Script::Reply("DELETE_KEY: dentist".into())));
        seed(&f.store, "dentist", json!("Tue")).await;
        seed(&f.store, "cat", json!("Miso")).await;
        let mut s = state("forget the dentist memory");
        s.long_term_memory.insert("dentist".into(), json!("Tue"));
        s.long_term_memory.insert("cat".into(), json!("Miso"));
        let (s, reply) = f.executor.execute(s).await;
        assert_eq!(reply.unwrap().deleted, Some(1));
        assert!(s.long_term_memory.contains_key("cat"));
        assert!(f.store.get(1, "dentist").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_needs_two_turns() {
        let f = fixture();
        seed(&f.store, "a", json!(1)).await;

        // Confirmation with nothing pending only asks again.
        let (s, reply) = f.executor.execute(state("/clear confirm")).await;
        assert_eq!(reply.unwrap().status, ReplyStatus::NeedsConfirmation);
        assert!(s.flag(PENDING_CLEAR));
        assert_eq!(f.store.query_by_user(1).await.unwrap().len(), 1);

        let next = state("/clear confirm").with_context(s.persistable_context());
        let (s, reply) = f.executor.execute(next).await;
        let reply = reply.unwrap();
        assert_eq!(reply.status, ReplyStatus::Done);
        assert_eq!(reply.deleted, Some(1));
        assert!(!s.flag(PENDING_CLEAR));
        assert!(f.store.query_by_user(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unrelated_turn_drops_pending_clear() {
        let f = fixture();
        let pending = state("/recall").with_flag(PENDING_CLEAR, true);
        let (s, _) = f.executor.execute(pending).await;
        assert!(!s.flag(PENDING_CLEAR));
    }

    #[tokio::test]
    async fn help_and_unknown() {
        let f = fixture();
        let (_, reply) = f.executor.execute(state("/help")).await;
        let reply = reply.unwrap();
        assert_eq!(reply.status, ReplyStatus::Info);
        assert!(reply.text.contains("/recall"));

        let (s, reply) = f.executor.execute(state("/teleport home")).await;
        let reply = reply.unwrap();
        assert_eq!(reply.status, ReplyStatus::Unknown);
        assert!(reply.text.contains("/teleport"));
        assert!(s.is_handled());
    }

    #[tokio::test]
    async fn first_tag_owns_the_turn() {
        let f = fixture();
        let (_, reply) = f
            .executor
            .execute(state("help, what can you remember? also remember this"))
            .await;
        assert!(matches!(reply.unwrap().action, CommandAction::Save { argument: None }));
    }
}
