//! End-to-end pipeline scenarios.
//!
//! Stores are in-process and the completion service is scripted, so every
//! test is deterministic and needs no network.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use mnemo_common::{AgentRequest, MnemoError, StreamChunk};
use mnemo_coordinator::{Coordinator, MnemoConfig};
use mnemo_llm::{Script, ScriptedLlmClient};
use mnemo_memory::{
    FallbackSessionStore, InMemorySessionStore, InMemoryStore, MemoryStore, SessionStore,
    UnavailableStore,
};

struct Harness {
    coordinator: Arc<Coordinator>,
    store: Arc<InMemoryStore>,
    sessions: Arc<InMemorySessionStore>,
    llm: Arc<ScriptedLlmClient>,
}

fn harness(llm: ScriptedLlmClient) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let llm = Arc::new(llm);
    let coordinator = Coordinator::new(
        MnemoConfig::default(),
        sessions.clone(),
        store.clone(),
        store.clone(),
        llm.clone(),
    );
    Harness {
        coordinator: Arc::new(coordinator),
        store,
        sessions,
        llm,
    }
}

impl Harness {
    /// Send a message in session `s` and return the reply text.
    async fn say(&self, message: &str) -> String {
        self.coordinator
            .run(AgentRequest::new(message).with_session("s"))
            .await
            .unwrap()
            .response
    }

    async fn record_count(&self) -> usize {
        self.store.query_by_user(1).await.unwrap().len()
    }

    async fn stream(&self, message: &str) -> Vec<StreamChunk> {
        self.coordinator
            .clone()
            .run_stream(AgentRequest::new(message).with_session("s"))
            .unwrap()
            .collect()
            .await
    }
}

fn assert_concatenation(chunks: &[StreamChunk]) -> String {
    let (last, tokens) = chunks.split_last().unwrap();
    assert!(last.is_complete);
    assert!(tokens.iter().all(|c| !c.is_complete));
    let joined: String = tokens.iter().map(|c| c.token.as_str()).collect();
    assert_eq!(last.final_response.as_deref(), Some(joined.as_str()));
    joined
}

// ============================================================================
// Plain conversation
// ============================================================================

#[tokio::test]
async fn test_plain_chat_creates_session() {
    let h = harness(ScriptedLlmClient::new());
    let response = h
        .coordinator
        .run(AgentRequest::new("  hello  "))
        .await
        .unwrap();
    assert_eq!(response.response, "You said: hello");
    assert_eq!(response.user_id, Some(1));
    assert!(uuid_like(&response.session_id));
    assert!(!response.context.contains_key("history"));
}

fn uuid_like(id: &str) -> bool {
    id.len() == 36 && id.chars().filter(|c| *c == '-').count() == 4
}

#[tokio::test]
async fn test_history_window_reaches_completion_service() {
    let h = harness(ScriptedLlmClient::new());
    h.say("my name is Sam").await;
    h.say("what's my name?").await;

    let requests = h.llm.requests();
    let second: Vec<&str> = requests[1]
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(
        second,
        vec!["my name is Sam", "You said: my name is Sam", "what's my name?"]
    );
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let h = harness(ScriptedLlmClient::new());
    let err = h.coordinator.run(AgentRequest::new("   ")).await.unwrap_err();
    assert!(matches!(err, MnemoError::Validation(_)));
    assert!(h
        .coordinator
        .clone()
        .run_stream(AgentRequest::new(""))
        .is_err());
}

#[tokio::test]
async fn test_completion_failure_still_replies() {
    let h = harness(ScriptedLlmClient::new().then(Script::Fail("upstream 503".into())));
    let reply = h.say("are you there?").await;
    assert!(reply.starts_with("I received your message: 'are you there?'"));
    assert!(reply.contains("upstream 503"));
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_explicit_command_is_authoritative() {
    let h = harness(ScriptedLlmClient::new());
    let reply = h.say("/recall remember this and delete all memories").await;
    assert!(reply.contains("I don't have a memory named"), "{reply}");
    assert_eq!(h.record_count().await, 0);
    assert_eq!(h.llm.call_count(), 0);
}

#[tokio::test]
async fn test_remember_intent_saves_and_owns_the_turn() {
    let h = harness(ScriptedLlmClient::new());
    h.say("I adopted a cat called Miso").await;
    assert_eq!(h.record_count().await, 0);

    let reply = h.say("please remember that").await;
    assert!(reply.contains("conversation_"), "{reply}");
    assert_eq!(h.llm.call_count(), 1);

    let records = h.store.query_by_user(1).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].value.contains("I adopted a cat called Miso"));
}

#[tokio::test]
async fn test_plain_chat_never_writes_long_term_memory() {
    let h = harness(ScriptedLlmClient::new());
    for msg in ["hi", "I remember when we went to Rome", "how do I delete a git branch"] {
        h.say(msg).await;
    }
    assert_eq!(h.record_count().await, 0);
}

#[tokio::test]
async fn test_save_then_recall_round_trip() {
    let h = harness(ScriptedLlmClient::new());
    h.say("/remember favorite_color = deep blue").await;
    let reply = h.say("/recall favorite_color").await;
    assert_eq!(reply, "Memory 'favorite_color': deep blue");

    let listing = h.say("what do you remember about me?").await;
    assert!(listing.contains("- favorite_color: deep blue"), "{listing}");
}

#[tokio::test]
async fn test_delete_twice_reports_deleted_then_not_found() {
    let h = harness(ScriptedLlmClient::new());
    h.say("/remember dentist: Tuesday").await;

    let first = h.say("/delete dentist").await;
    assert_eq!(first, "Deleted memory 'dentist'.");
    let second = h.say("/delete dentist").await;
    assert!(second.starts_with("No memory named 'dentist' was found"));
}

#[tokio::test]
async fn test_delete_without_key_touches_nothing() {
    let h = harness(ScriptedLlmClient::new());
    h.say("/remember a=1").await;
    let reply = h.say("/delete").await;
    assert!(reply.contains("/delete favorite_color"));
    assert_eq!(h.record_count().await, 1);
}

#[tokio::test]
async fn test_clear_requires_confirmation() {
    let h = harness(ScriptedLlmClient::new());
    h.say("/remember a=1").await;
    h.say("/remember b=2").await;
    h.say("/remember c=3").await;

    let prompt = h.say("/clear").await;
    assert!(prompt.contains("all 3 of your saved memories"));
    assert_eq!(h.record_count().await, 3);

    let done = h.say("/clear confirm").await;
    assert!(done.starts_with("Cleared 3 saved memories"));
    assert_eq!(h.record_count().await, 0);
}

#[tokio::test]
async fn test_pending_clear_expires_after_another_turn() {
    let h = harness(ScriptedLlmClient::new());
    h.say("/remember a=1").await;
    h.say("/clear").await;
    h.say("what's the weather like?").await;

    let reply = h.say("/clear confirm").await;
    assert!(reply.contains("Reply `/clear confirm`"), "{reply}");
    assert_eq!(h.record_count().await, 1);
}

#[tokio::test]
async fn test_delete_all_phrase_skips_confirmation_and_classifier() {
    let h = harness(ScriptedLlmClient::new());
    h.say("/remember a=1").await;
    h.say("/remember b=2").await;

    let reply = h.say("delete all memories").await;
    assert_eq!(reply, "Deleted all 2 of your saved memories.");
    assert_eq!(h.record_count().await, 0);
    assert_eq!(h.llm.call_count(), 0);
}

#[tokio::test]
async fn test_question_about_deleting_notes_deletes_nothing() {
    let h = harness(
        ScriptedLlmClient::new()
            .then(Script::Reply("REFUSE: this is a question about another app".into()))
            .then(Script::Reply("REFUSE: this is a question about a phone".into())),
    );
    h.say("/remember a=1").await;
    h.say("/remember b=2").await;

    let reply = h.say("How do I delete all my notes in Evernote?").await;
    assert!(reply.starts_with("I didn't delete anything"), "{reply}");
    let reply = h
        .say("Is there a way to erase all of my saved notes on an iPhone?")
        .await;
    assert!(reply.starts_with("I didn't delete anything"), "{reply}");

    assert_eq!(h.record_count().await, 2);
    assert_eq!(h.llm.call_count(), 2);
}

#[tokio::test]
async fn test_remember_with_mentioned_deletion_saves_instead() {
    let h = harness(ScriptedLlmClient::new());
    h.say("/remember a=1").await;

    let reply = h
        .say("Remember this: I need to remove all my old records from the CRM tomorrow")
        .await;
    assert!(reply.contains("conversation_"), "{reply}");
    assert_eq!(h.llm.call_count(), 0);

    let records = h.store.query_by_user(1).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[1].value.contains("remove all my old records"));
}

#[tokio::test]
async fn test_ambiguous_delete_with_service_error_refuses() {
    let h = harness(ScriptedLlmClient::new().then(Script::Fail("timeout".into())));
    h.say("/remember dentist=Tuesday").await;
    h.say("/remember cat=Miso").await;

    let reply = h.say("can you delete that saved thing from before").await;
    assert!(reply.starts_with("I didn't delete anything"), "{reply}");
    assert_eq!(h.record_count().await, 2);
    assert_eq!(h.llm.call_count(), 1);
}

#[tokio::test]
async fn test_ambiguous_delete_with_unrecognized_answer_refuses() {
    let h = harness(ScriptedLlmClient::new().then(Script::Reply("Sure, deleting everything".into())));
    h.say("/remember dentist=Tuesday").await;

    let reply = h.say("erase my saved stuff maybe").await;
    assert!(reply.starts_with("I didn't delete anything"), "{reply}");
    assert_eq!(h.record_count().await, 1);
}

#[tokio::test]
async fn test_ai_selected_key_is_deleted() {
    let h = harness(ScriptedLlmClient::new().then(Script::Reply("DELETE_KEY: dentist".into())));
    h.say("/remember dentist=Tuesday").await;
    h.say("/remember cat=Miso").await;

    let reply = h.say("forget the dentist memory").await;
    assert_eq!(reply, "Deleted memory 'dentist'.");
    let remaining = h.store.query_by_user(1).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key, "cat");
}

// ============================================================================
// Degraded stores
// ============================================================================

#[tokio::test]
async fn test_unreachable_session_cache_falls_back() {
    let sessions = Arc::new(
        FallbackSessionStore::connect(Some("redis://127.0.0.1:1/0"), Duration::from_millis(300))
            .await,
    );
    assert!(sessions.is_fallback());
    assert!(sessions.get("anything").await.unwrap().is_none());

    let store = Arc::new(InMemoryStore::new());
    let coordinator = Coordinator::new(
        MnemoConfig::default(),
        sessions,
        store.clone(),
        store.clone(),
        Arc::new(ScriptedLlmClient::new()),
    );

    let response = coordinator.run(AgentRequest::new("hello")).await.unwrap();
    assert_eq!(response.response, "You said: hello");

    coordinator
        .run(AgentRequest::new("/remember city=Porto"))
        .await
        .unwrap();
    let record = store.get(1, "city").await.unwrap().unwrap();
    assert_eq!(record.value, r#""Porto""#);
}

#[tokio::test]
async fn test_unavailable_durable_store_degrades_to_default_user() {
    let store = Arc::new(UnavailableStore);
    let coordinator = Coordinator::new(
        MnemoConfig::default(),
        Arc::new(InMemorySessionStore::new()),
        store.clone(),
        store,
        Arc::new(ScriptedLlmClient::new()),
    );

    let response = coordinator
        .run(AgentRequest::new("hello").with_session("abc"))
        .await
        .unwrap();
    assert_eq!(response.session_id, "abc");
    assert_eq!(response.user_id, Some(1));
    assert_eq!(response.response, "You said: hello");

    let save = coordinator
        .run(AgentRequest::new("/remember k=v").with_session("abc"))
        .await
        .unwrap();
    assert!(save.response.starts_with("I couldn't save that right now"));
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn test_stream_concatenates_to_final_response() {
    let h = harness(ScriptedLlmClient::new().then(Script::Reply("Lisbon is lovely in May".into())));
    let chunks = h.stream("tell me about Lisbon").await;
    assert!(chunks.len() > 2);
    assert_eq!(assert_concatenation(&chunks), "Lisbon is lovely in May");
    assert!(chunks.iter().all(|c| c.session_id == "s"));
}

#[tokio::test]
async fn test_stream_saves_history_before_completion() {
    let h = harness(ScriptedLlmClient::new());
    h.stream("first question").await;

    let context = h.sessions.get("s").await.unwrap().unwrap();
    let history = context["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["content"], "You said: first question");
}

#[tokio::test]
async fn test_stream_interruption_is_appended() {
    let h = harness(ScriptedLlmClient::new().then(Script::FailAfter(
        vec!["Hello ".into(), "wor".into()],
        "connection reset".into(),
    )));
    let chunks = h.stream("hi").await;
    let text = assert_concatenation(&chunks);
    assert!(text.starts_with("Hello wor\n\n(Note: the response was interrupted:"));
    assert!(text.contains("connection reset"));
}

#[tokio::test]
async fn test_stream_open_failure_emits_fallback() {
    let h = harness(ScriptedLlmClient::new().then(Script::Fail("no route".into())));
    let chunks = h.stream("hi").await;
    assert_eq!(chunks.len(), 2);
    let text = assert_concatenation(&chunks);
    assert!(text.starts_with("I received your message: 'hi'."));
}

#[tokio::test]
async fn test_stream_command_turn() {
    let h = harness(ScriptedLlmClient::new());
    let chunks = h.stream("/remember color=green").await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(assert_concatenation(&chunks), "Saved to long-term memory as 'color'.");
    assert_eq!(h.record_count().await, 1);
    assert_eq!(h.llm.call_count(), 0);
}

#[tokio::test]
async fn test_dropped_stream_saves_nothing() {
    let h = harness(ScriptedLlmClient::new().then(Script::Reply("a long answer here".into())));
    {
        let mut stream = h
            .coordinator
            .clone()
            .run_stream(AgentRequest::new("question").with_session("s"))
            .unwrap();
        let first = stream.next().await.unwrap();
        assert!(!first.is_complete);
    }
    assert!(h.sessions.get("s").await.unwrap().is_none());
}
