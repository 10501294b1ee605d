//! Safety check for deletions inferred from free-form text.
//!
//! The completion service is asked to classify the request into one of three
//! exact single-line forms. Its answer is untrusted input: anything that is not
//! exactly one of those forms, and any service error, becomes a refusal.

use std::sync::Arc;
use std::sync::LazyLock;

use mnemo_common::Context;
use mnemo_llm::{ChatMessage, LlmClient, LlmRequest};
use regex::{Regex, RegexSet};
use tracing::{debug, info, warn};

use crate::render::{render_value, truncate};

const DELETION_SYSTEM_PROMPT: &str = "You review requests to delete a user's saved memories.

Reply with exactly one line and nothing else, in one of these forms:
DELETE_ALL
DELETE_KEY: <key>
REFUSE: <short reason>

Use DELETE_ALL only when the user clearly asks to delete every saved memory.
Use DELETE_KEY only with a key copied exactly from the list you are given.
If the request is ambiguous, names no memory, or is not a deletion request, REFUSE.";

/// Most records shown to the classifier.
const MAX_LISTED: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionDecision {
    DeleteAll,
    DeleteKey(String),
    Refuse(String),
}

/// Whole-message imperatives only: the phrase must be the entire request.
static DELETE_ALL_PHRASES: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"^(please\s+)?(delete|remove|erase|wipe|purge|forget)\s+(all|every)\s+(of\s+)?(my\s+|your\s+|the\s+)?(saved\s+|stored\s+)?(memories|memory|notes|records)(\s+(now|please))?\s*[.!]*$",
        r"^(please\s+)?(delete|remove|erase|wipe|purge|forget)\s+everything(\s+(you\s+(know|remember|have\s+saved)|about\s+me))*(\s+(now|please))?\s*[.!]*$",
    ])
    .unwrap()
});

static NEGATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(don['’]?t|do\s+not|never|not)\b").unwrap());

static QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\?|^(how|can|could|would|should|what|why|where|when|is|are|do|does|did)\b|\bway\s+to\b",
    )
    .unwrap()
});

/// Unambiguous "delete all/everything" imperative with no negation or question.
pub fn is_explicit_delete_all(message: &str) -> bool {
    let lower = message.trim().to_lowercase();
    DELETE_ALL_PHRASES.is_match(&lower) && !NEGATION.is_match(&lower) && !QUESTION.is_match(&lower)
}

/// Parse a classifier reply. `known_keys` are the user's existing keys.
pub fn parse_decision(raw: &str, known_keys: &[&str]) -> DeletionDecision {
    let mut lines = raw
        .trim()
        .trim_matches('`')
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty());

    let line = match (lines.next(), lines.next()) {
        (Some(line), None) => line,
        _ => return unrecognized(raw),
    };

    if line == "DELETE_ALL" {
        return DeletionDecision::DeleteAll;
    }
    if let Some(key) = line.strip_prefix("DELETE_KEY:") {
        let key = key.trim();
        return if known_keys.contains(&key) {
            DeletionDecision::DeleteKey(key.to_string())
        } else {
            DeletionDecision::Refuse(format!("there is no saved memory named '{key}'"))
        };
    }
    if let Some(reason) = line.strip_prefix("REFUSE:") {
        let reason = reason.trim();
        return DeletionDecision::Refuse(if reason.is_empty() {
            "the request was not clear enough".to_string()
        } else {
            reason.to_string()
        });
    }
    unrecognized(raw)
}

fn unrecognized(raw: &str) -> DeletionDecision {
    warn!(
        reply = %raw.chars().take(200).collect::<String>(),
        "Unrecognized deletion classification, refusing"
    );
    DeletionDecision::Refuse("I couldn't tell exactly what to delete".to_string())
}

pub struct DeletionCheck {
    llm: Arc<dyn LlmClient>,
    preview_chars: usize,
}

impl DeletionCheck {
    pub fn new(llm: Arc<dyn LlmClient>, preview_chars: usize) -> Self {
        Self { llm, preview_chars }
    }

    /// Decide what a natural-language deletion request may remove.
    pub async fn decide(&self, message: &str, memories: &Context) -> DeletionDecision {
        if is_explicit_delete_all(message) {
            info!("Explicit delete-all phrasing, skipping classification");
            return DeletionDecision::DeleteAll;
        }
        if memories.is_empty() {
            return DeletionDecision::Refuse("you have no saved memories".to_string());
        }

        let request = self.build_request(message, memories);
        match self.llm.complete(request).await {
            Ok(response) => {
                let keys: Vec<&str> = memories.keys().map(String::as_str).collect();
                let decision = parse_decision(&response.content, &keys);
                debug!(?decision, "Deletion classified");
                decision
            }
            Err(e) => {
                warn!(error = %e, "Deletion classification failed, refusing");
                DeletionDecision::Refuse(
                    "I couldn't confirm which memory you meant".to_string(),
                )
            }
        }
    }

    fn build_request(&self, message: &str, memories: &Context) -> LlmRequest {
        let mut listing = String::from("Saved memories:\n");
        for (key, value) in memories.iter().take(MAX_LISTED) {
            let preview = truncate(&render_value(value), self.preview_chars);
            listing.push_str(&format!("- {key}: {preview}\n"));
        }
        if memories.len() > MAX_LISTED {
            listing.push_str(&format!("- ...and {} more\n", memories.len() - MAX_LISTED));
        }
        listing.push_str(&format!("\nUser message: {message}"));

        LlmRequest {
            system_prompt: Some(DELETION_SYSTEM_PROMPT.to_string()),
            messages: vec![ChatMessage::user(listing)],
            temperature: Some(0.0),
            max_tokens: Some(60),
        }
    }
}
