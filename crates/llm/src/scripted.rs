//! Deterministic in-process completion client.
//!
//! Used by tests and by the `scripted` provider for offline runs. Scripted
//! outcomes are consumed in order; once the script runs out the client echoes
//! the last user message.

use std::collections::VecDeque;

use async_trait::async_trait;
use mnemo_common::{MnemoError, Result};
use parking_lot::Mutex;

use crate::client::{LlmClient, LlmRequest, LlmResponse, Role, TokenStream};

#[derive(Debug, Clone)]
pub enum Script {
    /// Complete (or stream, split on word boundaries) with this text.
    Reply(String),
    /// Stream exactly these fragments.
    Fragments(Vec<String>),
    /// Stream these fragments, then fail.
    FailAfter(Vec<String>, String),
    /// Fail before producing anything.
    Fail(String),
}

#[derive(Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, step: Script) -> Self {
        self.script.lock().push_back(step);
        self
    }

    pub fn push(&self, step: Script) {
        self.script.lock().push_back(step);
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn next_step(&self, request: &LlmRequest) -> Script {
        self.requests.lock().push(request.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Script::Reply(echo(request)))
    }
}

fn echo(request: &LlmRequest) -> String {
    let last_user = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("");
    format!("You said: {last_user}")
}

fn split_words(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let content = match self.next_step(&request) {
            Script::Reply(text) => text,
            Script::Fragments(parts) => parts.concat(),
            Script::FailAfter(_, error) | Script::Fail(error) => {
                return Err(MnemoError::Llm(error));
            }
        };
        Ok(LlmResponse {
            content,
            model: self.model_name().to_string(),
            usage: None,
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn stream(&self, request: LlmRequest) -> Result<TokenStream> {
        let (parts, failure) = match self.next_step(&request) {
            Script::Reply(text) => (split_words(&text), None),
            Script::Fragments(parts) => (parts, None),
            Script::FailAfter(parts, error) => (parts, Some(error)),
            Script::Fail(error) => return Err(MnemoError::Llm(error)),
        };
        let items = parts
            .into_iter()
            .map(Ok)
            .chain(failure.map(|e| Err(MnemoError::Llm(e))));
        Ok(Box::pin(futures::stream::iter(items)))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
