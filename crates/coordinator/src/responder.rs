//! Response generation.
//!
//! Builds the completion request for a turn (persona prompt, memory key
//! summary, a bounded history window, external snippets, the current message)
//! and converts every completion failure into a fallback reply.

use std::sync::Arc;

use async_trait::async_trait;
use mnemo_common::{MessageRole, MnemoError, Result};
use mnemo_llm::{ChatMessage, LlmClient, LlmConfig, LlmRequest, TokenStream};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::state::{AgentState, SEARCH_RESULTS};

/// Source of external text snippets relevant to a query.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn gather(&self, query: &str) -> Result<Vec<String>>;
}

pub struct ResponseGenerator {
    llm: Arc<dyn LlmClient>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    config: AgentConfig,
    provider: Option<Arc<dyn ContextProvider>>,
}

impl ResponseGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, llm_config: &LlmConfig, config: AgentConfig) -> Self {
        Self {
            llm,
            temperature: llm_config.temperature,
            max_tokens: llm_config.max_tokens,
            config,
            provider: None,
        }
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Pipeline stage: fetch external snippets when the request allows it.
    ///
    /// Results are cached in session context keyed by query, so a repeated
    /// question does not hit the provider again.
    pub async fn gather_context(&self, state: AgentState) -> AgentState {
        let Some(provider) = &self.provider else {
            return state;
        };
        if !state.allow_external_search || state.is_handled() {
            return state;
        }

        let query = state.current_message().to_string();
        let cached = state
            .context
            .get(SEARCH_RESULTS)
            .filter(|v| v.get("query").and_then(Value::as_str) == Some(query.as_str()))
            .is_some();
        if cached {
            debug!("Reusing cached external context");
            return state;
        }

        match provider.gather(&query).await {
            Ok(snippets) => {
                debug!(count = snippets.len(), "External context gathered");
                state.with_context_value(
                    SEARCH_RESULTS,
                    json!({"query": query, "snippets": snippets}),
                )
            }
            Err(e) => {
                warn!(error = %e, "External context lookup failed");
                state
            }
        }
    }

    pub fn build_request(&self, state: &AgentState) -> LlmRequest {
        let mut messages = Vec::new();

        if !state.long_term_memory.is_empty() {
            let keys: Vec<&str> = state
                .long_term_memory
                .keys()
                .take(self.config.memory_summary_keys)
                .map(String::as_str)
                .collect();
            messages.push(ChatMessage::system(format!(
                "User's long-term memories: [{}]",
                keys.join(", ")
            )));
        }

        let history: Vec<_> = state
            .history()
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .collect();
        let start = history.len().saturating_sub(self.config.history_window);
        messages.extend(history[start..].iter().map(|m| ChatMessage::from(*m)));

        if state.allow_external_search {
            if let Some(snippets) = self.snippets(state) {
                messages.push(ChatMessage::system(format!(
                    "Relevant external context:\n{snippets}"
                )));
            }
        }

        messages.push(ChatMessage::user(state.current_message()));

        LlmRequest {
            system_prompt: self.config.system_prompt.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    fn snippets(&self, state: &AgentState) -> Option<String> {
        let list = state
            .context
            .get(SEARCH_RESULTS)?
            .get("snippets")?
            .as_array()?
            .iter()
            .filter_map(Value::as_str)
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>();
        (!list.is_empty()).then(|| list.join("\n"))
    }

    /// Deterministic reply used when the completion service fails.
    pub fn fallback_text(&self, message: &str, error: &MnemoError) -> String {
        let detail = match error {
            MnemoError::Llm(detail) => detail.clone(),
            other => other.to_string(),
        };
        format!(
            "I received your message: '{message}'. I'm {}, your personal assistant. \
             (Note: completion service error: {detail})",
            self.config.assistant_name
        )
    }

    /// Pipeline stage: single-shot completion.
    pub async fn respond(&self, state: AgentState) -> AgentState {
        let request = self.build_request(&state);
        match self.llm.complete(request).await {
            Ok(response) => {
                debug!(model = %response.model, chars = response.content.len(), "Completion received");
                state.with_reply(response.content)
            }
            Err(e) => {
                warn!(error = %e, "Completion failed, using fallback reply");
                let text = self.fallback_text(state.current_message(), &e);
                state.with_reply(text)
            }
        }
    }

    pub async fn open_stream(&self, state: &AgentState) -> Result<TokenStream> {
        self.llm.stream(self.build_request(state)).await
    }
}
