use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mnemo_common::{MnemoError, Result};
use serde::{Deserialize, Serialize};

use crate::client::{LlmClient, LlmRequest, LlmResponse, TokenStream};
use crate::openai::OpenAiClient;
use crate::retry::{RetryConfig, RetryingClient};
use crate::scripted::ScriptedLlmClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `"openai"` for any OpenAI-compatible endpoint, `"scripted"` for offline echo.
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_concurrent_requests: usize,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            api_key: None,
            api_url: Some("https://api.groq.com/openai".to_string()),
            temperature: Some(0.7),
            max_tokens: Some(1000),
            max_concurrent_requests: 4,
            timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Whether a real completion backend is reachable in principle.
    pub fn is_configured(&self) -> bool {
        match self.provider.as_str() {
            "scripted" => true,
            _ => self.api_key.as_deref().is_some_and(|k| !k.is_empty()),
        }
    }
}

/// Caps the number of in-flight completions.
///
/// A streaming completion holds its permit until the stream is dropped.
pub struct SemaphoredClient {
    inner: Arc<dyn LlmClient>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn LlmClient>, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent.max(1))),
        }
    }
}

#[async_trait]
impl LlmClient for SemaphoredClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| MnemoError::Llm(format!("Semaphore acquire failed: {e}")))?;
        self.inner.complete(request).await
    }

    async fn stream(&self, request: LlmRequest) -> Result<TokenStream> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| MnemoError::Llm(format!("Semaphore acquire failed: {e}")))?;
        let mut inner = self.inner.stream(request).await?;
        Ok(Box::pin(async_stream::stream! {
            let _permit = permit;
            while let Some(item) = inner.next().await {
                yield item;
            }
        }))
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let base_client: Box<dyn LlmClient> = match config.provider.as_str() {
        "openai" | "groq" => Box::new(OpenAiClient::new(
            config.api_url.clone(),
            config.model.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )),
        "scripted" => Box::new(ScriptedLlmClient::new()),
        other => {
            return Err(MnemoError::Config(format!(
                "Unknown LLM provider: {other}"
            )));
        }
    };

    let retrying: Box<dyn LlmClient> =
        Box::new(RetryingClient::new(base_client, config.retry.clone()));

    let semaphored = SemaphoredClient::new(Arc::from(retrying), config.max_concurrent_requests);

    Ok(Arc::new(semaphored))
}
