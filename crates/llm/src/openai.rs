use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mnemo_common::{MnemoError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{LlmClient, LlmRequest, LlmResponse, Role, TokenStream, TokenUsage};

/// Groq serves the OpenAI chat-completions wire format under this prefix.
const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai";

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    model: String,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiDelta,
}

#[derive(Deserialize, Default)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One parsed line of a server-sent event stream.
#[derive(Debug, PartialEq)]
enum SseEvent {
    Token(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseEvent> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    if data.is_empty() {
        return Ok(SseEvent::Skip);
    }

    let chunk: OpenAiStreamChunk = serde_json::from_str(data)
        .map_err(|e| MnemoError::Llm(format!("Malformed stream chunk: {e}")))?;
    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
    {
        Some(text) if !text.is_empty() => Ok(SseEvent::Token(text)),
        _ => Ok(SseEvent::Skip),
    }
}

pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        base_url: Option<String>,
        model: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
            api_key,
            timeout,
            http_client,
        }
    }

    fn role_to_string(role: &Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn build_messages(request: &LlmRequest) -> Vec<OpenAiMessage> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(ref system) = request.system_prompt {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        for msg in &request.messages {
            messages.push(OpenAiMessage {
                role: Self::role_to_string(&msg.role).to_string(),
                content: msg.content.clone(),
            });
        }
        messages
    }

    fn build_request_body(&self, request: &LlmRequest, stream: bool) -> OpenAiRequest {
        OpenAiRequest {
            model: self.model.clone(),
            messages: Self::build_messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    async fn send(&self, request: &LlmRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_request_body(request, stream);

        let mut http_req = self.http_client.post(&url).json(&body);
        if !stream {
            http_req = http_req.timeout(self.timeout);
        }
        if let Some(ref key) = self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| MnemoError::Llm(format!("Completion request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(MnemoError::Llm(format!(
                "Completion API error {status}: {body_text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let response = self.send(&request, false).await?;

        let oai_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| MnemoError::Llm(format!("Failed to parse completion response: {e}")))?;

        let choice = oai_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| MnemoError::Llm("No choices in completion response".to_string()))?;

        Ok(LlmResponse {
            content: choice.message.content,
            model: oai_response.model,
            usage: oai_response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }

    async fn stream(&self, request: LlmRequest) -> Result<TokenStream> {
        let response = self.send(&request, true).await?;
        let mut bytes = Box::pin(response.bytes_stream());
        debug!(model = %self.model, "Completion stream opened");

        let stream = async_stream::stream! {
            // Lines can straddle network chunks, and so can UTF-8 sequences.
            let mut pending: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(MnemoError::Llm(format!("Stream read failed: {e}")));
                        return;
                    }
                };
                pending.extend_from_slice(&chunk);

                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    match parse_sse_line(line.trim_end()) {
                        Ok(SseEvent::Token(text)) => yield Ok(text),
                        Ok(SseEvent::Done) => return,
                        Ok(SseEvent::Skip) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
