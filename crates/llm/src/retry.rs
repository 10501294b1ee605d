use async_trait::async_trait;
use mnemo_common::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::{LlmClient, LlmRequest, LlmResponse, TokenStream};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Retries transient failures (rate limits, 5xx) with exponential backoff.
///
/// For streams only opening the stream is retried; a stream that fails
/// part-way through is handed to the caller as is.
pub struct RetryingClient<T: LlmClient> {
    inner: T,
    config: RetryConfig,
}

impl<T: LlmClient> RetryingClient<T> {
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn is_retryable(error_msg: &str) -> bool {
        let lower = error_msg.to_lowercase();
        [
            "429",
            "rate limit",
            "500",
            "502",
            "503",
            "504",
            "server error",
            "bad gateway",
            "service unavailable",
            "gateway timeout",
        ]
        .iter()
        .any(|needle| lower.contains(needle))
    }

    fn parse_retry_after(error_msg: &str) -> Option<u64> {
        let lower = error_msg.to_lowercase();
        let pos = lower.find("retry-after")?;
        error_msg[pos..]
            .split_whitespace()
            .skip(1)
            .find_map(|word| {
                word.trim_end_matches(|c: char| !c.is_ascii_digit())
                    .parse::<u64>()
                    .ok()
            })
            .map(|secs| secs * 1000)
    }

    fn compute_delay(&self, attempt: u32) -> u64 {
        let base = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        let jitter = (base * 0.1 * jitter_fraction(attempt)) as u64;
        (base as u64)
            .saturating_add(jitter)
            .min(self.config.max_delay_ms)
    }

    /// Decide whether `attempt` may be retried; sleeps before returning true.
    async fn backoff(&self, attempt: u32, error_msg: &str) -> bool {
        if attempt >= self.config.max_retries || !Self::is_retryable(error_msg) {
            return false;
        }
        let delay = Self::parse_retry_after(error_msg).unwrap_or_else(|| self.compute_delay(attempt));
        warn!(
            attempt = attempt + 1,
            max_retries = self.config.max_retries,
            delay_ms = delay,
            error = %error_msg,
            "Retrying completion request"
        );
        tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
        true
    }
}

/// Deterministic jitter in [0, 1) derived from the attempt number.
fn jitter_fraction(attempt: u32) -> f64 {
    let x = attempt.wrapping_mul(2654435761);
    (x % 100) as f64 / 100.0
}

#[async_trait]
impl<T: LlmClient> LlmClient for RetryingClient<T> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !self.backoff(attempt, &e.to_string()).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn stream(&self, request: LlmRequest) -> Result<TokenStream> {
        let mut attempt = 0;
        loop {
            match self.inner.stream(request.clone()).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    if !self.backoff(attempt, &e.to_string()).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{Script, ScriptedLlmClient};

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 1.0,
        }
    }

    #[test]
    fn retryable_error_detection() {
        type C = RetryingClient<ScriptedLlmClient>;
        assert!(C::is_retryable(
            "Completion API error 429 Too Many Requests: rate limit exceeded"
        ));
        assert!(C::is_retryable("503 Service Unavailable"));
        assert!(!C::is_retryable("Completion API error 401 Unauthorized"));
        assert!(!C::is_retryable("Invalid request: missing model field"));
    }

    #[test]
    fn parse_retry_after_from_error() {
        let delay =
            RetryingClient::<ScriptedLlmClient>::parse_retry_after("429 Too Many Requests, Retry-After: 5");
        assert_eq!(delay, Some(5000));
    }

    #[test]
    fn compute_delay_respects_max() {
        let client = RetryingClient::new(
            ScriptedLlmClient::new(),
            RetryConfig {
                max_retries: 5,
                initial_delay_ms: 500,
                max_delay_ms: 2000,
                backoff_multiplier: 10.0,
            },
        );
        assert!(client.compute_delay(5) <= 2000);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let inner = ScriptedLlmClient::new()
            .then(Script::Fail("Completion API error 503 Service Unavailable".into()))
            .then(Script::Reply("recovered".into()));
        let client = RetryingClient::new(inner, fast_config(2));

        let response = client.complete(LlmRequest::default()).await.unwrap();
        assert_eq!(response.content, "recovered");
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let inner = ScriptedLlmClient::new()
            .then(Script::Fail("Completion API error 401 Unauthorized".into()))
            .then(Script::Reply("never reached".into()));
        let client = RetryingClient::new(inner, fast_config(3));

        assert!(client.complete(LlmRequest::default()).await.is_err());
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = ScriptedLlmClient::new()
            .then(Script::Fail("500 Internal Server Error".into()))
            .then(Script::Fail("500 Internal Server Error".into()))
            .then(Script::Reply("too late".into()));
        let client = RetryingClient::new(inner, fast_config(1));

        assert!(client.complete(LlmRequest::default()).await.is_err());
    }
}
