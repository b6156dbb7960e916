//! Text-generation provider interaction with exponential backoff retry
//! logic.
//!
//! Exactly one provider is active per run, selected by configuration; the
//! pipeline only knows the [`SummaryProvider`] contract: accept a prompt,
//! return text within a bounded time, or fail with a typed error. Concrete
//! backends (an OpenAI-compatible chat endpoint, the Anthropic messages
//! endpoint) are interchangeable behind that seam.
//!
//! # Retry Strategy
//!
//! [`RetrySummarizer`] wraps any provider with retry on the transient error
//! classes only (rate limits, server errors, timeouts):
//!
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd
//!
//! Authentication failures and malformed requests are not retried: they are
//! fatal for the item, never for the run.

use crate::config::{ProviderConfig, ProviderKind};
use async_trait::async_trait;
use rand::{rng, Rng};
use serde::Deserialize;
use serde_json::json;
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Typed provider failure classes.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited")]
    RateLimited,
    #[error("server error: {0}")]
    Server(String),
    #[error("authentication rejected")]
    Auth,
    #[error("request timed out")]
    Timeout,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Worth another attempt? Rate limits, server hiccups, and timeouts
    /// are; credential and request-shape problems are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Server(_) | Self::Timeout)
    }
}

/// Capability interface for text-generation backends.
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    /// Send `prompt` and return the generated text.
    async fn summarize(
        &self,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, ProviderError>;

    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Auth,
        429 => ProviderError::RateLimited,
        400 | 404 | 422 => {
            ProviderError::InvalidRequest(format!("{status}: {}", crate::utils::truncate_for_log(body, 200)))
        }
        _ => ProviderError::Server(format!("{status}: {}", crate::utils::truncate_for_log(body, 200))),
    }
}

fn classify_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Server(e.to_string())
    }
}

/// OpenAI-compatible chat-completions backend.
pub struct OpenAiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: String, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl SummaryProvider for OpenAiProvider {
    #[instrument(level = "debug", skip_all)]
    async fn summarize(
        &self,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": "You are an assistant that writes concise news summaries." },
                { "role": "user", "content": prompt }
            ],
            "max_tokens": max_tokens,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Server(format!("malformed response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Server("response carried no choices".to_string()))?;
        Ok(content.trim().to_string())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Anthropic messages backend.
pub struct AnthropicProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: String, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl SummaryProvider for AnthropicProvider {
    #[instrument(level = "debug", skip_all)]
    async fn summarize(
        &self,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [ { "role": "user", "content": prompt } ],
        });

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let parsed: MessagesResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Server(format!("malformed response: {e}")))?;
        let content = parsed
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| ProviderError::Server("response carried no content".to_string()))?;
        Ok(content.trim().to_string())
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

/// Build the configured provider. Fails fast when the named credential
/// variable is absent; a run without credentials can only flag every item.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn SummaryProvider>, Box<dyn Error>> {
    let api_key = std::env::var(&config.api_key_env)
        .map_err(|_| format!("environment variable {} is not set", config.api_key_env))?;
    let http = reqwest::Client::builder()
        .user_agent("news-digest/0.1")
        .build()?;

    let provider: Arc<dyn SummaryProvider> = match config.kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
            http,
            &config.base_url,
            api_key,
            &config.model,
        )),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            http,
            &config.base_url,
            api_key,
            &config.model,
        )),
    };
    Ok(provider)
}

/// What one retried summarization call produced.
#[derive(Debug)]
pub struct ProviderReply {
    pub text: String,
    /// Total attempts made, including the successful one.
    pub attempts: u32,
    /// Latency of the attempt that succeeded.
    pub latency_ms: u64,
}

/// Retry decorator over any [`SummaryProvider`].
///
/// The delay between attempts follows:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetrySummarizer {
    inner: Arc<dyn SummaryProvider>,
    /// Total attempts per call, including the first.
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetrySummarizer {
    pub fn new(inner: Arc<dyn SummaryProvider>, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.inner.name()
    }

    #[instrument(level = "info", skip_all)]
    pub async fn summarize(
        &self,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<ProviderReply, ProviderError> {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_t0 = Instant::now();
            match self.inner.summarize(prompt, max_tokens, timeout).await {
                Ok(text) => {
                    return Ok(ProviderReply {
                        text,
                        attempts: attempt,
                        latency_ms: attempt_t0.elapsed().as_millis() as u64,
                    });
                }
                Err(e) => {
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if !e.is_transient() || attempt >= self.max_attempts {
                        error!(
                            attempt,
                            max = self.max_attempts,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u128,
                            elapsed_ms_total = total_dt.as_millis() as u128,
                            transient = e.is_transient(),
                            error = %e,
                            "summarize() giving up"
                        );
                        return Err(e);
                    }

                    // backoff calc
                    let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + Duration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_attempts,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u128,
                        elapsed_ms_total = total_dt.as_millis() as u128,
                        ?delay,
                        error = %e,
                        "summarize() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted provider: pops the next canned response per call.
    struct Scripted {
        responses: Mutex<Vec<Result<String, ProviderError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SummaryProvider for Scripted {
        async fn summarize(
            &self,
            _prompt: &str,
            _max_tokens: u32,
            _timeout: Duration,
        ) -> Result<String, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok("default".to_string())
            } else {
                responses.remove(0)
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn retrying(provider: Scripted, max_attempts: u32) -> (Arc<Scripted>, RetrySummarizer) {
        let provider = Arc::new(provider);
        let summarizer = RetrySummarizer::new(
            Arc::clone(&provider) as Arc<dyn SummaryProvider>,
            max_attempts,
            Duration::from_millis(1),
        );
        (provider, summarizer)
    }

    #[tokio::test]
    async fn rate_limit_is_retried_until_success() {
        let (provider, summarizer) = retrying(
            Scripted::new(vec![
                Err(ProviderError::RateLimited),
                Err(ProviderError::Server("502".to_string())),
                Ok("finally".to_string()),
            ]),
            4,
        );

        let reply = summarizer
            .summarize("p", 100, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.text, "finally");
        assert_eq!(reply.attempts, 3);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let (provider, summarizer) = retrying(Scripted::new(vec![Err(ProviderError::Auth)]), 4);

        let err = summarizer
            .summarize("p", 100, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Auth));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_request_is_not_retried() {
        let (provider, summarizer) = retrying(
            Scripted::new(vec![Err(ProviderError::InvalidRequest("400".to_string()))]),
            4,
        );

        assert!(summarizer
            .summarize("p", 100, Duration::from_secs(1))
            .await
            .is_err());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn transient_failures_exhaust_after_max_attempts() {
        let (provider, summarizer) = retrying(
            Scripted::new(vec![
                Err(ProviderError::Timeout),
                Err(ProviderError::Timeout),
                Err(ProviderError::Timeout),
            ]),
            3,
        );

        let err = summarizer
            .summarize("p", 100, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout));
        assert_eq!(provider.calls(), 3);
    }

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            ProviderError::Auth
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::RateLimited
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "missing field"),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            ProviderError::Server(_)
        ));
    }

    #[test]
    fn transience_matches_retry_policy() {
        assert!(ProviderError::RateLimited.is_transient());
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::Server("500".to_string()).is_transient());
        assert!(!ProviderError::Auth.is_transient());
        assert!(!ProviderError::InvalidRequest("bad".to_string()).is_transient());
    }
}
