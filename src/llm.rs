use crate::embeddings::with_timeout;
use crate::error::{RagError, Result};
use crate::gemini::GeminiClient;
use crate::openrouter::OpenRouterClient;
use log::warn;
use std::time::Duration;

/// Text generation service that answers a rendered prompt
#[allow(async_fn_in_trait)]
pub trait LanguageModel {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Bounded exponential backoff for transient generation failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Per-attempt deadline
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Wraps a model so every call gets a timeout and transient errors are retried
pub struct Retrying<L> {
    inner: L,
    policy: RetryPolicy,
}

impl<L> Retrying<L> {
    pub fn new(inner: L, policy: RetryPolicy) -> Self {
        Retrying { inner, policy }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L: LanguageModel> LanguageModel for Retrying<L> {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = with_timeout(
                "language model",
                self.policy.timeout,
                self.inner.generate(prompt),
            )
            .await;

            match result {
                Ok(answer) => return Ok(answer),
                Err(e) if attempt < attempts && e.is_transient() => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "Generation attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Model chosen at startup from configuration
pub enum ChatModel {
    Gemini(GeminiClient),
    OpenRouter(OpenRouterClient),
}

impl LanguageModel for ChatModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        match self {
            ChatModel::Gemini(client) => client.generate(prompt).await,
            ChatModel::OpenRouter(client) => client.generate(prompt).await,
        }
    }
}

/// Convert a non-success HTTP response into a [`RagError`] using `wrap`
pub(crate) async fn response_error(
    response: reqwest::Response,
    wrap: fn(String) -> RagError,
) -> RagError {
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    wrap(format!("API request failed: {} {}", status, error_text))
}
