//! Backend client: one inference call under a timeout and retry policy.
//!
//! The client owns the provider handle and the call policy. It is built
//! explicitly and injected into the analyzer; there is no process-wide client.

use super::provider::{ImageInput, LlmProvider, LlmRequest};
use super::retry;
use crate::config::BackendConfig;
use crate::error::{BackendError, PipelineError};
use crate::types::MimeType;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Call policy for the backend client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub retry_attempts: u32,
    /// Base backoff delay in milliseconds
    pub retry_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_retry_delay_ms: u64,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&BackendConfig::default())
    }
}

impl ClientOptions {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            timeout_ms: config.timeout_ms,
            retry_attempts: config.retry_attempts,
            retry_delay_ms: config.retry_delay_ms,
            max_retry_delay_ms: config.max_retry_delay_ms,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// Unparsed model output plus call metadata.
#[derive(Debug, Clone)]
pub struct RawModelOutput {
    /// Model text, untouched
    pub text: String,
    /// Model identifier reported by the backend
    pub model: String,
    /// Tokens used (input + output), if reported
    pub tokens_used: Option<u32>,
    /// Latency of the successful attempt in milliseconds
    pub latency_ms: u64,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// Bookkeeping for one in-flight invocation.
///
/// Lives exactly as long as the `invoke` future. If that future is dropped
/// before finishing, the drop is logged as a cancellation.
struct PendingCall<'a> {
    provider: &'a str,
    started: Instant,
    attempts: u32,
    finished: bool,
}

impl<'a> PendingCall<'a> {
    fn start(provider: &'a str) -> Self {
        Self {
            provider,
            started: Instant::now(),
            attempts: 0,
            finished: false,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                provider = self.provider,
                attempts = self.attempts,
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "Backend call cancelled"
            );
        }
    }
}

/// Executes inference calls with timeout, retry and error classification.
#[derive(Clone)]
pub struct BackendClient {
    provider: Arc<dyn LlmProvider>,
    options: ClientOptions,
}

impl BackendClient {
    pub fn new(provider: Arc<dyn LlmProvider>, options: ClientOptions) -> Self {
        Self { provider, options }
    }

    /// Name of the underlying provider.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Whether the provider is configured and reachable.
    pub async fn is_available(&self) -> bool {
        self.provider.is_available().await
    }

    /// Run one inference call.
    ///
    /// Timeouts and transient failures are retried with exponential backoff and
    /// jitter; exhausting the retries yields [`BackendError::Unavailable`].
    /// Non-retryable failures yield [`BackendError::Rejected`] immediately.
    /// A successful response is returned as-is, whatever its content.
    pub async fn invoke(
        &self,
        prompt: &str,
        payload: &[u8],
        mime_type: MimeType,
    ) -> Result<RawModelOutput, BackendError> {
        let request = LlmRequest {
            image: ImageInput::from_bytes(payload, mime_type),
            prompt: prompt.to_string(),
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
        };
        let timeout = Duration::from_millis(self.options.timeout_ms);
        let mut call = PendingCall::start(self.provider.name());
        let mut last_error = String::new();

        for attempt in 0..=self.options.retry_attempts {
            if attempt > 0 {
                let delay = retry::backoff_with_jitter(
                    attempt - 1,
                    self.options.retry_delay_ms,
                    self.options.max_retry_delay_ms,
                );
                tracing::debug!(
                    "Retry {attempt}/{} on {} after {delay:?}",
                    self.options.retry_attempts,
                    call.provider
                );
                tokio::time::sleep(delay).await;
            }
            call.attempts = attempt + 1;

            let error = match tokio::time::timeout(timeout, self.provider.generate(&request)).await
            {
                Ok(Ok(response)) => {
                    call.finish();
                    tracing::debug!(
                        provider = call.provider,
                        model = %response.model,
                        latency_ms = response.latency_ms,
                        attempts = call.attempts,
                        "Backend call succeeded"
                    );
                    return Ok(RawModelOutput {
                        text: response.text,
                        model: response.model,
                        tokens_used: response.tokens_used,
                        latency_ms: response.latency_ms,
                        attempts: call.attempts,
                    });
                }
                Ok(Err(e)) => e,
                Err(_) => PipelineError::Timeout {
                    stage: "backend".to_string(),
                    timeout_ms: self.options.timeout_ms,
                },
            };

            if !retry::is_retryable(&error) {
                call.finish();
                tracing::warn!(provider = call.provider, "Backend rejected request: {error}");
                let status_code = match &error {
                    PipelineError::Llm { status_code, .. } => *status_code,
                    _ => None,
                };
                return Err(BackendError::Rejected {
                    message: error.to_string(),
                    status_code,
                });
            }

            tracing::warn!(
                provider = call.provider,
                attempt = call.attempts,
                "Transient backend failure: {error}"
            );
            last_error = error.to_string();
        }

        call.finish();
        Err(BackendError::Unavailable {
            attempts: call.attempts,
            last_error,
        })
    }
}
