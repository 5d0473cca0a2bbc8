//! Backend integration for multimodal inference.
//!
//! Provides a provider abstraction over multiple LLM backends (Gemini, Anthropic,
//! OpenAI, Ollama) and the [`BackendClient`] that wraps a provider with the
//! timeout and retry policy.

pub(crate) mod anthropic;
pub(crate) mod client;
pub(crate) mod gemini;
pub(crate) mod ollama;
pub(crate) mod openai;
pub(crate) mod provider;
pub(crate) mod retry;

pub use anthropic::AnthropicProvider;
pub use client::{BackendClient, ClientOptions, RawModelOutput};
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider::{ImageInput, LlmProvider, LlmProviderFactory, LlmRequest, LlmResponse};

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable provider shared by unit tests across the crate.

    use super::provider::{LlmProvider, LlmRequest, LlmResponse};
    use crate::error::PipelineError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type ResponseFn = Box<dyn Fn(u32) -> Result<LlmResponse, PipelineError> + Send + Sync>;

    /// A configurable mock LLM provider.
    ///
    /// Each call to `generate()` invokes the response factory with the current
    /// call index, allowing callers to return different results per attempt.
    pub(crate) struct MockProvider {
        response_fn: ResponseFn,
        call_count: Arc<AtomicU32>,
        delay: Option<Duration>,
        /// (in_flight, max_concurrent)
        in_flight: Option<(Arc<AtomicU32>, Arc<AtomicU32>)>,
        last_request: Arc<Mutex<Option<LlmRequest>>>,
    }

    pub(crate) fn text_response(text: &str) -> LlmResponse {
        LlmResponse {
            text: text.to_string(),
            model: "mock-v1".to_string(),
            tokens_used: Some(42),
            latency_ms: 10,
        }
    }

    impl MockProvider {
        pub(crate) fn from_fn(
            f: impl Fn(u32) -> Result<LlmResponse, PipelineError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                response_fn: Box::new(f),
                call_count: Arc::new(AtomicU32::new(0)),
                delay: None,
                in_flight: None,
                last_request: Arc::new(Mutex::new(None)),
            }
        }

        pub(crate) fn success(text: &str) -> Self {
            let text = text.to_string();
            Self::from_fn(move |_| Ok(text_response(&text)))
        }

        pub(crate) fn failing(status_code: Option<u16>, message: &str) -> Self {
            let message = message.to_string();
            Self::from_fn(move |_| {
                Err(PipelineError::Llm {
                    message: message.clone(),
                    status_code,
                })
            })
        }

        /// First call returns an error, subsequent calls succeed.
        pub(crate) fn fail_then_succeed(
            status_code: Option<u16>,
            error_msg: &str,
            success_text: &str,
        ) -> Self {
            let error_msg = error_msg.to_string();
            let success_text = success_text.to_string();
            Self::from_fn(move |idx| {
                if idx == 0 {
                    Err(PipelineError::Llm {
                        message: error_msg.clone(),
                        status_code,
                    })
                } else {
                    Ok(text_response(&success_text))
                }
            })
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Track concurrent in-flight calls; returns (in_flight, max_concurrent).
        pub(crate) fn track_concurrency(&mut self) -> (Arc<AtomicU32>, Arc<AtomicU32>) {
            let handles = (Arc::new(AtomicU32::new(0)), Arc::new(AtomicU32::new(0)));
            self.in_flight = Some(handles.clone());
            handles
        }

        /// Get a shared handle to the call counter (clone before moving provider).
        pub(crate) fn call_count_handle(&self) -> Arc<AtomicU32> {
            self.call_count.clone()
        }

        pub(crate) fn last_request_handle(&self) -> Arc<Mutex<Option<LlmRequest>>> {
            self.last_request.clone()
        }
    }

    /// Decrements the in-flight counter even when the call is cancelled mid-sleep.
    struct InFlightGuard(Option<Arc<AtomicU32>>);

    impl Drop for InFlightGuard {
        fn drop(&mut self) {
            if let Some(counter) = &self.0 {
                counter.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, PipelineError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            let _guard = match &self.in_flight {
                Some((in_flight, max_concurrent)) => {
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(current, Ordering::SeqCst);
                    InFlightGuard(Some(in_flight.clone()))
                }
                None => InFlightGuard(None),
            };
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.response_fn)(idx)
        }
    }
}
