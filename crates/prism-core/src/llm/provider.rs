//! LLM provider trait and request/response types.
//!
//! Defines the interface that all LLM providers implement, the HTTP error
//! classification they share, and the factory that builds a provider from config.

use crate::config::{BackendConfig, LlmConfig};
use crate::error::PipelineError;
use crate::types::MimeType;
use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;

/// Provider names accepted in `backend.provider`.
pub const KNOWN_PROVIDERS: &[&str] = &["gemini", "anthropic", "openai", "ollama"];

/// Base64-encoded image ready to send to an LLM API.
#[derive(Debug, Clone)]
pub struct ImageInput {
    /// Base64-encoded image bytes
    pub data: String,
    /// MIME type (e.g., "image/jpeg", "image/png")
    pub media_type: String,
}

impl ImageInput {
    /// Encode raw image bytes of a known type.
    pub fn from_bytes(bytes: &[u8], mime_type: MimeType) -> Self {
        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            media_type: mime_type.as_str().to_string(),
        }
    }

    /// Return a data URL suitable for OpenAI-style APIs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// A single multimodal generation request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// The image to analyze
    pub image: ImageInput,
    /// Prompt text, sent alongside the image
    pub prompt: String,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

/// The response from a generation call.
///
/// `text` is whatever the model (or, for unexpected 2xx bodies, the server)
/// returned. Providers never judge whether it is usable; the extractor does.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Generated text
    pub text: String,
    /// Model identifier used
    pub model: String,
    /// Number of tokens used (input + output), if reported
    pub tokens_used: Option<u32>,
    /// Round-trip latency in milliseconds
    pub latency_ms: u64,
}

/// Trait that all LLM providers implement.
///
/// Uses `async_trait` because native async fn in trait is not object-safe
/// (we need `Arc<dyn LlmProvider>` for dynamic dispatch).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging (e.g., "gemini", "ollama").
    fn name(&self) -> &str;

    /// Check whether the provider is configured and reachable.
    async fn is_available(&self) -> bool;

    /// Run one generation call. No retries happen at this level.
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, PipelineError>;
}

/// Map a reqwest send/read failure to a pipeline error.
///
/// Builder errors mean we constructed a bad request, which no retry will fix.
/// Everything else happened on the wire and is treated as transient.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> PipelineError {
    if err.is_builder() {
        PipelineError::Llm {
            message: format!("{provider} request could not be built: {err}"),
            status_code: None,
        }
    } else {
        PipelineError::Transport {
            message: format!("{provider} request failed: {err}"),
        }
    }
}

/// Convert a non-success HTTP response into an error carrying its status.
pub(crate) async fn status_error(provider: &str, resp: reqwest::Response) -> PipelineError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    PipelineError::Llm {
        message: format!("{provider} HTTP {status}: {text}"),
        status_code: Some(status.as_u16()),
    }
}

/// Resolve `${ENV_VAR}` references in config strings.
pub fn resolve_env_var(value: &str) -> Option<String> {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).ok().filter(|v| !v.is_empty())
    } else if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn missing_key(provider: &str, var: &str) -> PipelineError {
    PipelineError::Llm {
        message: format!("{provider} API key not set. Set {var} env var."),
        status_code: None,
    }
}

/// Factory that creates the configured provider.
pub struct LlmProviderFactory;

impl LlmProviderFactory {
    /// Create the provider named by `backend.provider`.
    ///
    /// `backend.model` overrides the provider section's default model.
    pub fn create(
        backend: &BackendConfig,
        config: &LlmConfig,
    ) -> Result<Arc<dyn LlmProvider>, PipelineError> {
        let model_override = backend.model.as_deref();
        match backend.provider.as_str() {
            "gemini" => {
                let cfg = config.gemini.clone().unwrap_or_default();
                let api_key = resolve_env_var(&cfg.api_key)
                    .ok_or_else(|| missing_key("Gemini", "GEMINI_API_KEY"))?;
                let model = model_override.unwrap_or(&cfg.model);
                Ok(Arc::new(super::gemini::GeminiProvider::new(
                    &cfg.endpoint,
                    &api_key,
                    model,
                )))
            }
            "anthropic" => {
                let cfg = config.anthropic.clone().unwrap_or_default();
                let api_key = resolve_env_var(&cfg.api_key)
                    .ok_or_else(|| missing_key("Anthropic", "ANTHROPIC_API_KEY"))?;
                let model = model_override.unwrap_or(&cfg.model);
                Ok(Arc::new(super::anthropic::AnthropicProvider::new(
                    &api_key, model,
                )))
            }
            "openai" => {
                let cfg = config.openai.clone().unwrap_or_default();
                let api_key = resolve_env_var(&cfg.api_key)
                    .ok_or_else(|| missing_key("OpenAI", "OPENAI_API_KEY"))?;
                let model = model_override.unwrap_or(&cfg.model);
                Ok(Arc::new(super::openai::OpenAiProvider::with_endpoint(
                    &api_key,
                    model,
                    &cfg.endpoint,
                )))
            }
            "ollama" => {
                let cfg = config.ollama.clone().unwrap_or_default();
                let model = model_override.unwrap_or(&cfg.model);
                Ok(Arc::new(super::ollama::OllamaProvider::new(
                    &cfg.endpoint,
                    model,
                )))
            }
            other => Err(PipelineError::Llm {
                message: format!("Unknown LLM provider: {other}"),
                status_code: None,
            }),
        }
    }
}
