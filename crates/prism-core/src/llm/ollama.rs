//! Ollama LLM provider for local vision model inference.
//!
//! Talks to a local Ollama instance via its HTTP API.
//! No authentication required, just needs Ollama running locally.

use super::provider::{status_error, transport_error, LlmProvider, LlmRequest, LlmResponse};
use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Ollama provider for local vision model inference.
pub struct OllamaProvider {
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(endpoint: &str, model: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

/// Ollama /api/generate request body.
#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    images: Vec<String>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama /api/generate response.
#[derive(Deserialize)]
struct OllamaResponse {
    response: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

impl OllamaResponse {
    fn tokens_used(&self) -> Option<u32> {
        match (self.prompt_eval_count, self.eval_count) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.endpoint);
        match self.client.get(&url).timeout(Duration::from_secs(5)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, PipelineError> {
        let url = format!("{}/api/generate", self.endpoint);
        let start = Instant::now();

        let body = OllamaRequest {
            model: self.model.clone(),
            prompt: request.prompt.clone(),
            images: vec![request.image.data.clone()],
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("Ollama", e))?;

        if !resp.status().is_success() {
            return Err(status_error("Ollama", resp).await);
        }

        let raw = resp.text().await.map_err(|e| transport_error("Ollama", e))?;

        let (text, tokens_used) = match serde_json::from_str::<OllamaResponse>(&raw) {
            Ok(parsed) => {
                let tokens = parsed.tokens_used();
                (parsed.response.unwrap_or(raw), tokens)
            }
            Err(e) => {
                tracing::warn!("Unexpected Ollama response shape ({e}), passing body through");
                (raw, None)
            }
        };

        Ok(LlmResponse {
            text,
            model: self.model.clone(),
            tokens_used,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}
