//! Anthropic LLM provider using the Messages API.
//!
//! Sends image + prompt via the Messages API with a base64 image content block.

use super::provider::{status_error, transport_error, LlmProvider, LlmRequest, LlmResponse};
use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic provider using the Messages API.
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

// --- Request types ---

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock {
    Image { source: ImageSource },
    Text { text: String },
}

#[derive(Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

// --- Response types ---

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseContent>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ResponseContent {
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, PipelineError> {
        let start = Instant::now();

        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: vec![
                    ContentBlock::Image {
                        source: ImageSource {
                            source_type: "base64".to_string(),
                            media_type: request.image.media_type.clone(),
                            data: request.image.data.clone(),
                        },
                    },
                    ContentBlock::Text {
                        text: request.prompt.clone(),
                    },
                ],
            }],
        };

        let resp = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("Anthropic", e))?;

        if !resp.status().is_success() {
            return Err(status_error("Anthropic", resp).await);
        }

        let raw = resp
            .text()
            .await
            .map_err(|e| transport_error("Anthropic", e))?;

        let Ok(parsed) = serde_json::from_str::<MessagesResponse>(&raw) else {
            tracing::warn!("Unexpected Anthropic response shape, passing body through");
            return Ok(LlmResponse {
                text: raw,
                model: self.model.clone(),
                tokens_used: None,
                latency_ms: start.elapsed().as_millis() as u64,
            });
        };

        let text: String = parsed.content.into_iter().filter_map(|c| c.text).collect();

        Ok(LlmResponse {
            text: if text.is_empty() { raw } else { text },
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            tokens_used: parsed.usage.map(|u| u.input_tokens + u.output_tokens),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}
