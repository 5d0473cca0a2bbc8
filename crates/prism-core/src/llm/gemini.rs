//! Google Gemini provider using the `generateContent` API.
//!
//! Sends the prompt as a text part and the image as an `inline_data` part.

use super::provider::{status_error, transport_error, LlmProvider, LlmRequest, LlmResponse};
use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Gemini provider.
pub struct GeminiProvider {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(endpoint: &str, api_key: &str, model: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

// --- Request types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

// --- Response types ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<u32>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate, if it has any.
    fn first_text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, PipelineError> {
        let start = Instant::now();
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![
                    Part::Text {
                        text: request.prompt.clone(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: request.image.media_type.clone(),
                            data: request.image.data.clone(),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("Gemini", e))?;

        if !resp.status().is_success() {
            return Err(status_error("Gemini", resp).await);
        }

        let raw = resp.text().await.map_err(|e| transport_error("Gemini", e))?;

        // A 2xx body without candidate text (blocked prompt, unexpected shape)
        // is passed through verbatim for the extractor to judge.
        let (text, model, tokens_used) = match serde_json::from_str::<GenerateContentResponse>(&raw)
        {
            Ok(parsed) => {
                let tokens = parsed
                    .usage_metadata
                    .as_ref()
                    .and_then(|u| u.total_token_count);
                let model = parsed
                    .model_version
                    .clone()
                    .unwrap_or_else(|| self.model.clone());
                match parsed.first_text() {
                    Some(text) => (text, model, tokens),
                    None => {
                        tracing::warn!("Gemini returned no candidate text, passing body through");
                        (raw, model, tokens)
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Unexpected Gemini response shape ({e}), passing body through");
                (raw, self.model.clone(), None)
            }
        };

        Ok(LlmResponse {
            text,
            model,
            tokens_used,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}
