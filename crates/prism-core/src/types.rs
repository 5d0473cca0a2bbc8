//! Core data types for the Prism analysis pipeline.
//!
//! These types form the public contract: what a caller submits
//! ([`AnalysisRequest`]) and what it gets back ([`AnalysisResult`]).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{BackendError, PipelineError};
use crate::pipeline::validate::Validator;

/// Image formats accepted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MimeType {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
}

impl MimeType {
    /// The canonical MIME string sent to backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            MimeType::Jpeg => "image/jpeg",
            MimeType::Png => "image/png",
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MimeType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Ok(MimeType::Jpeg),
            "image/png" => Ok(MimeType::Png),
            other => Err(PipelineError::InvalidRequest(format!(
                "unsupported mime type '{other}' (expected image/jpeg or image/png)"
            ))),
        }
    }
}

/// A single image analysis request.
///
/// The payload is reference-counted so requests can be cloned into concurrent
/// tasks (and the single-flight registry) without copying image bytes.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Raw image bytes
    pub payload: Arc<[u8]>,
    /// Declared MIME type, e.g. "image/jpeg"
    pub mime_type: String,
    /// Logical prompt identifier resolved by the prompt store
    pub prompt_id: String,
}

impl AnalysisRequest {
    pub fn new(
        payload: impl Into<Arc<[u8]>>,
        mime_type: impl Into<String>,
        prompt_id: impl Into<String>,
    ) -> Self {
        Self {
            payload: payload.into(),
            mime_type: mime_type.into(),
            prompt_id: prompt_id.into(),
        }
    }

    /// Build a request whose MIME type is detected from the payload's magic bytes.
    ///
    /// Unrecognized content gets an empty MIME type, which validation rejects.
    pub fn detect(payload: impl Into<Arc<[u8]>>, prompt_id: impl Into<String>) -> Self {
        let payload = payload.into();
        let mime_type = Validator::sniff_mime(&payload)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        Self {
            payload,
            mime_type,
            prompt_id: prompt_id.into(),
        }
    }
}

/// Failure categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller error: empty payload, unsupported or mismatched MIME type
    InvalidRequest,
    /// The prompt id did not resolve
    PromptMissing,
    /// Transient backend failures outlasted the retry policy
    BackendUnavailable,
    /// The backend refused the request (auth, bad request)
    BackendRejected,
    /// The model answered, but not with a JSON object
    MalformedOutput,
    /// The admission gate and its queue are full
    Overloaded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::PromptMissing => "prompt_missing",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::BackendRejected => "backend_rejected",
            ErrorKind::MalformedOutput => "malformed_output",
            ErrorKind::Overloaded => "overloaded",
        };
        f.write_str(name)
    }
}

/// Outcome of analyzing one image. Exactly one variant is populated.
///
/// Serializes as `{"status": "success", "data": {...}}` or
/// `{"status": "failure", "kind": "...", "message": "...", "raw_text": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisResult {
    Success {
        /// Parsed model output, keys in the order the model produced them
        data: Map<String, Value>,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        /// Unparsed model output, kept for diagnostics
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_text: Option<String>,
    },
}

impl AnalysisResult {
    pub fn success(data: Map<String, Value>) -> Self {
        AnalysisResult::Success { data }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        AnalysisResult::Failure {
            kind,
            message: message.into(),
            raw_text: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisResult::Success { .. })
    }

    /// The failure kind, or `None` for a success.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            AnalysisResult::Success { .. } => None,
            AnalysisResult::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        match self {
            AnalysisResult::Success { data } => Some(data),
            AnalysisResult::Failure { .. } => None,
        }
    }

    pub fn raw_text(&self) -> Option<&str> {
        match self {
            AnalysisResult::Failure { raw_text, .. } => raw_text.as_deref(),
            AnalysisResult::Success { .. } => None,
        }
    }

    /// Whether this result may be memoized.
    ///
    /// Malformed output is cached so pathological inputs don't keep burning
    /// backend calls; every other failure is left uncached so the next call retries.
    pub fn is_cacheable(&self) -> bool {
        match self {
            AnalysisResult::Success { .. } => true,
            AnalysisResult::Failure { kind, .. } => *kind == ErrorKind::MalformedOutput,
        }
    }
}

impl From<PipelineError> for AnalysisResult {
    fn from(err: PipelineError) -> Self {
        AnalysisResult::failure(err.kind(), err.to_string())
    }
}

impl From<BackendError> for AnalysisResult {
    fn from(err: BackendError) -> Self {
        AnalysisResult::failure(err.kind(), err.to_string())
    }
}
