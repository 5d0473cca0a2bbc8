//! Error types for the Prism analysis pipeline.
//!
//! Errors are organized by layer. Everything that can go wrong while serving a
//! single request is eventually folded into an [`ErrorKind`] and returned as an
//! `AnalysisResult::Failure`; these enums carry the detail until that point.

use crate::types::ErrorKind;
use thiserror::Error;

/// Top-level error type for Prism operations that are not request-scoped
/// (building the pipeline, loading configuration).
#[derive(Error, Debug)]
pub enum PrismError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pipeline processing errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Request-scoped errors raised by the pipeline stages.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The request failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No prompt resource matches the identifier
    #[error("Prompt not found: {id}")]
    PromptNotFound { id: String },

    /// Prompt storage could not be read
    #[error("Failed to read prompt {id}: {message}")]
    PromptRead { id: String, message: String },

    /// The backend answered with an error status, or could not be called at all
    #[error("LLM error: {message}")]
    Llm {
        message: String,
        /// HTTP status code, when the error came from an HTTP response
        status_code: Option<u16>,
    },

    /// The request never produced an HTTP response (DNS, connect, reset)
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Operation timed out
    #[error("Timeout in {stage} stage after {timeout_ms}ms")]
    Timeout { stage: String, timeout_ms: u64 },

    /// Every backend slot is busy and the wait queue is full
    #[error("Pipeline overloaded: {max_concurrency} in flight, {max_queue_depth} queued")]
    Overloaded {
        max_concurrency: usize,
        max_queue_depth: usize,
    },
}

impl PipelineError {
    /// Failure category reported to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            PipelineError::PromptNotFound { .. } | PipelineError::PromptRead { .. } => {
                ErrorKind::PromptMissing
            }
            PipelineError::Transport { .. } | PipelineError::Timeout { .. } => {
                ErrorKind::BackendUnavailable
            }
            PipelineError::Llm { .. } => ErrorKind::BackendRejected,
            PipelineError::Overloaded { .. } => ErrorKind::Overloaded,
        }
    }
}

/// Final outcome of a failed backend invocation, after the retry policy ran.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Transient failures persisted through every allowed attempt
    #[error("Backend unavailable after {attempts} attempt(s): {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    /// The backend refused the request; retrying would not help
    #[error("Backend rejected request: {message}")]
    Rejected {
        message: String,
        status_code: Option<u16>,
    },
}

impl BackendError {
    /// Failure category reported to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Unavailable { .. } => ErrorKind::BackendUnavailable,
            BackendError::Rejected { .. } => ErrorKind::BackendRejected,
        }
    }
}

/// Convenience type alias for Prism results.
pub type Result<T> = std::result::Result<T, PrismError>;

/// Convenience type alias for pipeline-specific results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
