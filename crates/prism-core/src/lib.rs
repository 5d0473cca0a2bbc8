//! Prism Core - asynchronous image-analysis request pipeline.
//!
//! Prism sends an image and a named prompt to a multimodal model and turns the
//! model's reply into structured JSON. Each request is validated, paired with
//! its prompt, checked against a result cache, admitted through a bounded
//! concurrency gate, sent to the backend with timeout and retry, and its output
//! extracted into an [`AnalysisResult`].
//!
//! # Architecture
//!
//! ```text
//! AnalysisRequest → Validate → Prompt Store → Result Cache ─hit─────────────┐
//!                                                  │miss                     │
//!                                                  ▼                         ▼
//!                          Admission Gate → Backend Client → Extractor → AnalysisResult
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use prism_core::{AnalysisRequest, Analyzer, Config};
//!
//! #[tokio::main]
//! async fn main() -> prism_core::Result<()> {
//!     let config = Config::load()?;
//!     let analyzer = Analyzer::from_config(&config)?;
//!
//!     let payload = std::fs::read("photo.jpg")?;
//!     let request = AnalysisRequest::new(payload, "image/jpeg", "learning");
//!     let result = analyzer.analyze(&request).await;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod prompt;
pub mod types;

pub use cache::{CacheStats, ResultCache};
pub use config::Config;
pub use error::{BackendError, ConfigError, PipelineError, PipelineResult, PrismError, Result};
pub use extract::extract;
pub use llm::{BackendClient, ClientOptions, LlmProvider, RawModelOutput};
pub use pipeline::{Analyzer, AnalyzerOptions, Fingerprint, GateStatus};
pub use prompt::{DirectorySource, PromptSource, PromptStore, PromptTemplate, StaticSource};
pub use types::{AnalysisRequest, AnalysisResult, ErrorKind, MimeType};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
