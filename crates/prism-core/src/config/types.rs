//! Sub-configuration structs with their defaults.

use serde::{Deserialize, Serialize};

/// Backend call policy: which provider, and how hard to try.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Provider name: "gemini", "anthropic", "openai" or "ollama"
    pub provider: String,

    /// Model override; when unset the provider section's model is used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,

    /// Retries after the first attempt for transient failures
    pub retry_attempts: u32,

    /// Base backoff delay in milliseconds (doubled per retry)
    pub retry_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    pub max_retry_delay_ms: u64,

    /// Maximum tokens the model may generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: None,
            timeout_ms: 30_000,
            retry_attempts: 2,
            retry_delay_ms: 500,
            max_retry_delay_ms: 10_000,
            max_tokens: 2048,
            temperature: 0.2,
        }
    }
}

/// Admission control for in-flight backend calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum concurrent backend calls
    pub max_concurrency: usize,

    /// Requests allowed to wait for a slot; beyond this they fail as overloaded
    pub max_queue_depth: usize,

    /// Share one backend call between concurrent identical requests
    pub single_flight: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_queue_depth: 64,
            single_flight: true,
        }
    }
}

/// Result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether results are memoized at all
    pub enabled: bool,

    /// Entry-count bound before least-recently-used eviction
    pub max_entries: usize,

    /// Time-to-live for cached results in seconds
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1024,
            ttl_secs: 3600,
        }
    }
}

/// Where prompt templates live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Directory containing prompt files (supports ~)
    pub dir: String,

    /// File extension of prompt files, without the dot
    pub extension: String,

    /// Prompt used when a caller doesn't name one
    pub default_id: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            dir: "prompts".to_string(),
            extension: "txt".to_string(),
            default_id: "learning".to_string(),
        }
    }
}

/// Resource limits to protect against problematic inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum payload size in megabytes
    pub max_payload_mb: u64,

    /// Reject payloads whose magic bytes disagree with the declared MIME type
    pub verify_content: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_mb: 20,
            verify_content: true,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// LLM provider configurations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LlmConfig {
    /// Google Gemini configuration
    pub gemini: Option<GeminiConfig>,

    /// Anthropic configuration
    pub anthropic: Option<AnthropicConfig>,

    /// OpenAI (or OpenAI-compatible) configuration
    pub openai: Option<OpenAiConfig>,

    /// Ollama (local) configuration
    pub ollama: Option<OllamaConfig>,
}

/// Gemini configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// API base URL
    pub endpoint: String,

    /// API key (supports ${ENV_VAR} syntax)
    pub api_key: String,

    /// Model name
    pub model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: "${GEMINI_API_KEY}".to_string(),
            model: "gemini-2.5-flash".to_string(),
        }
    }
}

/// Anthropic configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    /// API key (supports ${ENV_VAR} syntax)
    pub api_key: String,

    /// Model name
    pub model: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: "${ANTHROPIC_API_KEY}".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
        }
    }
}

/// OpenAI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// Chat Completions URL; point it at any OpenAI-compatible host
    pub endpoint: String,

    /// API key (supports ${ENV_VAR} syntax)
    pub api_key: String,

    /// Model name
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: "${OPENAI_API_KEY}".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Ollama configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Ollama API endpoint
    pub endpoint: String,

    /// Model name
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2-vision".to_string(),
        }
    }
}
