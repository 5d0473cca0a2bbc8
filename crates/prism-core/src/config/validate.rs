//! Configuration validation with range checks.

use crate::error::ConfigError;
use crate::llm::provider::KNOWN_PROVIDERS;

use super::Config;

const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !KNOWN_PROVIDERS.contains(&self.backend.provider.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "backend.provider must be one of {}, got '{}'",
                KNOWN_PROVIDERS.join(", "),
                self.backend.provider
            )));
        }
        if self.backend.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "backend.timeout_ms must be > 0".into(),
            ));
        }
        if self.backend.retry_delay_ms > self.backend.max_retry_delay_ms {
            return Err(ConfigError::ValidationError(
                "backend.retry_delay_ms must be <= backend.max_retry_delay_ms".into(),
            ));
        }
        if self.backend.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "backend.max_tokens must be > 0".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(ConfigError::ValidationError(
                "backend.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.pipeline.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.max_concurrency must be > 0".into(),
            ));
        }
        if self.limits.max_payload_mb == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_payload_mb must be > 0".into(),
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.logging.level
            )));
        }
        if self.prompts.default_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "prompts.default_id must not be empty".into(),
            ));
        }
        Ok(())
    }
}
