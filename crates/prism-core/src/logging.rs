//! Logging initialization and configuration.
//!
//! Uses the `tracing` ecosystem for structured logging with support for
//! both human-readable and JSON output formats.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;

/// Initialize the logging subsystem.
///
/// # Arguments
///
/// * `verbose` - If true, enables DEBUG level logging; otherwise INFO level.
/// * `json_format` - If true, outputs structured JSON logs; otherwise pretty-printed.
///
/// # Notes
///
/// - Log output goes to stderr (stdout is reserved for data output)
/// - The RUST_LOG environment variable can override the log level
/// - Calling this when a global subscriber is already installed is a no-op
pub fn init(verbose: bool, json_format: bool) {
    init_with_level(if verbose { "debug" } else { "info" }, json_format);
}

/// Initialize logging at an explicit level (`error`, `warn`, `info`, `debug`, `trace`).
///
/// RUST_LOG still takes precedence. A level that fails to parse falls back to INFO.
pub fn init_with_level(level: &str, json_format: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    let installed = if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .try_init()
    };

    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

/// Initialize logging from the `[logging]` section of the configuration.
///
/// `logging.level` sets the level; the overrides force DEBUG level or JSON
/// output regardless of the file.
pub fn init_from_config(config: &Config, verbose_override: bool, json_logs_override: bool) {
    init_with_level(
        effective_level(config, verbose_override),
        json_logs_override || config.logging.format == "json",
    );
}

fn effective_level(config: &Config, verbose_override: bool) -> &str {
    match config.logging.level.as_str() {
        "trace" => "trace",
        _ if verbose_override => "debug",
        level => level,
    }
}

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}
