//! Retry utilities for transient backend failures.
//!
//! Provides classification of retryable errors and exponential backoff with jitter.

use crate::error::PipelineError;
use rand::Rng;
use std::time::Duration;

/// Determine whether a pipeline error is worth retrying.
///
/// Retryable errors: timeouts, transport failures, request timeout (408),
/// rate limits (429), server errors (5xx).
/// Non-retryable: auth failures, bad requests, missing models, missing keys.
pub fn is_retryable(error: &PipelineError) -> bool {
    match error {
        PipelineError::Timeout { .. } | PipelineError::Transport { .. } => true,
        PipelineError::Llm { status_code, .. } => match status_code {
            Some(code) => *code == 408 || *code == 429 || (500..=599).contains(code),
            // No status means the request never left (bad config, unbuildable request)
            None => false,
        },
        _ => false,
    }
}

/// Calculate exponential backoff duration for a given retry (0-based).
///
/// Uses `base_delay * 2^retry` capped at `max_delay_ms`.
pub fn backoff_duration(retry: u32, base_delay_ms: u64, max_delay_ms: u64) -> Duration {
    let delay = base_delay_ms.saturating_mul(2u64.saturating_pow(retry));
    Duration::from_millis(delay.min(max_delay_ms))
}

/// Backoff plus uniform random jitter of up to half the delay.
///
/// Jitter keeps concurrent requests that failed together from retrying in lockstep.
pub fn backoff_with_jitter(retry: u32, base_delay_ms: u64, max_delay_ms: u64) -> Duration {
    let delay = backoff_duration(retry, base_delay_ms, max_delay_ms);
    let spread = delay.as_millis() as u64 / 2;
    if spread == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..=spread);
    delay + Duration::from_millis(jitter)
}
