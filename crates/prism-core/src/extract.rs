//! Structured-data extraction from raw model output.
//!
//! Models asked for JSON frequently wrap it in a Markdown code fence. The
//! extractor strips exactly one fence pair enclosing the whole text and then
//! requires a strict JSON object. Anything else becomes a `MalformedOutput`
//! failure that keeps the trimmed original text.

use serde_json::Value;

use crate::types::{AnalysisResult, ErrorKind};

/// Turn raw model text into an [`AnalysisResult`].
pub fn extract(raw_text: &str) -> AnalysisResult {
    let trimmed = raw_text.trim();
    let body = strip_fences(trimmed).unwrap_or(trimmed).trim();

    if body.is_empty() {
        return malformed(trimmed, "model output is empty".to_string());
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(data)) => AnalysisResult::Success { data },
        Ok(other) => malformed(
            trimmed,
            format!("expected a JSON object, got {}", json_type_name(&other)),
        ),
        Err(e) => malformed(trimmed, format!("invalid JSON: {e}")),
    }
}

/// Return the content of a fenced block that encloses the entire text.
///
/// The text must open with a run of at least three backticks or tildes and end
/// with the same run. An optional language tag may follow the opening fence.
/// Returns `None` when the text is not fully enclosed, so unmatched or
/// mid-text fences are never touched.
pub fn strip_fences(text: &str) -> Option<&str> {
    let marker = text.chars().next()?;
    if marker != '`' && marker != '~' {
        return None;
    }
    let run = text.chars().take_while(|&c| c == marker).count();
    if run < 3 {
        return None;
    }

    // Markers are ASCII, so char counts equal byte offsets
    let fence = &text[..run];
    if text.len() < run * 2 || !text.ends_with(fence) {
        return None;
    }
    let inner = &text[run..text.len() - run];

    match inner.find('\n') {
        Some(newline) => {
            let info = inner[..newline].trim();
            if info.is_empty() || is_language_tag(info) {
                Some(&inner[newline + 1..])
            } else {
                // Content starts on the fence line itself
                Some(inner)
            }
        }
        None => {
            // Single-line block: "```json {...}```" or "```{...}```"
            match inner.split_once(char::is_whitespace) {
                Some((tag, rest)) if is_language_tag(tag) => Some(rest),
                _ => Some(inner),
            }
        }
    }
}

/// Info-string words like `json`, `JSON`, `json5`, `c++`, `objective-c`.
fn is_language_tag(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn malformed(trimmed: &str, message: String) -> AnalysisResult {
    AnalysisResult::Failure {
        kind: ErrorKind::MalformedOutput,
        message,
        raw_text: Some(trimmed.to_string()),
    }
}
