//! Content fingerprints used as result-cache and single-flight keys.

use blake3::Hasher as Blake3Hasher;
use std::fmt;

/// BLAKE3 digest of the request-defining fields (prompt id + payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a payload analyzed under the given prompt.
    ///
    /// The prompt id is length-prefixed so that no (id, payload) pair can
    /// produce the same byte stream as another pair.
    pub fn compute(prompt_id: &str, payload: &[u8]) -> Self {
        let mut hasher = Blake3Hasher::new();
        hasher.update(&(prompt_id.len() as u64).to_le_bytes());
        hasher.update(prompt_id.as_bytes());
        hasher.update(payload);
        Self(*hasher.finalize().as_bytes())
    }

    /// Hex form, for logs.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// First 12 hex characters; enough to correlate log lines.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
