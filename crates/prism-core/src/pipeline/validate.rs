//! Request validation before any backend work happens.

use crate::config::LimitsConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{AnalysisRequest, MimeType};

/// Validates requests before they reach the prompt store or the backend.
#[derive(Debug, Clone)]
pub struct Validator {
    limits: LimitsConfig,
}

impl Validator {
    /// Create a new validator with the given limits.
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    /// Check request shape and return the parsed MIME type.
    ///
    /// Checks:
    /// - Payload is non-empty and within the size limit
    /// - Declared MIME type is supported
    /// - Payload magic bytes agree with the declared type (when enabled)
    pub fn validate(&self, request: &AnalysisRequest) -> PipelineResult<MimeType> {
        if request.payload.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "payload is empty".to_string(),
            ));
        }

        let max_bytes = self.limits.max_payload_mb.saturating_mul(1024 * 1024);
        let size = request.payload.len() as u64;
        if size > max_bytes {
            return Err(PipelineError::InvalidRequest(format!(
                "payload too large ({}MB > {}MB)",
                size / (1024 * 1024),
                self.limits.max_payload_mb
            )));
        }

        let declared: MimeType = request.mime_type.parse()?;

        if self.limits.verify_content {
            match Self::sniff_mime(&request.payload) {
                Some(actual) if actual == declared => {}
                Some(actual) => {
                    return Err(PipelineError::InvalidRequest(format!(
                        "declared {declared} but payload looks like {actual}"
                    )));
                }
                None => {
                    return Err(PipelineError::InvalidRequest(format!(
                        "payload does not look like {declared} (unrecognized magic bytes)"
                    )));
                }
            }
        }

        Ok(declared)
    }

    /// Detect a supported image format from its magic bytes.
    pub fn sniff_mime(payload: &[u8]) -> Option<MimeType> {
        // JPEG: FF D8 FF
        if payload.len() >= 3 && payload[..3] == [0xFF, 0xD8, 0xFF] {
            return Some(MimeType::Jpeg);
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if payload.len() >= 8 && payload[..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]
        {
            return Some(MimeType::Png);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    fn validator() -> Validator {
        Validator::new(LimitsConfig::default())
    }

    #[test]
    fn test_magic_bytes_jpeg() {
        assert_eq!(Validator::sniff_mime(JPEG), Some(MimeType::Jpeg));
    }

    #[test]
    fn test_magic_bytes_png() {
        assert_eq!(Validator::sniff_mime(PNG), Some(MimeType::Png));
    }

    #[test]
    fn test_magic_bytes_invalid() {
        assert_eq!(Validator::sniff_mime(&[0, 0, 0, 0]), None);
        assert_eq!(Validator::sniff_mime(&[0xFF, 0xD8]), None);
        // GIF is a real image, just not one we accept
        assert_eq!(Validator::sniff_mime(b"GIF89a"), None);
    }

    #[test]
    fn test_valid_request() {
        let request = AnalysisRequest::new(JPEG, "image/jpeg", "learning");
        assert_eq!(validator().validate(&request).unwrap(), MimeType::Jpeg);
    }

    #[test]
    fn test_empty_payload_rejected() {
        let request = AnalysisRequest::new(Vec::new(), "image/jpeg", "learning");
        let err = validator().validate(&request).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_unsupported_mime_rejected() {
        let request = AnalysisRequest::new(JPEG, "image/webp", "learning");
        let err = validator().validate(&request).unwrap_err();
        assert!(err.to_string().contains("unsupported mime type"));
    }

    #[test]
    fn test_mismatched_content_rejected() {
        let request = AnalysisRequest::new(PNG, "image/jpeg", "learning");
        let err = validator().validate(&request).unwrap_err();
        assert!(err.to_string().contains("looks like image/png"), "{err}");
    }

    #[test]
    fn test_content_check_can_be_disabled() {
        let limits = LimitsConfig {
            verify_content: false,
            ..LimitsConfig::default()
        };
        let request = AnalysisRequest::new(b"opaque".as_slice(), "image/png", "learning");
        assert_eq!(
            Validator::new(limits).validate(&request).unwrap(),
            MimeType::Png
        );
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let limits = LimitsConfig {
            max_payload_mb: 1,
            ..LimitsConfig::default()
        };
        let mut payload = JPEG.to_vec();
        payload.resize(2 * 1024 * 1024, 0);
        let request = AnalysisRequest::new(payload, "image/jpeg", "learning");
        let err = Validator::new(limits).validate(&request).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }
}
