//! Error taxonomy for a scan
//!
//! Only conditions that abort a scan live here. A card that cannot be
//! detected or a field that cannot be read is not an error; those are
//! reported as absent values on the scan outcome.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to callers of the scanner
#[derive(Debug, Error)]
pub enum ScanError {
    /// The photo could not be read or decoded
    #[error("failed to decode image {}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The catalog request could not be completed or its body was unreadable
    #[error("catalog request failed: {0}")]
    CatalogRequest(#[from] reqwest::Error),

    /// The catalog answered with a non-success status
    #[error("catalog returned HTTP {status}")]
    CatalogStatus { status: u16 },

    /// The configured API key cannot be sent as a header
    #[error("invalid catalog API key")]
    InvalidApiKey(#[source] reqwest::header::InvalidHeaderValue),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Path used for photos decoded from memory
    pub fn in_memory_path() -> PathBuf {
        PathBuf::from("<memory>")
    }

    /// Whether this error came from the catalog collaborator
    pub fn is_catalog_error(&self) -> bool {
        matches!(self, ScanError::CatalogRequest(_) | ScanError::CatalogStatus { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_mentions_path() {
        let source = image::ImageError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = ScanError::Decode {
            path: PathBuf::from("cards/missing.jpg"),
            source,
        };
        assert!(err.to_string().contains("cards/missing.jpg"));
        assert!(!err.is_catalog_error());
    }

    #[test]
    fn test_catalog_status_is_catalog_error() {
        let err = ScanError::CatalogStatus { status: 503 };
        assert!(err.is_catalog_error());
        assert_eq!(err.to_string(), "catalog returned HTTP 503");
    }
}
