//! Common error types for Strata.

use thiserror::Error;

/// Top-level error type for Strata operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Provider or store configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested provider is not registered or failed to initialize.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The backing index store could not be reached at construction.
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// An index query or write failed.
    #[error("Index error: {0}")]
    Index(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bytes written to a provider did not match the source length.
    #[error("Integrity mismatch: expected {expected} bytes, found {actual}")]
    IntegrityMismatch { expected: u64, actual: u64 },

    /// Payload exceeds the provider's documented maximum.
    #[error("Size limit exceeded: {size} bytes (limit {limit})")]
    SizeLimitExceeded { size: u64, limit: u64 },

    /// A path string has a shape that cannot be used.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Provider storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether the error means the whole backend is out of reach,
    /// as opposed to a single object failing.
    pub fn is_provider_unreachable(&self) -> bool {
        matches!(self, Error::ProviderUnavailable(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_classification() {
        assert!(Error::ProviderUnavailable("down".into()).is_provider_unreachable());
        assert!(!Error::NotFound("x".into()).is_provider_unreachable());
    }

    #[test]
    fn test_integrity_message() {
        let err = Error::IntegrityMismatch { expected: 10, actual: 4 };
        assert_eq!(
            err.to_string(),
            "Integrity mismatch: expected 10 bytes, found 4"
        );
    }
}
