//! Error types for the APM core.
//!
//! Tracking operations never surface these; they are returned only by
//! configuration, rule persistence and the explicit store accessors.

use thiserror::Error;

/// Result type alias for APM operations.
pub type Result<T> = std::result::Result<T, ApmError>;

/// Errors that can occur in the APM core.
#[derive(Debug, Error)]
pub enum ApmError {
    /// Persistent store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A notification channel rejected or failed a delivery.
    #[error("Notification error: {0}")]
    Notification(String),

    /// HTTP/network error.
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation did not complete within its deadline.
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// Lookup of an unknown identifier through an explicit accessor.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for ApmError {
    fn from(e: reqwest::Error) -> Self {
        ApmError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for ApmError {
    fn from(e: serde_json::Error) -> Self {
        ApmError::Serialization(e.to_string())
    }
}

impl From<lookout_tracing::WriteError> for ApmError {
    fn from(e: lookout_tracing::WriteError) -> Self {
        ApmError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApmError::Store("connection refused".to_string());
        assert_eq!(err.to_string(), "Store error: connection refused");

        assert_eq!(ApmError::Timeout(250).to_string(), "Timed out after 250ms");
    }

    #[test]
    fn test_from_serde_error() {
        let err: ApmError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, ApmError::Serialization(_)));
    }
}
