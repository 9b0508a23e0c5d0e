//! Error types and handling for the ingestion pipeline.
//!
//! Errors are grouped by the collaborator that produced them so the service
//! loop can decide what is retryable. Transport and store failures are never
//! fatal to a running instance; they are logged and retried on the next cycle.

/// Failures reported by a remote file transport.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// The remote host did not answer in time
    #[error("Transport timeout: {0}")]
    Timeout(String),

    /// Credentials were rejected
    #[error("Transport authentication failed: {0}")]
    Auth(String),

    /// The requested file or directory does not exist
    #[error("Remote path not found: {0}")]
    NotFound(String),

    /// Any other I/O failure on the channel
    #[error("Transport I/O error: {0}")]
    Io(String),
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => TransportError::NotFound(err.to_string()),
            std::io::ErrorKind::TimedOut => TransportError::Timeout(err.to_string()),
            std::io::ErrorKind::PermissionDenied => TransportError::Auth(err.to_string()),
            _ => TransportError::Io(err.to_string()),
        }
    }
}

/// Failures reported by the shared durable store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached at all
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A read or write was rejected by the backing database
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A stored payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Writes are currently short-circuited after repeated failures
    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Crate-level error type.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid or unreadable configuration and registry files
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors, e.g. a background task that panicked
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let err: TransportError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.is_not_found());

        let err: TransportError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(err, TransportError::Auth(_)));
    }

    #[test]
    fn test_store_error_wraps_into_warden_error() {
        let err: WardenError = StoreError::Unavailable("offline".to_string()).into();
        assert_eq!(err.to_string(), "Store unavailable: offline");
    }
}
