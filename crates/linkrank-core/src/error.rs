//! Error types for linkrank.

use thiserror::Error;

/// Result type alias using linkrank's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for linkrank operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A prerequisite pipeline stage has not produced its output yet
    #[error("Precondition missing: {0}")]
    PreconditionMissing(String),

    /// Network or store timeout; retryable
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// A store is not configured for this deployment
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The durable orchestrator is unreachable or not configured
    #[error("Orchestrator unavailable: {0}")]
    OrchestratorUnavailable(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Workflow or stage bookkeeping error
    #[error("Workflow error: {0}")]
    Workflow(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the failed operation may succeed.
    ///
    /// Connection-level database failures count as transient; query errors
    /// (constraint violations, bad SQL) do not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientIo(_) | Error::Request(_) | Error::Embedding(_) => true,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_precondition_missing() {
        let err = Error::PreconditionMissing("run the authority stage first".to_string());
        assert_eq!(
            err.to_string(),
            "Precondition missing: run the authority stage first"
        );
    }

    #[test]
    fn test_error_display_store_unavailable() {
        let err = Error::StoreUnavailable("analytics store disabled".to_string());
        assert_eq!(err.to_string(), "Store unavailable: analytics store disabled");
    }

    #[test]
    fn test_error_display_orchestrator_unavailable() {
        let err = Error::OrchestratorUnavailable("not configured".to_string());
        assert_eq!(err.to_string(), "Orchestrator unavailable: not configured");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::TransientIo("timeout".into()).is_transient());
        assert!(Error::Request("connection reset".into()).is_transient());
        assert!(Error::Embedding("backend 503".into()).is_transient());
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(Error::Database(sqlx::Error::PoolClosed).is_transient());
    }

    #[test]
    fn test_non_transient_classification() {
        assert!(!Error::PreconditionMissing("x".into()).is_transient());
        assert!(!Error::InvalidInput("x".into()).is_transient());
        assert!(!Error::StoreUnavailable("x".into()).is_transient());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
