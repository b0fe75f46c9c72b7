//! # Error Taxonomy
//!
//! One error enum for the whole workspace. Absent keys are not errors: the
//! engine and manager return `Ok(None)`/`Response::NotFound` for those, so
//! `CacheError` only covers failures a caller may want to log or retry.

use thiserror::Error;

/// Result alias used across the workspace.
pub type CacheResult<T> = Result<T, CacheError>;

/// Failures surfaced by the engine, cluster, and server layers.
///
/// The manager converts every variant into a `Response` at the API edge, so
/// no error crosses the wire boundary as a panic or raw io error.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Command carried missing or forbidden fields. Never retried.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Per-operation deadline exceeded. In-flight replica work may still
    /// complete and mutate state.
    #[error("operation timed out")]
    Timeout,

    /// Unexpected engine or replica failure.
    #[error("engine error: {0}")]
    Engine(String),

    /// Lock acquisition could not be granted within the wait bound.
    #[error("lock conflict")]
    LockConflict,

    /// A node id was not known to the cluster.
    #[error("unknown node: {0}")]
    NodeNotFound(String),

    /// The ring holds no nodes, so no key can be routed.
    #[error("hash ring is empty")]
    RingEmpty,

    /// The component has been shut down and refuses further operations.
    #[error("shutting down")]
    ShuttingDown,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Snapshot(String),
}

impl CacheError {
    /// Returns true when retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Timeout | CacheError::LockConflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_retryable() {
        assert!(CacheError::Timeout.is_retryable());
        assert!(!CacheError::InvalidCommand("missing key".into()).is_retryable());
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: CacheError = io.into();
        assert!(matches!(err, CacheError::Io(_)));
    }
}
