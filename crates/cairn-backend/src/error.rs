//! Error types for object backend operations.

use std::time::Duration;

use cairn_types::Cid;

/// Errors that can occur while talking to the object backend.
///
/// Errors are `Clone` so a single fetch outcome can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(Cid),

    /// The credential was rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The backend rejected the request as malformed.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// A single attempt exceeded its deadline.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The connection dropped mid-request, or a read came back short.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// The backend reported a server-side failure.
    #[error("backend unavailable (status {status}): {message}")]
    Unavailable {
        /// 5xx-style status code.
        status: u16,
        /// Backend-provided message.
        message: String,
    },

    /// Local I/O failure in a filesystem-backed backend.
    #[error("io error: {0}")]
    Io(String),

    /// The backend minted a CID that differs from the locally computed one.
    #[error("backend returned {actual} for content hashing to {expected}")]
    CidMismatch {
        /// CID computed locally over the uploaded bytes.
        expected: Cid,
        /// CID the backend reported.
        actual: Cid,
    },

    /// Retry budget exhausted on a retryable failure.
    #[error("{operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Name of the operation that was retried.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// The failure of the final attempt.
        last: Box<BackendError>,
    },
}

impl BackendError {
    /// Whether another attempt may succeed.
    ///
    /// Timeouts, resets, 5xx-style failures and local I/O hiccups are
    /// retryable; auth, malformed, not-found and integrity failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Timeout(_)
                | BackendError::ConnectionReset(_)
                | BackendError::Unavailable { .. }
                | BackendError::Io(_)
        )
    }
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::Io(e.to_string())
    }
}
