//! The closed error taxonomy returned to callers of the artifact layer.

use cairn_backend::BackendError;
use cairn_cache::{Aborted, CacheError};
use cairn_cas::CasError;
use cairn_index::IndexError;
use cairn_types::{Cid, ParseError};

use crate::config::ConfigError;

/// Which kind of failure an [`ArtifactError`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or expired credential. Not retried.
    Auth,
    /// Backend unreachable after the retry budget ran out.
    Connectivity,
    /// Unknown CID, name, version or archive path.
    NotFound,
    /// Bytes do not match their CID. The cached copy has been purged.
    Integrity,
    /// The cache cannot hold what was asked of it.
    Capacity,
    /// The request itself is malformed.
    InvalidRequest,
    /// The local version index failed.
    LocalStorage,
}

/// Every failure the artifact layer can report.
///
/// `Clone` so one fetch outcome can be handed to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    /// The backend rejected the credential.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A retryable backend failure outlived the retry budget.
    #[error("backend unreachable: {0}")]
    Connectivity(BackendError),

    /// The fetch task died before producing a result.
    #[error("fetch aborted: {0}")]
    Aborted(String),

    /// The named thing does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Content failed verification against its CID.
    #[error("integrity failure for {cid}: {detail}")]
    Integrity {
        /// The CID the bytes were requested under.
        cid: Cid,
        /// What did not match.
        detail: String,
    },

    /// The cache could not hold the requested data.
    #[error("cache capacity exceeded: {0}")]
    Capacity(String),

    /// Malformed identifier, range, name or manifest.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The local version index failed.
    #[error("local storage error: {0}")]
    LocalStorage(String),
}

impl ArtifactError {
    /// The taxonomy bucket this error falls in.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArtifactError::Auth(_) => ErrorKind::Auth,
            ArtifactError::Connectivity(_) | ArtifactError::Aborted(_) => ErrorKind::Connectivity,
            ArtifactError::NotFound(_) => ErrorKind::NotFound,
            ArtifactError::Integrity { .. } => ErrorKind::Integrity,
            ArtifactError::Capacity(_) => ErrorKind::Capacity,
            ArtifactError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ArtifactError::LocalStorage(_) => ErrorKind::LocalStorage,
        }
    }

    pub(crate) fn integrity(cid: Cid, detail: impl Into<String>) -> Self {
        ArtifactError::Integrity {
            cid,
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid(detail: impl Into<String>) -> Self {
        ArtifactError::InvalidRequest(detail.into())
    }
}

impl From<BackendError> for ArtifactError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::NotFound(cid) => ArtifactError::NotFound(format!("object {cid}")),
            BackendError::Unauthorized(msg) => ArtifactError::Auth(msg),
            BackendError::Malformed(msg) => ArtifactError::InvalidRequest(msg),
            BackendError::CidMismatch { expected, actual } => ArtifactError::integrity(
                expected,
                format!("backend stored the upload as {actual}"),
            ),
            other => ArtifactError::Connectivity(other),
        }
    }
}

impl From<IndexError> for ArtifactError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::UnknownName(name) => ArtifactError::NotFound(format!("artifact {name:?}")),
            IndexError::UnknownVersion { name, version } => {
                ArtifactError::NotFound(format!("version {version} of {name:?}"))
            }
            IndexError::InvalidName(e) => ArtifactError::InvalidRequest(e.to_string()),
            other => ArtifactError::LocalStorage(other.to_string()),
        }
    }
}

impl From<CasError> for ArtifactError {
    fn from(e: CasError) -> Self {
        match e {
            CasError::IntegrityMismatch { expected, actual } => {
                ArtifactError::integrity(expected, format!("content hashes to {actual}"))
            }
            other => ArtifactError::InvalidRequest(format!("malformed manifest: {other}")),
        }
    }
}

impl From<CacheError> for ArtifactError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Capacity { .. } => ArtifactError::Capacity(e.to_string()),
            CacheError::LengthMismatch { .. } => ArtifactError::InvalidRequest(e.to_string()),
            CacheError::Io(_) => ArtifactError::LocalStorage(e.to_string()),
        }
    }
}

impl From<ParseError> for ArtifactError {
    fn from(e: ParseError) -> Self {
        ArtifactError::InvalidRequest(e.to_string())
    }
}

impl From<ConfigError> for ArtifactError {
    fn from(e: ConfigError) -> Self {
        ArtifactError::InvalidRequest(format!("configuration: {e}"))
    }
}

impl From<Aborted> for ArtifactError {
    fn from(e: Aborted) -> Self {
        ArtifactError::Aborted(e.0)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_backend_errors_map_to_kinds() {
        let cid = Cid::from_data(b"x");
        let cases = [
            (BackendError::NotFound(cid), ErrorKind::NotFound),
            (BackendError::Unauthorized("expired".into()), ErrorKind::Auth),
            (BackendError::Malformed("bad".into()), ErrorKind::InvalidRequest),
            (
                BackendError::CidMismatch {
                    expected: cid,
                    actual: Cid::from_data(b"y"),
                },
                ErrorKind::Integrity,
            ),
            (
                BackendError::Exhausted {
                    operation: "get_range".into(),
                    attempts: 5,
                    last: Box::new(BackendError::Timeout(Duration::from_secs(1))),
                },
                ErrorKind::Connectivity,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(ArtifactError::from(err).kind(), kind);
        }
    }

    #[test]
    fn test_index_errors_map_to_kinds() {
        assert_eq!(
            ArtifactError::from(IndexError::UnknownName("m".into())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ArtifactError::from(IndexError::UnknownVersion {
                name: "m".into(),
                version: 4
            })
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ArtifactError::from(IndexError::Corrupt("head".into())).kind(),
            ErrorKind::LocalStorage
        );
    }

    #[test]
    fn test_cas_and_cache_errors_map_to_kinds() {
        assert_eq!(
            ArtifactError::from(CasError::NotAManifest).kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            ArtifactError::from(CacheError::Capacity {
                needed: 10,
                capacity: 5
            })
            .kind(),
            ErrorKind::Capacity
        );
    }
}
