//! [`BackendClient`], the retry-wrapped façade over an [`ObjectBackend`].

use std::sync::Arc;

use bytes::Bytes;
use cairn_types::{Cid, Credential, ObjectInfo};
use tracing::{debug, warn};

use crate::error::BackendError;
use crate::retry::RetryPolicy;
use crate::traits::{ObjectBackend, RangeRead};

/// Thin façade that routes every backend call through a [`RetryPolicy`].
///
/// Holds no cache state. The credential is passed through to the backend
/// and never logged.
#[derive(Clone)]
pub struct BackendClient {
    backend: Arc<dyn ObjectBackend>,
    retry: RetryPolicy,
    credential: Credential,
}

impl BackendClient {
    /// Create a client over `backend` with the given retry shape.
    pub fn new(
        backend: Arc<dyn ObjectBackend>,
        retry: RetryPolicy,
        credential: Credential,
    ) -> Self {
        Self {
            backend,
            retry,
            credential,
        }
    }

    /// The retry policy in effect.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Upload `data` and return its CID.
    ///
    /// The CID returned by the backend must match the one computed locally;
    /// otherwise the upload is rejected with [`BackendError::CidMismatch`].
    pub async fn put(&self, data: Bytes) -> Result<Cid, BackendError> {
        let expected = Cid::from_data(&data);
        let actual = self
            .retry
            .execute("put", || self.backend.put(&self.credential, data.clone()))
            .await?;
        if actual != expected {
            warn!(%expected, %actual, "backend minted an unexpected CID");
            return Err(BackendError::CidMismatch { expected, actual });
        }
        debug!(cid = %actual, size = data.len(), "uploaded object");
        Ok(actual)
    }

    /// Read `length` bytes of `cid` starting at `offset`.
    ///
    /// A short read that the backend did not flag as truncated is treated as
    /// a dropped connection and retried.
    pub async fn get_range(
        &self,
        cid: Cid,
        offset: u64,
        length: u64,
    ) -> Result<RangeRead, BackendError> {
        self.retry
            .execute("get_range", || async move {
                let read = self
                    .backend
                    .get_range(&self.credential, cid, offset, length)
                    .await?;
                let got = read.data.len() as u64;
                if got > length || (got < length && !read.truncated) {
                    return Err(BackendError::ConnectionReset(format!(
                        "short read of {cid}: asked {length} bytes at {offset}, got {got}"
                    )));
                }
                Ok(read)
            })
            .await
    }

    /// Check whether `cid` exists.
    pub async fn exists(&self, cid: Cid) -> Result<bool, BackendError> {
        self.retry
            .execute("exists", || self.backend.exists(&self.credential, cid))
            .await
    }

    /// Return size information for `cid`.
    pub async fn stat(&self, cid: Cid) -> Result<ObjectInfo, BackendError> {
        self.retry
            .execute("stat", || self.backend.stat(&self.credential, cid))
            .await
    }

    /// List objects whose hex CID starts with `prefix`.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, BackendError> {
        self.retry
            .execute("list", || self.backend.list(&self.credential, prefix))
            .await
    }
}
