//! Core trait and types for the object backend.

use bytes::Bytes;
use cairn_types::{Cid, Credential, ObjectInfo};

use crate::error::BackendError;

/// Result of a range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRead {
    /// The bytes read.
    pub data: Bytes,
    /// Set when the object ended before `offset + length`; `data` then holds
    /// only the remaining tail.
    pub truncated: bool,
}

/// Opaque remote store of immutable, content-addressed objects.
///
/// All implementations must be `Send + Sync` for use across async tasks.
/// Every call carries the caller's [`Credential`]; implementations decide
/// whether to check it.
#[async_trait::async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Upload an object and return the CID the backend minted for it.
    async fn put(&self, credential: &Credential, data: Bytes) -> Result<Cid, BackendError>;

    /// Read `length` bytes starting at `offset`.
    ///
    /// Returns exactly `length` bytes unless the object is shorter, in which
    /// case the tail is returned with `truncated` set. Never pads.
    async fn get_range(
        &self,
        credential: &Credential,
        cid: Cid,
        offset: u64,
        length: u64,
    ) -> Result<RangeRead, BackendError>;

    /// Check whether an object exists.
    async fn exists(&self, credential: &Credential, cid: Cid) -> Result<bool, BackendError>;

    /// Return size information for an object.
    async fn stat(&self, credential: &Credential, cid: Cid) -> Result<ObjectInfo, BackendError>;

    /// List objects whose hex CID starts with `prefix`.
    async fn list(
        &self,
        credential: &Credential,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, BackendError>;
}

/// Slice `[offset, offset + length)` out of a whole object.
pub(crate) fn slice_range(
    data: &Bytes,
    offset: u64,
    length: u64,
) -> Result<RangeRead, BackendError> {
    let len = data.len() as u64;
    if offset > len {
        return Err(BackendError::Malformed(format!(
            "offset {offset} beyond object end {len}"
        )));
    }
    let end = offset.saturating_add(length);
    let truncated = end > len;
    let end = end.min(len);
    Ok(RangeRead {
        data: data.slice(offset as usize..end as usize),
        truncated,
    })
}
