//! In-memory object backend.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use cairn_types::{Cid, Credential, ObjectInfo};
use tracing::debug;

use crate::error::BackendError;
use crate::traits::{ObjectBackend, RangeRead, slice_range};

/// In-memory object backend backed by a `RwLock<HashMap>`.
///
/// Useful for tests and for embedding the layer without a remote store.
/// When constructed with [`MemoryBackend::with_credential`], every call must
/// present the same secret or fails with [`BackendError::Unauthorized`].
#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<Cid, Bytes>>,
    required: Option<Credential>,
}

impl MemoryBackend {
    /// Create an empty backend that accepts any credential.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty backend that only accepts `credential`.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            required: Some(credential),
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Whether no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the bytes stored under `cid` without re-hashing.
    ///
    /// Simulates a backend serving corrupted content; only for tests.
    #[doc(hidden)]
    pub fn overwrite_unchecked(&self, cid: Cid, data: Bytes) {
        self.objects
            .write()
            .expect("lock poisoned")
            .insert(cid, data);
    }

    fn authorize(&self, credential: &Credential) -> Result<(), BackendError> {
        match &self.required {
            Some(required) if required != credential => Err(BackendError::Unauthorized(
                "credential rejected by memory backend".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn object(&self, cid: Cid) -> Result<Bytes, BackendError> {
        let map = self.objects.read().expect("lock poisoned");
        map.get(&cid).cloned().ok_or(BackendError::NotFound(cid))
    }
}

#[async_trait::async_trait]
impl ObjectBackend for MemoryBackend {
    async fn put(&self, credential: &Credential, data: Bytes) -> Result<Cid, BackendError> {
        self.authorize(credential)?;
        let cid = Cid::from_data(&data);
        debug!(%cid, size = data.len(), "storing object in memory");
        self.objects
            .write()
            .expect("lock poisoned")
            .insert(cid, data);
        Ok(cid)
    }

    async fn get_range(
        &self,
        credential: &Credential,
        cid: Cid,
        offset: u64,
        length: u64,
    ) -> Result<RangeRead, BackendError> {
        self.authorize(credential)?;
        let data = self.object(cid)?;
        slice_range(&data, offset, length)
    }

    async fn exists(&self, credential: &Credential, cid: Cid) -> Result<bool, BackendError> {
        self.authorize(credential)?;
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.contains_key(&cid))
    }

    async fn stat(&self, credential: &Credential, cid: Cid) -> Result<ObjectInfo, BackendError> {
        self.authorize(credential)?;
        let data = self.object(cid)?;
        Ok(ObjectInfo {
            cid,
            size: data.len() as u64,
        })
    }

    async fn list(
        &self,
        credential: &Credential,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, BackendError> {
        self.authorize(credential)?;
        let map = self.objects.read().expect("lock poisoned");
        let mut listed: Vec<ObjectInfo> = map
            .iter()
            .filter(|(cid, _)| cid.to_string().starts_with(prefix))
            .map(|(cid, data)| ObjectInfo {
                cid: *cid,
                size: data.len() as u64,
            })
            .collect();
        listed.sort_by_key(|info| info.cid);
        Ok(listed)
    }
}
