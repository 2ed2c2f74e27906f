//! [`ArtifactLayer`], the orchestrator that ties the components together.
//!
//! An `ArtifactLayer` owns the backend client, the chunk cache and the
//! version index, and exposes resolve / fetch / store on top of them. It is
//! cheap to clone; clones share all state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use cairn_backend::{BackendClient, ObjectBackend};
use cairn_cache::{CacheStats, ChunkCache, SingleFlight};
use cairn_index::VersionIndex;
use cairn_types::{
    ArtifactRef, ByteRange, CacheMode, Cid, Credential, VersionEntry, validate_name,
};
use tracing::{debug, info};

use crate::config::LayerConfig;
use crate::coverage::Coverage;
use crate::engine::ArtifactAccess;
use crate::error::ArtifactError;
use crate::request::{FetchRequest, Fetched, StoreReceipt};

/// Verified, cached access to content-addressed artifacts.
#[derive(Clone)]
pub struct ArtifactLayer {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) client: BackendClient,
    pub(crate) cache: ChunkCache,
    pub(crate) index: VersionIndex,
    /// Re-hash cached bytes on every read.
    pub(crate) verify_on_read: bool,
    /// Object lengths learned from `stat` or from a verified manifest.
    sizes: RwLock<HashMap<Cid, u64>>,
    /// CIDs whose cached bytes were hashed and matched.
    verified: RwLock<HashSet<Cid>>,
    /// Ranges returned for CIDs that are not verified yet.
    retrieved: Mutex<HashMap<Cid, Coverage>>,
    pub(crate) size_flights: SingleFlight<Cid, u64, ArtifactError>,
    pub(crate) range_flights: SingleFlight<(Cid, ByteRange), Bytes, ArtifactError>,
    pub(crate) verify_flights: SingleFlight<Cid, (), ArtifactError>,
}

/// Most CIDs each per-object map tracks. Past it an arbitrary entry is
/// dropped: a lost size costs one more `stat`, a lost verified mark or
/// coverage one more hash of the object.
pub(crate) const TRACKED_LIMIT: usize = 65_536;

/// Drop an arbitrary entry of `map` if inserting `key` would exceed
/// [`TRACKED_LIMIT`].
fn make_room<V>(map: &mut HashMap<Cid, V>, key: &Cid) {
    if map.len() >= TRACKED_LIMIT
        && !map.contains_key(key)
        && let Some(victim) = map.keys().next().copied()
    {
        map.remove(&victim);
    }
}

impl Inner {
    pub(crate) fn known_size(&self, cid: &Cid) -> Option<u64> {
        self.sizes
            .read()
            .expect("sizes lock poisoned")
            .get(cid)
            .copied()
    }

    pub(crate) fn remember_size(&self, cid: Cid, size: u64) {
        let mut sizes = self.sizes.write().expect("sizes lock poisoned");
        make_room(&mut sizes, &cid);
        sizes.insert(cid, size);
    }

    pub(crate) fn is_verified(&self, cid: &Cid) -> bool {
        self.verified
            .read()
            .expect("verified lock poisoned")
            .contains(cid)
    }

    pub(crate) fn mark_verified(&self, cid: Cid) {
        {
            let mut verified = self.verified.write().expect("verified lock poisoned");
            if verified.len() >= TRACKED_LIMIT
                && !verified.contains(&cid)
                && let Some(victim) = verified.iter().next().copied()
            {
                verified.remove(&victim);
            }
            verified.insert(cid);
        }
        self.forget_retrieved(&cid);
    }

    pub(crate) fn forget_verified(&self, cid: &Cid) {
        self.verified
            .write()
            .expect("verified lock poisoned")
            .remove(cid);
    }

    /// Note that `range` of `cid` was returned to a caller. Returns `true`
    /// once every byte of the object has been returned at least once.
    pub(crate) fn record_retrieved(&self, cid: Cid, range: ByteRange, size: u64) -> bool {
        let mut retrieved = self.retrieved.lock().expect("retrieved lock poisoned");
        make_room(&mut retrieved, &cid);
        let coverage = retrieved.entry(cid).or_default();
        coverage.insert(range);
        debug!(%cid, %range, covered = coverage.covered_bytes(), size, "range retrieved");
        coverage.is_complete(size)
    }

    fn forget_retrieved(&self, cid: &Cid) {
        self.retrieved
            .lock()
            .expect("retrieved lock poisoned")
            .remove(cid);
    }

    /// Drop every cached byte of `cid`, its verified status and the record
    /// of what was retrieved.
    pub(crate) async fn quarantine(&self, cid: Cid) {
        self.forget_verified(&cid);
        self.forget_retrieved(&cid);
        let released = self.cache.purge(cid).await;
        debug!(%cid, released, "quarantined cached spans");
    }
}

impl ArtifactLayer {
    /// Assemble a layer from already-built components.
    pub fn new(
        client: BackendClient,
        cache: ChunkCache,
        index: VersionIndex,
        verify_on_read: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                cache,
                index,
                verify_on_read,
                sizes: RwLock::new(HashMap::new()),
                verified: RwLock::new(HashSet::new()),
                retrieved: Mutex::new(HashMap::new()),
                size_flights: SingleFlight::new(),
                range_flights: SingleFlight::new(),
                verify_flights: SingleFlight::new(),
            }),
        }
    }

    /// Build a layer over `backend` as described by `config`.
    ///
    /// Opens (and re-indexes) the disk cache in disk mode, and the persistent
    /// version index when `index.dir` is set.
    pub async fn open(
        backend: Arc<dyn ObjectBackend>,
        credential: Credential,
        config: &LayerConfig,
    ) -> Result<Self, ArtifactError> {
        let retry = config.retry_policy()?;
        let capacity = config.cache_capacity_bytes()?;
        let mode = config.cache_mode()?;

        let cache = match mode {
            CacheMode::Memory => ChunkCache::in_memory(capacity),
            CacheMode::Disk => ChunkCache::open_disk(&config.cache.dir, capacity).await?,
        };
        let index = match &config.index.dir {
            Some(dir) => VersionIndex::open(dir)?,
            None => VersionIndex::open_temporary()?,
        };

        info!(
            ?mode,
            capacity,
            verify_on_read = config.verify_on_read(),
            persistent_index = config.index.dir.is_some(),
            "artifact layer ready"
        );
        Ok(Self::new(
            BackendClient::new(backend, retry, credential),
            cache,
            index,
            config.verify_on_read(),
        ))
    }

    /// The retry-wrapped backend client.
    pub fn client(&self) -> &BackendClient {
        &self.inner.client
    }

    /// The chunk cache.
    pub fn cache(&self) -> &ChunkCache {
        &self.inner.cache
    }

    /// The version index.
    pub fn index(&self) -> &VersionIndex {
        &self.inner.index
    }

    /// Turn an identifier into the CID it currently denotes.
    pub fn resolve(&self, target: &ArtifactRef) -> Result<Cid, ArtifactError> {
        match target {
            ArtifactRef::Direct(cid) => Ok(*cid),
            ArtifactRef::Named { name, selector } => {
                validate_name(name)?;
                Ok(self.inner.index.resolve(name, *selector)?)
            }
        }
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Upload `data` and optionally bind it to the next version of
    /// `declared_name`.
    ///
    /// Content the backend already holds is not uploaded again. Storing the
    /// bytes of the latest version under the same name returns that version
    /// instead of creating a new one.
    pub async fn store(
        &self,
        data: Bytes,
        declared_name: Option<&str>,
    ) -> Result<StoreReceipt, ArtifactError> {
        if let Some(name) = declared_name {
            validate_name(name)?;
        }
        let cid = cairn_cas::compute(&data);
        let size = data.len() as u64;

        if self.inner.client.exists(cid).await? {
            debug!(%cid, size, "content already in backend, skipping upload");
        } else {
            self.inner.client.put(data.clone()).await?;
            info!(%cid, size, "uploaded object");
        }
        self.inner.remember_size(cid, size);
        self.write_through(cid, data.clone()).await;

        let (version, new_version) = match declared_name {
            Some(name) => {
                let fingerprint = cairn_cas::fingerprint(&data);
                let recorded = self.inner.index.record_version(name, cid, fingerprint)?;
                (Some(recorded.entry.version), recorded.created)
            }
            None => (None, false),
        };

        Ok(StoreReceipt {
            cid,
            size,
            version,
            new_version,
        })
    }

    /// Cache freshly stored bytes as a verified whole object.
    async fn write_through(&self, cid: Cid, data: Bytes) {
        if self.inner.is_verified(&cid) {
            return;
        }
        // Older spans of this CID were never checked; replace them.
        self.inner.cache.purge(cid).await;
        let whole = ByteRange::at(0, data.len() as u64);
        match self.inner.cache.put(cid, whole, data).await {
            Ok(()) => self.inner.mark_verified(cid),
            Err(e) => debug!(%cid, error = %e, "stored object not cached"),
        }
    }

    // ------------------------------------------------------------------
    // Versions and cache control
    // ------------------------------------------------------------------

    /// Every version of `name`, oldest first.
    pub fn list_versions(&self, name: &str) -> Result<Vec<VersionEntry>, ArtifactError> {
        validate_name(name)?;
        Ok(self.inner.index.history(name)?)
    }

    /// Cache counters, including callers that joined an in-flight fetch.
    pub fn cache_stats(&self) -> CacheStats {
        let mut stats = self.inner.cache.stats();
        stats.coalesced_waiters = self.inner.range_flights.coalesced();
        stats
    }

    /// Drop every cached span, every verified mark and every remembered
    /// object size.
    pub async fn clear_cache(&self) {
        self.inner.cache.clear().await;
        self.inner
            .verified
            .write()
            .expect("verified lock poisoned")
            .clear();
        self.inner
            .retrieved
            .lock()
            .expect("retrieved lock poisoned")
            .clear();
        self.inner
            .sizes
            .write()
            .expect("sizes lock poisoned")
            .clear();
    }
}

#[async_trait::async_trait]
impl ArtifactAccess for ArtifactLayer {
    async fn fetch(&self, request: FetchRequest) -> Result<Fetched, ArtifactError> {
        ArtifactLayer::fetch(self, request).await
    }

    async fn store(
        &self,
        data: Bytes,
        declared_name: Option<&str>,
    ) -> Result<StoreReceipt, ArtifactError> {
        ArtifactLayer::store(self, data, declared_name).await
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<VersionEntry>, ArtifactError> {
        ArtifactLayer::list_versions(self, name)
    }

    fn cache_stats(&self) -> CacheStats {
        ArtifactLayer::cache_stats(self)
    }

    async fn clear_cache(&self) {
        ArtifactLayer::clear_cache(self).await
    }
}
