//! Shared test harness for cairn integration tests.
//!
//! Provides [`Harness`], an [`ArtifactLayer`] over an in-memory backend
//! with a [`FaultyBackend`] in between, so scenarios can script failures
//! and count exactly how much network work each call did.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cairn_backend::{BackendClient, FaultyBackend, MemoryBackend, ObjectBackend, Op, RetryPolicy};
use cairn_cache::ChunkCache;
use cairn_core::{ArtifactLayer, LayerConfig};
use cairn_index::VersionIndex;
use cairn_types::{Cid, Credential};

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    seeded_data(size, 0xDEAD_BEEF)
}

/// Like [`test_data`], with a caller-chosen seed.
pub fn seeded_data(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = seed;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// Backoff without jitter, so delays can be asserted exactly.
pub fn deterministic_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(100),
        multiplier: 2.0,
        max_delay: Duration::from_secs(10),
        jitter: 0.0,
        attempt_timeout: Some(Duration::from_secs(30)),
    }
}

/// An artifact layer wired to a scriptable in-memory backend.
pub struct Harness {
    pub layer: ArtifactLayer,
    pub memory: Arc<MemoryBackend>,
    pub faulty: Arc<FaultyBackend>,
}

impl Harness {
    /// Memory cache of `capacity` bytes, deterministic retries.
    pub fn new(capacity: u64) -> Self {
        Self::build(ChunkCache::in_memory(capacity), deterministic_retry(), 0)
    }

    /// Like [`new`](Self::new), with `read_latency_ms` on every backend read.
    pub fn with_latency(capacity: u64, read_latency_ms: u64) -> Self {
        Self::build(
            ChunkCache::in_memory(capacity),
            deterministic_retry(),
            read_latency_ms,
        )
    }

    fn build(cache: ChunkCache, retry: RetryPolicy, read_latency_ms: u64) -> Self {
        let memory = Arc::new(MemoryBackend::new());
        let faulty = Arc::new(
            FaultyBackend::new(Arc::clone(&memory) as Arc<dyn ObjectBackend>)
                .read_latency(read_latency_ms, read_latency_ms)
                .seed(7),
        );
        let layer = ArtifactLayer::new(
            BackendClient::new(
                Arc::clone(&faulty) as Arc<dyn ObjectBackend>,
                retry,
                Credential::anonymous(),
            ),
            cache,
            VersionIndex::open_temporary().expect("temporary index"),
            false,
        );
        Self {
            layer,
            memory,
            faulty,
        }
    }

    /// Put `data` straight into the backend, bypassing the layer.
    pub async fn seed(&self, data: &[u8]) -> Cid {
        self.memory
            .put(&Credential::anonymous(), Bytes::copy_from_slice(data))
            .await
            .expect("memory backend accepts anonymous puts")
    }

    /// `get_range` calls made so far, failed attempts included.
    pub fn range_calls(&self) -> usize {
        self.faulty.call_count(Op::GetRange)
    }
}

/// Configuration for a disk-cached layer with a persistent index.
pub fn disk_config(cache_dir: &Path, index_dir: &Path, capacity: &str) -> LayerConfig {
    LayerConfig::from_toml(&format!(
        r#"
[cache]
capacity = "{capacity}"
mode = "disk"
dir = "{}"

[index]
dir = "{}"
"#,
        cache_dir.display(),
        index_dir.display()
    ))
    .expect("valid disk config")
}
