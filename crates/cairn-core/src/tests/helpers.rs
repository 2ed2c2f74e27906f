//! Shared test utilities for cairn-core tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cairn_backend::{BackendClient, FaultyBackend, MemoryBackend, ObjectBackend, Op, RetryPolicy};
use cairn_cache::ChunkCache;
use cairn_index::VersionIndex;
use cairn_types::{Cid, Credential};

use crate::layer::ArtifactLayer;

pub const TEST_CAPACITY: u64 = 16 * 1024 * 1024;

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    seeded_data(size, 0xDEAD_BEEF)
}

/// Like [`test_data`], with a caller-chosen seed so two buffers differ.
pub fn seeded_data(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = seed;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// Millisecond backoff so retry paths run quickly on the real clock.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(1),
        multiplier: 2.0,
        max_delay: Duration::from_millis(20),
        jitter: 0.0,
        attempt_timeout: Some(Duration::from_secs(5)),
    }
}

/// A layer over an in-memory backend, with the fault-injection wrapper in
/// between so tests can count and script backend calls.
pub struct TestLayer {
    pub layer: ArtifactLayer,
    pub memory: Arc<MemoryBackend>,
    pub faulty: Arc<FaultyBackend>,
}

impl TestLayer {
    /// Put `data` straight into the backend, bypassing the layer, its cache
    /// and the call counters.
    pub async fn seed(&self, data: &[u8]) -> Cid {
        self.memory
            .put(&Credential::anonymous(), Bytes::copy_from_slice(data))
            .await
            .unwrap()
    }

    pub fn range_calls(&self) -> usize {
        self.faulty.call_count(Op::GetRange)
    }
}

/// Default test layer: 16 MB memory cache, trust-after-verify, no latency.
pub fn test_layer() -> TestLayer {
    layer_with(ChunkCache::in_memory(TEST_CAPACITY), false, 0)
}

/// Test layer with a custom cache, verification mode and read latency.
pub fn layer_with(cache: ChunkCache, verify_on_read: bool, read_latency_ms: u64) -> TestLayer {
    let memory = Arc::new(MemoryBackend::new());
    let faulty = Arc::new(
        FaultyBackend::new(Arc::clone(&memory) as Arc<dyn ObjectBackend>)
            .read_latency(read_latency_ms, read_latency_ms),
    );
    let client = BackendClient::new(
        Arc::clone(&faulty) as Arc<dyn ObjectBackend>,
        fast_retry(),
        Credential::anonymous(),
    );
    let layer = ArtifactLayer::new(
        client,
        cache,
        VersionIndex::open_temporary().unwrap(),
        verify_on_read,
    );
    TestLayer {
        layer,
        memory,
        faulty,
    }
}

/// Delete every regular file below `dir`, leaving directories in place.
pub fn remove_files(dir: &Path) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            remove_files(&path);
        } else {
            std::fs::remove_file(&path).unwrap();
        }
    }
}
