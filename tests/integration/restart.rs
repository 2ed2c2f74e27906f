//! Integration test: a disk cache and persistent index outlive the process
//! that filled them.

use std::sync::Arc;

use bytes::Bytes;
use cairn_backend::{FaultyBackend, MemoryBackend, ObjectBackend, Op};
use cairn_core::{ArtifactLayer, ArtifactRef, Credential, FetchRequest};
use cairn_integration_tests::{disk_config, seeded_data};

#[tokio::test]
async fn test_disk_cache_and_index_survive_restart() {
    let cache_dir = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    let config = disk_config(cache_dir.path(), index_dir.path(), "8MB");
    let memory = Arc::new(MemoryBackend::new());
    let v1 = seeded_data(300_000, 1);
    let v2 = seeded_data(300_000, 2);

    {
        let layer = ArtifactLayer::open(
            Arc::clone(&memory) as Arc<dyn ObjectBackend>,
            Credential::anonymous(),
            &config,
        )
        .await
        .unwrap();
        layer.store(Bytes::from(v1.clone()), Some("model")).await.unwrap();
        layer.store(Bytes::from(v2.clone()), Some("model")).await.unwrap();
    }

    let faulty = Arc::new(FaultyBackend::new(memory as Arc<dyn ObjectBackend>));
    let layer = ArtifactLayer::open(
        Arc::clone(&faulty) as Arc<dyn ObjectBackend>,
        Credential::anonymous(),
        &config,
    )
    .await
    .unwrap();

    let history = layer.list_versions("model").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(layer.cache_stats().resident_bytes, 600_000);

    let old = layer
        .fetch(FetchRequest::new(ArtifactRef::version("model", 1)))
        .await
        .unwrap();
    let new = layer
        .fetch(FetchRequest::new(ArtifactRef::latest("model")))
        .await
        .unwrap();
    assert_eq!(old.data, v1);
    assert_eq!(new.data, v2);
    assert_eq!(faulty.call_count(Op::GetRange), 0);
}

#[tokio::test]
async fn test_tampered_disk_span_is_not_served() {
    let cache_dir = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    let config = disk_config(cache_dir.path(), index_dir.path(), "8MB");
    let memory = Arc::new(MemoryBackend::new());
    let data = seeded_data(50_000, 3);

    let cid = {
        let layer = ArtifactLayer::open(
            Arc::clone(&memory) as Arc<dyn ObjectBackend>,
            Credential::anonymous(),
            &config,
        )
        .await
        .unwrap();
        layer.store(Bytes::from(data.clone()), None).await.unwrap().cid
    };

    // Flip one byte inside the single span file, keeping its length.
    let hex = cid.to_string();
    let key_dir = cache_dir.path().join(&hex[0..2]).join(&hex);
    let span = std::fs::read_dir(&key_dir)
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let mut bytes = std::fs::read(&span).unwrap();
    bytes[1234] ^= 0xFF;
    std::fs::write(&span, bytes).unwrap();

    let faulty = Arc::new(FaultyBackend::new(memory as Arc<dyn ObjectBackend>));
    let layer = ArtifactLayer::open(
        Arc::clone(&faulty) as Arc<dyn ObjectBackend>,
        Credential::anonymous(),
        &config,
    )
    .await
    .unwrap();

    // The restarted layer hashes the cached object before trusting it.
    let err = layer.fetch(FetchRequest::new(cid)).await.unwrap_err();
    assert_eq!(err.kind(), cairn_core::ErrorKind::Integrity);
    assert!(!key_dir.exists() || std::fs::read_dir(&key_dir).unwrap().next().is_none());

    let fetched = layer.fetch(FetchRequest::new(cid)).await.unwrap();
    assert_eq!(fetched.data, data);
    assert_eq!(faulty.call_count(Op::GetRange), 1);
}
