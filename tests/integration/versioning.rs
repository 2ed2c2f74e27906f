//! Integration test: named artifacts and their version history.

use bytes::Bytes;
use cairn_core::{ArtifactRef, FetchRequest};
use cairn_integration_tests::{Harness, seeded_data};

/// Upload b1 under "m", again b1, then b2: two versions, resolvable both
/// by number and as latest.
#[tokio::test]
async fn test_versioning_example() {
    let h = Harness::new(16 * 1024 * 1024);
    let b1 = Bytes::from(seeded_data(64 * 1024, 1));
    let b2 = Bytes::from(seeded_data(64 * 1024, 2));

    let r1 = h.layer.store(b1.clone(), Some("m")).await.unwrap();
    assert_eq!(r1.version, Some(1));

    let r1_again = h.layer.store(b1.clone(), Some("m")).await.unwrap();
    assert_eq!(r1_again.cid, r1.cid);
    assert_eq!(r1_again.version, Some(1));

    let r2 = h.layer.store(b2.clone(), Some("m")).await.unwrap();
    assert_ne!(r2.cid, r1.cid);
    assert_eq!(r2.version, Some(2));

    assert_eq!(h.layer.resolve(&ArtifactRef::latest("m")).unwrap(), r2.cid);
    assert_eq!(h.layer.resolve(&ArtifactRef::version("m", 1)).unwrap(), r1.cid);

    h.layer.clear_cache().await;
    let old = h
        .layer
        .fetch(FetchRequest::new(ArtifactRef::version("m", 1)))
        .await
        .unwrap();
    assert_eq!(old.data, b1);
    let new = h
        .layer
        .fetch(FetchRequest::new(ArtifactRef::latest("m")))
        .await
        .unwrap();
    assert_eq!(new.data, b2);
}

/// Interleaved stores of repeated and fresh content keep the history
/// strictly increasing and gap-free.
#[tokio::test]
async fn test_history_is_strictly_increasing() {
    let h = Harness::new(16 * 1024 * 1024);
    let seeds = [1, 1, 2, 2, 2, 3, 1, 4, 4, 5];
    for seed in seeds {
        h.layer
            .store(Bytes::from(seeded_data(1024, seed)), Some("run"))
            .await
            .unwrap();
    }

    let history = h.layer.list_versions("run").unwrap();
    let numbers: Vec<u64> = history.iter().map(|e| e.version).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
    assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}
