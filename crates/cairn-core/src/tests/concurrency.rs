//! Concurrent readers: single-flight fetches and bounded cache occupancy.

use std::sync::Arc;

use bytes::Bytes;
use cairn_backend::Op;
use cairn_cache::ChunkCache;
use cairn_types::Cid;

use super::helpers::*;
use crate::error::ErrorKind;
use crate::request::FetchRequest;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_concurrent_fetches_share_one_backend_call() {
    let t = layer_with(ChunkCache::in_memory(TEST_CAPACITY), false, 50);
    let data = test_data(100_000);
    let cid = t.seed(&data).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let layer = t.layer.clone();
        handles.push(tokio::spawn(async move {
            layer
                .fetch(FetchRequest::new(cid).range(4096, 8192))
                .await
                .unwrap()
                .data
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), &data[4096..8192]);
    }

    assert_eq!(t.faulty.call_count(Op::GetRange), 1);
    assert_eq!(t.faulty.call_count(Op::Stat), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_concurrent_failures_share_one_backend_call() {
    let t = layer_with(ChunkCache::in_memory(TEST_CAPACITY), false, 50);
    let missing = Cid::from_data(b"not in the backend");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let layer = t.layer.clone();
        handles.push(tokio::spawn(async move {
            layer.fetch(FetchRequest::new(missing)).await.unwrap_err()
        }));
    }
    let mut errors = Vec::new();
    for handle in handles {
        errors.push(handle.await.unwrap());
    }

    assert!(errors.iter().all(|e| e.kind() == ErrorKind::NotFound));
    assert!(errors.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(t.faulty.call_count(Op::Stat), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_reader_does_not_fail_others() {
    let t = layer_with(ChunkCache::in_memory(TEST_CAPACITY), false, 100);
    let data = test_data(10_000);
    let cid = t.seed(&data).await;
    // Learn the size first so both readers wait on the range fetch.
    t.layer.fetch(FetchRequest::new(cid).range(0, 1)).await.unwrap();

    let doomed = {
        let layer = t.layer.clone();
        tokio::spawn(async move { layer.fetch(FetchRequest::new(cid).range(10, 5000)).await })
    };
    while t.layer.inner.range_flights.in_flight() == 0 {
        tokio::task::yield_now().await;
    }
    let survivor = {
        let layer = t.layer.clone();
        tokio::spawn(async move { layer.fetch(FetchRequest::new(cid).range(10, 5000)).await })
    };
    while t.layer.cache_stats().coalesced_waiters == 0 {
        tokio::task::yield_now().await;
    }
    doomed.abort();

    let fetched = survivor.await.unwrap().unwrap();
    assert_eq!(fetched.data, &data[10..5000]);
    assert_eq!(t.faulty.call_count(Op::GetRange), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_concurrent_ranges_stay_within_capacity() {
    let capacity = 64 * 1024;
    let t = layer_with(ChunkCache::in_memory(capacity), false, 1);
    let data = Arc::new(test_data(512 * 1024));
    let cid = t.seed(&data).await;

    let mut handles = Vec::new();
    for i in 0..32u64 {
        let layer = t.layer.clone();
        let data = Arc::clone(&data);
        handles.push(tokio::spawn(async move {
            let start = (i * 7919 * 13) % (500 * 1024);
            let end = start + 1024 + (i * 311) % 8192;
            let fetched = layer
                .fetch(FetchRequest::new(cid).range(start, end))
                .await
                .unwrap();
            assert_eq!(fetched.data, &data[start as usize..end as usize]);
            assert!(layer.cache_stats().resident_bytes <= capacity);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = t.layer.cache_stats();
    assert!(stats.resident_bytes <= capacity);
    assert!(stats.eviction_count > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_store_and_fetch_of_many_objects() {
    let t = test_layer();
    let mut handles = Vec::new();
    for seed in 0..12u32 {
        let layer = t.layer.clone();
        handles.push(tokio::spawn(async move {
            let data = seeded_data(20_000, seed);
            let name = format!("obj-{seed}");
            let receipt = layer
                .store(Bytes::from(data.clone()), Some(&name))
                .await
                .unwrap();
            layer.clear_cache().await;
            let fetched = layer
                .fetch(FetchRequest::new(crate::ArtifactRef::latest(name)))
                .await
                .unwrap();
            assert_eq!(fetched.cid, receipt.cid);
            assert_eq!(fetched.data, data);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}
