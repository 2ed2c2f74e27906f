//! Integration test: the cache never exceeds its capacity and never evicts
//! bytes an active reader holds.

use bytes::Bytes;
use cairn_cache::ChunkCache;
use cairn_core::{ByteRange, Cid, FetchRequest};
use cairn_integration_tests::{Harness, seeded_data, test_data};

/// Reads over many objects through a small cache: resident bytes stay under
/// capacity after every call, and every read returns the right bytes.
#[tokio::test]
async fn test_resident_bytes_bounded_by_capacity() {
    let capacity = 100_000;
    let h = Harness::new(capacity);

    let mut objects = Vec::new();
    for seed in 0..8u32 {
        let data = seeded_data(40_000, seed);
        let cid = h.seed(&data).await;
        objects.push((cid, data));
    }

    for round in 0..3u64 {
        for (i, (cid, data)) in objects.iter().enumerate() {
            let start = (i as u64 * 3_000 + round * 7_000) % 30_000;
            let end = start + 10_000;
            let fetched = h
                .layer
                .fetch(FetchRequest::new(*cid).range(start, end))
                .await
                .unwrap();
            assert_eq!(fetched.data, &data[start as usize..end as usize]);
            assert!(h.layer.cache_stats().resident_bytes <= capacity);
        }
    }

    let stats = h.layer.cache_stats();
    assert!(stats.eviction_count > 0);
    assert!(stats.resident_bytes <= capacity);
}

/// Whole-object reads larger than the cache are served uncached.
#[tokio::test]
async fn test_object_larger_than_cache_is_served_directly() {
    let h = Harness::new(10_000);
    let data = test_data(50_000);
    let cid = h.seed(&data).await;

    for _ in 0..2 {
        let fetched = h.layer.fetch(FetchRequest::new(cid)).await.unwrap();
        assert_eq!(fetched.data, data);
    }
    assert_eq!(h.range_calls(), 2);
    assert_eq!(h.layer.cache_stats().resident_bytes, 0);
}

/// A span held by an open lookup survives inserts that would otherwise
/// evict it, and becomes evictable once the reader lets go.
#[tokio::test]
async fn test_active_reader_pins_span() {
    let cache = ChunkCache::in_memory(1_000);
    let hot = Cid::from_data(b"hot");
    let range = ByteRange { start: 0, end: 600 };
    cache
        .put(hot, range, Bytes::from(vec![1u8; 600]))
        .await
        .unwrap();

    let reader = cache.lookup(hot, range).await.unwrap();
    assert!(reader.is_full_hit());

    for i in 0..5u8 {
        let other = Cid::from_data(&[i]);
        // Only 400 bytes are free while the hot span is pinned.
        let _ = cache
            .put(other, ByteRange { start: 0, end: 500 }, Bytes::from(vec![i; 500]))
            .await;
        assert!(cache.covers(hot, range).await);
        assert!(cache.size() <= 1_000);
    }

    drop(reader);
    cache
        .put(
            Cid::from_data(b"after"),
            ByteRange { start: 0, end: 500 },
            Bytes::from(vec![9u8; 500]),
        )
        .await
        .unwrap();
    assert!(!cache.covers(hot, range).await);
    assert!(cache.size() <= 1_000);
}
