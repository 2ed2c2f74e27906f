//! Integration test: overlapping range reads reuse cached bytes.

use cairn_core::{ByteRange, FetchRequest};
use cairn_integration_tests::{Harness, test_data};

/// [0,100) then [50,150): the second read only asks the backend for
/// [100,150), and both match an uncached direct read.
#[tokio::test]
async fn test_overlapping_read_fetches_only_new_bytes() {
    let h = Harness::new(16 * 1024 * 1024);
    let cid = h.seed(&test_data(64 * 1024)).await;

    let first = h
        .layer
        .fetch(FetchRequest::new(cid).range(0, 100))
        .await
        .unwrap();
    h.faulty.reset_counters();
    let second = h
        .layer
        .fetch(FetchRequest::new(cid).range(50, 150))
        .await
        .unwrap();
    assert_eq!(
        h.faulty.range_requests(),
        vec![(cid, ByteRange { start: 100, end: 150 })]
    );

    let direct_first = h.layer.client().get_range(cid, 0, 100).await.unwrap();
    let direct_second = h.layer.client().get_range(cid, 50, 100).await.unwrap();
    assert_eq!(first.data, direct_first.data);
    assert_eq!(second.data, direct_second.data);
}

/// A sliding window over an object touches every byte exactly once on the
/// backend.
#[tokio::test]
async fn test_sliding_window_fetches_each_byte_once() {
    let h = Harness::new(16 * 1024 * 1024);
    let data = test_data(100_000);
    let cid = h.seed(&data).await;

    for start in (0..90_000u64).step_by(5_000) {
        let fetched = h
            .layer
            .fetch(FetchRequest::new(cid).range(start, start + 10_000))
            .await
            .unwrap();
        assert_eq!(fetched.data, &data[start as usize..start as usize + 10_000]);
    }

    let fetched_bytes: u64 = h
        .faulty
        .range_requests()
        .iter()
        .map(|(_, range)| range.len())
        .sum();
    assert_eq!(fetched_bytes, 95_000);

    let stats = h.layer.cache_stats();
    assert_eq!(stats.span_count, 1);
    assert_eq!(stats.partial_hit_count, 17);
}
