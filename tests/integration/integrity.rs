//! Integration test: nothing unverified or corrupt reaches a caller.

use bytes::Bytes;
use cairn_core::{ErrorKind, FetchRequest};
use cairn_integration_tests::{Harness, test_data};

/// Fetched bytes verify against their CID; flipping any single bit breaks
/// verification.
#[tokio::test]
async fn test_fetched_bytes_verify_and_bit_flips_do_not() {
    let h = Harness::new(16 * 1024 * 1024);
    let data = test_data(32 * 1024);
    let receipt = h.layer.store(Bytes::from(data), None).await.unwrap();
    h.layer.clear_cache().await;

    let fetched = h.layer.fetch(FetchRequest::new(receipt.cid)).await.unwrap();
    assert!(cairn_cas::verify(&fetched.data, &receipt.cid));

    for bit in [0usize, 7, 8 * 1000 + 3, 8 * 32 * 1024 - 1] {
        let mut mutated = fetched.data.to_vec();
        mutated[bit / 8] ^= 1 << (bit % 8);
        assert!(!cairn_cas::verify(&mutated, &receipt.cid), "bit {bit}");
    }
}

/// A backend flipping a bit on the wire yields an integrity failure, the
/// bad bytes are purged, and a clean retry returns the original content.
#[tokio::test]
async fn test_corruption_on_the_wire_is_caught_and_purged() {
    let h = Harness::new(16 * 1024 * 1024);
    let data = test_data(100_000);
    let cid = h.seed(&data).await;

    h.faulty.corrupt_reads(true);
    let err = h.layer.fetch(FetchRequest::new(cid)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_eq!(h.layer.cache_stats().resident_bytes, 0);

    h.faulty.corrupt_reads(false);
    let fetched = h.layer.fetch(FetchRequest::new(cid)).await.unwrap();
    assert_eq!(fetched.data, data);
}

/// Range reads are checked once they add up to the whole object.
#[tokio::test]
async fn test_range_reads_are_checked_when_complete() {
    let h = Harness::new(16 * 1024 * 1024);
    let data = test_data(30_000);
    let cid = h.seed(&data).await;

    h.faulty.corrupt_reads(true);
    let mut results = Vec::new();
    for start in (0..30_000u64).step_by(10_000) {
        results.push(
            h.layer
                .fetch(FetchRequest::new(cid).range(start, start + 10_000))
                .await,
        );
    }
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert_eq!(results[2].as_ref().unwrap_err().kind(), ErrorKind::Integrity);

    h.faulty.corrupt_reads(false);
    let fetched = h
        .layer
        .fetch(FetchRequest::new(cid).range(0, 10_000).strict())
        .await
        .unwrap();
    assert_eq!(fetched.data, &data[..10_000]);
}
