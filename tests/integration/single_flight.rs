//! Integration test: identical concurrent reads share one backend fetch.

use bytes::Bytes;
use cairn_backend::Op;
use cairn_core::FetchRequest;
use cairn_integration_tests::{Harness, test_data};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_n_concurrent_fetches_one_backend_call() {
    let h = Harness::with_latency(16 * 1024 * 1024, 100);
    let data = test_data(256 * 1024);
    let cid = h.seed(&data).await;

    let mut handles = Vec::new();
    for _ in 0..32 {
        let layer = h.layer.clone();
        handles.push(tokio::spawn(async move {
            layer
                .fetch(FetchRequest::new(cid).range(10_000, 90_000))
                .await
        }));
    }
    let results: Vec<Bytes> = {
        let mut out = Vec::new();
        for handle in handles {
            out.push(handle.await.unwrap().unwrap().data);
        }
        out
    };

    assert!(results.iter().all(|r| r == &data[10_000..90_000]));
    assert_eq!(h.faulty.call_count(Op::GetRange), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_n_concurrent_fetches_one_shared_failure() {
    let h = Harness::with_latency(16 * 1024 * 1024, 100);
    let cid = h.seed(&test_data(4096)).await;
    // Learn the size up front so the range fetch is the only shared call.
    h.layer
        .fetch(FetchRequest::new(cid).range(0, 1))
        .await
        .unwrap();
    h.faulty.fail_next(
        Op::GetRange,
        1,
        cairn_backend::BackendError::Malformed("range not satisfiable".into()),
    );
    h.faulty.reset_counters();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let layer = h.layer.clone();
        handles.push(tokio::spawn(async move {
            layer.fetch(FetchRequest::new(cid).range(100, 200)).await
        }));
    }
    let mut errors = Vec::new();
    for handle in handles {
        errors.push(handle.await.unwrap().unwrap_err());
    }

    assert!(errors.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(h.faulty.call_count(Op::GetRange), 1);
}
