//! Per-key deduplication of in-flight fetches.
//!
//! The first caller for a key spawns the fetch as its own task and stores a
//! shared handle to the result; later callers for the same key await that
//! handle. The task owns the fetch, so a caller that stops waiting does not
//! cancel it for the others. When the task finishes it unlinks its key, so
//! the next request after completion starts a fresh fetch.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::debug;

/// The spawned fetch task panicked or was aborted before producing a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("in-flight fetch aborted: {0}")]
pub struct Aborted(pub String);

type Flight<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;
type Registry<K, V, E> = Arc<Mutex<HashMap<K, Flight<V, E>>>>;

/// Removes a finished flight from the registry, also when the fetch panics.
struct Unlink<K: Eq + Hash, V, E> {
    registry: Registry<K, V, E>,
    key: K,
}

impl<K: Eq + Hash, V, E> Drop for Unlink<K, V, E> {
    fn drop(&mut self) {
        if let Ok(mut inflight) = self.registry.lock() {
            inflight.remove(&self.key);
        }
    }
}

/// Map from key to the shared result of the fetch currently in flight.
pub struct SingleFlight<K, V, E> {
    inflight: Registry<K, V, E>,
    coalesced: AtomicU64,
}

impl<K, V, E> Default for SingleFlight<K, V, E> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            coalesced: AtomicU64::new(0),
        }
    }
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + From<Aborted> + Send + Sync + 'static,
{
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fetch` for `key`, or join the fetch already running for it.
    ///
    /// `fetch` is only called when no fetch for `key` is in flight. Every
    /// caller attached to the same flight receives a clone of the same
    /// result or error.
    pub async fn run<F, Fut>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
            match inflight.get(&key) {
                Some(flight) => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(?key, "joining in-flight fetch");
                    flight.clone()
                }
                None => {
                    let fut = fetch();
                    let unlink = Unlink {
                        registry: Arc::clone(&self.inflight),
                        key: key.clone(),
                    };
                    // The map lock is held until the handle is inserted, so
                    // the task cannot unlink its key before it is linked.
                    let task = tokio::spawn(async move {
                        let _unlink = unlink;
                        fut.await
                    });
                    let flight = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => Err(E::from(Aborted(e.to_string()))),
                        }
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key, flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().expect("inflight lock poisoned").len()
    }

    /// Total callers that joined an existing flight instead of starting one.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}
