//! An [`ObjectBackend`] wrapper that adds latency and scripted failures.
//!
//! `FaultyBackend` wraps any `Arc<dyn ObjectBackend>`, sleeps for a random
//! duration before each call, and can be told to fail, hang, or corrupt the
//! next N calls of a given operation. It also counts calls per operation and
//! records every range request, which is what tests assert against to prove
//! how much network work a code path did.
//!
//! # Example
//!
//! ```ignore
//! let faulty = FaultyBackend::new(inner)
//!     .read_latency(5, 20)
//!     .seed(42);
//! faulty.fail_next(Op::GetRange, 2, BackendError::ConnectionReset("peer".into()));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use cairn_types::{ByteRange, Cid, Credential, ObjectInfo};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::time::Instant;

use crate::error::BackendError;
use crate::traits::{ObjectBackend, RangeRead};

/// Backend operation, used to target faults and read call counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// [`ObjectBackend::put`].
    Put,
    /// [`ObjectBackend::get_range`].
    GetRange,
    /// [`ObjectBackend::exists`].
    Exists,
    /// [`ObjectBackend::stat`].
    Stat,
    /// [`ObjectBackend::list`].
    List,
}

impl Op {
    fn index(self) -> usize {
        match self {
            Op::Put => 0,
            Op::GetRange => 1,
            Op::Exists => 2,
            Op::Stat => 3,
            Op::List => 4,
        }
    }
}

/// A scripted outcome for one call.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail the call with this error.
    Fail(BackendError),
    /// Never complete; only a per-attempt timeout ends the call.
    Hang,
}

/// A [`ObjectBackend`] wrapper that injects latency and failures.
pub struct FaultyBackend {
    inner: Arc<dyn ObjectBackend>,
    read_latency_ms: (u64, u64),
    write_latency_ms: (u64, u64),
    rng: Mutex<StdRng>,
    faults: Mutex<HashMap<Op, VecDeque<Fault>>>,
    calls: [AtomicUsize; 5],
    range_requests: Mutex<Vec<(Cid, ByteRange)>>,
    range_attempts: Mutex<Vec<Instant>>,
    corrupt_reads: AtomicBool,
}

impl FaultyBackend {
    /// Wrap an existing backend with zero latency and no faults.
    pub fn new(inner: Arc<dyn ObjectBackend>) -> Self {
        Self {
            inner,
            read_latency_ms: (0, 0),
            write_latency_ms: (0, 0),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            faults: Mutex::new(HashMap::new()),
            calls: Default::default(),
            range_requests: Mutex::new(Vec::new()),
            range_attempts: Mutex::new(Vec::new()),
            corrupt_reads: AtomicBool::new(false),
        }
    }

    /// Set the read latency range in milliseconds (uniform random).
    pub fn read_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.read_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the write latency range in milliseconds (uniform random).
    pub fn write_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.write_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Queue a fault for the next call of `op`.
    pub fn inject(&self, op: Op, fault: Fault) {
        self.faults
            .lock()
            .expect("faults lock poisoned")
            .entry(op)
            .or_default()
            .push_back(fault);
    }

    /// Fail the next `times` calls of `op` with `error`.
    pub fn fail_next(&self, op: Op, times: usize, error: BackendError) {
        for _ in 0..times {
            self.inject(op, Fault::Fail(error.clone()));
        }
    }

    /// Flip the first bit of every range read from now on.
    pub fn corrupt_reads(&self, enabled: bool) {
        self.corrupt_reads.store(enabled, Ordering::SeqCst);
    }

    /// Number of calls made for `op`, including failed ones.
    pub fn call_count(&self, op: Op) -> usize {
        self.calls[op.index()].load(Ordering::SeqCst)
    }

    /// Every `(cid, range)` passed to `get_range`, in call order.
    pub fn range_requests(&self) -> Vec<(Cid, ByteRange)> {
        self.range_requests
            .lock()
            .expect("range log lock poisoned")
            .clone()
    }

    /// When each `get_range` attempt started, on the tokio clock.
    pub fn range_attempt_times(&self) -> Vec<Instant> {
        self.range_attempts
            .lock()
            .expect("range log lock poisoned")
            .clone()
    }

    /// Reset call counters and request logs.
    pub fn reset_counters(&self) {
        for counter in &self.calls {
            counter.store(0, Ordering::SeqCst);
        }
        self.range_requests
            .lock()
            .expect("range log lock poisoned")
            .clear();
        self.range_attempts
            .lock()
            .expect("range log lock poisoned")
            .clear();
    }

    /// Count the call, then apply the next queued fault for `op`, if any.
    /// Latency is applied before this, so failed calls are slow too.
    async fn enter(&self, op: Op) -> Result<(), BackendError> {
        self.calls[op.index()].fetch_add(1, Ordering::SeqCst);
        let fault = self
            .faults
            .lock()
            .expect("faults lock poisoned")
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        match fault {
            None => Ok(()),
            Some(Fault::Fail(e)) => Err(e),
            Some(Fault::Hang) => std::future::pending().await,
        }
    }

    /// Sleep for a random duration in `[min, max]` milliseconds.
    async fn delay(&self, range: (u64, u64)) {
        let (min, max) = range;

        if max == 0 {
            return;
        }

        let ms = if min == max {
            min
        } else {
            self.rng
                .lock()
                .expect("rng lock poisoned")
                .random_range(min..=max)
        };

        if ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait::async_trait]
impl ObjectBackend for FaultyBackend {
    async fn put(&self, credential: &Credential, data: Bytes) -> Result<Cid, BackendError> {
        self.delay(self.write_latency_ms).await;
        self.enter(Op::Put).await?;
        self.inner.put(credential, data).await
    }

    async fn get_range(
        &self,
        credential: &Credential,
        cid: Cid,
        offset: u64,
        length: u64,
    ) -> Result<RangeRead, BackendError> {
        self.range_requests
            .lock()
            .expect("range log lock poisoned")
            .push((cid, ByteRange::at(offset, length)));
        self.range_attempts
            .lock()
            .expect("range log lock poisoned")
            .push(Instant::now());
        self.delay(self.read_latency_ms).await;
        self.enter(Op::GetRange).await?;

        let mut read = self.inner.get_range(credential, cid, offset, length).await?;
        if self.corrupt_reads.load(Ordering::SeqCst) && !read.data.is_empty() {
            let mut flipped = BytesMut::from(&read.data[..]);
            flipped[0] ^= 0x01;
            read.data = flipped.freeze();
        }
        Ok(read)
    }

    async fn exists(&self, credential: &Credential, cid: Cid) -> Result<bool, BackendError> {
        self.delay(self.read_latency_ms).await;
        self.enter(Op::Exists).await?;
        self.inner.exists(credential, cid).await
    }

    async fn stat(&self, credential: &Credential, cid: Cid) -> Result<ObjectInfo, BackendError> {
        self.delay(self.read_latency_ms).await;
        self.enter(Op::Stat).await?;
        self.inner.stat(credential, cid).await
    }

    async fn list(
        &self,
        credential: &Credential,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, BackendError> {
        self.enter(Op::List).await?;
        self.inner.list(credential, prefix).await
    }
}
