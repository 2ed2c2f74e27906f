//! Bounded LRU cache over byte ranges of immutable objects.
//!
//! Entries are keyed by CID. Each key holds a set of non-overlapping spans;
//! inserts that overlap or abut existing spans are coalesced, and reads
//! spanning several spans report the cached pieces plus the sub-ranges that
//! are genuinely missing.
//!
//! Locking is per key: lookups take a shared lock on the key's span set,
//! inserts and evictions take it exclusively. No code path holds two key
//! locks at once. Resident bytes are the one global counter; an insert
//! reserves its bytes atomically before touching the span set, so the
//! counter never exceeds the capacity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bytes::{Bytes, BytesMut};
use cairn_types::{ByteRange, CacheMode, Cid};
use tracing::{debug, info};

use crate::disk;
use crate::error::CacheError;
use crate::span::{Span, SpanData, SpanLease, SpanSet};

type SharedSet = Arc<tokio::sync::RwLock<SpanSet>>;

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Bytes currently held.
    pub resident_bytes: u64,
    /// Configured capacity in bytes.
    pub capacity_bytes: u64,
    /// Lookups served entirely from the cache.
    pub hit_count: u64,
    /// Lookups that found nothing cached.
    pub miss_count: u64,
    /// Lookups served partly from the cache.
    pub partial_hit_count: u64,
    /// Spans evicted to make room.
    pub eviction_count: u64,
    /// Stored spans across all keys.
    pub span_count: u64,
    /// Requests that joined an in-flight fetch instead of starting one.
    pub coalesced_waiters: u64,
}

/// Result of [`ChunkCache::lookup`].
///
/// `hits` and `missing` together tile the requested range in offset order.
/// The lease pins every span that produced a hit until it is dropped.
pub struct Lookup {
    /// Cached pieces of the range.
    pub hits: Vec<(ByteRange, Bytes)>,
    /// Sub-ranges with no cached bytes.
    pub missing: Vec<ByteRange>,
    /// Pins on the spans behind `hits`.
    pub lease: SpanLease,
}

impl Lookup {
    fn empty() -> Self {
        Self {
            hits: Vec::new(),
            missing: Vec::new(),
            lease: SpanLease::default(),
        }
    }

    fn miss(range: ByteRange) -> Self {
        let mut lookup = Self::empty();
        if !range.is_empty() {
            lookup.missing.push(range);
        }
        lookup
    }

    /// Whether the whole range was cached.
    pub fn is_full_hit(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Thread-safe chunk cache, in memory or on disk.
pub struct ChunkCache {
    capacity: u64,
    /// Span file root in disk mode.
    root: Option<PathBuf>,
    keys: RwLock<HashMap<Cid, SharedSet>>,
    resident: AtomicU64,
    clock: AtomicU64,
    span_count: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    partial_hits: AtomicU64,
    evictions: AtomicU64,
}

impl ChunkCache {
    fn with_root(capacity: u64, root: Option<PathBuf>) -> Self {
        Self {
            capacity,
            root,
            keys: RwLock::new(HashMap::new()),
            resident: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            span_count: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            partial_hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a volatile in-memory cache holding at most `capacity` bytes.
    ///
    /// A capacity of 0 disables caching: every insert fails with
    /// [`CacheError::Capacity`].
    pub fn in_memory(capacity: u64) -> Self {
        Self::with_root(capacity, None)
    }

    /// Open a disk-backed cache under `dir`, re-indexing spans left by a
    /// previous process.
    ///
    /// Re-indexed spans are trusted no more than fresh ones: callers verify
    /// assembled objects against their CID before relying on them.
    pub async fn open_disk(dir: impl AsRef<Path>, capacity: u64) -> Result<Self, CacheError> {
        let root = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        let cache = Self::with_root(capacity, Some(root.clone()));

        let mut found = disk::scan(&root).await?;
        // Wider spans first, so a span left behind by an interrupted merge is
        // dropped in favour of the merged one that contains it.
        found.sort_by(|a, b| {
            (a.0, a.1.start, std::cmp::Reverse(a.1.end))
                .cmp(&(b.0, b.1.start, std::cmp::Reverse(b.1.end)))
        });

        let mut restored = 0usize;
        for (cid, range, path) in found {
            let set = cache.set_for_insert(cid);
            let mut guard = set.write().await;
            if guard.covered_within(range) > 0 {
                disk::remove_span(&path).await;
                continue;
            }
            let tick = cache.tick();
            guard
                .spans
                .insert(range.start, Span::new(range.end, SpanData::Disk(path), tick));
            cache.resident.fetch_add(range.len(), Ordering::SeqCst);
            cache.span_count.fetch_add(1, Ordering::SeqCst);
            restored += 1;
        }

        let evicted = cache.evict_if_needed().await;
        info!(
            dir = %root.display(),
            spans = restored,
            evicted,
            resident = cache.size(),
            "opened disk cache"
        );
        Ok(cache)
    }

    /// Persistence mode of this cache.
    pub fn mode(&self) -> CacheMode {
        if self.root.is_some() {
            CacheMode::Disk
        } else {
            CacheMode::Memory
        }
    }

    /// Configured capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes currently resident.
    pub fn size(&self) -> u64 {
        self.resident.load(Ordering::SeqCst)
    }

    /// Snapshot of the cache counters. `coalesced_waiters` is always 0 here;
    /// the owner of the single-flight map fills it in.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            resident_bytes: self.size(),
            capacity_bytes: self.capacity,
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            partial_hit_count: self.partial_hits.load(Ordering::Relaxed),
            eviction_count: self.evictions.load(Ordering::Relaxed),
            span_count: self.span_count.load(Ordering::SeqCst),
            coalesced_waiters: 0,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn set_for(&self, key: &Cid) -> Option<SharedSet> {
        self.keys
            .read()
            .expect("cache lock poisoned")
            .get(key)
            .cloned()
    }

    fn set_for_insert(&self, key: Cid) -> SharedSet {
        self.keys
            .write()
            .expect("cache lock poisoned")
            .entry(key)
            .or_default()
            .clone()
    }

    /// Unlink an empty set from the key map.
    fn retire(&self, key: &Cid, set: &SharedSet, guard: &mut SpanSet) {
        guard.retired = true;
        let mut keys = self.keys.write().expect("cache lock poisoned");
        if keys.get(key).is_some_and(|current| Arc::ptr_eq(current, set)) {
            keys.remove(key);
        }
    }

    /// Atomically reserve `bytes` of capacity.
    fn reserve(&self, bytes: u64) -> bool {
        self.resident
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |resident| {
                resident
                    .checked_add(bytes)
                    .filter(|total| *total <= self.capacity)
            })
            .is_ok()
    }

    async fn forget_span(&self, span: Span, start: u64) {
        self.resident
            .fetch_sub(span.end - start, Ordering::SeqCst);
        self.span_count.fetch_sub(1, Ordering::SeqCst);
        if let SpanData::Disk(path) = &span.data {
            disk::remove_span(path).await;
        }
    }

    /// Split `range` into cached pieces and missing sub-ranges, pinning the
    /// spans that served a hit.
    async fn read_range(&self, key: Cid, range: ByteRange) -> Result<Lookup, CacheError> {
        let Some(set) = self.set_for(&key) else {
            return Ok(Lookup::miss(range));
        };
        let guard = set.read().await;
        let tick = self.tick();

        let mut lookup = Lookup::empty();
        let mut cursor = range.start;
        for (start, span) in guard.overlapping(range) {
            let part = ByteRange {
                start: start.max(range.start),
                end: span.end.min(range.end),
            };
            if part.start > cursor {
                lookup.missing.push(ByteRange {
                    start: cursor,
                    end: part.start,
                });
            }
            let bytes = span.read(part.start - start, part.len()).await?;
            span.touch(tick);
            span.pin(&mut lookup.lease);
            lookup.hits.push((part, bytes));
            cursor = part.end;
        }
        if cursor < range.end {
            lookup.missing.push(ByteRange {
                start: cursor,
                end: range.end,
            });
        }
        Ok(lookup)
    }

    /// Look up `range` of `key`, returning the cached pieces, the missing
    /// sub-ranges and a lease pinning the pieces against eviction.
    pub async fn lookup(&self, key: Cid, range: ByteRange) -> Result<Lookup, CacheError> {
        let lookup = self.read_range(key, range).await?;
        let counter = match (lookup.hits.is_empty(), lookup.missing.is_empty()) {
            (_, true) => &self.hits,
            (true, false) => &self.misses,
            (false, false) => &self.partial_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!(
            %key,
            %range,
            hits = lookup.hits.len(),
            missing = lookup.missing.len(),
            "cache lookup"
        );
        Ok(lookup)
    }

    /// Return `range` of `key` if it is fully cached. Counts as a lookup.
    pub async fn get(&self, key: Cid, range: ByteRange) -> Result<Option<Bytes>, CacheError> {
        let lookup = self.lookup(key, range).await?;
        if !lookup.is_full_hit() {
            return Ok(None);
        }
        Ok(stitch(range, lookup.hits))
    }

    /// Like [`get`](Self::get), without touching the hit and miss counters.
    pub async fn peek(&self, key: Cid, range: ByteRange) -> Result<Option<Bytes>, CacheError> {
        let lookup = self.read_range(key, range).await?;
        if !lookup.is_full_hit() {
            return Ok(None);
        }
        Ok(stitch(range, lookup.hits))
    }

    /// Whether every byte of `range` is cached.
    pub async fn covers(&self, key: Cid, range: ByteRange) -> bool {
        match self.set_for(&key) {
            Some(set) => set.read().await.covered_within(range) == range.len(),
            None => range.is_empty(),
        }
    }

    /// Store `data` as `range` of `key`, merging with overlapping or adjacent
    /// spans and evicting cold spans to make room.
    ///
    /// Fails with [`CacheError::Capacity`] when the range is larger than the
    /// cache or when nothing evictable is left.
    pub async fn put(&self, key: Cid, range: ByteRange, data: Bytes) -> Result<(), CacheError> {
        if data.len() as u64 != range.len() {
            return Err(CacheError::LengthMismatch {
                expected: range.len(),
                actual: data.len() as u64,
            });
        }
        if range.is_empty() {
            return Ok(());
        }
        if range.len() > self.capacity {
            return Err(CacheError::Capacity {
                needed: range.len(),
                capacity: self.capacity,
            });
        }

        loop {
            let set = self.set_for_insert(key);
            let needed = {
                let mut guard = set.write().await;
                if guard.retired {
                    continue;
                }
                let needed = range.len() - guard.covered_within(range);
                if needed == 0 {
                    guard.touch_overlapping(range, self.tick());
                    return Ok(());
                }
                if self.reserve(needed) {
                    let result = self.insert_locked(&mut guard, key, range, &data).await;
                    if result.is_err() {
                        self.resident.fetch_sub(needed, Ordering::SeqCst);
                    }
                    return result;
                }
                needed
            };

            if !self.evict_for(needed).await {
                debug!(%key, %range, needed, "no evictable spans left");
                return Err(CacheError::Capacity {
                    needed,
                    capacity: self.capacity,
                });
            }
        }
    }

    /// Merge `data` with every span touching `range` into a single span.
    /// The caller has already reserved the new bytes.
    async fn insert_locked(
        &self,
        set: &mut SpanSet,
        key: Cid,
        range: ByteRange,
        data: &Bytes,
    ) -> Result<(), CacheError> {
        let touching = set.touching(range);
        let merged = touching.iter().fold(range, |acc, start| ByteRange {
            start: acc.start.min(*start),
            end: acc.end.max(set.spans[start].end),
        });

        let payload = if touching.is_empty() {
            data.clone()
        } else {
            let mut buf = BytesMut::zeroed(merged.len() as usize);
            for start in &touching {
                let span = &set.spans[start];
                let bytes = span.read(0, span.end - start).await?;
                let at = (start - merged.start) as usize;
                buf[at..at + bytes.len()].copy_from_slice(&bytes);
            }
            let at = (range.start - merged.start) as usize;
            buf[at..at + data.len()].copy_from_slice(data);
            buf.freeze()
        };

        let data = match &self.root {
            Some(root) => {
                let path = disk::span_path(root, &key, merged);
                disk::write_span(&path, &payload).await?;
                SpanData::Disk(path)
            }
            None => SpanData::Memory(payload),
        };

        let mut span = Span::new(merged.end, data, self.tick());
        for start in &touching {
            if let Some(old) = set.spans.remove(start) {
                self.span_count.fetch_sub(1, Ordering::SeqCst);
                if let SpanData::Disk(path) = &old.data {
                    disk::remove_span(path).await;
                }
                span.inherit_pins(old);
            }
        }
        set.spans.insert(merged.start, span);
        self.span_count.fetch_add(1, Ordering::SeqCst);

        debug!(%key, %range, %merged, merged_spans = touching.len(), "cached span");
        Ok(())
    }

    /// Evict the coldest unpinned spans until `needed` more bytes fit.
    ///
    /// Returns `true` if the bytes fit afterwards or at least one span was
    /// evicted, so the caller can retry its reservation.
    async fn evict_for(&self, needed: u64) -> bool {
        let fits = || self.size().saturating_add(needed) <= self.capacity;
        if fits() {
            return true;
        }

        let snapshot: HashMap<Cid, SharedSet> = self
            .keys
            .read()
            .expect("cache lock poisoned")
            .iter()
            .map(|(cid, set)| (*cid, Arc::clone(set)))
            .collect();

        let mut candidates = Vec::new();
        for (cid, set) in &snapshot {
            let guard = set.read().await;
            for (start, span) in &guard.spans {
                if !span.is_pinned() {
                    candidates.push((span.last_access(), *cid, *start, span.end));
                }
            }
        }
        candidates.sort_unstable_by_key(|(tick, ..)| *tick);

        let mut evicted = false;
        for (_, cid, start, end) in candidates {
            if fits() {
                break;
            }
            let set = &snapshot[&cid];
            let mut guard = set.write().await;
            let still_cold = guard
                .spans
                .get(&start)
                .is_some_and(|span| span.end == end && !span.is_pinned());
            if !still_cold {
                continue;
            }
            if let Some(span) = guard.spans.remove(&start) {
                self.forget_span(span, start).await;
                self.evictions.fetch_add(1, Ordering::Relaxed);
                evicted = true;
                debug!(%cid, start, end, "evicted span");
            }
            if guard.spans.is_empty() && !guard.retired {
                self.retire(&cid, set, &mut guard);
                if let Some(root) = &self.root {
                    disk::remove_key_dir(root, &cid).await;
                }
            }
        }

        fits() || evicted
    }

    /// Evict cold spans until resident bytes are within capacity. Returns the
    /// number of spans evicted.
    pub async fn evict_if_needed(&self) -> u64 {
        let before = self.evictions.load(Ordering::Relaxed);
        while self.size() > self.capacity {
            if !self.evict_for(0).await {
                break;
            }
        }
        self.evictions.load(Ordering::Relaxed) - before
    }

    /// Drop every span of `key`, pinned or not. Returns the bytes released.
    pub async fn purge(&self, key: Cid) -> u64 {
        let Some(set) = self
            .keys
            .write()
            .expect("cache lock poisoned")
            .remove(&key)
        else {
            return 0;
        };

        let mut guard = set.write().await;
        guard.retired = true;
        let mut released = 0;
        for (start, span) in std::mem::take(&mut guard.spans) {
            released += span.end - start;
            self.forget_span(span, start).await;
        }
        if let Some(root) = &self.root {
            disk::remove_key_dir(root, &key).await;
        }
        debug!(%key, released, "purged cache key");
        released
    }

    /// Drop every cached span.
    pub async fn clear(&self) {
        let keys: Vec<Cid> = self
            .keys
            .read()
            .expect("cache lock poisoned")
            .keys()
            .copied()
            .collect();
        for key in keys {
            self.purge(key).await;
        }
        info!(resident = self.size(), "cleared cache");
    }
}

/// Join pieces that tile `range` into one buffer.
///
/// Pieces may arrive in any order and may overlap; returns `None` if they
/// leave a gap. A single piece covering exactly `range` is returned without
/// copying.
pub fn stitch(range: ByteRange, mut pieces: Vec<(ByteRange, Bytes)>) -> Option<Bytes> {
    pieces.sort_by_key(|(r, _)| r.start);
    if let [(only, bytes)] = pieces.as_slice()
        && *only == range
    {
        return Some(bytes.clone());
    }

    let mut buf = BytesMut::with_capacity(range.len() as usize);
    let mut cursor = range.start;
    for (piece, bytes) in &pieces {
        if piece.start > cursor {
            return None;
        }
        if piece.end <= cursor {
            continue;
        }
        let from = (cursor - piece.start) as usize;
        let to = (piece.end.min(range.end) - piece.start) as usize;
        buf.extend_from_slice(&bytes[from..to]);
        cursor = piece.end.min(range.end);
        if cursor == range.end {
            break;
        }
    }
    (cursor == range.end).then(|| buf.freeze())
}
