//! Span bookkeeping for a single cache key.
//!
//! A [`SpanSet`] holds the stored spans of one CID, keyed by start offset.
//! Spans never overlap and never touch: an insert that overlaps or abuts an
//! existing span is merged with it, so any contiguous cached region lives in
//! exactly one span.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use cairn_types::ByteRange;

use crate::disk;

/// Where a span's bytes live.
pub(crate) enum SpanData {
    Memory(Bytes),
    Disk(PathBuf),
}

/// One stored, contiguous byte range.
pub(crate) struct Span {
    pub(crate) end: u64,
    pub(crate) data: SpanData,
    last_access: AtomicU64,
    /// Reader pins. The first counter is the one new readers increment;
    /// the rest are inherited from spans merged into this one.
    pins: Vec<Arc<AtomicUsize>>,
}

impl Span {
    pub(crate) fn new(end: u64, data: SpanData, tick: u64) -> Self {
        Self {
            end,
            data,
            last_access: AtomicU64::new(tick),
            pins: vec![Arc::new(AtomicUsize::new(0))],
        }
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::Relaxed);
    }

    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub(crate) fn is_pinned(&self) -> bool {
        self.pins.iter().any(|p| p.load(Ordering::SeqCst) > 0)
    }

    /// Pin the span for the lifetime of `lease`.
    pub(crate) fn pin(&self, lease: &mut SpanLease) {
        let counter = &self.pins[0];
        counter.fetch_add(1, Ordering::SeqCst);
        lease.pins.push(Arc::clone(counter));
    }

    /// Carry over the pins of a span that is being merged into this one.
    ///
    /// Counters no lease refers to any more are dropped.
    pub(crate) fn inherit_pins(&mut self, old: Span) {
        self.pins.extend(
            old.pins
                .into_iter()
                .filter(|p| Arc::strong_count(p) > 1 || p.load(Ordering::SeqCst) > 0),
        );
    }

    /// Read `len` bytes starting `offset` bytes into the span.
    pub(crate) async fn read(&self, offset: u64, len: u64) -> std::io::Result<Bytes> {
        match &self.data {
            SpanData::Memory(bytes) => Ok(bytes.slice(offset as usize..(offset + len) as usize)),
            SpanData::Disk(path) => disk::read_span(path, offset, len).await,
        }
    }
}

/// Guard that keeps the spans a reader touched safe from eviction.
///
/// Dropping the lease releases every pin it holds. Leases only guard against
/// eviction; an explicit purge or clear still removes pinned spans.
#[derive(Default)]
pub struct SpanLease {
    pins: Vec<Arc<AtomicUsize>>,
}

impl SpanLease {
    /// Number of spans this lease pins.
    pub fn pinned_spans(&self) -> usize {
        self.pins.len()
    }
}

impl Drop for SpanLease {
    fn drop(&mut self) {
        for pin in &self.pins {
            pin.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// All stored spans of one cache key.
#[derive(Default)]
pub(crate) struct SpanSet {
    pub(crate) spans: BTreeMap<u64, Span>,
    /// Set once the set has been unlinked from the cache map; writers that
    /// still hold it must look the key up again.
    pub(crate) retired: bool,
}

impl SpanSet {
    /// Spans sharing at least one byte with `range`, in offset order.
    pub(crate) fn overlapping(&self, range: ByteRange) -> impl Iterator<Item = (u64, &Span)> {
        let first = self
            .spans
            .range(..=range.start)
            .next_back()
            .filter(|(_, s)| s.end > range.start)
            .map_or(range.start, |(start, _)| *start);
        self.spans
            .range(first..range.end.max(first))
            .map(|(start, span)| (*start, span))
    }

    /// Start offsets of spans that overlap or abut `range`.
    pub(crate) fn touching(&self, range: ByteRange) -> Vec<u64> {
        let first = self
            .spans
            .range(..=range.start)
            .next_back()
            .filter(|(_, s)| s.end >= range.start)
            .map_or(range.start, |(start, _)| *start);
        self.spans
            .range(first..=range.end.max(first))
            .map(|(start, _)| *start)
            .collect()
    }

    /// Bytes of `range` already held.
    pub(crate) fn covered_within(&self, range: ByteRange) -> u64 {
        self.overlapping(range)
            .filter_map(|(start, span)| {
                ByteRange { start, end: span.end }
                    .intersect(&range)
                    .map(|r| r.len())
            })
            .sum()
    }

    pub(crate) fn touch_overlapping(&self, range: ByteRange, tick: u64) {
        for (_, span) in self.overlapping(range) {
            span.touch(tick);
        }
    }
}
