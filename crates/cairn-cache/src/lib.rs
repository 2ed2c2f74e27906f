//! Chunk cache for cairn.
//!
//! - [`ChunkCache`] — bounded LRU over byte ranges of immutable objects, with
//!   span coalescing, partial hits and in-memory or on-disk spans.
//! - [`SpanLease`] — pins the spans an active reader is using so eviction
//!   skips them.
//! - [`SingleFlight`] — collapses concurrent identical fetches into one.

mod cache;
mod disk;
mod error;
mod singleflight;
mod span;

pub use cache::{CacheStats, ChunkCache, Lookup, stitch};
pub use error::CacheError;
pub use singleflight::{Aborted, SingleFlight};
pub use span::SpanLease;
