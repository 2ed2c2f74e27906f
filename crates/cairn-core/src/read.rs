//! Read path: resolve, size, look up, fetch what is missing, verify.
//!
//! Bytes of an object are only trusted once the whole object has been
//! hashed against its CID. A whole-object read hashes before returning. A
//! range read returns as soon as its bytes are present; once the ranges
//! returned for an object add up to all of it, the object is hashed by
//! streaming it window by window from the cache, refetching whatever was
//! evicted in between. Strict reads and layers with `verify_on_read` stream
//! and hash the whole object on every call.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use cairn_cache::stitch;
use cairn_cas::{CasError, IncrementalHasher};
use cairn_types::{ArtifactRef, ByteRange, Cid};
use tracing::{debug, error, warn};

use crate::error::ArtifactError;
use crate::layer::ArtifactLayer;
use crate::request::{FetchRequest, Fetched};

/// Largest piece of an object held in memory while it is streamed through
/// the hasher.
pub(crate) const VERIFY_WINDOW: u64 = 8 * 1024 * 1024;

impl ArtifactLayer {
    /// Read an artifact, or part of it.
    pub async fn fetch(&self, request: FetchRequest) -> Result<Fetched, ArtifactError> {
        let cid = self.resolve(&request.target)?;
        let size = self.object_size(cid).await?;
        let strict = request.strict || self.inner.verify_on_read;

        let (range, truncated) = match request.range {
            None => (ByteRange::at(0, size), false),
            Some(r) if r.start >= r.end => {
                return Err(ArtifactError::invalid(format!("empty or inverted range {r}")));
            }
            Some(r) if r.start >= size => {
                return Err(ArtifactError::invalid(format!(
                    "range {r} starts past the end of {cid} ({size} bytes)"
                )));
            }
            Some(r) => (r.clamp_to(size), r.end > size),
        };

        let data = if strict {
            self.stream_verified(cid, size, Some(range)).await?
        } else if range.len() == size {
            self.materialize(cid, size, false).await?
        } else {
            let (data, _) = self.assemble(cid, range).await?;
            if !self.inner.is_verified(&cid) && self.inner.record_retrieved(cid, range, size) {
                self.verify_retrieved(cid, size).await?;
            }
            data
        };

        debug!(%cid, %range, truncated, strict, "fetched");
        Ok(Fetched {
            cid,
            range,
            data,
            truncated,
        })
    }

    /// Pull the whole of `target` into the cache and verify it.
    ///
    /// Fails with [`ArtifactError::Capacity`] when the cache cannot keep the
    /// object resident, where [`fetch`](Self::fetch) would serve it uncached.
    pub async fn prefetch(&self, target: &ArtifactRef) -> Result<Cid, ArtifactError> {
        let cid = self.resolve(target)?;
        let size = self.object_size(cid).await?;
        let capacity = self.inner.cache.capacity();
        if size > capacity {
            return Err(ArtifactError::Capacity(format!(
                "{cid} is {size} bytes, cache holds {capacity}"
            )));
        }

        let whole = ByteRange::at(0, size);
        if !self.inner.is_verified(&cid) || !self.inner.cache.covers(cid, whole).await {
            self.stream_verified(cid, size, None).await?;
        }
        if !self.inner.cache.covers(cid, whole).await {
            return Err(ArtifactError::Capacity(format!(
                "could not keep {cid} resident; every other span is in use"
            )));
        }
        Ok(cid)
    }

    /// Length of the object behind `cid`, asking the backend at most once
    /// per CID even under concurrent callers.
    pub(crate) async fn object_size(&self, cid: Cid) -> Result<u64, ArtifactError> {
        if let Some(size) = self.inner.known_size(&cid) {
            return Ok(size);
        }
        let inner = Arc::clone(&self.inner);
        self.inner
            .size_flights
            .run(cid, move || async move {
                let info = inner.client.stat(cid).await?;
                inner.remember_size(cid, info.size);
                Ok(info.size)
            })
            .await
    }

    /// The whole object, hashed unless it is already verified and every
    /// byte came from the cache.
    pub(crate) async fn materialize(
        &self,
        cid: Cid,
        size: u64,
        rehash: bool,
    ) -> Result<Bytes, ArtifactError> {
        let (data, fetched) = self.assemble(cid, ByteRange::at(0, size)).await?;
        if rehash || fetched || !self.inner.is_verified(&cid) {
            self.check(cid, &data).await?;
        }
        Ok(data)
    }

    /// Hash `data` against `cid`.
    async fn check(&self, cid: Cid, data: &[u8]) -> Result<(), ArtifactError> {
        self.settle(cid, cairn_cas::ensure_verified(data, &cid)).await
    }

    /// Record the outcome of hashing `cid`. On mismatch every cached span of
    /// the CID is purged so the next read goes back to the backend.
    async fn settle(
        &self,
        cid: Cid,
        outcome: Result<(), CasError>,
    ) -> Result<(), ArtifactError> {
        match outcome {
            Ok(()) => {
                self.inner.mark_verified(cid);
                Ok(())
            }
            Err(e) => {
                warn!(%cid, error = %e, "integrity failure, purging cached spans");
                self.inner.quarantine(cid).await;
                Err(e.into())
            }
        }
    }

    /// Hash the whole object window by window and return the bytes of
    /// `keep`.
    ///
    /// Cached spans are read in place and evicted parts are fetched again,
    /// so no more than one window is held besides the kept bytes.
    async fn stream_verified(
        &self,
        cid: Cid,
        size: u64,
        keep: Option<ByteRange>,
    ) -> Result<Bytes, ArtifactError> {
        let mut hasher = IncrementalHasher::new();
        let mut kept = BytesMut::with_capacity(keep.map_or(0, |r| r.len() as usize));
        let mut offset = 0;
        while offset < size {
            let window = ByteRange::at(offset, VERIFY_WINDOW.min(size - offset));
            let (data, _) = self.assemble(cid, window).await?;
            hasher.update(&data);
            if let Some(part) = keep.and_then(|k| k.intersect(&window)) {
                let from = (part.start - offset) as usize;
                let to = (part.end - offset) as usize;
                kept.extend_from_slice(&data[from..to]);
            }
            offset = window.end;
        }
        self.settle(cid, hasher.finalize_verify(&cid)).await?;
        Ok(kept.freeze())
    }

    /// Hash an object whose every byte has now been returned by range
    /// reads. Concurrent callers completing the same object share one pass.
    async fn verify_retrieved(&self, cid: Cid, size: u64) -> Result<(), ArtifactError> {
        let layer = self.clone();
        self.inner
            .verify_flights
            .run(cid, move || async move {
                if layer.inner.is_verified(&cid) {
                    return Ok(());
                }
                debug!(%cid, size, "all ranges retrieved, verifying object");
                layer.stream_verified(cid, size, None).await.map(drop)
            })
            .await
    }

    /// Cached pieces of `range` plus fetches for every gap, stitched into
    /// one buffer. The flag reports whether any bytes came from the
    /// backend.
    pub(crate) async fn assemble(
        &self,
        cid: Cid,
        range: ByteRange,
    ) -> Result<(Bytes, bool), ArtifactError> {
        let (mut pieces, missing, _lease) = match self.inner.cache.lookup(cid, range).await {
            Ok(lookup) => (lookup.hits, lookup.missing, Some(lookup.lease)),
            Err(e) => {
                error!(%cid, %range, error = %e, "unreadable cached span");
                self.inner.quarantine(cid).await;
                (Vec::new(), vec![range], None)
            }
        };

        let fetched = !missing.is_empty();
        if fetched {
            // New bytes are not covered by an earlier verification.
            self.inner.forget_verified(&cid);
        }
        let gaps = missing.into_iter().map(|gap| self.fetch_span(cid, gap));
        pieces.extend(futures::future::try_join_all(gaps).await?);

        let data = stitch(range, pieces).ok_or_else(|| {
            ArtifactError::integrity(cid, format!("pieces do not tile {range}"))
        })?;
        Ok((data, fetched))
    }

    /// Fetch one missing range from the backend, sharing the request with
    /// any concurrent caller asking for the same range, and cache it.
    async fn fetch_span(
        &self,
        cid: Cid,
        range: ByteRange,
    ) -> Result<(ByteRange, Bytes), ArtifactError> {
        let inner = Arc::clone(&self.inner);
        let data = self
            .inner
            .range_flights
            .run((cid, range), move || async move {
                // A flight that just finished may have filled the gap.
                if let Ok(Some(bytes)) = inner.cache.peek(cid, range).await {
                    return Ok(bytes);
                }

                let read = inner.client.get_range(cid, range.start, range.len()).await?;
                if read.data.len() as u64 != range.len() {
                    return Err(ArtifactError::integrity(
                        cid,
                        format!("backend returned {} bytes for {range}", read.data.len()),
                    ));
                }
                if let Err(e) = inner.cache.put(cid, range, read.data.clone()).await {
                    debug!(%cid, %range, error = %e, "serving range uncached");
                }
                Ok(read.data)
            })
            .await?;
        Ok((range, data))
    }
}
