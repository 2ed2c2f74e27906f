//! [`ArtifactAccess`] — the narrow interface collaborators program against.
//!
//! Gateways, dataset loaders and checkpoint managers depend on this trait
//! rather than on [`ArtifactLayer`](crate::ArtifactLayer), so tests can hand
//! them any implementation.

use bytes::Bytes;
use cairn_cache::CacheStats;
use cairn_types::VersionEntry;

use crate::error::ArtifactError;
use crate::request::{FetchRequest, Fetched, StoreReceipt};

/// Verified, cached access to content-addressed artifacts.
///
/// Covers the five operations collaborators need:
///
/// - **fetch** — read verified bytes by name or CID, optionally a range
/// - **store** — upload bytes, optionally binding them to a name
/// - **list_versions** — the version history of a name
/// - **cache_stats** — cache occupancy and hit counters
/// - **clear_cache** — drop every cached byte
#[async_trait::async_trait]
pub trait ArtifactAccess: Send + Sync {
    /// Read an artifact or a range of it.
    ///
    /// Returns verified bytes or exactly one [`ArtifactError`].
    async fn fetch(&self, request: FetchRequest) -> Result<Fetched, ArtifactError>;

    /// Upload `data`. When `declared_name` is given, bind the CID to the next
    /// version of that name unless it already is the latest version.
    async fn store(
        &self,
        data: Bytes,
        declared_name: Option<&str>,
    ) -> Result<StoreReceipt, ArtifactError>;

    /// Every version of `name`, oldest first. Empty for an unknown name.
    async fn list_versions(&self, name: &str) -> Result<Vec<VersionEntry>, ArtifactError>;

    /// Snapshot of cache occupancy and counters.
    fn cache_stats(&self) -> CacheStats;

    /// Drop every cached span.
    async fn clear_cache(&self);
}
