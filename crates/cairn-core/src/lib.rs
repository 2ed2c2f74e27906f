//! Verified, cached access to content-addressed artifacts.
//!
//! The [`ArtifactLayer`] owns the backend client, the chunk cache and the
//! version index, and exposes the read / write / history pipeline for
//! artifacts. Collaborators (gateways, dataset loaders, checkpoint managers)
//! depend on the [`ArtifactAccess`] trait rather than the concrete layer.
//!
//! - [`config`] — TOML configuration.
//! - [`telemetry`] — tracing subscriber setup.
//! - [`ArtifactError`] — the closed error taxonomy every operation returns.

mod archive;
pub mod config;
mod coverage;
pub mod engine;
pub mod error;
mod layer;
mod read;
pub mod request;
pub mod telemetry;

pub use cairn_cache::CacheStats;
pub use cairn_types::{
    ArtifactRef, ByteRange, Cid, Credential, ManifestEntry, Selector, VersionEntry,
};
pub use config::{ConfigError, LayerConfig};
pub use engine::ArtifactAccess;
pub use error::{ArtifactError, ErrorKind};
pub use layer::ArtifactLayer;
pub use request::{FetchRequest, Fetched, StoreReceipt};

#[cfg(test)]
mod tests;
