//! Content verification and archive manifests.
//!
//! This crate provides:
//! - [`compute`] / [`verify`] / [`IncrementalHasher`] — BLAKE3 content
//!   identifiers, computed over whole buffers or streamed chunk by chunk.
//! - [`fingerprint`] — the secondary SHA-256 checksum used for version dedup.
//! - [`build_manifest`] — the canonical listing of an archive's children.
//!
//! An archive is stored like any other artifact: its manifest is serialized
//! (magic prefix + postcard) and the CID is the hash of those bytes.

mod error;
mod manifest;
mod verifier;

pub use error::CasError;
pub use manifest::{
    MANIFEST_MAGIC, MANIFEST_VERSION, Manifest, build_manifest, deserialize_manifest,
    is_manifest, serialize_manifest,
};
pub use verifier::{IncrementalHasher, compute, ensure_verified, fingerprint, verify};
