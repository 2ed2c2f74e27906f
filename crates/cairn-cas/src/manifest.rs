//! Archive manifest building and serialization.
//!
//! A [`Manifest`] lists the children of an archive artifact. It is stored as
//! a regular artifact: [`MANIFEST_MAGIC`] followed by the postcard encoding.
//! Entries are kept sorted by path so the same set of files always produces
//! the same bytes, and therefore the same CID.

use std::collections::BTreeSet;

use cairn_types::{Cid, ManifestEntry};
use serde::{Deserialize, Serialize};

use crate::error::CasError;
use crate::verifier::compute;

/// Prefix identifying a serialized manifest.
pub const MANIFEST_MAGIC: &[u8; 8] = b"CAIRNMF\0";

/// Current manifest format version.
pub const MANIFEST_VERSION: u8 = 1;

/// Canonical listing of an archive's children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version, checked on decode.
    pub version: u8,
    /// Children, sorted by path.
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Total size of all children in bytes.
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Look up a child by relative path.
    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// CID of this manifest's canonical serialized form.
    pub fn cid(&self) -> Result<Cid, CasError> {
        Ok(compute(&serialize_manifest(self)?))
    }
}

/// Build a canonical [`Manifest`] from child entries.
///
/// Entries are sorted by path. Absolute paths, empty components, `.`/`..`
/// components and duplicate paths are rejected.
pub fn build_manifest(mut entries: Vec<ManifestEntry>) -> Result<Manifest, CasError> {
    for entry in &entries {
        validate_path(&entry.path)?;
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut seen = BTreeSet::new();
    for entry in &entries {
        if !seen.insert(entry.path.as_str()) {
            return Err(CasError::DuplicatePath(entry.path.clone()));
        }
    }

    Ok(Manifest {
        version: MANIFEST_VERSION,
        entries,
    })
}

/// Serialize a manifest to its canonical bytes.
pub fn serialize_manifest(manifest: &Manifest) -> Result<Vec<u8>, CasError> {
    let body = postcard::to_allocvec(manifest).map_err(|e| CasError::Serialization(e.to_string()))?;
    let mut out = Vec::with_capacity(MANIFEST_MAGIC.len() + body.len());
    out.extend_from_slice(MANIFEST_MAGIC);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Deserialize a manifest from its canonical bytes.
///
/// Rejects unknown versions and non-canonical entry order, so a decoded
/// manifest always re-serializes to the bytes its CID was computed over.
pub fn deserialize_manifest(bytes: &[u8]) -> Result<Manifest, CasError> {
    let body = bytes
        .strip_prefix(MANIFEST_MAGIC.as_slice())
        .ok_or(CasError::NotAManifest)?;
    let manifest: Manifest =
        postcard::from_bytes(body).map_err(|e| CasError::Serialization(e.to_string()))?;
    if manifest.version != MANIFEST_VERSION {
        return Err(CasError::UnsupportedVersion {
            found: manifest.version,
            supported: MANIFEST_VERSION,
        });
    }
    for entry in &manifest.entries {
        validate_path(&entry.path)?;
    }
    if manifest.entries.windows(2).any(|w| w[0].path >= w[1].path) {
        return Err(CasError::NonCanonical);
    }
    Ok(manifest)
}

/// Whether `prefix` begins with the manifest magic.
///
/// Only the first [`MANIFEST_MAGIC`]`.len()` bytes are inspected, so callers
/// can probe an artifact with a short range read.
pub fn is_manifest(prefix: &[u8]) -> bool {
    prefix.starts_with(MANIFEST_MAGIC)
}

fn validate_path(path: &str) -> Result<(), CasError> {
    let bad = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.contains('\0')
        || path
            .split('/')
            .any(|c| c.is_empty() || c == "." || c == "..");
    if bad {
        return Err(CasError::InvalidPath(path.to_string()));
    }
    Ok(())
}
