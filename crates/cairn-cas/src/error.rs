//! Error types for content verification and manifests.

use cairn_types::Cid;

/// Errors that can occur during CAS operations.
#[derive(Debug, thiserror::Error)]
pub enum CasError {
    /// The bytes do not hash to the expected CID.
    #[error("integrity check failed: expected {expected}, actual hash {actual}")]
    IntegrityMismatch {
        /// The CID the caller asked for.
        expected: Cid,
        /// The CID computed from the bytes actually received.
        actual: Cid,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The bytes do not start with the manifest magic.
    #[error("not a manifest")]
    NotAManifest,

    /// Manifest has an unsupported version.
    #[error("unsupported manifest version {found}, this build supports version {supported}")]
    UnsupportedVersion {
        /// Version found in the manifest.
        found: u8,
        /// Version this build supports.
        supported: u8,
    },

    /// A manifest entry path is absolute, empty, or escapes the archive root.
    #[error("invalid manifest path {0:?}")]
    InvalidPath(String),

    /// Two manifest entries share the same path.
    #[error("duplicate manifest path {0:?}")]
    DuplicatePath(String),

    /// A decoded manifest is not in canonical (sorted) order.
    #[error("manifest entries are not in canonical order")]
    NonCanonical,
}
