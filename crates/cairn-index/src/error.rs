//! Error types for the version index.

use cairn_types::ParseError;

/// Errors returned by [`VersionIndex`](crate::VersionIndex) operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Fjall database error.
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    /// I/O error (e.g. from Fjall guard operations).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] postcard::Error),

    /// The name has no recorded versions.
    #[error("unknown artifact name: {0:?}")]
    UnknownName(String),

    /// The name exists but the version does not.
    #[error("{name:?} has no version {version}")]
    UnknownVersion {
        /// Artifact name.
        name: String,
        /// Requested version.
        version: u64,
    },

    /// The name cannot be stored.
    #[error(transparent)]
    InvalidName(#[from] ParseError),

    /// A stored value has an unexpected shape.
    #[error("corrupt index record: {0}")]
    Corrupt(String),
}
