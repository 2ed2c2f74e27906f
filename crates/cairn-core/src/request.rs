//! Request and response types of the artifact layer.

use bytes::Bytes;
use cairn_types::{ArtifactRef, ByteRange, Cid};

/// What to read: an artifact, an optional byte range and a verification mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Name plus selector, or a direct CID.
    pub target: ArtifactRef,
    /// Requested bytes. `None` reads the whole object.
    ///
    /// Kept raw so an inverted range reaches validation instead of being
    /// lost at construction.
    pub range: Option<ByteRange>,
    /// Hash the whole object before returning any of it.
    pub strict: bool,
}

impl FetchRequest {
    /// Read the whole of `target`.
    pub fn new(target: impl Into<ArtifactRef>) -> Self {
        Self {
            target: target.into(),
            range: None,
            strict: false,
        }
    }

    /// Restrict the read to `[start, end)`.
    pub fn range(mut self, start: u64, end: u64) -> Self {
        self.range = Some(ByteRange { start, end });
        self
    }

    /// Verify eagerly for this call, whatever the layer's default.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// Bytes returned by a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// The CID the identifier resolved to.
    pub cid: Cid,
    /// The range actually returned, after clamping to the object length.
    pub range: ByteRange,
    /// The bytes of `range`.
    pub data: Bytes,
    /// The requested range ran past the end of the object.
    pub truncated: bool,
}

/// Outcome of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReceipt {
    /// Content address of the stored bytes.
    pub cid: Cid,
    /// Length of the stored bytes.
    pub size: u64,
    /// Version bound to the declared name, if one was given.
    pub version: Option<u64>,
    /// Whether the version was newly created. `false` when identical bytes
    /// were already the latest version of the name.
    pub new_version: bool,
}
