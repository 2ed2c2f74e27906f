//! Shared types and identifiers for cairn.
//!
//! This crate defines the data model used across the cairn workspace:
//! identifiers ([`Cid`], [`Fingerprint`]), addressing ([`ByteRange`],
//! [`Selector`], [`ArtifactRef`]), records ([`VersionEntry`],
//! [`ManifestEntry`], [`ObjectInfo`]), the opaque backend [`Credential`],
//! and the cache persistence [`CacheMode`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

/// Error returned when parsing a hex identifier or an artifact reference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The string is not 64 hex characters.
    #[error("invalid identifier {0:?}: expected 64 hex characters")]
    InvalidId(String),

    /// The version selector could not be parsed.
    #[error("invalid version selector {0:?}")]
    InvalidSelector(String),

    /// The artifact name is empty or contains forbidden characters.
    #[error("invalid artifact name {0:?}")]
    InvalidName(String),
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes)
                    .map_err(|_| ParseError::InvalidId(s.to_string()))?;
                Ok(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

define_id!(
    /// Content identifier of an artifact: `blake3(bytes)`.
    ///
    /// Archives get a CID the same way: it is the hash of the canonical
    /// serialized manifest.
    Cid
);

define_id!(
    /// Secondary content checksum (`sha256(bytes)`) used to decide whether
    /// an upload repeats the latest version of a name.
    Fingerprint
);

impl Cid {
    /// Mint the CID of a byte sequence.
    pub fn from_data(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }
}

// ---------------------------------------------------------------------------
// Byte ranges
// ---------------------------------------------------------------------------

/// A half-open byte range `[start, end)` within an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte offset (inclusive).
    pub start: u64,
    /// One past the last byte offset (exclusive).
    pub end: u64,
}

impl ByteRange {
    /// Create a range, returning `None` if `end < start`.
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Create a range from an offset and a length.
    pub fn at(offset: u64, length: u64) -> Self {
        Self {
            start: offset,
            end: offset.saturating_add(length),
        }
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `other` lies entirely inside this range.
    pub fn contains(&self, other: &ByteRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether the two ranges share at least one byte.
    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether the two ranges overlap or sit directly next to each other.
    pub fn touches(&self, other: &ByteRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// The bytes common to both ranges, if any.
    pub fn intersect(&self, other: &ByteRange) -> Option<ByteRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(ByteRange { start, end })
    }

    /// Clip the range to an object of `len` bytes.
    pub fn clamp_to(&self, len: u64) -> ByteRange {
        ByteRange {
            start: self.start.min(len),
            end: self.end.min(len),
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Addressing
// ---------------------------------------------------------------------------

/// Which version of a named artifact to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    /// The most recently recorded version.
    Latest,
    /// A specific version number (1-based).
    Version(u64),
    /// An explicit CID, passed through unchanged.
    Cid(Cid),
}

impl FromStr for Selector {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(Selector::Latest);
        }
        let digits = s.strip_prefix('v').unwrap_or(s);
        if !digits.is_empty() && digits.len() < 20 && digits.bytes().all(|b| b.is_ascii_digit()) {
            return match digits.parse::<u64>() {
                Ok(0) | Err(_) => Err(ParseError::InvalidSelector(s.to_string())),
                Ok(n) => Ok(Selector::Version(n)),
            };
        }
        s.parse::<Cid>()
            .map(Selector::Cid)
            .map_err(|_| ParseError::InvalidSelector(s.to_string()))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Latest => f.write_str("latest"),
            Selector::Version(n) => write!(f, "{n}"),
            Selector::Cid(cid) => write!(f, "{cid}"),
        }
    }
}

/// How a caller identifies an artifact: a name plus selector, or a bare CID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactRef {
    /// A named artifact resolved through the version index.
    Named {
        /// Human-readable name.
        name: String,
        /// Version selector.
        selector: Selector,
    },
    /// A direct content address.
    Direct(Cid),
}

impl ArtifactRef {
    /// Reference the latest version of `name`.
    pub fn latest(name: impl Into<String>) -> Self {
        ArtifactRef::Named {
            name: name.into(),
            selector: Selector::Latest,
        }
    }

    /// Reference version `version` of `name`.
    pub fn version(name: impl Into<String>, version: u64) -> Self {
        ArtifactRef::Named {
            name: name.into(),
            selector: Selector::Version(version),
        }
    }
}

impl From<Cid> for ArtifactRef {
    fn from(cid: Cid) -> Self {
        ArtifactRef::Direct(cid)
    }
}

/// Parses `name`, `name@latest`, `name@3`, `name@v3`, `name@<cid>` or a bare
/// 64-hex CID.
impl FromStr for ArtifactRef {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(cid) = s.parse::<Cid>() {
            return Ok(ArtifactRef::Direct(cid));
        }
        let (name, selector) = match s.rsplit_once('@') {
            Some((name, sel)) => (name, sel.parse::<Selector>()?),
            None => (s, Selector::Latest),
        };
        validate_name(name)?;
        Ok(ArtifactRef::Named {
            name: name.to_string(),
            selector,
        })
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactRef::Named { name, selector } => write!(f, "{name}@{selector}"),
            ArtifactRef::Direct(cid) => write!(f, "{cid}"),
        }
    }
}

/// Check that an artifact name can be stored in the version index.
///
/// Names must be non-empty and must not contain NUL, `@` or control characters.
pub fn validate_name(name: &str) -> Result<(), ParseError> {
    if name.is_empty() || name.chars().any(|c| c == '@' || c.is_control()) {
        return Err(ParseError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One entry in a name's append-only version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Artifact name.
    pub name: String,
    /// Version number, starting at 1 and increasing by one per new content.
    pub version: u64,
    /// Content this version is permanently bound to.
    pub cid: Cid,
    /// Unix timestamp (seconds) when the version was recorded.
    pub created_at: u64,
}

/// One child of an archive manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path of the file relative to the archive root.
    pub path: String,
    /// Content identifier of the child.
    pub cid: Cid,
    /// Size of the child in bytes.
    pub size: u64,
}

/// Object listing entry returned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Content identifier.
    pub cid: Cid,
    /// Object size in bytes.
    pub size: u64,
}

// ---------------------------------------------------------------------------
// Session and configuration
// ---------------------------------------------------------------------------

/// Opaque capability presented to the object backend.
///
/// The secret is never printed: `Debug` and `Display` both render
/// `Credential(<redacted>)`, and the type is deliberately not serializable.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a secret token.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// An empty credential for backends that do not authenticate.
    pub fn anonymous() -> Self {
        Self(String::new())
    }

    /// Expose the secret to a backend implementation.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Where the chunk cache keeps its spans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// In-memory spans, lost on restart.
    #[default]
    Memory,
    /// One file per span under a cache directory, kept across restarts.
    Disk,
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheMode::Memory),
            "disk" => Ok(CacheMode::Disk),
            other => Err(format!("unknown cache mode {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
