//! Version index for cairn, wrapping Fjall.
//!
//! [`VersionIndex`] maps a human-readable name to an append-only, gap-free
//! sequence of versions, each bound permanently to one CID. Two keyspaces:
//!
//! - `versions` — `name ++ 0x00 ++ version (8 bytes BE)` → serialized entry
//!   and content fingerprint
//! - `heads` — `name` → latest version (8 bytes BE)

mod error;
mod index;

pub use error::IndexError;
pub use index::{Recorded, VersionIndex};
