//! Content hashing and verification.
//!
//! CIDs are minted with BLAKE3 over the raw bytes, exactly as
//! [`Cid::from_data`] does on upload, so verification here is meaningful for
//! anything a backend returns.

use cairn_types::{Cid, Fingerprint};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::CasError;

/// Compute the CID of a byte buffer.
pub fn compute(data: &[u8]) -> Cid {
    Cid::from_data(data)
}

/// Whether `data` hashes to `expected`.
pub fn verify(data: &[u8], expected: &Cid) -> bool {
    compute(data) == *expected
}

/// Verify `data` against `expected`, returning an integrity error on mismatch.
pub fn ensure_verified(data: &[u8], expected: &Cid) -> Result<(), CasError> {
    let actual = compute(data);
    if actual != *expected {
        warn!(%expected, %actual, size = data.len(), "content hash mismatch");
        return Err(CasError::IntegrityMismatch {
            expected: *expected,
            actual,
        });
    }
    Ok(())
}

/// Compute the secondary SHA-256 fingerprint of a byte buffer.
///
/// Independent of the CID scheme; used by the version index to detect
/// re-uploads of identical content.
pub fn fingerprint(data: &[u8]) -> Fingerprint {
    let digest: [u8; 32] = Sha256::digest(data).into();
    Fingerprint::from(digest)
}

/// Streaming CID computation over successive chunks.
///
/// Feeding the chunks of an object in order yields the same CID as
/// [`compute`] over the concatenation.
#[derive(Default)]
pub struct IncrementalHasher {
    hasher: blake3::Hasher,
    bytes: u64,
}

impl IncrementalHasher {
    /// Start a new hash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk.
    pub fn update(&mut self, chunk: &[u8]) -> &mut Self {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
        self
    }

    /// Number of bytes fed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    /// Finish and return the CID.
    pub fn finalize(&self) -> Cid {
        Cid::from(<[u8; 32]>::from(self.hasher.finalize()))
    }

    /// Finish and compare against `expected`.
    pub fn finalize_verify(&self, expected: &Cid) -> Result<(), CasError> {
        let actual = self.finalize();
        if actual != *expected {
            warn!(%expected, %actual, bytes = self.bytes, "streamed content hash mismatch");
            return Err(CasError::IntegrityMismatch {
                expected: *expected,
                actual,
            });
        }
        Ok(())
    }
}
