//! Error types for chunk cache operations.

/// Errors that can occur while reading or writing the chunk cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The span cannot be held within the configured capacity, either because
    /// it is larger than the whole cache or because every resident span is
    /// currently pinned by a reader.
    #[error("cache capacity exceeded: need {needed} bytes, capacity is {capacity}")]
    Capacity {
        /// Bytes the insert needed to reserve.
        needed: u64,
        /// Configured capacity in bytes.
        capacity: u64,
    },

    /// The payload length does not match the range it was stored under.
    #[error("payload of {actual} bytes does not match range length {expected}")]
    LengthMismatch {
        /// Length of the declared range.
        expected: u64,
        /// Length of the payload.
        actual: u64,
    },

    /// An I/O error in disk mode.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
