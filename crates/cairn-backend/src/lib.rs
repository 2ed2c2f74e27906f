//! Object backend capability and the retry-wrapped client over it.
//!
//! This crate defines the [`ObjectBackend`] trait for the remote immutable
//! object store, along with:
//!
//! - [`MemoryBackend`] — in-memory objects behind a `RwLock<HashMap>`.
//! - [`FileBackend`] — one file per object with a 2-level fan-out layout.
//! - [`FaultyBackend`] — wrapper injecting latency and scripted failures.
//! - [`RetryPolicy`] — exponential backoff with jitter and per-attempt timeouts.
//! - [`BackendClient`] — the façade every network call goes through.

mod client;
mod error;
mod faulty_backend;
mod file_backend;
mod memory_backend;
mod retry;
mod traits;

pub use client::BackendClient;
pub use error::BackendError;
pub use faulty_backend::{Fault, FaultyBackend, Op};
pub use file_backend::FileBackend;
pub use memory_backend::MemoryBackend;
pub use retry::RetryPolicy;
pub use traits::{ObjectBackend, RangeRead};
