//! Tracing subscriber setup for processes embedding the artifact layer.

use tracing_subscriber::EnvFilter;

/// Install a console `fmt` subscriber filtered by `RUST_LOG`, or by `level`
/// when `RUST_LOG` is unset or invalid.
///
/// Does nothing if a global subscriber is already installed.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
