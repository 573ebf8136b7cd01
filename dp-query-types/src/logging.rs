//! Optional `tracing_subscriber` installer for tests and embedding binaries.
//!
//! Library code in this workspace never calls anything in this module —
//! process-wide logging initialization is the CLI/service façade's job
//! (out of scope, §1). This mirrors the shape of the teacher's
//! `sequencer_utils::logging` module without pulling its dependency on the
//! façade crate.

#[cfg(feature = "logging")]
use tracing_subscriber::EnvFilter;

/// Installs a `tracing_subscriber` formatter reading its filter from
/// `RUST_LOG`, falling back to `default_level` (e.g. `"info"`) when unset.
///
/// Safe to call more than once; subsequent calls are no-ops.
#[cfg(feature = "logging")]
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
