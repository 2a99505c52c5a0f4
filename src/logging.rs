//! Opt-in `tracing` bootstrap for binaries embedding the manager.
//!
//! Enable with the `logging` feature. Library users who already install
//! their own subscriber should not call this.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a formatted `tracing` subscriber honoring `RUST_LOG`
/// (default level: `info`). Calling it twice is a no-op.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
