//! Logging setup
//!
//! Embedders call [`init_logging`] once at startup. `RUST_LOG` overrides the
//! default filter (e.g. `RUST_LOG=treecreeper_core=debug`).

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber with an env-driven filter
///
/// Returns `false` if a subscriber was already installed (common in tests).
pub fn init_logging(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init()
        .is_ok()
}
