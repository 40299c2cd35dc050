//! Utility modules for treecreeper-core

pub mod logging;
pub mod temporal;

pub use logging::init_logging;
pub use temporal::{normalize_temporal, temporal_eq};
