//! Treecreeper Core Write Engine
//!
//! This crate coordinates writes to records whose state is split across two
//! stores: a graph store holding scalar properties and typed relationships,
//! and a document store holding large free-text properties.
//!
//! # Architecture
//!
//! - **Diff first**: a change request is reduced to what actually differs
//!   from the current record before anything is written
//! - **Compensated writes**: the stores share no transaction; every mutation
//!   records its inverse and a failed write is unwound in reverse
//! - **Events after commit**: change events are derived from what the stores
//!   reported and delivered off the request path, at most once
//!
//! # Modules
//!
//! - [`models`] - Type definitions, records and change requests
//! - [`db`] - Store contracts, in-memory stores and change events
//! - [`services`] - Diffing, reconciliation, the write coordinator and events
//! - [`config`] - Coordinator configuration
//! - [`utils`] - Logging setup and temporal normalization

pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::{ConfigError, CoordinatorConfig};
pub use db::*;
pub use models::*;
pub use services::*;
