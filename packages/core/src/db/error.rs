//! Store Error Types
//!
//! Typed failures reported by the graph and document store adapters. The
//! write coordinator maps these onto its own taxonomy; adapters must never
//! hide a failure behind a silent no-op.

use thiserror::Error;

/// Graph store adapter failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphStoreError {
    /// Addressed node or edge does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Node or edge already exists, or still has dependants
    #[error("{0}")]
    Conflict(String),

    /// Store did not respond, or timed out
    #[error("Graph store unavailable: {0}")]
    Unavailable(String),
}

impl GraphStoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Document store adapter failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentStoreError {
    /// Addressed object or version does not exist
    #[error("Document {0} not found")]
    NotFound(String),

    /// Store did not respond, or timed out
    #[error("Document store unavailable: {0}")]
    Unavailable(String),
}

impl DocumentStoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
