//! Service Layer Error Types
//!
//! This module defines the error taxonomy surfaced by the write coordinator.
//! Every store failure is mapped onto one of these variants; compensation
//! failures are attached to the error that triggered them, never reported in
//! its place.

use crate::db::{DocumentStoreError, GraphStoreError};
use crate::models::{RecordKey, ValidationError};
use thiserror::Error;

/// Coarse classification of a [`WriteError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    StoreUnavailable,
    MergeFailure,
    CompensationFailed,
}

/// Write coordination errors
#[derive(Error, Debug, Clone)]
pub enum WriteError {
    /// Malformed request; no store was touched
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Addressed record absent on read or delete
    #[error("{0} does not exist")]
    NotFound(String),

    /// Linked records absent and `upsert` not requested
    #[error("Missing related node(s): {}", .missing.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    MissingRelatedNodes { missing: Vec<RecordKey> },

    /// Create on an existing code, or delete of a linked record
    #[error("{0}")]
    Conflict(String),

    /// A store failed to respond or timed out
    #[error("{0}")]
    StoreUnavailable(String),

    /// Document merge protocol failed after its own compensation
    #[error("MERGE FAILED: {0}")]
    MergeFailure(String),

    /// Compensation failed while handling `primary`
    #[error("{primary} (compensation failed: {})", .failures.join("; "))]
    CompensationFailed {
        primary: Box<WriteError>,
        failures: Vec<String>,
    },
}

impl WriteError {
    pub fn not_found(key: &RecordKey) -> Self {
        Self::NotFound(key.to_string())
    }

    pub fn already_exists(key: &RecordKey) -> Self {
        Self::Conflict(format!("{key} already exists"))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn merge_failure(msg: impl Into<String>) -> Self {
        Self::MergeFailure(msg.into())
    }

    /// Attach compensation failures to `self`; a no-op when there are none
    pub fn with_compensation_failures(self, failures: Vec<String>) -> Self {
        if failures.is_empty() {
            self
        } else {
            Self::CompensationFailed {
                primary: Box::new(self),
                failures,
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WriteError::Validation(_) | WriteError::MissingRelatedNodes { .. } => ErrorKind::Validation,
            WriteError::NotFound(_) => ErrorKind::NotFound,
            WriteError::Conflict(_) => ErrorKind::Conflict,
            WriteError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            WriteError::MergeFailure(_) => ErrorKind::MergeFailure,
            WriteError::CompensationFailed { .. } => ErrorKind::CompensationFailed,
        }
    }

    /// HTTP-style status for transport layers
    pub fn status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::StoreUnavailable => 503,
            ErrorKind::MergeFailure | ErrorKind::CompensationFailed => 500,
        }
    }

    /// The error that started the failure, looking through compensation
    pub fn primary(&self) -> &WriteError {
        match self {
            WriteError::CompensationFailed { primary, .. } => primary.primary(),
            other => other,
        }
    }
}

impl From<GraphStoreError> for WriteError {
    fn from(err: GraphStoreError) -> Self {
        match err {
            GraphStoreError::NotFound(what) => WriteError::NotFound(what),
            GraphStoreError::Conflict(msg) => WriteError::Conflict(msg),
            unavailable @ GraphStoreError::Unavailable(_) => {
                WriteError::StoreUnavailable(unavailable.to_string())
            }
        }
    }
}

impl From<DocumentStoreError> for WriteError {
    fn from(err: DocumentStoreError) -> Self {
        match err {
            DocumentStoreError::NotFound(what) => WriteError::NotFound(format!("Document {what}")),
            unavailable @ DocumentStoreError::Unavailable(_) => {
                WriteError::StoreUnavailable(unavailable.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statuses() {
        let missing = WriteError::MissingRelatedNodes {
            missing: vec![RecordKey::new("ChildType", "c1")],
        };
        assert_eq!(missing.status(), 400);
        assert_eq!(missing.to_string(), "Missing related node(s): ChildType c1");

        let conflict = WriteError::already_exists(&RecordKey::new("MainType", "m1"));
        assert_eq!(conflict.status(), 409);
        assert_eq!(conflict.to_string(), "MainType m1 already exists");

        assert_eq!(WriteError::not_found(&RecordKey::new("MainType", "m1")).status(), 404);
        assert_eq!(WriteError::unavailable("down").status(), 503);
        assert_eq!(WriteError::merge_failure("delete failed").to_string(), "MERGE FAILED: delete failed");
    }

    #[test]
    fn test_compensation_failures_wrap_primary() {
        let primary = WriteError::from(GraphStoreError::unavailable("timeout"));
        assert_eq!(primary.kind(), ErrorKind::StoreUnavailable);

        let same = primary.clone().with_compensation_failures(Vec::new());
        assert_eq!(same.kind(), ErrorKind::StoreUnavailable);

        let wrapped = primary.with_compensation_failures(vec!["discard v1 failed".to_string()]);
        assert_eq!(wrapped.kind(), ErrorKind::CompensationFailed);
        assert_eq!(wrapped.primary().kind(), ErrorKind::StoreUnavailable);
        assert!(wrapped.to_string().contains("Graph store unavailable: timeout"));
        assert!(wrapped.to_string().contains("discard v1 failed"));
    }
}
