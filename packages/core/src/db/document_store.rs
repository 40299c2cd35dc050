//! DocumentStore Trait - Versioned Document Storage
//!
//! Long-form document properties of a record are stored as one JSON object
//! per `(type, code)` in a versioned blob store. Every mutation returns a
//! [`VersionToken`] identifying exactly that mutation:
//!
//! - `put` returns the token of the new version; deleting that version
//!   discards the write.
//! - `delete` writes a delete marker and returns its token; deleting the
//!   marker version restores the previous content as current.
//!
//! Those two inverses are the only recovery primitive the write coordinator
//! has across the two stores.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::error::DocumentStoreError;

/// Opaque, store-issued identifier of one document version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Abstraction over the versioned document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current body, or `None` if no document object exists
    async fn get(
        &self,
        record_type: &str,
        code: &str,
    ) -> Result<Option<Map<String, Value>>, DocumentStoreError>;

    /// Create or fully overwrite the document object
    async fn put(
        &self,
        record_type: &str,
        code: &str,
        body: Map<String, Value>,
    ) -> Result<VersionToken, DocumentStoreError>;

    /// Write a delete marker; the returned token identifies the marker
    async fn delete(&self, record_type: &str, code: &str) -> Result<VersionToken, DocumentStoreError>;

    /// Remove exactly one historical version
    ///
    /// # Errors
    ///
    /// - `NotFound` if no such version exists for the object
    async fn delete_version(
        &self,
        record_type: &str,
        code: &str,
        token: &VersionToken,
    ) -> Result<(), DocumentStoreError>;
}
