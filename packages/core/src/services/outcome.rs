//! Write Outcome
//!
//! What a committed write actually did, assembled from the results the
//! stores reported. It feeds the event emitter and is returned to the caller;
//! it is never persisted.

use serde::Serialize;

use crate::db::{EdgeKey, VersionToken};
use crate::models::{Direction, Record, RecordKey, RecordMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeChange {
    Created,
    Updated,
    Deleted,
    /// The request matched the current state; nothing was written
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeChangeKind {
    Created,
    Updated,
    Deleted,
}

/// One edge created, refreshed or removed by the write
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeChange {
    pub kind: EdgeChangeKind,
    pub relationship_type: String,
    /// The record whose relationship property changed
    pub subject: RecordKey,
    /// Direction of the edge as seen from `subject`
    pub direction: Direction,
    pub counterpart: RecordKey,
    pub metadata: RecordMetadata,
}

impl EdgeChange {
    pub fn edge_key(&self) -> EdgeKey {
        EdgeKey::oriented(
            self.relationship_type.clone(),
            self.subject.clone(),
            self.direction,
            self.counterpart.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentWriteKind {
    Put,
    Delete,
}

/// A document store version written by the request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentWrite {
    pub key: RecordKey,
    pub kind: DocumentWriteKind,
    pub version: VersionToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub request_id: String,
    pub node_change: NodeChange,

    /// The record after the write (before it, for deletes)
    pub record: Record,

    pub edge_changes: Vec<EdgeChange>,

    /// Linked records created because the request asked for upsert
    pub upserted_nodes: Vec<RecordKey>,

    /// Record removed by a merge into `record`
    pub merged_node: Option<RecordKey>,

    pub document_writes: Vec<DocumentWrite>,
}

impl WriteOutcome {
    pub fn key(&self) -> RecordKey {
        self.record.key()
    }

    pub fn created(&self) -> bool {
        self.node_change == NodeChange::Created
    }

    pub fn is_unchanged(&self) -> bool {
        self.node_change == NodeChange::Unchanged
    }

    pub fn edges(&self, kind: EdgeChangeKind) -> impl Iterator<Item = &EdgeChange> {
        self.edge_changes.iter().filter(move |change| change.kind == kind)
    }
}
