//! GraphStore Trait - Graph Store Abstraction Layer
//!
//! This module defines the `GraphStore` trait through which the write
//! coordinator reaches the graph database holding record nodes (scalar
//! properties) and relationship edges.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: every method is async; real backends are network stores
//! 2. **Typed Failures**: methods fail with [`GraphStoreError`] (`NotFound`,
//!    `Conflict`, `Unavailable`) rather than a generic error
//! 3. **Provenance Reporting**: writes report whether something was actually
//!    created, so the event emitter can tell creations from updates
//! 4. **No Transactions**: each call is independent; partial failure is
//!    undone by the coordinator's compensation stack using `restore_node`,
//!    `restore_edge`, `delete_node` and `delete_edge`
//!
//! # Examples
//!
//! ```rust,no_run
//! use treecreeper_core::db::{GraphStore, InMemoryGraphStore};
//! use treecreeper_core::models::{RecordKey, RequestMetadata};
//! use chrono::Utc;
//! use serde_json::Map;
//!
//! # async fn example() -> Result<(), treecreeper_core::db::GraphStoreError> {
//! let store = InMemoryGraphStore::new();
//! let provenance = RequestMetadata::new("req-1").provenance(Utc::now());
//! store
//!     .create_node(&RecordKey::new("MainType", "m1"), Map::new(), &provenance)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;

use super::error::GraphStoreError;
use crate::models::{Direction, Provenance, RecordKey, RecordMetadata};

/// A directed, typed edge between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub relationship_type: String,
    pub from: RecordKey,
    pub to: RecordKey,
}

impl EdgeKey {
    pub fn new(relationship_type: impl Into<String>, from: RecordKey, to: RecordKey) -> Self {
        Self {
            relationship_type: relationship_type.into(),
            from,
            to,
        }
    }

    /// Build the edge for a relationship declared on `subject`
    pub fn oriented(
        relationship_type: impl Into<String>,
        subject: RecordKey,
        direction: Direction,
        counterpart: RecordKey,
    ) -> Self {
        match direction {
            Direction::Outgoing => Self::new(relationship_type, subject, counterpart),
            Direction::Incoming => Self::new(relationship_type, counterpart, subject),
        }
    }

    pub fn touches(&self, key: &RecordKey) -> bool {
        &self.from == key || &self.to == key
    }

    /// The other endpoint and the edge direction as seen from `key`
    pub fn seen_from(&self, key: &RecordKey) -> Option<(Direction, &RecordKey)> {
        if &self.from == key {
            Some((Direction::Outgoing, &self.to))
        } else if &self.to == key {
            Some((Direction::Incoming, &self.from))
        } else {
            None
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})-[{}]->({})", self.from, self.relationship_type, self.to)
    }
}

/// A stored node: scalar properties plus provenance
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub key: RecordKey,
    pub properties: Map<String, Value>,
    pub metadata: RecordMetadata,
}

/// A stored edge plus provenance
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub key: EdgeKey,
    pub metadata: RecordMetadata,
}

/// A node together with every edge touching it
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub node: GraphNode,
    pub edges: Vec<GraphEdge>,
}

/// Result of `upsert_node`
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertResult {
    pub node: GraphNode,
    pub created: bool,
}

/// Result of `create_edge`
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeWriteResult {
    pub edge: GraphEdge,
    /// The edge as it was before this call, if it already existed
    pub previous: Option<GraphEdge>,
}

impl EdgeWriteResult {
    pub fn created(&self) -> bool {
        self.previous.is_none()
    }
}

/// Abstraction over the graph database
///
/// Implementations must be `Send + Sync`; the coordinator shares one store
/// across concurrently running requests.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Get a node and all edges touching it
    ///
    /// Returns `Ok(None)` if the node does not exist.
    async fn get_node(&self, key: &RecordKey) -> Result<Option<NodeSnapshot>, GraphStoreError>;

    /// Create a node
    ///
    /// # Errors
    ///
    /// - `Conflict` if a node with this key already exists
    async fn create_node(
        &self,
        key: &RecordKey,
        properties: Map<String, Value>,
        provenance: &Provenance,
    ) -> Result<GraphNode, GraphStoreError>;

    /// Merge properties into an existing node
    ///
    /// A `null` value removes the property. The node's update provenance is
    /// replaced even when `properties` is empty.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the node does not exist
    async fn update_node(
        &self,
        key: &RecordKey,
        properties: Map<String, Value>,
        provenance: &Provenance,
    ) -> Result<GraphNode, GraphStoreError>;

    /// Create an empty node unless one already exists
    async fn upsert_node(
        &self,
        key: &RecordKey,
        provenance: &Provenance,
    ) -> Result<UpsertResult, GraphStoreError>;

    /// Delete a node, returning it as it was
    ///
    /// # Errors
    ///
    /// - `NotFound` if the node does not exist
    /// - `Conflict` if edges still touch the node
    async fn delete_node(&self, key: &RecordKey) -> Result<GraphNode, GraphStoreError>;

    /// Create an edge, or refresh its update provenance if it exists
    ///
    /// # Errors
    ///
    /// - `NotFound` if either endpoint does not exist
    async fn create_edge(
        &self,
        key: &EdgeKey,
        provenance: &Provenance,
    ) -> Result<EdgeWriteResult, GraphStoreError>;

    /// Delete an edge, returning it as it was
    ///
    /// # Errors
    ///
    /// - `NotFound` if the edge does not exist
    async fn delete_edge(&self, key: &EdgeKey) -> Result<GraphEdge, GraphStoreError>;

    /// Put a node back exactly as given (compensation only)
    async fn restore_node(&self, node: GraphNode) -> Result<(), GraphStoreError>;

    /// Put an edge back exactly as given (compensation only)
    async fn restore_edge(&self, edge: GraphEdge) -> Result<(), GraphStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oriented_edges() {
        let subject = RecordKey::new("MainType", "m1");
        let parent = RecordKey::new("ParentType", "p1");

        let incoming = EdgeKey::oriented("IS_PARENT_OF", subject.clone(), Direction::Incoming, parent.clone());
        assert_eq!(incoming.from, parent);
        assert_eq!(incoming.to, subject);
        assert_eq!(
            incoming.seen_from(&subject),
            Some((Direction::Incoming, &parent))
        );
        assert_eq!(
            incoming.seen_from(&parent),
            Some((Direction::Outgoing, &subject))
        );
        assert!(incoming.seen_from(&RecordKey::new("MainType", "other")).is_none());
    }
}
