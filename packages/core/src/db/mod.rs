//! Store Layer
//!
//! This module holds the adapter contracts the write coordinator is built on:
//!
//! - `GraphStore` - nodes (scalar properties) and typed, directional edges
//! - `DocumentStore` - versioned document bodies with reversible deletes
//! - Change events derived from committed writes
//!
//! # Architecture
//!
//! Neither store is transactional and they share no commit protocol. Every
//! mutation reports enough (previous state, version tokens) for the caller
//! to issue its inverse. In-memory implementations of both traits are
//! provided for tests and embedders.

mod document_store;
mod error;
pub mod events;
mod graph_store;
mod memory_document_store;
mod memory_graph_store;

pub use document_store::{DocumentStore, VersionToken};
pub use error::{DocumentStoreError, GraphStoreError};
pub use events::{ChangeEvent, ChangeEventKind, EventAction, RelationshipDetail};
pub use graph_store::{
    EdgeKey, EdgeWriteResult, GraphEdge, GraphNode, GraphStore, NodeSnapshot, UpsertResult,
};
pub use memory_document_store::InMemoryDocumentStore;
pub use memory_graph_store::InMemoryGraphStore;
