//! Write Services
//!
//! This module contains the write pipeline built on the store adapters:
//!
//! - `SchemaRegistry` - validated, read-only type definitions
//! - `diff` / `reconcile` - what a change request actually changes
//! - `WriteCoordinator` - ordered, compensated two-store writes and merges
//! - `DocumentMerger` - the document half of a record merge
//! - `EventEmitter` - best-effort change events for committed writes
//!
//! Services never talk to a concrete store; they are handed `Arc<dyn GraphStore>`
//! and `Arc<dyn DocumentStore>` at construction.

pub mod compensation;
pub mod diff;
pub mod document_merge;
pub mod error;
pub mod event_emitter;
pub mod outcome;
pub mod relationship_reconciler;
pub mod schema_registry;
pub mod write_coordinator;

pub use compensation::{CompensationAction, CompensationStack};
pub use diff::{diff, diff_properties, DiffResult};
pub use document_merge::{DocumentMerger, MergedDocuments};
pub use error::{ErrorKind, WriteError};
pub use event_emitter::{
    derive_events, EventDelivery, EventEmitter, EventLogRecord, EventLogWriter, EventSink,
    LoggingEventSink, RecordingEventSink,
};
pub use outcome::{
    DocumentWrite, DocumentWriteKind, EdgeChange, EdgeChangeKind, NodeChange, WriteOutcome,
};
pub use relationship_reconciler::{reconcile, RelationshipDelta};
pub use schema_registry::SchemaRegistry;
pub use write_coordinator::{MergeRequest, WriteCoordinator, WritePhase};
