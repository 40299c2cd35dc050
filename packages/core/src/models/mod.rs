//! Data Models
//!
//! This module contains the core data structures of the write engine:
//!
//! - `TypeDefinition` / `PropertyDefinition` - schema for record types
//! - `Record` - a record assembled from the graph and document stores
//! - `ChangeRequest` - one proposed change to one record, decoded once at the boundary

pub mod change;
pub mod record;
pub mod schema;

pub use change::{
    is_null_value, ChangeRequest, RelationshipAction, RelationshipChange, RequestMetadata,
    WriteMode, NEGATION_MARKER,
};
pub use record::{
    Provenance, Record, RecordKey, RecordMetadata, RelatedRecord, ValidationError,
};
pub use schema::{
    Direction, PropertyDefinition, PropertyKind, RelationshipSpec, ScalarType, SchemaError,
    TypeDefinition, CODE_PROPERTY, DOCUMENT_TYPE_NAME,
};
