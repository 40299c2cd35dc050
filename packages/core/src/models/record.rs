//! Record Data Structures
//!
//! A record is identified by `(type, code)`. Its scalar properties live on a
//! graph node, its document properties live in the document store and its
//! relationships are graph edges. Every node and edge carries provenance: who
//! created it, who last updated it, and when.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use super::schema::Direction;

/// Validation errors for change requests
///
/// Raised before any store is touched; never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid type `{0}`")]
    UnknownType(String),

    #[error("Invalid property `{property}` on type `{record_type}`")]
    InvalidProperty {
        record_type: String,
        property: String,
    },

    #[error("Conflicting code property `{payload_code}` in payload for {record_type} {code}")]
    ConflictingCode {
        record_type: String,
        code: String,
        payload_code: String,
    },

    #[error("Invalid code `{code}` for type `{record_type}`")]
    InvalidCode { record_type: String, code: String },

    #[error("Can only have one {property}")]
    CardinalityViolation {
        record_type: String,
        property: String,
    },

    #[error("Invalid value for property `{property}` on type `{record_type}`: {reason}")]
    InvalidValue {
        record_type: String,
        property: String,
        reason: String,
    },

    #[error("Cannot merge {record_type} {code} into itself")]
    SelfMerge { record_type: String, code: String },
}

/// Identity of a record: its type and code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub record_type: String,
    pub code: String,
}

impl RecordKey {
    pub fn new(record_type: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            code: code.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.record_type, self.code)
    }
}

/// Who performed a write, and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Provenance {
    /// Write the `_{prefix}ByRequest`-style fields used by the public API
    fn write_fields(&self, prefix: &str, target: &mut Map<String, Value>) {
        target.insert(
            format!("_{prefix}ByRequest"),
            Value::String(self.request_id.clone()),
        );
        if let Some(client_id) = &self.client_id {
            target.insert(format!("_{prefix}ByClient"), Value::String(client_id.clone()));
        }
        if let Some(user_id) = &self.user_id {
            target.insert(format!("_{prefix}ByUser"), Value::String(user_id.clone()));
        }
        target.insert(
            format!("_{prefix}Timestamp"),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }
}

/// Creation and last-update provenance of a node or edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    pub created: Provenance,
    pub updated: Provenance,
}

impl RecordMetadata {
    /// Metadata of something created by a single write
    pub fn created_by(provenance: &Provenance) -> Self {
        Self {
            created: provenance.clone(),
            updated: provenance.clone(),
        }
    }

    /// Same metadata with the update half replaced
    pub fn touched_by(&self, provenance: &Provenance) -> Self {
        Self {
            created: self.created.clone(),
            updated: provenance.clone(),
        }
    }

    pub fn was_created_by(&self, request_id: &str) -> bool {
        self.created.request_id == request_id
    }

    pub fn write_fields(&self, target: &mut Map<String, Value>) {
        self.created.write_fields("created", target);
        self.updated.write_fields("updated", target);
    }
}

/// One end of a relationship, as seen from the record holding it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedRecord {
    pub code: String,
    pub record_type: String,
    pub relationship_type: String,
    pub direction: Direction,
    pub metadata: RecordMetadata,
}

/// A record assembled from both stores
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub record_type: String,
    pub code: String,

    /// Scalar properties stored on the graph node
    pub properties: Map<String, Value>,

    /// Document properties stored in the document store
    pub documents: Map<String, Value>,

    /// Edges keyed by relationship property name
    pub relationships: BTreeMap<String, Vec<RelatedRecord>>,

    pub metadata: RecordMetadata,
}

impl Record {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.record_type, &self.code)
    }

    /// Codes linked through one relationship property
    pub fn related_codes(&self, property: &str) -> BTreeSet<String> {
        self.relationships
            .get(property)
            .map(|related| related.iter().map(|r| r.code.clone()).collect())
            .unwrap_or_default()
    }

    /// Linked codes for every relationship property that has edges
    pub fn existing_edges(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.relationships
            .keys()
            .map(|name| (name.clone(), self.related_codes(name)))
            .filter(|(_, codes)| !codes.is_empty())
            .collect()
    }

    pub fn has_relationships(&self) -> bool {
        self.relationships.values().any(|related| !related.is_empty())
    }

    /// Flat JSON view: code, scalars, documents, relationship codes and metadata
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("code".to_string(), Value::String(self.code.clone()));
        for (name, value) in self.properties.iter().chain(self.documents.iter()) {
            body.insert(name.clone(), value.clone());
        }
        for (name, related) in &self.relationships {
            let codes = related
                .iter()
                .map(|r| Value::String(r.code.clone()))
                .collect();
            body.insert(name.clone(), Value::Array(codes));
        }
        self.metadata.write_fields(&mut body);
        Value::Object(body)
    }
}
