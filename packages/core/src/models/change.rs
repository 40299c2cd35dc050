//! Change Requests
//!
//! A `ChangeRequest` is one proposed change to one record. It is decoded once
//! at the request boundary: the loose JSON payload (with `!`-prefixed keys for
//! explicit relationship removal and `null`/`""` for deletion) becomes a map
//! of scalar/document values plus tagged relationship instructions.
//!
//! # Examples
//!
//! ```rust
//! use treecreeper_core::models::{ChangeRequest, RelationshipAction, RelationshipChange};
//! use serde_json::json;
//!
//! let request = ChangeRequest::patch("MainType", "m1")
//!     .with_property("someString", json!("hello"))
//!     .with_relationship("children", RelationshipChange::Add(vec!["c1".into()]))
//!     .with_action(RelationshipAction::Replace);
//! assert_eq!(request.relationships["children"].len(), 1);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::record::{Provenance, RecordKey, ValidationError};
use super::schema::{PropertyDefinition, PropertyKind, ScalarType, TypeDefinition, CODE_PROPERTY};
use crate::utils::temporal::normalize_temporal;

/// Prefix marking a payload key as an explicit relationship removal
pub const NEGATION_MARKER: char = '!';

/// How incoming relationship codes combine with existing edges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipAction {
    /// Additive: never removes an edge unless explicitly asked to
    #[default]
    Merge,
    /// The incoming codes become the full set for each named relationship
    Replace,
}

/// Which operation a change request performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Create a new record; fails if the code exists
    Create,
    /// Update a record, creating it if absent
    Patch,
    /// Delete a record that has no relationships
    Delete,
}

/// Tagged instruction for one relationship property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipChange {
    /// Link these codes (the full set under `replace`)
    Add(Vec<String>),
    /// Unlink these codes if currently linked
    Remove(Vec<String>),
    /// Unlink every code
    RemoveAll,
}

/// Who is making the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl RequestMetadata {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            client_id: None,
            user_id: None,
        }
    }

    /// Metadata with a freshly generated request id
    pub fn generated() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn provenance(&self, timestamp: DateTime<Utc>) -> Provenance {
        Provenance {
            request_id: self.request_id.clone(),
            client_id: self.client_id.clone(),
            user_id: self.user_id.clone(),
            timestamp,
        }
    }
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self::generated()
    }
}

/// A proposed change to one record
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    pub record_type: String,
    pub code: String,
    pub mode: WriteMode,

    /// Scalar and document values; `null`/`""` signal deletion
    pub properties: Map<String, Value>,

    /// Relationship instructions keyed by relationship property name
    pub relationships: BTreeMap<String, Vec<RelationshipChange>>,

    pub action: RelationshipAction,

    /// Create missing linked records instead of failing
    pub upsert: bool,

    pub metadata: RequestMetadata,
    pub timestamp: DateTime<Utc>,
}

impl ChangeRequest {
    fn new(record_type: impl Into<String>, code: impl Into<String>, mode: WriteMode) -> Self {
        Self {
            record_type: record_type.into(),
            code: code.into(),
            mode,
            properties: Map::new(),
            relationships: BTreeMap::new(),
            action: RelationshipAction::default(),
            upsert: false,
            metadata: RequestMetadata::generated(),
            timestamp: Utc::now(),
        }
    }

    pub fn create(record_type: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(record_type, code, WriteMode::Create)
    }

    pub fn patch(record_type: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(record_type, code, WriteMode::Patch)
    }

    pub fn delete(record_type: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(record_type, code, WriteMode::Delete)
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_relationship(mut self, name: impl Into<String>, change: RelationshipChange) -> Self {
        self.relationships.entry(name.into()).or_default().push(change);
        self
    }

    pub fn with_action(mut self, action: RelationshipAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn with_metadata(mut self, metadata: RequestMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.record_type, &self.code)
    }

    pub fn provenance(&self) -> Provenance {
        self.metadata.provenance(self.timestamp)
    }

    /// Decode a raw JSON payload into a request
    ///
    /// Relationship keys become tagged instructions: `name: codes` → `Add`,
    /// `!name: codes` → `Remove`, `name: null` or `!name: null` → `RemoveAll`.
    /// A `code` key is accepted only if it agrees with the addressed code.
    pub fn from_payload(
        definition: &TypeDefinition,
        mode: WriteMode,
        code: impl Into<String>,
        payload: &Map<String, Value>,
    ) -> Result<Self, ValidationError> {
        let mut request = Self::new(definition.name.clone(), code, mode);

        for (key, value) in payload {
            if key == CODE_PROPERTY {
                if value.as_str() != Some(request.code.as_str()) {
                    return Err(ValidationError::ConflictingCode {
                        record_type: definition.name.clone(),
                        code: request.code.clone(),
                        payload_code: value
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| value.to_string()),
                    });
                }
                continue;
            }

            let (name, negated) = match key.strip_prefix(NEGATION_MARKER) {
                Some(name) => (name, true),
                None => (key.as_str(), false),
            };
            let property = definition.property(name).ok_or_else(|| ValidationError::InvalidProperty {
                record_type: definition.name.clone(),
                property: key.clone(),
            })?;

            if property.is_relationship() {
                let change = if value.is_null() {
                    RelationshipChange::RemoveAll
                } else {
                    let codes = decode_codes(definition, property, value)?;
                    if negated {
                        RelationshipChange::Remove(codes)
                    } else {
                        RelationshipChange::Add(codes)
                    }
                };
                request = request.with_relationship(name, change);
            } else if negated {
                return Err(ValidationError::InvalidProperty {
                    record_type: definition.name.clone(),
                    property: key.clone(),
                });
            } else {
                request.properties.insert(name.to_string(), value.clone());
            }
        }

        request.validate(definition)?;
        Ok(request)
    }

    /// Check every property and relationship instruction against the schema
    pub fn validate(&self, definition: &TypeDefinition) -> Result<(), ValidationError> {
        for (name, value) in &self.properties {
            let property = definition.property(name).ok_or_else(|| ValidationError::InvalidProperty {
                record_type: definition.name.clone(),
                property: name.clone(),
            })?;
            validate_value(definition, property, value)?;
        }

        for (name, changes) in &self.relationships {
            let property = definition
                .property(name)
                .filter(|p| p.is_relationship())
                .ok_or_else(|| ValidationError::InvalidProperty {
                    record_type: definition.name.clone(),
                    property: name.clone(),
                })?;
            if property.has_many {
                continue;
            }
            for change in changes {
                if let RelationshipChange::Add(codes) = change {
                    if codes.iter().collect::<BTreeSet<_>>().len() > 1 {
                        return Err(ValidationError::CardinalityViolation {
                            record_type: definition.name.clone(),
                            property: name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Whether a value signals deletion of a scalar or document property
pub fn is_null_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn decode_codes(
    definition: &TypeDefinition,
    property: &PropertyDefinition,
    value: &Value,
) -> Result<Vec<String>, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidValue {
        record_type: definition.name.clone(),
        property: property.name.clone(),
        reason: reason.to_string(),
    };
    match value {
        Value::String(code) => Ok(vec![code.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid("relationship codes must be strings"))
            })
            .collect(),
        _ => Err(invalid("expected a code or a list of codes")),
    }
}

fn validate_value(
    definition: &TypeDefinition,
    property: &PropertyDefinition,
    value: &Value,
) -> Result<(), ValidationError> {
    if is_null_value(value) {
        return Ok(());
    }
    let invalid = |reason: String| ValidationError::InvalidValue {
        record_type: definition.name.clone(),
        property: property.name.clone(),
        reason,
    };

    match property.kind() {
        PropertyKind::Relationship => Err(invalid("relationships cannot be written as properties".into())),
        PropertyKind::Document => value
            .as_str()
            .map(|_| ())
            .ok_or_else(|| invalid("documents must be strings".into())),
        PropertyKind::Scalar(scalar) => {
            if property.has_many {
                let items = value
                    .as_array()
                    .ok_or_else(|| invalid("expected a list".into()))?;
                items
                    .iter()
                    .try_for_each(|item| check_scalar(scalar, item).map_err(&invalid))
            } else {
                check_scalar(scalar, value).map_err(invalid)
            }
        }
    }
}

fn check_scalar(scalar: ScalarType, value: &Value) -> Result<(), String> {
    let ok = match scalar {
        ScalarType::String | ScalarType::Enum => value.is_string(),
        ScalarType::Int => value.is_i64() || value.is_u64(),
        ScalarType::Float => value.is_number(),
        ScalarType::Boolean => value.is_boolean(),
        ScalarType::Date | ScalarType::DateTime | ScalarType::Time => {
            return match value.as_str() {
                Some(text) if normalize_temporal(scalar, text).is_some() => Ok(()),
                _ => Err(format!("`{value}` is not a valid {scalar:?}")),
            };
        }
    };
    if ok {
        Ok(())
    } else {
        Err(format!("`{value}` is not a valid {scalar:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schema::Direction;
    use serde_json::json;

    fn main_type() -> TypeDefinition {
        TypeDefinition::new("MainType")
            .with_property(PropertyDefinition::scalar("someString", "String"))
            .with_property(PropertyDefinition::scalar("someInteger", "Int"))
            .with_property(PropertyDefinition::scalar("someDate", "Date"))
            .with_property(PropertyDefinition::scalar("someMultipleChoice", "AnEnum").many())
            .with_property(PropertyDefinition::document("someDocument"))
            .with_property(
                PropertyDefinition::relationship("children", "ChildType", "HAS_CHILD", Direction::Outgoing)
                    .many(),
            )
            .with_property(PropertyDefinition::relationship(
                "favouriteChild",
                "ChildType",
                "HAS_FAVOURITE_CHILD",
                Direction::Outgoing,
            ))
    }

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_decodes_relationship_instructions() {
        let request = ChangeRequest::from_payload(
            &main_type(),
            WriteMode::Patch,
            "m1",
            &payload(json!({
                "someString": "hello",
                "children": ["c1", "c2"],
                "!favouriteChild": null,
            })),
        )
        .unwrap();

        assert_eq!(request.properties["someString"], "hello");
        assert_eq!(
            request.relationships["children"],
            vec![RelationshipChange::Add(vec!["c1".into(), "c2".into()])]
        );
        assert_eq!(
            request.relationships["favouriteChild"],
            vec![RelationshipChange::RemoveAll]
        );
    }

    #[test]
    fn test_null_relationship_is_remove_all() {
        let request = ChangeRequest::from_payload(
            &main_type(),
            WriteMode::Patch,
            "m1",
            &payload(json!({ "children": null, "!favouriteChild": ["c3"] })),
        )
        .unwrap();

        assert_eq!(request.relationships["children"], vec![RelationshipChange::RemoveAll]);
        assert_eq!(
            request.relationships["favouriteChild"],
            vec![RelationshipChange::Remove(vec!["c3".into()])]
        );
    }

    #[test]
    fn test_single_code_string_is_accepted() {
        let request = ChangeRequest::from_payload(
            &main_type(),
            WriteMode::Patch,
            "m1",
            &payload(json!({ "favouriteChild": "c1" })),
        )
        .unwrap();
        assert_eq!(
            request.relationships["favouriteChild"],
            vec![RelationshipChange::Add(vec!["c1".into()])]
        );
    }

    #[test]
    fn test_rejects_unknown_property() {
        let err = ChangeRequest::from_payload(
            &main_type(),
            WriteMode::Create,
            "m1",
            &payload(json!({ "notInSchema": "a string" })),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid property `notInSchema` on type `MainType`");
    }

    #[test]
    fn test_rejects_conflicting_code() {
        let err = ChangeRequest::from_payload(
            &main_type(),
            WriteMode::Create,
            "m1",
            &payload(json!({ "code": "wrong-code" })),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Conflicting code property `wrong-code` in payload for MainType m1"
        );

        let matching = ChangeRequest::from_payload(
            &main_type(),
            WriteMode::Create,
            "m1",
            &payload(json!({ "code": "m1" })),
        );
        assert!(matching.is_ok());
    }

    #[test]
    fn test_rejects_multiple_codes_on_cardinality_one() {
        let err = ChangeRequest::from_payload(
            &main_type(),
            WriteMode::Patch,
            "m1",
            &payload(json!({ "favouriteChild": ["c1", "c2"] })),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::CardinalityViolation { .. }));
        assert_eq!(err.to_string(), "Can only have one favouriteChild");
    }

    #[test]
    fn test_rejects_values_of_the_wrong_type() {
        let definition = main_type();
        for body in [
            json!({ "someInteger": "twelve" }),
            json!({ "someDate": "not a date" }),
            json!({ "someMultipleChoice": "first" }),
            json!({ "someDocument": 12 }),
            json!({ "children": 12 }),
        ] {
            let result =
                ChangeRequest::from_payload(&definition, WriteMode::Patch, "m1", &payload(body.clone()));
            assert!(
                matches!(result, Err(ValidationError::InvalidValue { .. })),
                "expected invalid value for {body}"
            );
        }
    }

    #[test]
    fn test_deletion_values_are_always_valid() {
        let request = ChangeRequest::from_payload(
            &main_type(),
            WriteMode::Patch,
            "m1",
            &payload(json!({ "someInteger": null, "someDocument": "" })),
        )
        .unwrap();
        assert!(is_null_value(&request.properties["someInteger"]));
        assert!(is_null_value(&request.properties["someDocument"]));
    }
}
