//! Diff Engine
//!
//! Computes the minimal set of scalar and document properties a change
//! request actually changes, and combines it with the relationship delta into
//! a single [`DiffResult`]. Everything here is pure: no store is consulted.

use serde_json::{Map, Value};

use super::relationship_reconciler::{reconcile, RelationshipDelta};
use crate::models::{
    is_null_value, ChangeRequest, PropertyDefinition, PropertyKind, Record, TypeDefinition,
    ValidationError,
};
use crate::utils::temporal::{normalize_temporal, temporal_eq};

/// Everything one change request would change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffResult {
    /// Changed scalar properties; `null` marks a removal
    pub properties: Map<String, Value>,

    /// Changed document properties; `null` marks a removal
    pub documents: Map<String, Value>,

    pub relationships: RelationshipDelta,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.documents.is_empty() && self.relationships.is_empty()
    }
}

/// Properties of `new_content` whose value differs from `initial_content`
///
/// Relationship and unknown keys are never part of the result. A key absent
/// from `initial_content` is included when its value is not null/empty; a
/// null/empty value is included when the key previously held a value.
pub fn diff_properties(
    definition: &TypeDefinition,
    new_content: &Map<String, Value>,
    initial_content: &Map<String, Value>,
) -> Map<String, Value> {
    new_content
        .iter()
        .filter_map(|(name, value)| {
            let property = definition.property(name).filter(|p| !p.is_relationship())?;
            has_changed(property, value, initial_content.get(name)).then(|| (name.clone(), value.clone()))
        })
        .collect()
}

fn has_changed(property: &PropertyDefinition, new_value: &Value, old_value: Option<&Value>) -> bool {
    let old_value = match old_value {
        Some(old) if !is_null_value(old) => old,
        _ => return !is_null_value(new_value),
    };
    if is_null_value(new_value) {
        return true;
    }

    if let Some(scalar) = property.scalar_type().filter(|s| s.is_temporal()) {
        if let (Some(new_text), Some(old_text)) = (new_value.as_str(), old_value.as_str()) {
            return !temporal_eq(scalar, new_text, old_text);
        }
    }

    if property.has_many {
        if let (Some(new_items), Some(old_items)) = (new_value.as_array(), old_value.as_array()) {
            return sorted(property, new_items) != sorted(property, old_items);
        }
    }

    new_value != old_value
}

/// Sortable keys for list items, temporal items in their normalized form
fn sorted(property: &PropertyDefinition, items: &[Value]) -> Vec<String> {
    let temporal = property.scalar_type().filter(|s| s.is_temporal());
    let mut keys: Vec<String> = items
        .iter()
        .map(|item| match (temporal, item.as_str()) {
            (Some(scalar), Some(text)) => {
                normalize_temporal(scalar, text).unwrap_or_else(|| text.to_string())
            }
            _ => item.to_string(),
        })
        .collect();
    keys.sort_unstable();
    keys
}

/// Canonical stored form of a value: temporal values are normalized
pub fn canonical_value(property: &PropertyDefinition, value: Value) -> Value {
    let Some(scalar) = property.scalar_type().filter(|s| s.is_temporal()) else {
        return value;
    };
    let normalize = |item: Value| match item.as_str().and_then(|text| normalize_temporal(scalar, text)) {
        Some(normalized) => Value::String(normalized),
        None => item,
    };
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => normalize(other),
    }
}

/// Diff a change request against the record's current state
pub fn diff(
    definition: &TypeDefinition,
    request: &ChangeRequest,
    existing: Option<&Record>,
) -> Result<DiffResult, ValidationError> {
    let mut initial_content = Map::new();
    if let Some(record) = existing {
        initial_content.extend(record.properties.clone());
        initial_content.extend(record.documents.clone());
    }
    let existing_edges = existing.map(Record::existing_edges).unwrap_or_default();

    let mut result = DiffResult {
        relationships: reconcile(definition, &existing_edges, &request.relationships, request.action)?,
        ..DiffResult::default()
    };

    for (name, value) in diff_properties(definition, &request.properties, &initial_content) {
        let Some(property) = definition.property(&name) else {
            continue;
        };
        let value = if is_null_value(&value) {
            Value::Null
        } else {
            canonical_value(property, value)
        };
        match property.kind() {
            PropertyKind::Document => {
                result.documents.insert(name, value);
            }
            PropertyKind::Scalar(_) => {
                result.properties.insert(name, value);
            }
            PropertyKind::Relationship => {}
        }
    }

    tracing::debug!(
        "Diff for {} {}: {} properties, {} documents, {} relationship changes",
        request.record_type,
        request.code,
        result.properties.len(),
        result.documents.len(),
        result.relationships.len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, RecordMetadata, RelationshipChange, RequestMetadata};
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn main_type() -> TypeDefinition {
        TypeDefinition::new("MainType")
            .with_property(PropertyDefinition::scalar("someString", "String"))
            .with_property(PropertyDefinition::scalar("anotherString", "String"))
            .with_property(PropertyDefinition::scalar("someDate", "Date"))
            .with_property(PropertyDefinition::scalar("someDatetime", "DateTime"))
            .with_property(PropertyDefinition::scalar("someTime", "Time"))
            .with_property(PropertyDefinition::scalar("someMultipleChoice", "AnEnum").many())
            .with_property(PropertyDefinition::scalar("someDatetimes", "DateTime").many())
            .with_property(PropertyDefinition::document("someDocument"))
            .with_property(
                PropertyDefinition::relationship("children", "ChildType", "HAS_CHILD", Direction::Outgoing)
                    .many(),
            )
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_identical_content_has_no_diff() {
        let content = map(json!({
            "someString": "hello",
            "someDate": "2019-01-09",
            "someMultipleChoice": ["First", "Second"],
            "someDocument": "text",
        }));
        assert!(diff_properties(&main_type(), &content, &content).is_empty());
    }

    #[test]
    fn test_absent_properties_are_included_unless_null() {
        let changes = diff_properties(
            &main_type(),
            &map(json!({ "someString": "hello", "anotherString": "", "someDocument": null })),
            &Map::new(),
        );
        assert_eq!(Value::Object(changes), json!({ "someString": "hello" }));
    }

    #[test]
    fn test_null_marks_deletion_of_existing_values() {
        let changes = diff_properties(
            &main_type(),
            &map(json!({ "someDocument": "", "someString": null })),
            &map(json!({ "someDocument": "text", "someString": "hello" })),
        );
        assert_eq!(
            Value::Object(changes),
            json!({ "someDocument": "", "someString": null })
        );
    }

    #[test]
    fn test_temporal_values_compare_normalized() {
        let initial = map(json!({
            "someDatetime": "2019-01-09T00:00:00.000Z",
            "someTime": "12:00:00.000",
        }));
        let same = map(json!({
            "someDatetime": "2019-01-09T00:00:00Z",
            "someTime": "12:00:00",
        }));
        assert!(diff_properties(&main_type(), &same, &initial).is_empty());

        let later = map(json!({ "someDatetime": "2019-01-09T00:00:01Z" }));
        assert_eq!(diff_properties(&main_type(), &later, &initial).len(), 1);
    }

    #[test]
    fn test_lists_compare_order_insensitively() {
        let initial = map(json!({ "someMultipleChoice": ["First", "Second"] }));
        let reordered = map(json!({ "someMultipleChoice": ["Second", "First"] }));
        assert!(diff_properties(&main_type(), &reordered, &initial).is_empty());

        let extended = map(json!({ "someMultipleChoice": ["Second", "First", "Third"] }));
        assert_eq!(diff_properties(&main_type(), &extended, &initial).len(), 1);
    }

    #[test]
    fn test_temporal_lists_compare_normalized_and_unordered() {
        let initial = map(json!({
            "someDatetimes": ["2019-01-09T00:00:00.000Z", "2019-01-10T00:00:00.000Z"],
        }));
        let same = map(json!({
            "someDatetimes": ["2019-01-10T00:00:00Z", "2019-01-09T00:00:00Z"],
        }));
        assert!(diff_properties(&main_type(), &same, &initial).is_empty());

        let moved = map(json!({
            "someDatetimes": ["2019-01-10T00:00:00Z", "2019-01-09T00:00:01Z"],
        }));
        assert_eq!(diff_properties(&main_type(), &moved, &initial).len(), 1);
    }

    #[test]
    fn test_relationship_and_unknown_keys_are_excluded() {
        let changes = diff_properties(
            &main_type(),
            &map(json!({ "children": ["c1"], "notInSchema": "x" })),
            &Map::new(),
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_diff_splits_scalars_documents_and_relationships() {
        let provenance = RequestMetadata::new("req-1").provenance(Utc::now());
        let existing = Record {
            record_type: "MainType".to_string(),
            code: "m1".to_string(),
            properties: map(json!({ "someString": "hello" })),
            documents: map(json!({ "someDocument": "text" })),
            relationships: BTreeMap::new(),
            metadata: RecordMetadata::created_by(&provenance),
        };
        let request = ChangeRequest::patch("MainType", "m1")
            .with_property("someString", json!("hello"))
            .with_property("someDocument", json!(""))
            .with_property("someDate", json!("2019-01-09T10:00:00Z"))
            .with_relationship("children", RelationshipChange::Add(vec!["c1".into()]));

        let result = diff(&main_type(), &request, Some(&existing)).unwrap();
        assert_eq!(Value::Object(result.properties), json!({ "someDate": "2019-01-09" }));
        assert_eq!(Value::Object(result.documents), json!({ "someDocument": null }));
        assert_eq!(result.relationships.added("children").len(), 1);
    }
}
