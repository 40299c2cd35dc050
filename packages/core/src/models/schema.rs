//! Schema Types
//!
//! Type definitions describe every property a record type may carry:
//! scalar properties stored on the graph node, document properties stored in
//! the document store, and relationship properties stored as graph edges.
//!
//! ## Example Type Definition
//!
//! ```json
//! {
//!   "name": "MainType",
//!   "codePattern": "^[a-z0-9-]+$",
//!   "properties": [
//!     { "name": "someString", "type": "String" },
//!     { "name": "someDocument", "type": "Document" },
//!     { "name": "someMultipleChoice", "type": "AnEnum", "hasMany": true },
//!     {
//!       "name": "children",
//!       "type": "ChildType",
//!       "relationship": "HAS_CHILD",
//!       "direction": "outgoing",
//!       "hasMany": true
//!     }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Type name marking a property as document-valued
pub const DOCUMENT_TYPE_NAME: &str = "Document";

/// Name of the identifying property present on every record
pub const CODE_PROPERTY: &str = "code";

/// Errors raised while assembling a schema
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Duplicate type definition: {0}")]
    DuplicateType(String),

    #[error("Duplicate property `{property}` on type `{type_name}`")]
    DuplicateProperty { type_name: String, property: String },

    #[error("Property `{property}` on type `{type_name}` is reserved")]
    ReservedProperty { type_name: String, property: String },

    #[error("Relationship `{property}` on type `{type_name}` has no direction")]
    MissingDirection { type_name: String, property: String },

    #[error("Property `{property}` on type `{type_name}` has a direction but no relationship name")]
    MissingRelationshipName { type_name: String, property: String },

    #[error("Relationship `{property}` on type `{type_name}` links to unknown type `{linked_type}`")]
    UnknownLinkedType {
        type_name: String,
        property: String,
        linked_type: String,
    },

    #[error("Invalid code pattern for type `{type_name}`: {source}")]
    InvalidCodePattern {
        type_name: String,
        source: regex::Error,
    },

    #[error("Failed to parse schema: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Direction of a relationship, seen from the record that declares it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    /// The same edge seen from the other endpoint
    pub fn reverse(self) -> Self {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primitive types understood by the diff engine and request validation
///
/// Any type name that is not a known primitive, not `Document` and not a
/// relationship is treated as an enum: a string drawn from a named list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    String,
    Int,
    Float,
    Boolean,
    Date,
    DateTime,
    Time,
    Enum,
}

impl ScalarType {
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "String" | "Word" | "Paragraph" | "Url" | "Email" | "Code" => ScalarType::String,
            "Int" => ScalarType::Int,
            "Float" => ScalarType::Float,
            "Boolean" => ScalarType::Boolean,
            "Date" => ScalarType::Date,
            "DateTime" => ScalarType::DateTime,
            "Time" => ScalarType::Time,
            _ => ScalarType::Enum,
        }
    }

    /// Temporal values are compared on their canonical form, not raw text
    pub fn is_temporal(self) -> bool {
        matches!(self, ScalarType::Date | ScalarType::DateTime | ScalarType::Time)
    }
}

/// Where a property's value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Stored on the graph node
    Scalar(ScalarType),
    /// Stored in the document store
    Document,
    /// Stored as graph edges
    Relationship,
}

/// Relationship metadata of a relationship property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipSpec<'a> {
    pub relationship_type: &'a str,
    pub direction: Direction,
    pub linked_type: &'a str,
    pub has_many: bool,
}

/// Definition of a single property of a type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    /// Property name (unique within its type)
    pub name: String,

    /// Primitive type name, `Document`, or the linked type of a relationship
    #[serde(rename = "type")]
    pub type_name: String,

    /// Cardinality: lists for scalars, many edges for relationships
    #[serde(default)]
    pub has_many: bool,

    /// Graph relationship type (e.g. `HAS_CHILD`); present only on relationships
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PropertyDefinition {
    pub fn scalar(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            has_many: false,
            relationship: None,
            direction: None,
            description: None,
        }
    }

    pub fn document(name: impl Into<String>) -> Self {
        Self::scalar(name, DOCUMENT_TYPE_NAME)
    }

    pub fn relationship(
        name: impl Into<String>,
        linked_type: impl Into<String>,
        relationship_type: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: linked_type.into(),
            has_many: false,
            relationship: Some(relationship_type.into()),
            direction: Some(direction),
            description: None,
        }
    }

    /// Mark the property as multi-valued
    pub fn many(mut self) -> Self {
        self.has_many = true;
        self
    }

    pub fn kind(&self) -> PropertyKind {
        if self.relationship.is_some() {
            PropertyKind::Relationship
        } else if self.type_name == DOCUMENT_TYPE_NAME {
            PropertyKind::Document
        } else {
            PropertyKind::Scalar(ScalarType::from_type_name(&self.type_name))
        }
    }

    pub fn is_relationship(&self) -> bool {
        self.relationship.is_some()
    }

    pub fn is_document(&self) -> bool {
        self.kind() == PropertyKind::Document
    }

    /// Scalar type for graph-stored properties, `None` otherwise
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self.kind() {
            PropertyKind::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    pub fn relationship_spec(&self) -> Option<RelationshipSpec<'_>> {
        let relationship_type = self.relationship.as_deref()?;
        Some(RelationshipSpec {
            relationship_type,
            // validated by the registry: every relationship has a direction
            direction: self.direction.unwrap_or(Direction::Outgoing),
            linked_type: &self.type_name,
            has_many: self.has_many,
        })
    }
}

/// Complete definition of a record type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypeDefinition {
    pub name: String,

    /// Regular expression every record code of this type must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Properties in definition order
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
}

impl TypeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code_pattern: None,
            description: None,
            properties: Vec::new(),
        }
    }

    pub fn with_code_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.code_pattern = Some(pattern.into());
        self
    }

    pub fn with_property(mut self, property: PropertyDefinition) -> Self {
        self.properties.push(property);
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn relationship_properties(&self) -> impl Iterator<Item = &PropertyDefinition> {
        self.properties.iter().filter(|p| p.is_relationship())
    }

    pub fn has_document_properties(&self) -> bool {
        self.properties.iter().any(|p| p.is_document())
    }

    /// Find the property that describes an edge seen from a record of this type
    pub fn relationship_property_for(
        &self,
        relationship_type: &str,
        direction: Direction,
        related_type: &str,
    ) -> Option<&PropertyDefinition> {
        self.relationship_properties().find(|p| {
            p.relationship.as_deref() == Some(relationship_type)
                && p.direction == Some(direction)
                && p.type_name == related_type
        })
    }

    /// Check the structural invariants of a single definition
    pub(crate) fn check_invariants(&self) -> Result<(), SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for property in &self.properties {
            if property.name == CODE_PROPERTY || property.name.starts_with('!') {
                return Err(SchemaError::ReservedProperty {
                    type_name: self.name.clone(),
                    property: property.name.clone(),
                });
            }
            if !seen.insert(property.name.as_str()) {
                return Err(SchemaError::DuplicateProperty {
                    type_name: self.name.clone(),
                    property: property.name.clone(),
                });
            }
            match (&property.relationship, property.direction) {
                (Some(_), None) => {
                    return Err(SchemaError::MissingDirection {
                        type_name: self.name.clone(),
                        property: property.name.clone(),
                    })
                }
                (None, Some(_)) => {
                    return Err(SchemaError::MissingRelationshipName {
                        type_name: self.name.clone(),
                        property: property.name.clone(),
                    })
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_kinds() {
        assert_eq!(
            PropertyDefinition::scalar("someString", "String").kind(),
            PropertyKind::Scalar(ScalarType::String)
        );
        assert_eq!(
            PropertyDefinition::scalar("someDate", "Date").kind(),
            PropertyKind::Scalar(ScalarType::Date)
        );
        assert_eq!(
            PropertyDefinition::scalar("someEnum", "AnEnum").kind(),
            PropertyKind::Scalar(ScalarType::Enum)
        );
        assert_eq!(
            PropertyDefinition::document("someDocument").kind(),
            PropertyKind::Document
        );
        assert_eq!(
            PropertyDefinition::relationship("children", "ChildType", "HAS_CHILD", Direction::Outgoing)
                .kind(),
            PropertyKind::Relationship
        );
    }

    #[test]
    fn test_deserialization() {
        let json = json!({
            "name": "MainType",
            "properties": [
                { "name": "someString", "type": "String" },
                {
                    "name": "parents",
                    "type": "ParentType",
                    "relationship": "IS_PARENT_OF",
                    "direction": "incoming",
                    "hasMany": true
                }
            ]
        });

        let definition: TypeDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(definition.properties.len(), 2);

        let parents = definition.property("parents").unwrap();
        let spec = parents.relationship_spec().unwrap();
        assert_eq!(spec.relationship_type, "IS_PARENT_OF");
        assert_eq!(spec.direction, Direction::Incoming);
        assert_eq!(spec.linked_type, "ParentType");
        assert!(spec.has_many);
    }

    #[test]
    fn test_relationship_property_lookup_respects_direction() {
        let definition = TypeDefinition::new("MainType")
            .with_property(
                PropertyDefinition::relationship("children", "MainType", "HAS_CHILD", Direction::Outgoing)
                    .many(),
            )
            .with_property(PropertyDefinition::relationship(
                "parent",
                "MainType",
                "HAS_CHILD",
                Direction::Incoming,
            ));

        let outgoing = definition
            .relationship_property_for("HAS_CHILD", Direction::Outgoing, "MainType")
            .unwrap();
        assert_eq!(outgoing.name, "children");

        let incoming = definition
            .relationship_property_for("HAS_CHILD", Direction::Incoming, "MainType")
            .unwrap();
        assert_eq!(incoming.name, "parent");
    }

    #[test]
    fn test_invariants_reject_duplicates_and_missing_direction() {
        let duplicate = TypeDefinition::new("T")
            .with_property(PropertyDefinition::scalar("a", "String"))
            .with_property(PropertyDefinition::scalar("a", "Int"));
        assert!(matches!(
            duplicate.check_invariants(),
            Err(SchemaError::DuplicateProperty { .. })
        ));

        let mut undirected = PropertyDefinition::relationship("r", "T", "REL", Direction::Outgoing);
        undirected.direction = None;
        let missing = TypeDefinition::new("T").with_property(undirected);
        assert!(matches!(
            missing.check_invariants(),
            Err(SchemaError::MissingDirection { .. })
        ));

        let reserved = TypeDefinition::new("T").with_property(PropertyDefinition::scalar("code", "String"));
        assert!(matches!(
            reserved.check_invariants(),
            Err(SchemaError::ReservedProperty { .. })
        ));
    }

    #[test]
    fn test_direction_reverse() {
        assert_eq!(Direction::Outgoing.reverse(), Direction::Incoming);
        assert_eq!(Direction::Incoming.reverse(), Direction::Outgoing);
        assert_eq!(serde_json::to_value(Direction::Incoming).unwrap(), json!("incoming"));
    }
}
