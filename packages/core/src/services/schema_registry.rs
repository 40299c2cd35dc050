//! Schema Registry
//!
//! Holds the validated type definitions and is passed explicitly into every
//! component that needs type metadata, so diffing and reconciliation stay
//! pure functions of their inputs.

use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{SchemaError, TypeDefinition, ValidationError};

struct RegisteredType {
    definition: Arc<TypeDefinition>,
    code_pattern: Option<Regex>,
}

/// Immutable set of type definitions
pub struct SchemaRegistry {
    types: HashMap<String, RegisteredType>,
}

impl SchemaRegistry {
    /// Validate and index a set of type definitions
    ///
    /// # Errors
    ///
    /// Fails on duplicate types, invalid property definitions, code patterns
    /// that do not compile, or relationships to types outside the set.
    pub fn new(definitions: Vec<TypeDefinition>) -> Result<Self, SchemaError> {
        let mut types = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            definition.check_invariants()?;
            let code_pattern = definition
                .code_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|source| SchemaError::InvalidCodePattern {
                    type_name: definition.name.clone(),
                    source,
                })?;
            let name = definition.name.clone();
            let registered = RegisteredType {
                definition: Arc::new(definition),
                code_pattern,
            };
            if types.insert(name.clone(), registered).is_some() {
                return Err(SchemaError::DuplicateType(name));
            }
        }

        for registered in types.values() {
            for property in registered.definition.relationship_properties() {
                if !types.contains_key(&property.type_name) {
                    return Err(SchemaError::UnknownLinkedType {
                        type_name: registered.definition.name.clone(),
                        property: property.name.clone(),
                        linked_type: property.type_name.clone(),
                    });
                }
            }
        }

        tracing::debug!("Schema registry loaded {} types", types.len());
        Ok(Self { types })
    }

    /// Parse a JSON array of type definitions
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let definitions: Vec<TypeDefinition> = serde_json::from_str(json)?;
        Self::new(definitions)
    }

    pub fn get_type(&self, name: &str) -> Result<Arc<TypeDefinition>, ValidationError> {
        self.types
            .get(name)
            .map(|registered| Arc::clone(&registered.definition))
            .ok_or_else(|| ValidationError::UnknownType(name.to_string()))
    }

    /// Check a code against the type's code pattern, if it has one
    pub fn validate_code(&self, type_name: &str, code: &str) -> Result<(), ValidationError> {
        let registered = self
            .types
            .get(type_name)
            .ok_or_else(|| ValidationError::UnknownType(type_name.to_string()))?;
        let valid = !code.is_empty()
            && registered
                .code_pattern
                .as_ref()
                .map_or(true, |pattern| pattern.is_match(code));
        if valid {
            Ok(())
        } else {
            Err(ValidationError::InvalidCode {
                record_type: type_name.to_string(),
                code: code.to_string(),
            })
        }
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}
