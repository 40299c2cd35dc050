//! Relationship Reconciler
//!
//! Turns tagged relationship instructions into the edges to add and remove,
//! given the codes currently linked through each relationship property.
//!
//! Under `merge` nothing is removed unless explicitly asked for. Under
//! `replace`, and always for cardinality-one relationships, the codes in an
//! `Add` instruction become the complete set: every other linked code is
//! removed.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{RelationshipAction, RelationshipChange, TypeDefinition, ValidationError};

/// Codes to link and unlink, per relationship property
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipDelta {
    pub to_add: BTreeMap<String, BTreeSet<String>>,
    pub to_remove: BTreeMap<String, BTreeSet<String>>,
}

impl RelationshipDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Total number of edge operations
    pub fn len(&self) -> usize {
        self.to_add.values().chain(self.to_remove.values()).map(BTreeSet::len).sum()
    }

    pub fn added(&self, property: &str) -> BTreeSet<String> {
        self.to_add.get(property).cloned().unwrap_or_default()
    }

    pub fn removed(&self, property: &str) -> BTreeSet<String> {
        self.to_remove.get(property).cloned().unwrap_or_default()
    }

    /// Every relationship property touched by the delta
    pub fn properties(&self) -> BTreeSet<&str> {
        self.to_add
            .keys()
            .chain(self.to_remove.keys())
            .map(String::as_str)
            .collect()
    }
}

/// Reconcile incoming instructions against existing edges
///
/// # Errors
///
/// - `InvalidProperty` if an instruction names a non-relationship property
/// - `CardinalityViolation` if a cardinality-one relationship is given more
///   than one code, whatever the action
pub fn reconcile(
    definition: &TypeDefinition,
    existing: &BTreeMap<String, BTreeSet<String>>,
    incoming: &BTreeMap<String, Vec<RelationshipChange>>,
    action: RelationshipAction,
) -> Result<RelationshipDelta, ValidationError> {
    let mut delta = RelationshipDelta::default();
    let empty = BTreeSet::new();

    for (name, changes) in incoming {
        let property = definition
            .property(name)
            .filter(|p| p.is_relationship())
            .ok_or_else(|| ValidationError::InvalidProperty {
                record_type: definition.name.clone(),
                property: name.clone(),
            })?;
        let linked = existing.get(name).unwrap_or(&empty);

        let mut requested: Option<BTreeSet<String>> = None;
        let mut removals = BTreeSet::new();
        for change in changes {
            match change {
                RelationshipChange::Add(codes) => {
                    requested.get_or_insert_with(BTreeSet::new).extend(codes.iter().cloned());
                }
                RelationshipChange::Remove(codes) => {
                    removals.extend(codes.iter().filter(|code| linked.contains(*code)).cloned());
                }
                RelationshipChange::RemoveAll => removals.extend(linked.iter().cloned()),
            }
        }

        if let Some(requested) = &requested {
            if !property.has_many && requested.len() > 1 {
                return Err(ValidationError::CardinalityViolation {
                    record_type: definition.name.clone(),
                    property: name.clone(),
                });
            }
            if action == RelationshipAction::Replace || !property.has_many {
                removals.extend(linked.difference(requested).cloned());
            }
            // a code both requested and removed stays linked
            removals.retain(|code| !requested.contains(code));

            let additions: BTreeSet<String> = requested.difference(linked).cloned().collect();
            if !additions.is_empty() {
                delta.to_add.insert(name.clone(), additions);
            }
        }
        if !removals.is_empty() {
            delta.to_remove.insert(name.clone(), removals);
        }
    }
    Ok(delta)
}
