//! Change Events
//!
//! This module defines the change events derived from a committed write.
//! Events are published after commit through the event emitter, allowing
//! downstream consumers (the append-only event log, live subscribers) to
//! follow data changes without coupling to the stores.
//!
//! # Event Flow
//!
//! 1. The write coordinator commits a change and produces a write outcome
//! 2. Events are derived from the outcome in a fixed order
//! 3. The emitter hands them to a bounded queue and returns immediately
//! 4. A background task delivers them to the event sink and broadcasts them
//!    to subscribers

use serde::{Deserialize, Serialize};

use crate::models::Direction;

/// Kind of change an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeEventKind {
    CreatedNode,
    UpdatedNode,
    DeletedNode,
    CreatedRelationship,
    UpdatedRelationship,
    DeletedRelationship,
}

impl ChangeEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEventKind::CreatedNode => "CREATED_NODE",
            ChangeEventKind::UpdatedNode => "UPDATED_NODE",
            ChangeEventKind::DeletedNode => "DELETED_NODE",
            ChangeEventKind::CreatedRelationship => "CREATED_RELATIONSHIP",
            ChangeEventKind::UpdatedRelationship => "UPDATED_RELATIONSHIP",
            ChangeEventKind::DeletedRelationship => "DELETED_RELATIONSHIP",
        }
    }

    /// Coarse action recorded alongside the event in the log
    ///
    /// Any relationship change is an update of the record holding it.
    pub fn action(&self) -> EventAction {
        match self {
            ChangeEventKind::CreatedNode => EventAction::Create,
            ChangeEventKind::DeletedNode => EventAction::Delete,
            _ => EventAction::Update,
        }
    }

    pub fn is_relationship(&self) -> bool {
        matches!(
            self,
            ChangeEventKind::CreatedRelationship
                | ChangeEventKind::UpdatedRelationship
                | ChangeEventKind::DeletedRelationship
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventAction {
    Create,
    Update,
    Delete,
}

/// The relationship an event refers to, seen from the event's subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipDetail {
    pub relationship_type: String,
    pub direction: Direction,
    pub node_code: String,
    pub node_type: String,
}

/// One change recorded against one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    #[serde(rename = "event")]
    pub kind: ChangeEventKind,
    pub action: EventAction,
    pub code: String,
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<RelationshipDetail>,
    pub request_id: String,
}

impl ChangeEvent {
    pub fn node(
        kind: ChangeEventKind,
        record_type: impl Into<String>,
        code: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            action: kind.action(),
            code: code.into(),
            record_type: record_type.into(),
            relationship: None,
            request_id: request_id.into(),
        }
    }

    pub fn with_relationship(mut self, detail: RelationshipDetail) -> Self {
        self.relationship = Some(detail);
        self
    }
}
