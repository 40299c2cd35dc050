//! Write Coordinator - Two-Store Writes With Compensation
//!
//! This module is the entry point for every change to a record:
//!
//! - `write` creates, patches or deletes one record
//! - `read` assembles one record from both stores
//! - `merge` folds one record into another of the same type
//!
//! # Write Phases
//!
//! ```text
//! DIFFING → WRITING_DOCUMENTS → WRITING_GRAPH → COMMITTED
//!                  │                  │
//!                  └──────────────────┴──→ COMPENSATING → FAILED
//! ```
//!
//! Validation, diffing and relationship reconciliation run before any store
//! is touched. Documents are written before the graph so that their version
//! tokens are in hand before the store with weaker ordering changes. Every
//! store mutation pushes its inverse onto a [`CompensationStack`]; on any
//! failure the stack is unwound in reverse order and the original error is
//! returned, with compensation failures attached rather than substituted.
//!
//! # Concurrency
//!
//! Requests for different records never interact. Requests for the same record
//! are not serialized: there is no lock and no version check, so the last
//! graph write wins. Edge writes for different relationship properties of one
//! request are issued concurrently.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::compensation::{call_with_timeout, CompensationAction, CompensationStack};
use super::diff::{diff, DiffResult};
use super::document_merge::DocumentMerger;
use super::error::WriteError;
use super::event_emitter::EventEmitter;
use super::outcome::{
    DocumentWrite, DocumentWriteKind, EdgeChange, EdgeChangeKind, NodeChange, WriteOutcome,
};
use super::schema_registry::SchemaRegistry;
use crate::config::CoordinatorConfig;
use crate::db::{DocumentStore, EdgeKey, GraphEdge, GraphNode, GraphStore};
use crate::models::{
    ChangeRequest, Provenance, Record, RecordKey, RelatedRecord, RelationshipSpec,
    RequestMetadata, TypeDefinition, ValidationError, WriteMode,
};

/// Phase of a single write, recorded on its log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    Diffing,
    WritingDocuments,
    WritingGraph,
    Compensating,
    Committed,
    Failed,
}

/// Request to merge `source_code` into `destination_code`
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub record_type: String,
    pub source_code: String,
    pub destination_code: String,
    pub metadata: RequestMetadata,
    pub timestamp: DateTime<Utc>,
}

impl MergeRequest {
    pub fn new(
        record_type: impl Into<String>,
        source_code: impl Into<String>,
        destination_code: impl Into<String>,
    ) -> Self {
        Self {
            record_type: record_type.into(),
            source_code: source_code.into(),
            destination_code: destination_code.into(),
            metadata: RequestMetadata::generated(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: RequestMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn provenance(&self) -> Provenance {
        self.metadata.provenance(self.timestamp)
    }
}

/// Current state of a record in both stores
struct CurrentState {
    node: GraphNode,
    edges: Vec<GraphEdge>,
    documents: Map<String, Value>,
}

impl CurrentState {
    fn to_record(&self, definition: &TypeDefinition) -> Record {
        assemble_record(definition, &self.node, &self.edges, self.documents.clone())
    }
}

/// Edge writes for one relationship property
#[derive(Default)]
struct EdgeBatch {
    changes: Vec<EdgeChange>,
    compensations: Vec<CompensationAction>,
    error: Option<WriteError>,
}

/// Coordinates writes across the graph and document stores
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use serde_json::json;
/// use treecreeper_core::db::{InMemoryDocumentStore, InMemoryGraphStore};
/// use treecreeper_core::models::{ChangeRequest, PropertyDefinition, TypeDefinition};
/// use treecreeper_core::services::{SchemaRegistry, WriteCoordinator};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let schema = SchemaRegistry::new(vec![TypeDefinition::new("MainType")
///     .with_property(PropertyDefinition::scalar("someString", "String"))])?;
/// let coordinator = WriteCoordinator::new(
///     Arc::new(schema),
///     Arc::new(InMemoryGraphStore::new()),
///     Arc::new(InMemoryDocumentStore::new()),
/// );
///
/// let outcome = coordinator
///     .write(ChangeRequest::create("MainType", "m1").with_property("someString", json!("hello")))
///     .await?;
/// assert!(outcome.created());
/// # Ok(())
/// # }
/// ```
pub struct WriteCoordinator {
    schema: Arc<SchemaRegistry>,
    graph: Arc<dyn GraphStore>,
    documents: Arc<dyn DocumentStore>,
    emitter: Option<EventEmitter>,
    store_timeout: Duration,
}

impl WriteCoordinator {
    pub fn new(
        schema: Arc<SchemaRegistry>,
        graph: Arc<dyn GraphStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            schema,
            graph,
            documents,
            emitter: None,
            store_timeout: CoordinatorConfig::default().store_timeout(),
        }
    }

    pub fn with_config(mut self, config: &CoordinatorConfig) -> Self {
        self.store_timeout = config.store_timeout();
        self
    }

    /// Publish events for every committed write through `emitter`
    pub fn with_event_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Read one record from both stores
    ///
    /// # Errors
    ///
    /// - `Validation` if the type is unknown
    /// - `NotFound` if the record does not exist
    pub async fn read(&self, record_type: &str, code: &str) -> Result<Record, WriteError> {
        let definition = self.schema.get_type(record_type)?;
        let key = RecordKey::new(record_type, code);
        let state = self
            .load(&key)
            .await?
            .ok_or_else(|| WriteError::not_found(&key))?;
        Ok(state.to_record(&definition))
    }

    /// Apply one change request
    ///
    /// On success the outcome is handed to the event emitter (if any) before
    /// returning; emission never fails the write.
    ///
    /// # Errors
    ///
    /// - `Validation` for unknown types or properties, invalid codes or values,
    ///   conflicting payload codes and cardinality violations
    /// - `MissingRelatedNodes` when linked records are absent and `upsert` is off
    /// - `Conflict` when creating an existing record or deleting a linked one
    /// - `NotFound` when deleting an absent record
    /// - `StoreUnavailable` when a store call fails or times out
    /// - `CompensationFailed` when undoing a failed write also failed
    pub async fn write(&self, request: ChangeRequest) -> Result<WriteOutcome, WriteError> {
        let definition = self.schema.get_type(&request.record_type)?;
        self.schema.validate_code(&request.record_type, &request.code)?;
        request.validate(&definition)?;

        let outcome = match request.mode {
            WriteMode::Delete => self.delete_record(&definition, &request).await?,
            WriteMode::Create | WriteMode::Patch => self.apply_change(&definition, &request).await?,
        };
        self.publish(&outcome);
        Ok(outcome)
    }

    /// Merge one record into another of the same type
    ///
    /// Documents follow the document merge protocol. Scalar properties the
    /// destination lacks are copied from the source; the destination wins on
    /// conflicts. Every source edge is moved to the destination (edges between
    /// the two records are dropped) and the source is deleted.
    pub async fn merge(&self, request: MergeRequest) -> Result<WriteOutcome, WriteError> {
        let definition = self.schema.get_type(&request.record_type)?;
        self.schema.validate_code(&request.record_type, &request.source_code)?;
        self.schema
            .validate_code(&request.record_type, &request.destination_code)?;
        if request.source_code == request.destination_code {
            return Err(ValidationError::SelfMerge {
                record_type: request.record_type.clone(),
                code: request.source_code.clone(),
            }
            .into());
        }

        let source_key = RecordKey::new(&request.record_type, &request.source_code);
        let destination_key = RecordKey::new(&request.record_type, &request.destination_code);
        let (source, destination) = tokio::join!(self.load(&source_key), self.load(&destination_key));
        let source = source?.ok_or_else(|| WriteError::not_found(&source_key))?;
        let destination = destination?.ok_or_else(|| WriteError::not_found(&destination_key))?;

        let mut stack = CompensationStack::new();
        match self
            .commit_merge(&definition, &request, &source, &destination, &mut stack)
            .await
        {
            Ok(outcome) => {
                stack.discard();
                tracing::info!(
                    phase = ?WritePhase::Committed,
                    "Merged {} into {}",
                    source_key,
                    destination_key
                );
                self.publish(&outcome);
                Ok(outcome)
            }
            Err(e) => Err(self.compensate(stack, e).await),
        }
    }

    async fn apply_change(
        &self,
        definition: &TypeDefinition,
        request: &ChangeRequest,
    ) -> Result<WriteOutcome, WriteError> {
        let key = request.key();
        tracing::debug!(phase = ?WritePhase::Diffing, "Writing {}", key);

        let current = self.load(&key).await?;
        if request.mode == WriteMode::Create && current.is_some() {
            return Err(WriteError::already_exists(&key));
        }
        let existing = current.as_ref().map(|state| state.to_record(definition));
        let plan = diff(definition, request, existing.as_ref())?;

        let related = self.related_keys(definition, &plan, &key)?;
        let missing = self.find_missing(&related).await?;
        if !missing.is_empty() && !request.upsert {
            return Err(WriteError::MissingRelatedNodes { missing });
        }

        if plan.is_empty() {
            if let Some(record) = existing {
                tracing::debug!("No changes to write for {}", key);
                return Ok(WriteOutcome {
                    request_id: request.metadata.request_id.clone(),
                    node_change: NodeChange::Unchanged,
                    record,
                    edge_changes: Vec::new(),
                    upserted_nodes: Vec::new(),
                    merged_node: None,
                    document_writes: Vec::new(),
                });
            }
        }

        let mut stack = CompensationStack::new();
        match self
            .commit_change(definition, request, current.as_ref(), &plan, &missing, &mut stack)
            .await
        {
            Ok(outcome) => {
                stack.discard();
                tracing::info!(
                    phase = ?WritePhase::Committed,
                    "{:?} {} ({} edge changes)",
                    outcome.node_change,
                    key,
                    outcome.edge_changes.len()
                );
                Ok(outcome)
            }
            Err(e) => Err(self.compensate(stack, e).await),
        }
    }

    async fn commit_change(
        &self,
        definition: &TypeDefinition,
        request: &ChangeRequest,
        current: Option<&CurrentState>,
        plan: &DiffResult,
        missing: &[RecordKey],
        stack: &mut CompensationStack,
    ) -> Result<WriteOutcome, WriteError> {
        let key = request.key();
        let provenance = request.provenance();

        let mut documents = current.map(|state| state.documents.clone()).unwrap_or_default();
        let mut document_writes = Vec::new();
        if !plan.documents.is_empty() {
            tracing::debug!(
                phase = ?WritePhase::WritingDocuments,
                "{} document changes for {}",
                plan.documents.len(),
                key
            );
            let had_documents = !documents.is_empty();
            apply_properties(&mut documents, &plan.documents);
            if let Some(write) = self
                .write_documents(&key, &documents, had_documents, stack)
                .await?
            {
                document_writes.push(write);
            }
        }

        tracing::debug!(phase = ?WritePhase::WritingGraph, "Writing graph for {}", key);
        let (node, node_change) = match current {
            None => {
                let node = self
                    .call(
                        "create node",
                        self.graph.create_node(&key, plan.properties.clone(), &provenance),
                    )
                    .await?;
                stack.push(CompensationAction::DeleteNode(key.clone()));
                (node, NodeChange::Created)
            }
            Some(state) => {
                let node = self
                    .call(
                        "update node",
                        self.graph.update_node(&key, plan.properties.clone(), &provenance),
                    )
                    .await?;
                stack.push(CompensationAction::RestoreNode(state.node.clone()));
                (node, NodeChange::Updated)
            }
        };

        let upserted_nodes = self.upsert_related(missing, &provenance, stack).await?;

        let batches = join_all(plan.relationships.properties().into_iter().filter_map(|name| {
            let spec = definition.property(name)?.relationship_spec()?;
            Some(self.write_edges(
                &key,
                spec,
                plan.relationships.removed(name),
                plan.relationships.added(name),
                &provenance,
            ))
        }))
        .await;

        let mut edge_changes = Vec::new();
        let mut first_error = None;
        for batch in batches {
            stack.extend(batch.compensations);
            edge_changes.extend(batch.changes);
            if let Some(e) = batch.error {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let mut edges = current.map(|state| state.edges.clone()).unwrap_or_default();
        apply_edge_changes(&mut edges, &edge_changes);

        Ok(WriteOutcome {
            request_id: provenance.request_id.clone(),
            node_change,
            record: assemble_record(definition, &node, &edges, documents),
            edge_changes,
            upserted_nodes,
            merged_node: None,
            document_writes,
        })
    }

    /// Persist the document body: `delete` when it became empty, else `put`
    async fn write_documents(
        &self,
        key: &RecordKey,
        body: &Map<String, Value>,
        had_documents: bool,
        stack: &mut CompensationStack,
    ) -> Result<Option<DocumentWrite>, WriteError> {
        if body.is_empty() {
            if !had_documents {
                return Ok(None);
            }
            let marker = self
                .call(
                    "delete document",
                    self.documents.delete(&key.record_type, &key.code),
                )
                .await?;
            stack.push(CompensationAction::RestoreDeletedDocument {
                key: key.clone(),
                marker: marker.clone(),
            });
            return Ok(Some(DocumentWrite {
                key: key.clone(),
                kind: DocumentWriteKind::Delete,
                version: marker,
            }));
        }

        let version = self
            .call(
                "write document",
                self.documents.put(&key.record_type, &key.code, body.clone()),
            )
            .await?;
        stack.push(CompensationAction::DiscardDocumentVersion {
            key: key.clone(),
            version: version.clone(),
        });
        Ok(Some(DocumentWrite {
            key: key.clone(),
            kind: DocumentWriteKind::Put,
            version,
        }))
    }

    /// Create the linked records that do not exist yet
    async fn upsert_related(
        &self,
        missing: &[RecordKey],
        provenance: &Provenance,
        stack: &mut CompensationStack,
    ) -> Result<Vec<RecordKey>, WriteError> {
        let results = join_all(
            missing
                .iter()
                .map(|related| self.call("upsert node", self.graph.upsert_node(related, provenance))),
        )
        .await;

        let mut upserted = Vec::new();
        let mut first_error = None;
        for (related, result) in missing.iter().zip(results) {
            match result {
                Ok(result) if result.created => {
                    stack.push(CompensationAction::DeleteNode(related.clone()));
                    upserted.push(related.clone());
                }
                Ok(_) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(upserted),
        }
    }

    /// Remove then add the edges of one relationship property
    async fn write_edges(
        &self,
        subject: &RecordKey,
        spec: RelationshipSpec<'_>,
        to_remove: BTreeSet<String>,
        to_add: BTreeSet<String>,
        provenance: &Provenance,
    ) -> EdgeBatch {
        let mut batch = EdgeBatch::default();
        let change = |kind, counterpart: RecordKey, metadata| EdgeChange {
            kind,
            relationship_type: spec.relationship_type.to_string(),
            subject: subject.clone(),
            direction: spec.direction,
            counterpart,
            metadata,
        };

        for code in to_remove {
            let counterpart = RecordKey::new(spec.linked_type, code);
            let edge_key = EdgeKey::oriented(
                spec.relationship_type,
                subject.clone(),
                spec.direction,
                counterpart.clone(),
            );
            match self.call("delete edge", self.graph.delete_edge(&edge_key)).await {
                Ok(edge) => {
                    batch
                        .changes
                        .push(change(EdgeChangeKind::Deleted, counterpart, edge.metadata.clone()));
                    batch.compensations.push(CompensationAction::RestoreEdge(edge));
                }
                Err(e) => {
                    batch.error = Some(e);
                    return batch;
                }
            }
        }

        for code in to_add {
            let counterpart = RecordKey::new(spec.linked_type, code);
            let edge_key = EdgeKey::oriented(
                spec.relationship_type,
                subject.clone(),
                spec.direction,
                counterpart.clone(),
            );
            match self
                .call("create edge", self.graph.create_edge(&edge_key, provenance))
                .await
            {
                Ok(written) => {
                    let kind = match written.previous {
                        Some(previous) => {
                            batch.compensations.push(CompensationAction::RestoreEdge(previous));
                            EdgeChangeKind::Updated
                        }
                        None => {
                            batch.compensations.push(CompensationAction::DeleteEdge(edge_key));
                            EdgeChangeKind::Created
                        }
                    };
                    batch.changes.push(change(kind, counterpart, written.edge.metadata));
                }
                Err(e) => {
                    batch.error = Some(e);
                    return batch;
                }
            }
        }
        batch
    }

    async fn delete_record(
        &self,
        definition: &TypeDefinition,
        request: &ChangeRequest,
    ) -> Result<WriteOutcome, WriteError> {
        let key = request.key();
        let state = self
            .load(&key)
            .await?
            .ok_or_else(|| WriteError::not_found(&key))?;
        if !state.edges.is_empty() {
            return Err(WriteError::conflict(format!(
                "Cannot delete - {key} has relationships"
            )));
        }

        let mut stack = CompensationStack::new();
        match self.remove_record(&key, &state, &mut stack).await {
            Ok(document_writes) => {
                stack.discard();
                tracing::info!(phase = ?WritePhase::Committed, "Deleted {}", key);
                Ok(WriteOutcome {
                    request_id: request.metadata.request_id.clone(),
                    node_change: NodeChange::Deleted,
                    record: state.to_record(definition),
                    edge_changes: Vec::new(),
                    upserted_nodes: Vec::new(),
                    merged_node: None,
                    document_writes,
                })
            }
            Err(e) => Err(self.compensate(stack, e).await),
        }
    }

    async fn remove_record(
        &self,
        key: &RecordKey,
        state: &CurrentState,
        stack: &mut CompensationStack,
    ) -> Result<Vec<DocumentWrite>, WriteError> {
        let mut document_writes = Vec::new();
        if !state.documents.is_empty() {
            tracing::debug!(phase = ?WritePhase::WritingDocuments, "Deleting documents of {}", key);
            if let Some(write) = self
                .write_documents(key, &Map::new(), true, stack)
                .await?
            {
                document_writes.push(write);
            }
        }
        tracing::debug!(phase = ?WritePhase::WritingGraph, "Deleting node {}", key);
        let removed = self.call("delete node", self.graph.delete_node(key)).await?;
        stack.push(CompensationAction::RestoreNode(removed));
        Ok(document_writes)
    }

    async fn commit_merge(
        &self,
        definition: &TypeDefinition,
        request: &MergeRequest,
        source: &CurrentState,
        destination: &CurrentState,
        stack: &mut CompensationStack,
    ) -> Result<WriteOutcome, WriteError> {
        let provenance = request.provenance();
        let source_key = source.node.key.clone();
        let destination_key = destination.node.key.clone();

        tracing::debug!(phase = ?WritePhase::WritingDocuments, "Merging documents of {}", source_key);
        let mut documents = destination.documents.clone();
        let mut document_writes = Vec::new();
        let merger = DocumentMerger::new(Arc::clone(&self.documents), self.store_timeout);
        if let Some(merged) = merger
            .merge(definition, &source_key.code, &destination_key.code)
            .await?
        {
            stack.push(CompensationAction::RestoreDeletedDocument {
                key: source_key.clone(),
                marker: merged.sibling_version.clone(),
            });
            document_writes.push(DocumentWrite {
                key: source_key.clone(),
                kind: DocumentWriteKind::Delete,
                version: merged.sibling_version,
            });
            if let Some(version) = merged.version {
                stack.push(CompensationAction::DiscardDocumentVersion {
                    key: destination_key.clone(),
                    version: version.clone(),
                });
                document_writes.push(DocumentWrite {
                    key: destination_key.clone(),
                    kind: DocumentWriteKind::Put,
                    version,
                });
            }
            documents = merged.body;
        }

        tracing::debug!(phase = ?WritePhase::WritingGraph, "Moving {} into {}", source_key, destination_key);
        let fill: Map<String, Value> = source
            .node
            .properties
            .iter()
            .filter(|(name, _)| !destination.node.properties.contains_key(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let node = self
            .call(
                "update node",
                self.graph.update_node(&destination_key, fill, &provenance),
            )
            .await?;
        stack.push(CompensationAction::RestoreNode(destination.node.clone()));

        let mut edges: Vec<GraphEdge> = destination
            .edges
            .iter()
            .filter(|edge| !edge.key.touches(&source_key))
            .cloned()
            .collect();
        let mut linked: BTreeSet<EdgeKey> = edges.iter().map(|edge| edge.key.clone()).collect();
        let mut edge_changes = Vec::new();

        for edge in &source.edges {
            let Some((direction, counterpart)) = edge.key.seen_from(&source_key) else {
                continue;
            };
            let counterpart = counterpart.clone();
            let relationship_type = edge.key.relationship_type.clone();

            let removed = self.call("delete edge", self.graph.delete_edge(&edge.key)).await?;
            edge_changes.push(EdgeChange {
                kind: EdgeChangeKind::Deleted,
                relationship_type: relationship_type.clone(),
                subject: source_key.clone(),
                direction,
                counterpart: counterpart.clone(),
                metadata: removed.metadata.clone(),
            });
            stack.push(CompensationAction::RestoreEdge(removed));

            if counterpart == destination_key {
                continue;
            }
            let counterpart = if counterpart == source_key {
                destination_key.clone()
            } else {
                counterpart
            };
            let moved = EdgeKey::oriented(
                relationship_type.clone(),
                destination_key.clone(),
                direction,
                counterpart.clone(),
            );
            if linked.contains(&moved) {
                continue;
            }

            let written = self
                .call("create edge", self.graph.create_edge(&moved, &provenance))
                .await?;
            stack.push(match written.previous {
                Some(previous) => CompensationAction::RestoreEdge(previous),
                None => CompensationAction::DeleteEdge(moved.clone()),
            });
            edge_changes.push(EdgeChange {
                kind: EdgeChangeKind::Created,
                relationship_type,
                subject: destination_key.clone(),
                direction,
                counterpart,
                metadata: written.edge.metadata.clone(),
            });
            linked.insert(moved);
            edges.push(written.edge);
        }

        let removed = self
            .call("delete node", self.graph.delete_node(&source_key))
            .await?;
        stack.push(CompensationAction::RestoreNode(removed));

        Ok(WriteOutcome {
            request_id: provenance.request_id.clone(),
            node_change: NodeChange::Updated,
            record: assemble_record(definition, &node, &edges, documents),
            edge_changes,
            upserted_nodes: Vec::new(),
            merged_node: Some(source_key),
            document_writes,
        })
    }

    /// Keys of every record a request would link to, with their codes checked
    ///
    /// The subject itself is left out: its node is written before any edge.
    fn related_keys(
        &self,
        definition: &TypeDefinition,
        plan: &DiffResult,
        subject: &RecordKey,
    ) -> Result<Vec<RecordKey>, ValidationError> {
        let mut keys = BTreeSet::new();
        for (name, codes) in &plan.relationships.to_add {
            let Some(spec) = definition.property(name).and_then(|p| p.relationship_spec()) else {
                continue;
            };
            for code in codes {
                self.schema.validate_code(spec.linked_type, code)?;
                let related = RecordKey::new(spec.linked_type, code);
                if &related != subject {
                    keys.insert(related);
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    async fn find_missing(&self, keys: &[RecordKey]) -> Result<Vec<RecordKey>, WriteError> {
        let lookups = join_all(
            keys.iter()
                .map(|key| self.call("read related node", self.graph.get_node(key))),
        )
        .await;

        let mut missing = Vec::new();
        for (key, found) in keys.iter().zip(lookups) {
            if found?.is_none() {
                missing.push(key.clone());
            }
        }
        Ok(missing)
    }

    async fn load(&self, key: &RecordKey) -> Result<Option<CurrentState>, WriteError> {
        let (snapshot, documents) = tokio::join!(
            self.call("read node", self.graph.get_node(key)),
            self.call(
                "read document",
                self.documents.get(&key.record_type, &key.code)
            ),
        );
        let Some(snapshot) = snapshot? else {
            return Ok(None);
        };
        Ok(Some(CurrentState {
            node: snapshot.node,
            edges: snapshot.edges,
            documents: documents?.unwrap_or_default(),
        }))
    }

    async fn compensate(&self, stack: CompensationStack, error: WriteError) -> WriteError {
        tracing::warn!(
            phase = ?WritePhase::Compensating,
            "Write failed ({}); undoing {} store mutations",
            error,
            stack.len()
        );
        let failures = stack
            .unwind(self.graph.as_ref(), self.documents.as_ref(), self.store_timeout)
            .await;
        if !failures.is_empty() {
            tracing::error!(
                phase = ?WritePhase::Failed,
                "{} compensation steps failed after: {}",
                failures.len(),
                error
            );
        }
        error.with_compensation_failures(failures)
    }

    fn publish(&self, outcome: &WriteOutcome) {
        if let Some(emitter) = &self.emitter {
            emitter.emit(outcome);
        }
    }

    async fn call<T, E>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, WriteError>
    where
        E: Into<WriteError>,
    {
        call_with_timeout(self.store_timeout, operation, call).await
    }
}

/// Merge changed values into a property map; `null` removes
fn apply_properties(target: &mut Map<String, Value>, changes: &Map<String, Value>) {
    for (name, value) in changes {
        if value.is_null() {
            target.remove(name);
        } else {
            target.insert(name.clone(), value.clone());
        }
    }
}

fn apply_edge_changes(edges: &mut Vec<GraphEdge>, changes: &[EdgeChange]) {
    for change in changes {
        let key = change.edge_key();
        edges.retain(|edge| edge.key != key);
        if change.kind != EdgeChangeKind::Deleted {
            edges.push(GraphEdge {
                key,
                metadata: change.metadata.clone(),
            });
        }
    }
}

/// Build the public view of a record from its node, edges and documents
fn assemble_record(
    definition: &TypeDefinition,
    node: &GraphNode,
    edges: &[GraphEdge],
    documents: Map<String, Value>,
) -> Record {
    let mut relationships: BTreeMap<String, Vec<RelatedRecord>> = BTreeMap::new();
    for edge in edges {
        let Some((direction, counterpart)) = edge.key.seen_from(&node.key) else {
            continue;
        };
        let Some(property) = definition.relationship_property_for(
            &edge.key.relationship_type,
            direction,
            &counterpart.record_type,
        ) else {
            continue;
        };
        relationships
            .entry(property.name.clone())
            .or_default()
            .push(RelatedRecord {
                code: counterpart.code.clone(),
                record_type: counterpart.record_type.clone(),
                relationship_type: edge.key.relationship_type.clone(),
                direction,
                metadata: edge.metadata.clone(),
            });
    }
    for related in relationships.values_mut() {
        related.sort_by(|a, b| a.code.cmp(&b.code));
    }

    Record {
        record_type: node.key.record_type.clone(),
        code: node.key.code.clone(),
        properties: node.properties.clone(),
        documents,
        relationships,
        metadata: node.metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryDocumentStore, InMemoryGraphStore};
    use crate::models::{Direction, PropertyDefinition, RelationshipChange};
    use serde_json::json;

    fn coordinator() -> (WriteCoordinator, Arc<InMemoryGraphStore>) {
        let schema = SchemaRegistry::new(vec![
            TypeDefinition::new("MainType")
                .with_property(PropertyDefinition::scalar("someString", "String"))
                .with_property(PropertyDefinition::document("someDocument"))
                .with_property(
                    PropertyDefinition::relationship("children", "ChildType", "HAS_CHILD", Direction::Outgoing)
                        .many(),
                ),
            TypeDefinition::new("ChildType").with_property(
                PropertyDefinition::relationship("parents", "MainType", "HAS_CHILD", Direction::Incoming)
                    .many(),
            ),
        ])
        .unwrap();
        let graph = Arc::new(InMemoryGraphStore::new());
        let coordinator = WriteCoordinator::new(
            Arc::new(schema),
            graph.clone(),
            Arc::new(InMemoryDocumentStore::new()),
        );
        (coordinator, graph)
    }

    #[tokio::test]
    async fn test_create_then_unchanged_patch() {
        let (coordinator, _) = coordinator();
        let created = coordinator
            .write(ChangeRequest::create("MainType", "m1").with_property("someString", json!("hello")))
            .await
            .unwrap();
        assert_eq!(created.node_change, NodeChange::Created);
        assert_eq!(created.record.properties["someString"], "hello");

        let repeated = coordinator
            .write(ChangeRequest::patch("MainType", "m1").with_property("someString", json!("hello")))
            .await
            .unwrap();
        assert!(repeated.is_unchanged());
    }

    #[tokio::test]
    async fn test_relationships_are_visible_from_both_ends() {
        let (coordinator, _) = coordinator();
        coordinator
            .write(
                ChangeRequest::create("MainType", "m1")
                    .with_relationship("children", RelationshipChange::Add(vec!["c1".into()]))
                    .with_upsert(true),
            )
            .await
            .unwrap();

        let child = coordinator.read("ChildType", "c1").await.unwrap();
        assert_eq!(child.related_codes("parents").into_iter().collect::<Vec<_>>(), vec!["m1"]);
        let parent = coordinator.read("MainType", "m1").await.unwrap();
        assert_eq!(parent.relationships["children"][0].direction, Direction::Outgoing);
    }

    #[tokio::test]
    async fn test_assembled_outcome_matches_a_fresh_read() {
        let (coordinator, _) = coordinator();
        let outcome = coordinator
            .write(
                ChangeRequest::create("MainType", "m1")
                    .with_property("someDocument", json!("text"))
                    .with_relationship("children", RelationshipChange::Add(vec!["c1".into()]))
                    .with_upsert(true),
            )
            .await
            .unwrap();
        let read = coordinator.read("MainType", "m1").await.unwrap();
        assert_eq!(outcome.record, read);
    }

    #[tokio::test]
    async fn test_self_merge_is_rejected() {
        let (coordinator, graph) = coordinator();
        let err = coordinator
            .merge(MergeRequest::new("MainType", "m1", "m1"))
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Validation(ValidationError::SelfMerge { .. })));
        assert_eq!(graph.node_count().await, 0);
    }
}
