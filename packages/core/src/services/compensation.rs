//! Compensation Stack
//!
//! Neither store is transactional, so every mutation performed during a write
//! pushes its inverse onto a per-request stack. On failure the stack is
//! unwound in reverse order; on success it is discarded.
//!
//! | Mutation            | Inverse                                      |
//! |---------------------|----------------------------------------------|
//! | document `put`      | `delete_version(token)`                      |
//! | document `delete`   | `delete_version(delete-marker token)`        |
//! | node create/upsert  | `delete_node`                                |
//! | node update/delete  | `restore_node(previous)`                     |
//! | edge create         | `delete_edge`                                |
//! | edge delete/refresh | `restore_edge(previous)`                     |

use std::future::Future;
use std::time::Duration;

use super::error::WriteError;
use crate::db::{DocumentStore, EdgeKey, GraphEdge, GraphNode, GraphStore, VersionToken};
use crate::models::RecordKey;

/// Inverse of one store mutation
#[derive(Debug, Clone, PartialEq)]
pub enum CompensationAction {
    /// Undo a `put` by removing the version it wrote
    DiscardDocumentVersion { key: RecordKey, version: VersionToken },
    /// Undo a `delete` by removing its delete marker
    RestoreDeletedDocument { key: RecordKey, marker: VersionToken },
    DeleteNode(RecordKey),
    RestoreNode(GraphNode),
    DeleteEdge(EdgeKey),
    RestoreEdge(GraphEdge),
}

impl CompensationAction {
    pub fn describe(&self) -> String {
        match self {
            CompensationAction::DiscardDocumentVersion { key, version } => {
                format!("discard document version {version} of {key}")
            }
            CompensationAction::RestoreDeletedDocument { key, marker } => {
                format!("remove delete marker {marker} of {key}")
            }
            CompensationAction::DeleteNode(key) => format!("delete node {key}"),
            CompensationAction::RestoreNode(node) => format!("restore node {}", node.key),
            CompensationAction::DeleteEdge(key) => format!("delete edge {key}"),
            CompensationAction::RestoreEdge(edge) => format!("restore edge {}", edge.key),
        }
    }

    async fn apply(
        &self,
        graph: &dyn GraphStore,
        documents: &dyn DocumentStore,
        limit: Duration,
    ) -> Result<(), WriteError> {
        let operation = self.describe();
        match self {
            CompensationAction::DiscardDocumentVersion { key, version: token }
            | CompensationAction::RestoreDeletedDocument { key, marker: token } => {
                call_with_timeout(
                    limit,
                    &operation,
                    documents.delete_version(&key.record_type, &key.code, token),
                )
                .await
            }
            CompensationAction::DeleteNode(key) => {
                call_with_timeout(limit, &operation, graph.delete_node(key))
                    .await
                    .map(|_| ())
            }
            CompensationAction::RestoreNode(node) => {
                call_with_timeout(limit, &operation, graph.restore_node(node.clone())).await
            }
            CompensationAction::DeleteEdge(key) => {
                call_with_timeout(limit, &operation, graph.delete_edge(key))
                    .await
                    .map(|_| ())
            }
            CompensationAction::RestoreEdge(edge) => {
                call_with_timeout(limit, &operation, graph.restore_edge(edge.clone())).await
            }
        }
    }
}

/// Per-request list of inverse operations
#[derive(Debug, Default)]
pub struct CompensationStack {
    entries: Vec<CompensationAction>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: CompensationAction) {
        self.entries.push(action);
    }

    pub fn extend(&mut self, actions: impl IntoIterator<Item = CompensationAction>) {
        self.entries.extend(actions);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The write committed; nothing will be undone
    pub fn discard(self) {
        if !self.entries.is_empty() {
            tracing::trace!("Discarding {} compensation entries", self.entries.len());
        }
    }

    /// Apply every inverse in reverse order
    ///
    /// Every entry is attempted even after one fails. Returns a description
    /// of each failed entry; an empty list means the stores were restored.
    pub async fn unwind(
        self,
        graph: &dyn GraphStore,
        documents: &dyn DocumentStore,
        limit: Duration,
    ) -> Vec<String> {
        let mut failures = Vec::new();
        for action in self.entries.into_iter().rev() {
            tracing::warn!("Compensating: {}", action.describe());
            if let Err(e) = action.apply(graph, documents, limit).await {
                tracing::error!("Compensation failed to {}: {}", action.describe(), e);
                failures.push(format!("failed to {}: {}", action.describe(), e));
            }
        }
        failures
    }
}

/// Run one store call under the configured deadline
///
/// A call that exceeds `limit` is a failure of that call and is reported as
/// `StoreUnavailable`.
pub(crate) async fn call_with_timeout<T, E, F>(
    limit: Duration,
    operation: &str,
    call: F,
) -> Result<T, WriteError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<WriteError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(WriteError::unavailable(format!(
            "{operation} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
