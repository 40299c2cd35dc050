//! In-memory graph store
//!
//! A `GraphStore` backed by maps behind a tokio `RwLock`. Used by tests and by
//! embedders that want the coordinator without a graph database.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::GraphStoreError;
use super::graph_store::{
    EdgeKey, EdgeWriteResult, GraphEdge, GraphNode, GraphStore, NodeSnapshot, UpsertResult,
};
use crate::models::{Provenance, RecordKey, RecordMetadata};

#[derive(Default)]
struct GraphState {
    nodes: HashMap<RecordKey, GraphNode>,
    edges: BTreeMap<EdgeKey, GraphEdge>,
}

impl GraphState {
    fn edges_touching(&self, key: &RecordKey) -> Vec<GraphEdge> {
        self.edges
            .values()
            .filter(|edge| edge.key.touches(key))
            .cloned()
            .collect()
    }
}

/// Shared, cloneable in-memory graph
#[derive(Clone, Default)]
pub struct InMemoryGraphStore {
    state: Arc<RwLock<GraphState>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn node_count(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    pub async fn edge_count(&self) -> usize {
        self.state.read().await.edges.len()
    }

    pub async fn has_edge(&self, key: &EdgeKey) -> bool {
        self.state.read().await.edges.contains_key(key)
    }
}

fn apply_properties(target: &mut Map<String, Value>, properties: Map<String, Value>) {
    for (name, value) in properties {
        if value.is_null() {
            target.remove(&name);
        } else {
            target.insert(name, value);
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn get_node(&self, key: &RecordKey) -> Result<Option<NodeSnapshot>, GraphStoreError> {
        let state = self.state.read().await;
        Ok(state.nodes.get(key).map(|node| NodeSnapshot {
            node: node.clone(),
            edges: state.edges_touching(key),
        }))
    }

    async fn create_node(
        &self,
        key: &RecordKey,
        properties: Map<String, Value>,
        provenance: &Provenance,
    ) -> Result<GraphNode, GraphStoreError> {
        let mut state = self.state.write().await;
        if state.nodes.contains_key(key) {
            return Err(GraphStoreError::conflict(format!("{key} already exists")));
        }
        let mut stored = Map::new();
        apply_properties(&mut stored, properties);
        let node = GraphNode {
            key: key.clone(),
            properties: stored,
            metadata: RecordMetadata::created_by(provenance),
        };
        state.nodes.insert(key.clone(), node.clone());
        Ok(node)
    }

    async fn update_node(
        &self,
        key: &RecordKey,
        properties: Map<String, Value>,
        provenance: &Provenance,
    ) -> Result<GraphNode, GraphStoreError> {
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(key)
            .ok_or_else(|| GraphStoreError::not_found(key.to_string()))?;
        apply_properties(&mut node.properties, properties);
        node.metadata = node.metadata.touched_by(provenance);
        Ok(node.clone())
    }

    async fn upsert_node(
        &self,
        key: &RecordKey,
        provenance: &Provenance,
    ) -> Result<UpsertResult, GraphStoreError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.nodes.get(key) {
            return Ok(UpsertResult {
                node: existing.clone(),
                created: false,
            });
        }
        let node = GraphNode {
            key: key.clone(),
            properties: Map::new(),
            metadata: RecordMetadata::created_by(provenance),
        };
        state.nodes.insert(key.clone(), node.clone());
        Ok(UpsertResult { node, created: true })
    }

    async fn delete_node(&self, key: &RecordKey) -> Result<GraphNode, GraphStoreError> {
        let mut state = self.state.write().await;
        if !state.nodes.contains_key(key) {
            return Err(GraphStoreError::not_found(key.to_string()));
        }
        if state.edges.keys().any(|edge| edge.touches(key)) {
            return Err(GraphStoreError::conflict(format!(
                "Cannot delete - {key} has relationships"
            )));
        }
        state
            .nodes
            .remove(key)
            .ok_or_else(|| GraphStoreError::not_found(key.to_string()))
    }

    async fn create_edge(
        &self,
        key: &EdgeKey,
        provenance: &Provenance,
    ) -> Result<EdgeWriteResult, GraphStoreError> {
        let mut state = self.state.write().await;
        for endpoint in [&key.from, &key.to] {
            if !state.nodes.contains_key(endpoint) {
                return Err(GraphStoreError::not_found(endpoint.to_string()));
            }
        }
        let previous = state.edges.get(key).cloned();
        let metadata = match &previous {
            Some(existing) => existing.metadata.touched_by(provenance),
            None => RecordMetadata::created_by(provenance),
        };
        let edge = GraphEdge {
            key: key.clone(),
            metadata,
        };
        state.edges.insert(key.clone(), edge.clone());
        Ok(EdgeWriteResult { edge, previous })
    }

    async fn delete_edge(&self, key: &EdgeKey) -> Result<GraphEdge, GraphStoreError> {
        let mut state = self.state.write().await;
        state
            .edges
            .remove(key)
            .ok_or_else(|| GraphStoreError::not_found(key.to_string()))
    }

    async fn restore_node(&self, node: GraphNode) -> Result<(), GraphStoreError> {
        let mut state = self.state.write().await;
        state.nodes.insert(node.key.clone(), node);
        Ok(())
    }

    async fn restore_edge(&self, edge: GraphEdge) -> Result<(), GraphStoreError> {
        let mut state = self.state.write().await;
        state.edges.insert(edge.key.clone(), edge);
        Ok(())
    }
}
