//! In-memory document store
//!
//! Keeps the full version history of every object, S3-style: a delete writes a
//! delete marker version, and removing the newest version makes the previous
//! one current again.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::document_store::{DocumentStore, VersionToken};
use super::error::DocumentStoreError;

#[derive(Debug, Clone)]
struct DocumentVersion {
    token: VersionToken,
    /// `None` marks a delete marker
    body: Option<Map<String, Value>>,
}

type ObjectKey = (String, String);

#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    objects: Arc<RwLock<HashMap<ObjectKey, Vec<DocumentVersion>>>>,
    next_version: Arc<AtomicU64>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn object_key(record_type: &str, code: &str) -> ObjectKey {
        (record_type.to_string(), code.to_string())
    }

    fn issue_token(&self) -> VersionToken {
        let id = self.next_version.fetch_add(1, Ordering::Relaxed) + 1;
        VersionToken::new(format!("v{id:08}"))
    }

    async fn append(
        &self,
        record_type: &str,
        code: &str,
        body: Option<Map<String, Value>>,
    ) -> VersionToken {
        let token = self.issue_token();
        let mut objects = self.objects.write().await;
        objects
            .entry(Self::object_key(record_type, code))
            .or_default()
            .push(DocumentVersion {
                token: token.clone(),
                body,
            });
        token
    }

    /// Number of stored versions (delete markers included) for one object
    pub async fn version_count(&self, record_type: &str, code: &str) -> usize {
        self.objects
            .read()
            .await
            .get(&Self::object_key(record_type, code))
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(
        &self,
        record_type: &str,
        code: &str,
    ) -> Result<Option<Map<String, Value>>, DocumentStoreError> {
        let objects = self.objects.read().await;
        Ok(objects
            .get(&Self::object_key(record_type, code))
            .and_then(|versions| versions.last())
            .and_then(|latest| latest.body.clone()))
    }

    async fn put(
        &self,
        record_type: &str,
        code: &str,
        body: Map<String, Value>,
    ) -> Result<VersionToken, DocumentStoreError> {
        Ok(self.append(record_type, code, Some(body)).await)
    }

    async fn delete(&self, record_type: &str, code: &str) -> Result<VersionToken, DocumentStoreError> {
        Ok(self.append(record_type, code, None).await)
    }

    async fn delete_version(
        &self,
        record_type: &str,
        code: &str,
        token: &VersionToken,
    ) -> Result<(), DocumentStoreError> {
        let mut objects = self.objects.write().await;
        let key = Self::object_key(record_type, code);
        let versions = objects
            .get_mut(&key)
            .ok_or_else(|| DocumentStoreError::not_found(format!("{record_type}/{code}")))?;
        let position = versions
            .iter()
            .position(|version| &version.token == token)
            .ok_or_else(|| {
                DocumentStoreError::not_found(format!("{record_type}/{code}@{token}"))
            })?;
        versions.remove(position);
        if versions.is_empty() {
            objects.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_put_then_discard_restores_previous() {
        let store = InMemoryDocumentStore::new();
        store.put("MainType", "m1", body(json!({ "a": "1" }))).await.unwrap();
        let token = store.put("MainType", "m1", body(json!({ "a": "2" }))).await.unwrap();

        store.delete_version("MainType", "m1", &token).await.unwrap();
        assert_eq!(
            store.get("MainType", "m1").await.unwrap(),
            Some(body(json!({ "a": "1" })))
        );
    }

    #[tokio::test]
    async fn test_removing_delete_marker_restores_content() {
        let store = InMemoryDocumentStore::new();
        store.put("MainType", "m1", body(json!({ "a": "1" }))).await.unwrap();
        let marker = store.delete("MainType", "m1").await.unwrap();
        assert!(store.get("MainType", "m1").await.unwrap().is_none());

        store.delete_version("MainType", "m1", &marker).await.unwrap();
        assert_eq!(
            store.get("MainType", "m1").await.unwrap(),
            Some(body(json!({ "a": "1" })))
        );
        assert_eq!(store.version_count("MainType", "m1").await, 1);
    }

    #[tokio::test]
    async fn test_unknown_version_is_not_found() {
        let store = InMemoryDocumentStore::new();
        let err = store
            .delete_version("MainType", "m1", &VersionToken::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::NotFound(_)));
    }

    #[test]
    fn test_tokens_are_unique_across_objects() {
        let store = InMemoryDocumentStore::new();
        let (first, second) = tokio_test::block_on(async {
            let first = store.put("MainType", "m1", Map::new()).await.unwrap();
            let second = store.delete("ChildType", "c1").await.unwrap();
            (first, second)
        });
        assert_ne!(first, second);
        assert_eq!(first.as_str(), "v00000001");
    }
}
