//! Document Merge Protocol
//!
//! Consolidates the document properties of a source record into a
//! destination record of the same type. The destination always wins: the
//! source only contributes properties the destination does not define.
//!
//! The source delete and the destination write run concurrently. If only one
//! of them succeeds it is undone through its version token, so a failed merge
//! leaves no visible change.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use super::compensation::call_with_timeout;
use super::diff::diff_properties;
use super::error::WriteError;
use crate::db::{DocumentStore, VersionToken};
use crate::models::TypeDefinition;

/// Result of a merge that changed something
#[derive(Debug, Clone, PartialEq)]
pub struct MergedDocuments {
    /// New destination version; `None` when nothing needed writing
    pub version: Option<VersionToken>,

    /// Delete marker written for the source object
    pub sibling_version: VersionToken,

    /// Destination body after the merge
    pub body: Map<String, Value>,
}

pub struct DocumentMerger {
    documents: Arc<dyn DocumentStore>,
    store_timeout: Duration,
}

impl DocumentMerger {
    pub fn new(documents: Arc<dyn DocumentStore>, store_timeout: Duration) -> Self {
        Self {
            documents,
            store_timeout,
        }
    }

    /// Merge `source_code`'s documents into `destination_code`
    ///
    /// Returns `Ok(None)` when the source has no document properties.
    ///
    /// # Errors
    ///
    /// - `MergeFailure` when the write, the delete, or both failed; the
    ///   successful half has been undone (a failed undo is attached as a
    ///   compensation failure)
    /// - `StoreUnavailable` when either body could not be read
    pub async fn merge(
        &self,
        definition: &TypeDefinition,
        source_code: &str,
        destination_code: &str,
    ) -> Result<Option<MergedDocuments>, WriteError> {
        let record_type = definition.name.as_str();
        let (source, destination) = tokio::join!(
            self.call("read source document", self.documents.get(record_type, source_code)),
            self.call(
                "read destination document",
                self.documents.get(record_type, destination_code)
            ),
        );
        let source = source?.unwrap_or_default();
        let mut destination = destination?.unwrap_or_default();

        if source.is_empty() {
            tracing::debug!("No documents to merge from {} {}", record_type, source_code);
            return Ok(None);
        }

        let mut write_properties = diff_properties(definition, &source, &destination);
        write_properties.retain(|name, _| !destination.contains_key(name));
        let needs_write = !write_properties.is_empty();
        destination.extend(write_properties);

        let delete_source = self.call(
            "delete source document",
            self.documents.delete(record_type, source_code),
        );
        let write_destination = async {
            if needs_write {
                self.call(
                    "write destination document",
                    self.documents.put(record_type, destination_code, destination.clone()),
                )
                .await
                .map(Some)
            } else {
                Ok(None)
            }
        };
        let (deleted, written) = tokio::join!(delete_source, write_destination);

        match (deleted, written) {
            (Ok(marker), Ok(version)) => {
                tracing::info!(
                    "Merged documents of {} {} into {}",
                    record_type,
                    source_code,
                    destination_code
                );
                Ok(Some(MergedDocuments {
                    version,
                    sibling_version: marker,
                    body: destination,
                }))
            }
            (Err(delete_error), Err(write_error)) => {
                tracing::error!(
                    "Document merge failed: delete ({}) and write ({})",
                    delete_error,
                    write_error
                );
                Err(WriteError::merge_failure("Write and delete failed in document store"))
            }
            (Err(delete_error), Ok(version)) => {
                tracing::error!("Document merge failed to delete source: {}", delete_error);
                let mut failures = Vec::new();
                if let Some(version) = version {
                    if let Err(e) = self
                        .call(
                            "discard destination document version",
                            self.documents.delete_version(record_type, destination_code, &version),
                        )
                        .await
                    {
                        failures.push(format!(
                            "failed to discard version {version} of {record_type} {destination_code}: {e}"
                        ));
                    }
                }
                Err(WriteError::merge_failure("Delete failed in document store")
                    .with_compensation_failures(failures))
            }
            (Ok(marker), Err(write_error)) => {
                tracing::error!("Document merge failed to write destination: {}", write_error);
                let mut failures = Vec::new();
                if let Err(e) = self
                    .call(
                        "restore source document",
                        self.documents.delete_version(record_type, source_code, &marker),
                    )
                    .await
                {
                    failures.push(format!(
                        "failed to remove delete marker {marker} of {record_type} {source_code}: {e}"
                    ));
                }
                Err(WriteError::merge_failure("Write failed in document store")
                    .with_compensation_failures(failures))
            }
        }
    }

    async fn call<T, E>(
        &self,
        operation: &str,
        call: impl std::future::Future<Output = Result<T, E>>,
    ) -> Result<T, WriteError>
    where
        E: Into<WriteError>,
    {
        call_with_timeout(self.store_timeout, operation, call).await
    }
}
