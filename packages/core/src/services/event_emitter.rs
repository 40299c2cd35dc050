//! Event Emitter - Best-Effort Change Event Delivery
//!
//! Derives the ordered change events of a committed write and delivers them
//! off the request path:
//!
//! - `emit` derives events and hands them to a bounded queue without waiting
//! - a background task writes each event to the [`EventSink`] (the external,
//!   append-only event log) and broadcasts it to live subscribers
//! - a full queue or a sink failure is logged and never reaches the write
//!
//! Delivery is at-most-once.
//!
//! ## Event Order
//!
//! 1. The node event: `CREATED_NODE`, `DELETED_NODE` or `UPDATED_NODE`
//! 2. `DELETED_NODE` for a record removed by a merge
//! 3. For every edge change, a pair of relationship events: one recorded
//!    against the subject, one against the counterpart with the direction
//!    reversed. A counterpart created by upsert gets its `CREATED_NODE` just
//!    before its first pair.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use super::outcome::{EdgeChange, EdgeChangeKind, NodeChange, WriteOutcome};
use crate::config::CoordinatorConfig;
use crate::db::{ChangeEvent, ChangeEventKind, RelationshipDetail};

/// Derive the ordered events of a committed write
pub fn derive_events(outcome: &WriteOutcome) -> Vec<ChangeEvent> {
    let node_kind = match outcome.node_change {
        NodeChange::Created => ChangeEventKind::CreatedNode,
        NodeChange::Updated => ChangeEventKind::UpdatedNode,
        NodeChange::Deleted => ChangeEventKind::DeletedNode,
        NodeChange::Unchanged => return Vec::new(),
    };
    let request_id = outcome.request_id.as_str();
    let subject = outcome.key();

    let mut events = vec![ChangeEvent::node(
        node_kind,
        &subject.record_type,
        &subject.code,
        request_id,
    )];
    if let Some(merged) = &outcome.merged_node {
        events.push(ChangeEvent::node(
            ChangeEventKind::DeletedNode,
            &merged.record_type,
            &merged.code,
            request_id,
        ));
    }

    let mut pending_upserts: BTreeSet<_> = outcome.upserted_nodes.iter().collect();
    for change in &outcome.edge_changes {
        if pending_upserts.remove(&change.counterpart) {
            events.push(ChangeEvent::node(
                ChangeEventKind::CreatedNode,
                &change.counterpart.record_type,
                &change.counterpart.code,
                request_id,
            ));
        }
        events.extend(relationship_events(change, request_id));
    }
    events
}

fn relationship_events(change: &EdgeChange, request_id: &str) -> [ChangeEvent; 2] {
    let kind = match change.kind {
        EdgeChangeKind::Created => ChangeEventKind::CreatedRelationship,
        EdgeChangeKind::Updated => ChangeEventKind::UpdatedRelationship,
        EdgeChangeKind::Deleted => ChangeEventKind::DeletedRelationship,
    };
    let subject = ChangeEvent::node(
        kind,
        &change.subject.record_type,
        &change.subject.code,
        request_id,
    )
    .with_relationship(RelationshipDetail {
        relationship_type: change.relationship_type.clone(),
        direction: change.direction,
        node_code: change.counterpart.code.clone(),
        node_type: change.counterpart.record_type.clone(),
    });
    let counterpart = ChangeEvent::node(
        kind,
        &change.counterpart.record_type,
        &change.counterpart.code,
        request_id,
    )
    .with_relationship(RelationshipDetail {
        relationship_type: change.relationship_type.clone(),
        direction: change.direction.reverse(),
        node_code: change.subject.code.clone(),
        node_type: change.subject.record_type.clone(),
    });
    [subject, counterpart]
}

/// An event as written to the event log, with the legacy data item attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogRecord {
    #[serde(flatten)]
    pub event: ChangeEvent,
    /// `lowercase(type)/code`
    pub key: String,
    pub model: String,
    pub name: String,
    pub value: String,
    /// URL-encoded API path of the record
    pub link: String,
    /// Seconds since the epoch
    pub time: i64,
}

/// Formats change events for the event log
#[derive(Debug, Clone)]
pub struct EventLogWriter {
    api_base_path: String,
}

impl EventLogWriter {
    pub fn new(api_base_path: impl Into<String>) -> Self {
        Self {
            api_base_path: api_base_path.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn record(&self, event: &ChangeEvent, time: DateTime<Utc>) -> EventLogRecord {
        EventLogRecord {
            key: format!("{}/{}", event.record_type.to_lowercase(), event.code),
            model: "DataItem".to_string(),
            name: "dataItemID".to_string(),
            value: event.code.clone(),
            link: format!(
                "{}/{}/{}",
                self.api_base_path,
                encode_uri_component(&event.record_type),
                encode_uri_component(&event.code)
            ),
            time: time.timestamp(),
            event: event.clone(),
        }
    }
}

/// Percent-encode everything except the unreserved URI characters
fn encode_uri_component(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Destination of event log records (e.g. a Kinesis-like stream)
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn put_record(&self, stream_name: &str, record: &EventLogRecord) -> anyhow::Result<()>;
}

/// Sink that only logs records; for development setups without an event log
pub struct LoggingEventSink;

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn put_record(&self, stream_name: &str, record: &EventLogRecord) -> anyhow::Result<()> {
        tracing::debug!(
            "Skipped event log write to {}: {} {}",
            stream_name,
            record.event.kind.as_str(),
            record.key
        );
        Ok(())
    }
}

/// Sink that keeps every record in memory
#[derive(Clone, Default)]
pub struct RecordingEventSink {
    records: Arc<Mutex<Vec<(String, EventLogRecord)>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<EventLogRecord> {
        self.records
            .lock()
            .await
            .iter()
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub async fn streams(&self) -> Vec<String> {
        self.records
            .lock()
            .await
            .iter()
            .map(|(stream, _)| stream.clone())
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn put_record(&self, stream_name: &str, record: &EventLogRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .await
            .push((stream_name.to_string(), record.clone()));
        Ok(())
    }
}

struct PendingEvents {
    events: Vec<ChangeEvent>,
    time: DateTime<Utc>,
}

/// Cloneable handle for emitting events
#[derive(Clone)]
pub struct EventEmitter {
    queue_tx: mpsc::Sender<PendingEvents>,
    event_tx: broadcast::Sender<ChangeEvent>,
}

/// The background delivery task
///
/// It stops once every `EventEmitter` clone has been dropped and the queue
/// is drained.
pub struct EventDelivery {
    handle: JoinHandle<()>,
}

impl EventDelivery {
    /// Wait for the queue to drain after all emitters were dropped
    pub async fn finish(self) {
        if let Err(e) = self.handle.await {
            tracing::error!("Event delivery task failed: {}", e);
        }
    }
}

impl EventEmitter {
    /// Create an emitter and spawn its delivery task
    pub fn spawn(config: &CoordinatorConfig, sink: Arc<dyn EventSink>) -> (Self, EventDelivery) {
        let (queue_tx, mut queue_rx) = mpsc::channel::<PendingEvents>(config.event_queue_capacity);
        let (event_tx, _) = broadcast::channel(config.broadcast_capacity);

        let writer = EventLogWriter::new(&config.api_base_path);
        let stream_name = config.event_stream_name.clone();
        let broadcaster = event_tx.clone();
        let handle = tokio::spawn(async move {
            while let Some(pending) = queue_rx.recv().await {
                for event in pending.events {
                    let record = writer.record(&event, pending.time);
                    if let Err(e) = sink.put_record(&stream_name, &record).await {
                        tracing::error!(
                            "Event log write failed for {} {}: {:#}",
                            record.event.kind.as_str(),
                            record.key,
                            e
                        );
                    }
                    // No subscribers is fine
                    let _ = broadcaster.send(event);
                }
            }
            tracing::debug!("Event delivery stopped");
        });

        (Self { queue_tx, event_tx }, EventDelivery { handle })
    }

    /// Queue the events of a committed write; returns how many were queued
    pub fn emit(&self, outcome: &WriteOutcome) -> usize {
        let events = derive_events(outcome);
        let count = events.len();
        if count == 0 {
            return 0;
        }
        let pending = PendingEvents {
            events,
            time: Utc::now(),
        };
        match self.queue_tx.try_send(pending) {
            Ok(()) => count,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    "Event queue full; dropped {} events for request {}",
                    count,
                    outcome.request_id
                );
                0
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(
                    "Event delivery has shut down; dropped {} events for request {}",
                    count,
                    outcome.request_id
                );
                0
            }
        }
    }

    /// Subscribe to delivered events
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.event_tx.subscribe()
    }

    /// Delivered events as a `Stream`; lagging subscribers see `Err` items
    pub fn subscribe_stream(&self) -> BroadcastStream<ChangeEvent> {
        BroadcastStream::new(self.event_tx.subscribe())
    }
}
