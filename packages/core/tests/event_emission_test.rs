//! Event Emission Tests
//!
//! Tests that committed writes emit the expected change events, in order,
//! to both the event log sink and live subscribers, and that failed or no-op
//! writes emit nothing.

#[cfg(test)]
mod event_emission_tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::broadcast;
    use tokio::time::{timeout, Duration};
    use tokio_stream::StreamExt;
    use treecreeper_core::config::CoordinatorConfig;
    use treecreeper_core::db::{
        ChangeEvent, ChangeEventKind, EventAction, InMemoryDocumentStore, InMemoryGraphStore,
    };
    use treecreeper_core::models::{
        ChangeRequest, Direction, PropertyDefinition, RelationshipChange, RequestMetadata,
        TypeDefinition,
    };
    use treecreeper_core::services::{
        EventDelivery, EventEmitter, EventLogRecord, EventSink, MergeRequest, RecordingEventSink,
        SchemaRegistry, WriteCoordinator,
    };

    fn schema() -> SchemaRegistry {
        SchemaRegistry::new(vec![
            TypeDefinition::new("MainType")
                .with_property(PropertyDefinition::scalar("someString", "String"))
                .with_property(
                    PropertyDefinition::relationship(
                        "children",
                        "ChildType",
                        "HAS_CHILD",
                        Direction::Outgoing,
                    )
                    .many(),
                ),
            TypeDefinition::new("ChildType").with_property(
                PropertyDefinition::relationship("parents", "MainType", "HAS_CHILD", Direction::Incoming)
                    .many(),
            ),
        ])
        .expect("test schema is valid")
    }

    /// Coordinator wired to a recording sink
    fn create_coordinator(
        sink: Arc<dyn EventSink>,
    ) -> (WriteCoordinator, EventEmitter, EventDelivery) {
        let config = CoordinatorConfig::default();
        let (emitter, delivery) = EventEmitter::spawn(&config, sink);
        let coordinator = WriteCoordinator::new(
            Arc::new(schema()),
            Arc::new(InMemoryGraphStore::new()),
            Arc::new(InMemoryDocumentStore::new()),
        )
        .with_config(&config)
        .with_event_emitter(emitter.clone());
        (coordinator, emitter, delivery)
    }

    async fn next_event(rx: &mut broadcast::Receiver<ChangeEvent>) -> ChangeEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("Event should be emitted within 1 second")
            .expect("Should receive event")
    }

    #[tokio::test]
    async fn test_create_emits_one_created_node_event() -> Result<()> {
        let sink = RecordingEventSink::new();
        let (coordinator, emitter, delivery) = create_coordinator(Arc::new(sink.clone()));
        let mut rx = emitter.subscribe();

        coordinator
            .write(
                ChangeRequest::create("MainType", "m1")
                    .with_property("someString", json!("hello"))
                    .with_metadata(RequestMetadata::new("request-1")),
            )
            .await?;

        let event = next_event(&mut rx).await;
        assert_eq!(event.kind, ChangeEventKind::CreatedNode);
        assert_eq!(event.action, EventAction::Create);
        assert_eq!(event.record_type, "MainType");
        assert_eq!(event.code, "m1");
        assert_eq!(event.request_id, "request-1");

        drop(coordinator);
        drop(emitter);
        delivery.finish().await;

        let records = sink.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "maintype/m1");
        assert_eq!(records[0].link, "/api/MainType/m1");
        Ok(())
    }

    #[tokio::test]
    async fn test_relationship_events_follow_node_events() -> Result<()> {
        let sink = RecordingEventSink::new();
        let (coordinator, emitter, delivery) = create_coordinator(Arc::new(sink.clone()));

        coordinator
            .write(
                ChangeRequest::create("MainType", "m1")
                    .with_relationship("children", RelationshipChange::Add(vec!["c1".into()]))
                    .with_upsert(true),
            )
            .await?;

        drop(coordinator);
        drop(emitter);
        delivery.finish().await;

        let events: Vec<(ChangeEventKind, String)> = sink
            .records()
            .await
            .into_iter()
            .map(|record| (record.event.kind, record.event.code))
            .collect();
        assert_eq!(
            events,
            vec![
                (ChangeEventKind::CreatedNode, "m1".to_string()),
                (ChangeEventKind::CreatedNode, "c1".to_string()),
                (ChangeEventKind::CreatedRelationship, "m1".to_string()),
                (ChangeEventKind::CreatedRelationship, "c1".to_string()),
            ]
        );

        let records = sink.records().await;
        let detail = records[3]
            .event
            .relationship
            .as_ref()
            .expect("relationship events carry their counterpart");
        assert_eq!(detail.direction, Direction::Incoming);
        assert_eq!(detail.node_code, "m1");
        assert_eq!(detail.relationship_type, "HAS_CHILD");
        Ok(())
    }

    #[tokio::test]
    async fn test_no_events_for_failed_or_unchanged_writes() -> Result<()> {
        let sink = RecordingEventSink::new();
        let (coordinator, emitter, delivery) = create_coordinator(Arc::new(sink.clone()));

        coordinator
            .write(ChangeRequest::create("MainType", "m1").with_property("someString", json!("a")))
            .await?;
        // Unchanged
        coordinator
            .write(ChangeRequest::patch("MainType", "m1").with_property("someString", json!("a")))
            .await?;
        // Conflict
        assert!(coordinator.write(ChangeRequest::create("MainType", "m1")).await.is_err());
        // Missing related node
        assert!(coordinator
            .write(
                ChangeRequest::patch("MainType", "m1")
                    .with_relationship("children", RelationshipChange::Add(vec!["c9".into()])),
            )
            .await
            .is_err());

        drop(coordinator);
        drop(emitter);
        delivery.finish().await;

        assert_eq!(sink.records().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_emits_deleted_source() -> Result<()> {
        let sink = RecordingEventSink::new();
        let (coordinator, emitter, delivery) = create_coordinator(Arc::new(sink.clone()));
        coordinator.write(ChangeRequest::create("MainType", "src")).await?;
        coordinator.write(ChangeRequest::create("MainType", "dst")).await?;

        coordinator.merge(MergeRequest::new("MainType", "src", "dst")).await?;

        drop(coordinator);
        drop(emitter);
        delivery.finish().await;

        let events: Vec<(ChangeEventKind, String)> = sink
            .records()
            .await
            .into_iter()
            .map(|record| (record.event.kind, record.event.code))
            .collect();
        assert_eq!(
            events[2..],
            [
                (ChangeEventKind::UpdatedNode, "dst".to_string()),
                (ChangeEventKind::DeletedNode, "src".to_string()),
            ]
        );
        Ok(())
    }

    /// Sink that rejects every record
    struct BrokenSink;

    #[async_trait]
    impl EventSink for BrokenSink {
        async fn put_record(&self, _stream_name: &str, _record: &EventLogRecord) -> Result<()> {
            anyhow::bail!("stream does not exist")
        }
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_fail_the_write() -> Result<()> {
        let (coordinator, emitter, delivery) = create_coordinator(Arc::new(BrokenSink));
        let mut stream = emitter.subscribe_stream();

        let outcome = coordinator
            .write(ChangeRequest::create("MainType", "m1"))
            .await?;
        assert!(outcome.created());

        // Subscribers still see the event
        let event = timeout(Duration::from_secs(1), stream.next())
            .await?
            .expect("stream is open")?;
        assert_eq!(event.kind, ChangeEventKind::CreatedNode);

        drop(coordinator);
        drop(emitter);
        delivery.finish().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_full_queue_drops_events() -> Result<()> {
        let config = CoordinatorConfig {
            event_queue_capacity: 1,
            ..CoordinatorConfig::default()
        };
        let sink = RecordingEventSink::new();
        let (emitter, delivery) = EventEmitter::spawn(&config, Arc::new(sink.clone()));
        let (coordinator, _, _) = create_coordinator(Arc::new(RecordingEventSink::new()));
        let outcome = coordinator
            .write(ChangeRequest::create("MainType", "m1"))
            .await?;

        // Nothing yields in between, so the delivery task cannot drain the queue
        assert_eq!(emitter.emit(&outcome), 1);
        assert_eq!(emitter.emit(&outcome), 0);
        assert_eq!(emitter.emit(&outcome), 0);

        drop(emitter);
        delivery.finish().await;
        assert_eq!(sink.records().await.len(), 1);
        Ok(())
    }
}
