use super::*;
use crate::capture::session::CaptureSession;
use crate::config::CaptureConfig;
use serde_json::json;
use tempfile::TempDir;

fn session(temp: &TempDir) -> Arc<CaptureSession> {
    CaptureSession::activate(CaptureConfig {
        enabled: true,
        output_directory: temp.path().join("captures"),
        duration_seconds: 0,
        cache_directory: temp.path().join("cache"),
    })
    .unwrap()
}

#[test]
fn every_topic_feed_type_is_pubsub_only_or_has_update_kind() {
    // The building map is the only topic-feed type without an ingestion
    // message; everything else must be replayable through the sink.
    for binding in topic_bindings() {
        if binding.entity_type == EntityType::BuildingMap {
            assert!(binding.entity_type.update_kind().is_none());
        } else {
            assert!(binding.entity_type.update_kind().is_some());
        }
    }
}

#[tokio::test]
async fn socket_feed_records_known_message_kinds() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let feed = SocketFeed::new(session.clone());

    feed.handle_message(&json!({
        "type": "task_state_update",
        "data": {"booking": {"id": "t1"}, "status": "underway"}
    }));
    feed.handle_message(&json!({
        "type": "fleet_state_update",
        "data": {"name": "fleet_a", "robots": {}}
    }));

    let stats = session.stats();
    assert_eq!(stats.message_count, 2);
    assert_eq!(stats.per_type[&EntityType::TaskState], (1, 1));
    assert_eq!(stats.per_type[&EntityType::FleetState], (1, 1));
}

#[tokio::test]
async fn socket_feed_ignores_unknown_kind_and_bad_envelopes() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let feed = SocketFeed::new(session.clone());

    feed.handle_message(&json!({"type": "alert_update", "data": {"id": "a1"}}));
    feed.handle_message(&json!({"data": {"door_name": "d1"}}));
    feed.handle_message(&json!({"type": "door_state_update"}));

    assert_eq!(session.stats().message_count, 0);
}

#[tokio::test]
async fn socket_feed_event_source_is_socket() {
    let temp = TempDir::new().unwrap();
    let session = session(&temp);
    let feed = SocketFeed::new(session.clone());

    feed.handle_message(&json!({
        "type": "door_state_update",
        "data": {"door_name": "d1"}
    }));

    session.stop();
    let path = session.finish().unwrap().unwrap();
    let loaded = crate::capture::CaptureFile::load_from_file(&path).unwrap();
    assert_eq!(
        loaded.history["door_state"][0].source,
        EventSource::SocketFeed
    );
}
