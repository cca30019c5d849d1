// End-to-end: capture a mixed event stream, save it, load it back and replay
// it into an in-process sink, checking the invariants the file format
// promises along the way.

use fleetcap::capture::session::CaptureSession;
use fleetcap::capture::CaptureFile;
use fleetcap::config::CaptureConfig;
use fleetcap::entity::{EntityType, EventSource};
use fleetcap::replay::{ChannelSink, ReplayMode, ReplayScheduler};
use fleetcap::sources::SocketFeed;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn activate(temp: &TempDir) -> Arc<CaptureSession> {
    CaptureSession::activate(CaptureConfig {
        enabled: true,
        output_directory: temp.path().join("captures"),
        duration_seconds: 0,
        cache_directory: temp.path().join("cache"),
    })
    .unwrap()
}

/// Capture doors (topic feed), fleet/task traffic (socket feed) and a raw
/// middleware fleet state, then save.
fn capture_mixed_session(temp: &TempDir) -> std::path::PathBuf {
    let session = activate(temp);
    let socket = SocketFeed::new(session.clone());

    session.record(
        EntityType::DoorState,
        EventSource::TopicFeed,
        json!({"door_name": "main_door", "current_mode": {"value": 2}}),
    );
    socket.handle_message(&json!({
        "type": "task_state_update",
        "data": {"booking": {"id": "t1"}, "status": "queued"}
    }));
    session.record(
        EntityType::FleetState,
        EventSource::TopicFeed,
        json!({
            "name": "fleet_a",
            "robots": [{
                "name": "r1",
                "battery_percent": 87.0,
                "mode": {"mode": 2},
                "location": {"level_name": "L1", "x": 1.0, "y": 2.0, "yaw": 0.0}
            }]
        }),
    );
    session.record(
        EntityType::DoorState,
        EventSource::TopicFeed,
        json!({"door_name": "main_door", "current_mode": {"value": 0}}),
    );
    socket.handle_message(&json!({
        "type": "task_state_update",
        "data": {"booking": {"id": "t1"}, "status": "underway"}
    }));

    session.finish().unwrap().expect("capture file written")
}

#[tokio::test]
async fn capture_save_load_replay_round_trip() {
    let temp = TempDir::new().unwrap();
    let path = capture_mixed_session(&temp);

    let loaded = CaptureFile::load_from_file(&path).unwrap();
    assert_eq!(loaded.metadata.total_messages, 5);
    assert_eq!(loaded.history["door_state"].len(), 2);
    assert_eq!(
        loaded.latest_states["door_state"]["main_door"]["current_mode"]["value"],
        json!(0)
    );
    assert_eq!(
        loaded.latest_states["task_state"]["t1"]["status"],
        json!("underway")
    );

    // Derivability: every latest state equals the last history record for
    // that key.
    for (type_name, latest) in &loaded.latest_states {
        let entity_type = EntityType::from_str_name(type_name).unwrap();
        for (id, payload) in latest {
            let last = loaded.history[type_name]
                .iter()
                .rev()
                .find(|r| entity_type.resolve_key(&r.data).as_deref() == Ok(id))
                .unwrap();
            assert_eq!(&last.data, payload);
        }
    }

    // Replay latest-only into an in-process sink.
    let (sink, mut rx) = ChannelSink::new();
    let (scheduler, _handle) = ReplayScheduler::new(loaded, sink);
    let report = scheduler.run(ReplayMode::LatestOnly).await.unwrap();
    assert_eq!(report.total_sent(), 3);
    assert_eq!(report.total_failed(), 0);

    let mut received = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        received.push(msg);
    }
    assert_eq!(received.len(), 3);

    // Raw middleware fleet state arrives canonical at the sink.
    let (_, fleet) = received
        .iter()
        .find(|(kind, _)| *kind == "fleet_state_update")
        .unwrap();
    assert_eq!(fleet["robots"]["r1"]["status"], json!("moving"));
    assert_eq!(fleet["robots"]["r1"]["location"]["map"], json!("L1"));
    let battery = fleet["robots"]["r1"]["battery"].as_f64().unwrap();
    assert!((battery - 0.87).abs() <= 1e-6);
}

#[tokio::test]
async fn chronological_replay_preserves_capture_order() {
    let temp = TempDir::new().unwrap();
    let path = capture_mixed_session(&temp);
    let loaded = CaptureFile::load_from_file(&path).unwrap();

    let (sink, mut rx) = ChannelSink::new();
    let (scheduler, _handle) = ReplayScheduler::new(loaded.clone(), sink);
    let report = scheduler
        .with_speed(1000.0)
        .run(ReplayMode::Chronological)
        .await
        .unwrap();
    assert_eq!(report.total_sent() as u64, loaded.metadata.total_messages);

    let mut received = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        received.push(msg);
    }
    assert_eq!(received.len() as u64, loaded.metadata.total_messages);

    // The two door records must arrive in their captured order.
    let door_modes: Vec<Value> = received
        .iter()
        .filter(|(kind, _)| *kind == "door_state_update")
        .map(|(_, payload)| payload["current_mode"]["value"].clone())
        .collect();
    assert_eq!(door_modes, vec![json!(2), json!(0)]);

    // And the task must end underway.
    let last_task = received
        .iter()
        .filter(|(kind, _)| *kind == "task_state_update")
        .last()
        .unwrap();
    assert_eq!(last_task.1["status"], json!("underway"));
}

#[tokio::test]
async fn latest_only_is_idempotent_against_an_empty_service() {
    let temp = TempDir::new().unwrap();
    let path = capture_mixed_session(&temp);
    let loaded = CaptureFile::load_from_file(&path).unwrap();

    let mut runs: Vec<BTreeMap<(String, String), Value>> = Vec::new();
    for _ in 0..2 {
        let (sink, mut rx) = ChannelSink::new();
        let (scheduler, _handle) = ReplayScheduler::new(loaded.clone(), sink);
        scheduler.run(ReplayMode::LatestOnly).await.unwrap();

        let mut service_state = BTreeMap::new();
        while let Ok((kind, payload)) = rx.try_recv() {
            let entity_type = EntityType::from_update_kind(kind).unwrap();
            let id = entity_type.resolve_key(&payload).unwrap();
            service_state.insert((kind.to_string(), id), payload);
        }
        runs.push(service_state);
    }

    assert_eq!(runs[0], runs[1]);
}
