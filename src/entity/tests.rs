use super::*;
use serde_json::json;

#[test]
fn resolves_door_name() {
    let payload = json!({"door_name": "main_door", "current_mode": {"value": 2}});
    assert_eq!(
        EntityType::DoorState.resolve_key(&payload).unwrap(),
        "main_door"
    );
}

#[test]
fn resolves_nested_task_booking_id() {
    let payload = json!({"booking": {"id": "task_42"}, "status": "underway"});
    assert_eq!(
        EntityType::TaskState.resolve_key(&payload).unwrap(),
        "task_42"
    );
}

#[test]
fn resolves_guid_for_dispenser_and_ingestor() {
    let payload = json!({"guid": "disp_a", "mode": 0});
    assert_eq!(
        EntityType::DispenserState.resolve_key(&payload).unwrap(),
        "disp_a"
    );
    assert_eq!(
        EntityType::IngestorState.resolve_key(&payload).unwrap(),
        "disp_a"
    );
}

#[test]
fn missing_key_field_is_unresolvable() {
    let payload = json!({"current_mode": {"value": 1}});
    let err = EntityType::DoorState.resolve_key(&payload).unwrap_err();
    assert!(matches!(
        err,
        KeyError::Unresolvable {
            entity_type: EntityType::DoorState,
            field: "door_name"
        }
    ));
}

#[test]
fn empty_key_field_is_unresolvable() {
    let payload = json!({"lift_name": ""});
    assert!(EntityType::LiftState.resolve_key(&payload).is_err());
}

#[test]
fn non_string_key_field_is_unresolvable() {
    let payload = json!({"id": 7});
    assert!(EntityType::BeaconState.resolve_key(&payload).is_err());
}

#[test]
fn missing_booking_object_is_unresolvable() {
    let payload = json!({"status": "queued"});
    assert!(EntityType::TaskState.resolve_key(&payload).is_err());
}

#[test]
fn update_kind_round_trip() {
    for ty in EntityType::ALL {
        match ty.update_kind() {
            Some(kind) => assert_eq!(EntityType::from_update_kind(kind), Some(ty)),
            None => assert_eq!(ty, EntityType::BuildingMap),
        }
    }
    assert_eq!(EntityType::from_update_kind("alert_update"), None);
}

#[test]
fn wire_name_round_trip() {
    for ty in EntityType::ALL {
        assert_eq!(EntityType::from_str_name(ty.as_str()), Some(ty));
    }
    assert_eq!(EntityType::from_str_name("trajectory"), None);
}

#[test]
fn entity_type_serializes_as_snake_case() {
    assert_eq!(
        serde_json::to_string(&EntityType::DoorState).unwrap(),
        "\"door_state\""
    );
    assert_eq!(
        serde_json::to_string(&EventSource::TopicFeed).unwrap(),
        "\"topic_feed\""
    );
}
