use super::*;
use serde_json::json;

#[test]
fn status_table_is_bidirectional() {
    for (code, status) in [
        (0, "idle"),
        (1, "charging"),
        (2, "moving"),
        (3, "paused"),
        (4, "waiting"),
        (5, "emergency"),
    ] {
        assert_eq!(status_from_mode(code).unwrap(), status);
        assert_eq!(mode_from_status(status).unwrap(), code);
    }
}

#[test]
fn unknown_mode_code_is_rejected() {
    assert_eq!(
        status_from_mode(7),
        Err(NormalizeError::UnknownStatusCode(7))
    );
    assert_eq!(
        mode_from_status("sleeping"),
        Err(NormalizeError::UnknownStatus("sleeping".to_string()))
    );
}

#[test]
fn raw_robot_converts_to_canonical() {
    let raw = json!({
        "name": "fleet_a",
        "robots": [{
            "name": "r1",
            "battery_percent": 87.0,
            "mode": {"mode": 2},
            "location": {"level_name": "L1", "x": 1.0, "y": 2.0, "yaw": 0.0}
        }]
    });

    let canonical = fleet_to_canonical(&raw).unwrap();
    let r1 = &canonical["robots"]["r1"];
    assert!((r1["battery"].as_f64().unwrap() - 0.87).abs() < 1e-9);
    assert_eq!(r1["status"], json!("moving"));
    assert_eq!(r1["location"]["map"], json!("L1"));
    assert_eq!(r1["location"]["x"], json!(1.0));
    assert_eq!(r1["location"]["y"], json!(2.0));
}

#[test]
fn raw_robot_gets_default_commission_fields() {
    let raw = json!({
        "robots": [
            {"name": "r1", "mode": {"mode": 0},
             "location": {"level_name": "L1", "x": 0, "y": 0, "yaw": 0}},
            {"name": "r2", "mode": {"mode": 0},
             "location": {"level_name": "L1", "x": 0, "y": 0, "yaw": 0},
             "issues": [{"category": "battery", "detail": "low"}]},
        ]
    });

    let canonical = fleet_to_canonical(&raw).unwrap();
    let r1 = &canonical["robots"]["r1"];
    assert_eq!(
        r1["commission"],
        json!({"direct_tasks": true, "dispatch_tasks": true, "idle_behavior": true})
    );
    assert_eq!(r1["mutex_groups"], json!({"locked": [], "requesting": []}));
    assert_eq!(r1["issues"], json!([]));

    // present values win over the defaults
    assert_eq!(
        canonical["robots"]["r2"]["issues"],
        json!([{"category": "battery", "detail": "low"}])
    );
}

#[test]
fn raw_timestamp_becomes_unix_millis() {
    let raw = json!({
        "robots": [{
            "name": "r1",
            "mode": {"mode": 0},
            "location": {"level_name": "L1", "x": 0, "y": 0, "yaw": 0,
                         "t": {"sec": 1700000000, "nanosec": 250_000_000}}
        }]
    });

    let canonical = fleet_to_canonical(&raw).unwrap();
    assert_eq!(
        canonical["robots"]["r1"]["unix_millis_time"],
        json!(1700000000250i64)
    );
}

#[test]
fn last_write_wins_on_duplicate_robot_names() {
    let raw = json!({
        "robots": [
            {"name": "r1", "battery_percent": 10.0, "mode": {"mode": 0},
             "location": {"level_name": "L1", "x": 0, "y": 0, "yaw": 0}},
            {"name": "r1", "battery_percent": 90.0, "mode": {"mode": 1},
             "location": {"level_name": "L2", "x": 0, "y": 0, "yaw": 0}},
        ]
    });

    let canonical = fleet_to_canonical(&raw).unwrap();
    let robots = canonical["robots"].as_object().unwrap();
    assert_eq!(robots.len(), 1);
    assert_eq!(canonical["robots"]["r1"]["status"], json!("charging"));
    assert_eq!(canonical["robots"]["r1"]["location"]["map"], json!("L2"));
}

#[test]
fn canonical_fleet_passes_through_unchanged() {
    let canonical = json!({
        "name": "fleet_a",
        "robots": {
            "r1": {"name": "r1", "battery": 0.5, "status": "idle",
                   "location": {"map": "L1", "x": 0.0, "y": 0.0, "yaw": 0.0}}
        }
    });

    assert_eq!(fleet_to_canonical(&canonical).unwrap(), canonical);
}

#[test]
fn unknown_mode_code_fails_whole_fleet_record() {
    let raw = json!({
        "robots": [{"name": "r1", "mode": {"mode": 7},
                    "location": {"level_name": "L1", "x": 0, "y": 0, "yaw": 0}}]
    });
    assert_eq!(
        fleet_to_canonical(&raw),
        Err(NormalizeError::UnknownStatusCode(7))
    );
}

#[test]
fn canonical_round_trips_through_raw() {
    let canonical = json!({
        "name": "fleet_a",
        "robots": {
            "r1": {
                "name": "r1",
                "task_id": "t1",
                "battery": 0.87,
                "status": "moving",
                "location": {"map": "L1", "x": 1.0, "y": 2.0, "yaw": 0.5},
                "unix_millis_time": 1700000000250i64
            }
        }
    });

    let raw = fleet_to_raw(&canonical).unwrap();
    assert_eq!(raw["robots"][0]["battery_percent"], json!(87.0));
    assert_eq!(raw["robots"][0]["mode"]["mode"], json!(2));
    assert_eq!(raw["robots"][0]["location"]["level_name"], json!("L1"));
    assert_eq!(
        raw["robots"][0]["location"]["t"],
        json!({"sec": 1700000000i64, "nanosec": 250_000_000})
    );

    let round = fleet_to_canonical(&raw).unwrap();
    let orig = canonical["robots"]["r1"].as_object().unwrap();
    let back = round["robots"]["r1"].as_object().unwrap();
    assert_eq!(back["name"], orig["name"]);
    assert_eq!(back["status"], orig["status"]);
    assert_eq!(back["location"], orig["location"]);
    assert_eq!(back["unix_millis_time"], orig["unix_millis_time"]);
    let battery = back["battery"].as_f64().unwrap();
    assert!((battery - 0.87).abs() <= 1e-6);
}

#[test]
fn battery_is_clamped_on_both_conversions() {
    let raw = json!({
        "robots": [{"name": "r1", "battery_percent": 130.0, "mode": {"mode": 0},
                    "location": {"level_name": "L1", "x": 0, "y": 0, "yaw": 0}}]
    });
    let canonical = fleet_to_canonical(&raw).unwrap();
    assert_eq!(canonical["robots"]["r1"]["battery"], json!(1.0));

    let over = json!({
        "robots": {"r1": {"name": "r1", "battery": 1.2, "status": "idle",
                          "location": {"map": "L1", "x": 0, "y": 0, "yaw": 0}}}
    });
    let raw = fleet_to_raw(&over).unwrap();
    assert_eq!(raw["robots"][0]["battery_percent"], json!(100.0));
}

#[test]
fn fleet_without_robots_passes_through() {
    let fleet = json!({"name": "fleet_a"});
    assert_eq!(fleet_to_canonical(&fleet).unwrap(), fleet);
    assert_eq!(fleet_to_raw(&fleet).unwrap(), fleet);
}
