//! Bidirectional conversion between the middleware's raw fleet/robot wire
//! shape and the service's canonical shape.
//!
//! Raw form: `robots` is an ordered list, floor name lives in a timestamped
//! pose (`location.level_name` + `location.t`), battery is a percentage and
//! robot status is a small integer mode code.
//!
//! Canonical form: `robots` is keyed by robot name, location carries a flat
//! `map` field, battery is a fraction in [0, 1], status is a string and time
//! is a single `unix_millis_time` count.
//!
//! All other entity types (doors, lifts, dispensers, ingestors, maps) share
//! one shape on both channels and pass through untouched.

use serde_json::{json, Map, Value};
use std::fmt;

#[cfg(test)]
mod tests;

/// Raw mode code → canonical status string. Fixed by the wire contract.
const STATUS_TABLE: [(i64, &str); 6] = [
    (0, "idle"),
    (1, "charging"),
    (2, "moving"),
    (3, "paused"),
    (4, "waiting"),
    (5, "emergency"),
];

/// Conversion failure.
///
/// An unmapped code or status means protocol drift between the middleware and
/// the service; defaulting silently would mask a version mismatch, so the
/// single record is rejected instead.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeError {
    UnknownStatusCode(i64),
    UnknownStatus(String),
    /// The named payload or sub-field is not the JSON object the wire
    /// contract requires.
    NotAnObject(&'static str),
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeError::UnknownStatusCode(code) => {
                write!(f, "unknown robot mode code {}", code)
            }
            NormalizeError::UnknownStatus(status) => {
                write!(f, "unknown robot status '{}'", status)
            }
            NormalizeError::NotAnObject(what) => {
                write!(f, "{} must be a JSON object", what)
            }
        }
    }
}

impl std::error::Error for NormalizeError {}

/// Map a raw robot mode code to a canonical status string.
pub fn status_from_mode(code: i64) -> Result<&'static str, NormalizeError> {
    STATUS_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| *s)
        .ok_or(NormalizeError::UnknownStatusCode(code))
}

/// Map a canonical status string back to its raw mode code.
pub fn mode_from_status(status: &str) -> Result<i64, NormalizeError> {
    STATUS_TABLE
        .iter()
        .find(|(_, s)| *s == status)
        .map(|(c, _)| *c)
        .ok_or_else(|| NormalizeError::UnknownStatus(status.to_string()))
}

/// Convert a raw fleet-state payload to canonical form.
///
/// Groups the raw robot list by name (last write per name wins on collision).
/// Payloads whose robots are already a canonical name-keyed map pass through
/// unchanged, so the conversion is safe to apply to mixed capture files.
pub fn fleet_to_canonical(raw: &Value) -> Result<Value, NormalizeError> {
    let fleet = raw
        .as_object()
        .ok_or(NormalizeError::NotAnObject("fleet state"))?;

    let mut out = fleet.clone();
    let robots = match fleet.get("robots") {
        Some(r) => r,
        None => return Ok(Value::Object(out)),
    };

    match robots {
        Value::Array(list) => {
            let mut by_name = Map::new();
            for robot in list {
                let obj = robot
                    .as_object()
                    .ok_or(NormalizeError::NotAnObject("robot state"))?;
                let name = match obj.get("name").and_then(Value::as_str) {
                    Some(n) => n.to_string(),
                    None => continue,
                };
                by_name.insert(name, robot_to_canonical(obj)?);
            }
            out.insert("robots".to_string(), Value::Object(by_name));
        }
        Value::Object(map) => {
            if robots_are_canonical(map) {
                return Ok(Value::Object(out));
            }
            let mut by_name = Map::new();
            for (name, robot) in map {
                let obj = robot
                    .as_object()
                    .ok_or(NormalizeError::NotAnObject("robot state"))?;
                by_name.insert(name.clone(), robot_to_canonical(obj)?);
            }
            out.insert("robots".to_string(), Value::Object(by_name));
        }
        _ => return Err(NormalizeError::NotAnObject("fleet robots")),
    }

    Ok(Value::Object(out))
}

/// Convert a canonical fleet-state payload back to the raw wire shape.
pub fn fleet_to_raw(canonical: &Value) -> Result<Value, NormalizeError> {
    let fleet = canonical
        .as_object()
        .ok_or(NormalizeError::NotAnObject("fleet state"))?;

    let mut out = fleet.clone();
    let robots = match fleet.get("robots").and_then(Value::as_object) {
        Some(r) => r,
        None => return Ok(Value::Object(out)),
    };

    let mut list = Vec::with_capacity(robots.len());
    for (name, robot) in robots {
        let obj = robot
            .as_object()
            .ok_or(NormalizeError::NotAnObject("robot state"))?;
        let mut raw = robot_to_raw(obj)?;
        // The keyed form is authoritative for the name.
        if let Some(m) = raw.as_object_mut() {
            m.insert("name".to_string(), Value::String(name.clone()));
        }
        list.push(raw);
    }
    out.insert("robots".to_string(), Value::Array(list));

    Ok(Value::Object(out))
}

/// A name-keyed robots map is canonical when its entries carry `location.map`.
fn robots_are_canonical(robots: &Map<String, Value>) -> bool {
    robots
        .values()
        .next()
        .and_then(|r| r.get("location"))
        .map(|loc| loc.get("map").is_some())
        .unwrap_or(false)
}

/// Convert one raw robot record to canonical form.
fn robot_to_canonical(robot: &Map<String, Value>) -> Result<Value, NormalizeError> {
    let mut out = Map::new();

    out.insert(
        "name".to_string(),
        robot.get("name").cloned().unwrap_or_else(|| json!("")),
    );
    out.insert(
        "task_id".to_string(),
        robot.get("task_id").cloned().unwrap_or_else(|| json!("")),
    );

    // battery_percent [0, 100] → battery [0, 1]; clamp absorbs rounding drift
    let percent = robot
        .get("battery_percent")
        .and_then(Value::as_f64)
        .unwrap_or(100.0);
    out.insert("battery".to_string(), json!((percent / 100.0).clamp(0.0, 1.0)));

    let location = robot.get("location").and_then(Value::as_object);
    let level_name = location
        .and_then(|loc| loc.get("level_name").or_else(|| loc.get("map")))
        .and_then(Value::as_str)
        .unwrap_or("");
    out.insert(
        "location".to_string(),
        json!({
            "map": level_name,
            "x": location.and_then(|l| l.get("x")).cloned().unwrap_or(json!(0.0)),
            "y": location.and_then(|l| l.get("y")).cloned().unwrap_or(json!(0.0)),
            "yaw": location.and_then(|l| l.get("yaw")).cloned().unwrap_or(json!(0.0)),
        }),
    );

    let mode_code = robot
        .get("mode")
        .and_then(|m| m.get("mode"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    out.insert("status".to_string(), json!(status_from_mode(mode_code)?));

    // Planned path comes only from the topic feed; keep it when present.
    if let Some(path) = robot.get("path") {
        out.insert("path".to_string(), path.clone());
    }

    // Canonical robots always carry these; raw ones usually omit them.
    out.insert(
        "commission".to_string(),
        robot.get("commission").cloned().unwrap_or_else(|| {
            json!({"direct_tasks": true, "dispatch_tasks": true, "idle_behavior": true})
        }),
    );
    out.insert(
        "mutex_groups".to_string(),
        robot
            .get("mutex_groups")
            .cloned()
            .unwrap_or_else(|| json!({"locked": [], "requesting": []})),
    );
    out.insert(
        "issues".to_string(),
        robot.get("issues").cloned().unwrap_or_else(|| json!([])),
    );

    // location.t {sec, nanosec} → unix_millis_time (exact)
    if let Some(t) = location.and_then(|l| l.get("t")).and_then(Value::as_object) {
        let sec = t.get("sec").and_then(Value::as_i64).unwrap_or(0);
        let nanosec = t.get("nanosec").and_then(Value::as_i64).unwrap_or(0);
        out.insert(
            "unix_millis_time".to_string(),
            json!(sec * 1000 + nanosec / 1_000_000),
        );
    } else if let Some(ms) = robot.get("unix_millis_time") {
        out.insert("unix_millis_time".to_string(), ms.clone());
    }

    Ok(Value::Object(out))
}

/// Convert one canonical robot record back to the raw wire shape.
///
/// Sub-millisecond precision was already truncated on the way in, so the
/// reconstructed `location.t` carries whole milliseconds only.
fn robot_to_raw(robot: &Map<String, Value>) -> Result<Value, NormalizeError> {
    let mut out = Map::new();

    out.insert(
        "name".to_string(),
        robot.get("name").cloned().unwrap_or_else(|| json!("")),
    );
    out.insert(
        "task_id".to_string(),
        robot.get("task_id").cloned().unwrap_or_else(|| json!("")),
    );

    // battery [0, 1] → battery_percent [0, 100], clamped
    let battery = robot
        .get("battery")
        .and_then(Value::as_f64)
        .unwrap_or(1.0);
    out.insert(
        "battery_percent".to_string(),
        json!((battery * 100.0).clamp(0.0, 100.0)),
    );

    let status = robot
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("idle");
    out.insert("mode".to_string(), json!({ "mode": mode_from_status(status)? }));

    let location = robot.get("location").and_then(Value::as_object);
    let mut raw_location = Map::new();
    raw_location.insert(
        "level_name".to_string(),
        location
            .and_then(|l| l.get("map"))
            .cloned()
            .unwrap_or(json!("")),
    );
    for field in ["x", "y", "yaw"] {
        raw_location.insert(
            field.to_string(),
            location
                .and_then(|l| l.get(field))
                .cloned()
                .unwrap_or(json!(0.0)),
        );
    }
    if let Some(ms) = robot.get("unix_millis_time").and_then(Value::as_i64) {
        raw_location.insert(
            "t".to_string(),
            json!({ "sec": ms / 1000, "nanosec": (ms % 1000) * 1_000_000 }),
        );
    }
    out.insert("location".to_string(), Value::Object(raw_location));

    if let Some(path) = robot.get("path") {
        out.insert("path".to_string(), path.clone());
    }
    for field in ["commission", "mutex_groups", "issues"] {
        if let Some(v) = robot.get(field) {
            out.insert(field.to_string(), v.clone());
        }
    }

    Ok(Value::Object(out))
}
