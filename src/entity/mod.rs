use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[cfg(test)]
mod tests;

/// The closed set of entity kinds accepted from the middleware.
///
/// Every kind carries its own payload shape and its own identity-field rule;
/// anything outside this set is rejected at the source boundary rather than
/// silently dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    DoorState,
    LiftState,
    DispenserState,
    IngestorState,
    FleetState,
    FleetLog,
    TaskState,
    TaskLog,
    BeaconState,
    BuildingMap,
}

impl EntityType {
    /// All kinds, in a fixed order (used for deterministic summaries).
    pub const ALL: [EntityType; 10] = [
        EntityType::DoorState,
        EntityType::LiftState,
        EntityType::DispenserState,
        EntityType::IngestorState,
        EntityType::FleetState,
        EntityType::FleetLog,
        EntityType::TaskState,
        EntityType::TaskLog,
        EntityType::BeaconState,
        EntityType::BuildingMap,
    ];

    /// Wire name used in capture files (`history` / `latest_states` keys).
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::DoorState => "door_state",
            EntityType::LiftState => "lift_state",
            EntityType::DispenserState => "dispenser_state",
            EntityType::IngestorState => "ingestor_state",
            EntityType::FleetState => "fleet_state",
            EntityType::FleetLog => "fleet_log",
            EntityType::TaskState => "task_state",
            EntityType::TaskLog => "task_log",
            EntityType::BeaconState => "beacon_state",
            EntityType::BuildingMap => "building_map",
        }
    }

    /// Parse a capture-file type name.
    pub fn from_str_name(name: &str) -> Option<EntityType> {
        EntityType::ALL.iter().copied().find(|t| t.as_str() == name)
    }

    /// Message kind on the live-service ingestion interface, if the type has
    /// one. Building maps are only accepted through the topic feed and have no
    /// update message.
    pub fn update_kind(&self) -> Option<&'static str> {
        match self {
            EntityType::DoorState => Some("door_state_update"),
            EntityType::LiftState => Some("lift_state_update"),
            EntityType::DispenserState => Some("dispenser_state_update"),
            EntityType::IngestorState => Some("ingestor_state_update"),
            EntityType::FleetState => Some("fleet_state_update"),
            EntityType::FleetLog => Some("fleet_log_update"),
            EntityType::TaskState => Some("task_state_update"),
            EntityType::TaskLog => Some("task_log_update"),
            EntityType::BeaconState => Some("beacon_state_update"),
            EntityType::BuildingMap => None,
        }
    }

    /// Parse an ingestion-interface message kind.
    pub fn from_update_kind(kind: &str) -> Option<EntityType> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|t| t.update_kind() == Some(kind))
    }

    /// Name of the payload field that identifies an entity of this type.
    ///
    /// Dotted paths descend into nested objects (`booking.id` for tasks).
    fn key_field(&self) -> &'static str {
        match self {
            EntityType::DoorState => "door_name",
            EntityType::LiftState => "lift_name",
            EntityType::DispenserState | EntityType::IngestorState => "guid",
            EntityType::FleetState | EntityType::FleetLog => "name",
            EntityType::TaskState => "booking.id",
            EntityType::TaskLog => "task_id",
            EntityType::BeaconState => "id",
            EntityType::BuildingMap => "name",
        }
    }

    /// Derive the entity key for a payload of this type.
    ///
    /// Within one type the key is unique: re-use always means "update", so a
    /// payload whose identity field is missing or empty cannot be stored
    /// without corrupting the dedup invariant and is rejected here.
    pub fn resolve_key(&self, payload: &Value) -> Result<String, KeyError> {
        let field = self.key_field();

        let mut current = payload;
        for part in field.split('.') {
            current = match current.get(part) {
                Some(v) => v,
                None => {
                    return Err(KeyError::Unresolvable {
                        entity_type: *self,
                        field,
                    })
                }
            };
        }

        match current.as_str() {
            Some(s) if !s.is_empty() => Ok(s.to_string()),
            _ => Err(KeyError::Unresolvable {
                entity_type: *self,
                field,
            }),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which channel an event arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Middleware publish-subscribe topics (doors, lifts, maps, ...).
    TopicFeed,
    /// The service's bidirectional internal socket (fleets, tasks, logs).
    SocketFeed,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::TopicFeed => f.write_str("topic_feed"),
            EventSource::SocketFeed => f.write_str("socket_feed"),
        }
    }
}

/// One captured event, immutable once appended to a type's history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    /// Arrival time (append order within a type equals chronological order).
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub data: Value,
}

impl EventRecord {
    pub fn new(source: EventSource, data: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            source,
            data,
        }
    }
}

/// Entity-key resolution failure.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyError {
    /// The payload's identity field is absent, empty, or not a string.
    Unresolvable {
        entity_type: EntityType,
        field: &'static str,
    },
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Unresolvable { entity_type, field } => write!(
                f,
                "cannot resolve entity key for '{}': field '{}' is missing or empty",
                entity_type, field
            ),
        }
    }
}

impl std::error::Error for KeyError {}
