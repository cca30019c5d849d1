//! Capture-side source bindings.
//!
//! Two feeds exist: the middleware publish-subscribe topics (doors, lifts,
//! dispensers, ingestors, beacons, building maps) and the service's internal
//! socket channel (fleet/task states and logs, forwarded on the `_internal`
//! bridge subject). Each bound source runs as its own task and submits into
//! the session fire-and-forget; a slow or stopped session never stalls a
//! producer.

use crate::capture::session::CaptureSession;
use crate::config::NatsConfig;
use crate::entity::{EntityType, EventSource};
use anyhow::{Context, Result};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[cfg(test)]
mod tests;

/// One middleware state topic and the entity type it carries.
#[derive(Clone, Copy, Debug)]
pub struct TopicBinding {
    pub topic: &'static str,
    pub entity_type: EntityType,
}

/// The middleware state topics the capture engine listens to.
pub fn topic_bindings() -> [TopicBinding; 6] {
    [
        TopicBinding { topic: "door_states", entity_type: EntityType::DoorState },
        TopicBinding { topic: "lift_states", entity_type: EntityType::LiftState },
        TopicBinding { topic: "dispenser_states", entity_type: EntityType::DispenserState },
        TopicBinding { topic: "ingestor_states", entity_type: EntityType::IngestorState },
        TopicBinding { topic: "beacon_state", entity_type: EntityType::BeaconState },
        TopicBinding { topic: "map", entity_type: EntityType::BuildingMap },
    ]
}

/// NATS-backed topic feed: one subscriber task per bound subject.
pub struct TopicFeed {
    client: async_nats::Client,
    topic_prefix: String,
}

impl TopicFeed {
    pub async fn connect(config: &NatsConfig) -> Result<Self> {
        info!(url = %config.url, "connecting to middleware NATS");
        let client = async_nats::connect(&config.url)
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", config.url))?;
        Ok(Self {
            client,
            topic_prefix: config.topic_prefix.clone(),
        })
    }

    /// Subscribe every state topic plus the internal-socket bridge subject
    /// and spawn a drain task per subscription.
    pub async fn spawn_bindings(
        &self,
        session: Arc<CaptureSession>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let mut tasks = Vec::new();

        for binding in topic_bindings() {
            let subject = format!("{}.{}", self.topic_prefix, binding.topic);
            let mut subscriber = self
                .client
                .subscribe(subject.clone())
                .await
                .with_context(|| format!("Failed to subscribe to {}", subject))?;

            info!(subject = %subject, entity_type = %binding.entity_type, "topic feed bound");

            let session = session.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(msg) = subscriber.next().await {
                    match serde_json::from_slice::<Value>(&msg.payload) {
                        Ok(payload) => {
                            session.record(binding.entity_type, EventSource::TopicFeed, payload);
                        }
                        Err(e) => {
                            warn!(subject = %msg.subject, error = %e, "malformed topic payload, skipping");
                        }
                    }
                }
            }));
        }

        // Socket-channel traffic arrives pre-enveloped as {"type", "data"}.
        let subject = format!("{}._internal", self.topic_prefix);
        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe to {}", subject))?;

        info!(subject = %subject, "socket feed bound");

        let socket_feed = SocketFeed::new(session);
        tasks.push(tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<Value>(&msg.payload) {
                    Ok(envelope) => socket_feed.handle_message(&envelope),
                    Err(e) => {
                        warn!(subject = %msg.subject, error = %e, "malformed socket payload, skipping");
                    }
                }
            }
        }));

        Ok(tasks)
    }
}

/// Socket-channel binding. The service's internal socket route (or the
/// bridge subscriber above) hands each inbound `{"type", "data"}` envelope to
/// `handle_message`.
#[derive(Clone)]
pub struct SocketFeed {
    session: Arc<CaptureSession>,
}

impl SocketFeed {
    pub fn new(session: Arc<CaptureSession>) -> Self {
        Self { session }
    }

    /// Capture one socket-channel message. Unknown message kinds are logged
    /// loudly rather than silently dropped; a silent drop here would corrupt
    /// the dedup counts.
    pub fn handle_message(&self, msg: &Value) {
        let kind = match msg.get("type").and_then(Value::as_str) {
            Some(k) => k,
            None => {
                warn!("socket message missing 'type' field, skipping");
                return;
            }
        };

        let entity_type = match EntityType::from_update_kind(kind) {
            Some(t) => t,
            None => {
                warn!(kind = %kind, "unknown socket message kind, skipping");
                return;
            }
        };

        let data = match msg.get("data") {
            Some(d) => d.clone(),
            None => {
                warn!(kind = %kind, "socket message missing 'data' field, skipping");
                return;
            }
        };

        self.session
            .record(entity_type, EventSource::SocketFeed, data);
    }
}
