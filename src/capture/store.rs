use crate::capture::{sample_format, CaptureFile, CaptureMetadata};
use crate::entity::{EntityType, EventRecord, KeyError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// Per-type accumulator: full ordered history plus the derived latest-state
/// table. Lives inside one `DashMap` entry, so all mutation of a type is
/// serialized by its shard lock while different types update in parallel.
#[derive(Default)]
struct TypeBucket {
    history: Vec<EventRecord>,
    latest: HashMap<String, Value>,
}

/// In-memory accumulator for one capture session.
///
/// `ingest` is the only mutation point. Producers call it fire-and-forget
/// from independent source tasks; it never performs I/O and never blocks on a
/// consumer. Memory growth is bounded only by session duration.
pub struct CaptureStore {
    buckets: DashMap<EntityType, TypeBucket>,
    total_messages: AtomicU64,
    start_time: DateTime<Utc>,
    /// Set once when the session stops; late-arriving events are dropped so
    /// `snapshot` sees a consistent cut.
    stopped: AtomicBool,
}

/// Point-in-time counters, used for summaries and the stats surface.
#[derive(Clone, Debug)]
pub struct CaptureStats {
    pub start_time: DateTime<Utc>,
    pub message_count: u64,
    /// type → (message count, unique entity count)
    pub per_type: BTreeMap<EntityType, (usize, usize)>,
}

impl CaptureStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            total_messages: AtomicU64::new(0),
            start_time: Utc::now(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn message_count(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    /// Append a record to its type's history and overwrite the latest-state
    /// entry for its key.
    ///
    /// A payload whose identity field cannot be resolved is rejected without
    /// being stored; storing it would leave a history record with no
    /// latest-state counterpart and break the derivability invariant.
    pub fn ingest(&self, entity_type: EntityType, record: EventRecord) -> Result<(), KeyError> {
        if self.stopped.load(Ordering::Acquire) {
            return Ok(());
        }

        let key = entity_type.resolve_key(&record.data)?;

        {
            let mut bucket = self.buckets.entry(entity_type).or_default();
            bucket.latest.insert(key.clone(), record.data.clone());
            bucket.history.push(record);
        }

        let count = self.total_messages.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(n = count, entity_type = %entity_type, key = %key, "captured");

        Ok(())
    }

    /// Stop accepting events. Idempotent; returns whether this call won.
    pub fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::AcqRel)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CaptureStats {
        let mut per_type = BTreeMap::new();
        for entry in self.buckets.iter() {
            per_type.insert(*entry.key(), (entry.history.len(), entry.latest.len()));
        }
        CaptureStats {
            start_time: self.start_time,
            message_count: self.message_count(),
            per_type,
        }
    }

    /// Latest-state payloads for one type, keyed by entity id.
    pub fn latest_states(&self, entity_type: EntityType) -> BTreeMap<String, Value> {
        self.buckets
            .get(&entity_type)
            .map(|b| {
                b.latest
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Produce the serializable capture aggregate.
    ///
    /// Callers must `stop()` the store first; with ingestion fenced off the
    /// per-bucket reads together form a consistent point-in-time cut.
    pub fn snapshot(&self, description: &str, end_time: DateTime<Utc>) -> CaptureFile {
        let mut history: BTreeMap<String, Vec<EventRecord>> = BTreeMap::new();
        let mut latest_states: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();

        for entry in self.buckets.iter() {
            let name = entry.key().as_str().to_string();
            history.insert(name.clone(), entry.history.clone());
            latest_states.insert(
                name,
                entry
                    .latest
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            );
        }

        let sample = sample_format(&latest_states);

        CaptureFile {
            metadata: CaptureMetadata {
                description: description.to_string(),
                capture_start: self.start_time,
                capture_end: end_time,
                total_messages: self.message_count(),
                data_types: history.keys().cloned().collect(),
                images_dir: None,
                captured_images: Vec::new(),
            },
            history,
            latest_states,
            sample_format: sample,
        }
    }
}

impl Default for CaptureStore {
    fn default() -> Self {
        Self::new()
    }
}
