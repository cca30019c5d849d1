use crate::entity::{EntityType, EventRecord};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// One record on the merged replay timeline.
#[derive(Clone, Debug)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub entity_type: EntityType,
    /// Position within the type's original history sequence.
    pub seq: usize,
    pub data: Value,
}

/// Merge all per-type histories into one timeline ordered by timestamp.
///
/// Tie-break is the original per-type sequence order, then the type name, so
/// the ordering is total and reproducible. History keys this build does not
/// recognize are returned separately; the caller skips them with a warning
/// instead of aborting the replay.
pub fn build_timeline(
    history: &BTreeMap<String, Vec<EventRecord>>,
) -> (Vec<TimelineEntry>, BTreeMap<String, usize>) {
    let mut entries = Vec::new();
    let mut unknown: BTreeMap<String, usize> = BTreeMap::new();

    for (name, records) in history {
        match EntityType::from_str_name(name) {
            Some(entity_type) => {
                for (seq, record) in records.iter().enumerate() {
                    entries.push(TimelineEntry {
                        timestamp: record.timestamp,
                        entity_type,
                        seq,
                        data: record.data.clone(),
                    });
                }
            }
            None => {
                unknown.insert(name.clone(), records.len());
            }
        }
    }

    entries.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.seq.cmp(&b.seq))
            .then(a.entity_type.as_str().cmp(b.entity_type.as_str()))
    });

    (entries, unknown)
}

/// Wait between two consecutive timeline records, scaled by the speed
/// multiplier. Out-of-order timestamps clamp to zero rather than panic, and a
/// single wait is capped at 5s so dead air in a capture cannot stall replay.
/// The cap is applied before `Duration` construction: a denormal multiplier
/// scales the gap to infinity, which `Duration::from_secs_f64` rejects.
pub fn scaled_delay(prev: DateTime<Utc>, next: DateTime<Utc>, speed_multiplier: f64) -> Duration {
    const MAX_DELAY: Duration = Duration::from_secs(5);

    let gap_ms = (next - prev).num_milliseconds();
    if gap_ms <= 0 {
        return Duration::ZERO;
    }

    let secs = gap_ms as f64 / 1000.0 / speed_multiplier;
    if !secs.is_finite() || secs >= MAX_DELAY.as_secs_f64() {
        return MAX_DELAY;
    }
    Duration::from_secs_f64(secs.max(0.0))
}
