use crate::entity::EventRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

pub mod images;
pub mod session;
pub mod store;


/// `_metadata` block of a capture file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub description: String,
    pub capture_start: DateTime<Utc>,
    pub capture_end: DateTime<Utc>,
    pub total_messages: u64,
    pub data_types: Vec<String>,

    /// Sibling directory holding binary assets (building-map images), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub captured_images: Vec<String>,
}

/// A persisted capture session.
///
/// `latest_states[type][id]` always equals the payload of the most recent
/// record for that id in `history[type]`; the table is a derived fast path,
/// never independent state. History/latest keys are kept as wire strings so
/// files written by other tooling (with type names this build does not know)
/// still load; unknown types are skipped at replay time, not at load time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptureFile {
    #[serde(rename = "_metadata")]
    pub metadata: CaptureMetadata,
    pub history: BTreeMap<String, Vec<EventRecord>>,
    pub latest_states: BTreeMap<String, BTreeMap<String, Value>>,
    /// Denormalized projection of `latest_states`, usable as a replay seed.
    pub sample_format: Value,
}

impl CaptureFile {
    /// Save as pretty-printed JSON.
    ///
    /// Atomic write: serialize to a .tmp file, fsync, then rename, so a
    /// partially written file is never observed under the final name.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize capture data to JSON")?;

        let tmp_path = path.with_extension("tmp");

        {
            let mut tmp_file =
                File::create(&tmp_path).context("Failed to create temporary capture file")?;
            tmp_file
                .write_all(json.as_bytes())
                .context("Failed to write capture data")?;
            tmp_file
                .sync_all()
                .context("Failed to sync capture file to disk")?;
        }

        fs::rename(&tmp_path, path).context("Failed to rename temporary capture file")?;

        Ok(())
    }

    /// Load a capture file.
    ///
    /// `.json.gz` archives (operator-compressed old captures) are decompressed
    /// transparently. A missing or malformed `_metadata` block is a structural
    /// error: the whole load fails before any replay can begin.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open capture file {}", path.display()))?;

        let is_compressed = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == "gz")
            .unwrap_or(false);

        let mut json = String::new();
        if is_compressed {
            GzDecoder::new(file)
                .read_to_string(&mut json)
                .context("Failed to decompress capture file")?;
        } else {
            let mut file = file;
            file.read_to_string(&mut json)
                .context("Failed to read capture file")?;
        }

        let capture: CaptureFile = serde_json::from_str(&json)
            .context("Capture file is corrupt or missing required _metadata")?;

        Ok(capture)
    }

    /// Total number of records across all per-type histories.
    pub fn history_len(&self) -> usize {
        self.history.values().map(Vec::len).sum()
    }

    /// Human-readable information block (metadata plus per-type counts).
    pub fn describe(&self) -> String {
        let mut out = String::new();
        out.push_str(&"=".repeat(60));
        out.push_str("\n  Capture file info\n");
        out.push_str(&"=".repeat(60));
        out.push('\n');
        out.push_str(&format!("  Capture start: {}\n", self.metadata.capture_start));
        out.push_str(&format!("  Capture end:   {}\n", self.metadata.capture_end));
        out.push_str(&format!("  Total messages: {}\n", self.metadata.total_messages));
        out.push_str(&format!(
            "  Data types: {}\n",
            self.metadata.data_types.join(", ")
        ));
        out.push_str(&"-".repeat(60));
        out.push_str("\n  [latest states]\n");
        for (data_type, items) in &self.latest_states {
            out.push_str(&format!("    {}: {} entities\n", data_type, items.len()));
        }
        out.push_str("  [history]\n");
        for (data_type, entries) in &self.history {
            out.push_str(&format!("    {}: {} messages\n", data_type, entries.len()));
        }
        out.push_str(&"=".repeat(60));
        out
    }
}

/// Build the `sample_format` projection from a latest-state table.
///
/// The projection denormalizes the keyed tables into the flat lists the
/// seeding tooling expects; task states are joined with their logs by task id.
pub(crate) fn sample_format(
    latest_states: &BTreeMap<String, BTreeMap<String, Value>>,
) -> Value {
    let mut sample = Map::new();

    if let Some(maps) = latest_states.get("building_map") {
        if let Some(first) = maps.values().next() {
            sample.insert("building_map".to_string(), first.clone());
        }
    }

    if let Some(fleets) = latest_states.get("fleet_state") {
        sample.insert(
            "fleets".to_string(),
            Value::Array(fleets.values().cloned().collect()),
        );
    }

    if let Some(tasks) = latest_states.get("task_state") {
        let logs = latest_states.get("task_log");
        let mut entries = Vec::with_capacity(tasks.len());
        for (task_id, state) in tasks {
            let mut entry = Map::new();
            entry.insert("state".to_string(), state.clone());
            if let Some(log) = logs.and_then(|l| l.get(task_id)) {
                entry.insert("log".to_string(), log.clone());
            }
            entries.push(Value::Object(entry));
        }
        sample.insert("tasks".to_string(), Value::Array(entries));
    }

    for (data_type, plural) in [
        ("door_state", "doors"),
        ("lift_state", "lifts"),
        ("dispenser_state", "dispensers"),
        ("ingestor_state", "ingestors"),
        ("beacon_state", "beacons"),
    ] {
        if let Some(items) = latest_states.get(data_type) {
            sample.insert(
                plural.to_string(),
                Value::Array(items.values().cloned().collect()),
            );
        }
    }

    json!(sample)
}
