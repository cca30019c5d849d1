use crate::capture::images;
use crate::capture::store::{CaptureStats, CaptureStore};
use crate::config::CaptureConfig;
use crate::entity::{EntityType, EventRecord, EventSource};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};


const CAPTURE_DESCRIPTION: &str = "Live data captured from the fleet monitoring service";

/// Lifecycle of a capture session: activation starts it, a duration bound or
/// an explicit stop signal ends it. `Stopped` is terminal; a new session
/// requires a fresh controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Stopped,
}

/// Owns one capture session: the store, the stop condition, the image
/// manifest and the serialization step.
pub struct CaptureSession {
    config: CaptureConfig,
    store: CaptureStore,
    /// filename → cache path of building-map images seen this session
    images: Mutex<BTreeMap<String, PathBuf>>,
    stop_tx: watch::Sender<bool>,
    /// Held so the channel stays open and a stop before `run` is not lost.
    stop_rx: watch::Receiver<bool>,
}

impl CaptureSession {
    /// Activate a new session (Idle → Active). Creates the output directory
    /// up front so a full disk surfaces now, not at save time.
    pub fn activate(config: CaptureConfig) -> Result<Arc<Self>> {
        fs::create_dir_all(&config.output_directory)
            .context("Failed to create capture output directory")?;

        if config.duration_seconds > 0 {
            info!(
                output = %config.output_directory.display(),
                duration_seconds = config.duration_seconds,
                "capture session active"
            );
        } else {
            info!(
                output = %config.output_directory.display(),
                "capture session active (unbounded)"
            );
        }

        let (stop_tx, stop_rx) = watch::channel(false);

        Ok(Arc::new(Self {
            config,
            store: CaptureStore::new(),
            images: Mutex::new(BTreeMap::new()),
            stop_tx,
            stop_rx,
        }))
    }

    pub fn state(&self) -> SessionState {
        if self.store.is_stopped() {
            SessionState::Stopped
        } else {
            SessionState::Active
        }
    }

    pub fn stats(&self) -> CaptureStats {
        self.store.stats()
    }

    /// Record one inbound event. Fire-and-forget: malformed payloads are
    /// rejected here at the boundary (logged, not stored) and never fail the
    /// producer.
    pub fn record(&self, entity_type: EntityType, source: EventSource, data: Value) {
        if self.store.is_stopped() {
            return;
        }

        let data = if entity_type == EntityType::BuildingMap {
            // A poisoned manifest lock must not take down a producer.
            let mut manifest = self.images.lock().unwrap_or_else(|e| e.into_inner());
            images::capture_building_map_images(&data, &self.config.cache_directory, &mut manifest)
        } else {
            data
        };

        if let Err(e) = self.store.ingest(entity_type, EventRecord::new(source, data)) {
            warn!(entity_type = %entity_type, error = %e, "rejected event at capture boundary");
        }
    }

    /// Signal the session to stop. Safe to call from any task, more than once.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Run until the duration bound elapses (when bounded) or `stop` is
    /// called, then snapshot and save. Returns the capture file path, or
    /// `None` when nothing was captured.
    pub async fn run(&self) -> Result<Option<PathBuf>> {
        let mut stop_rx = self.stop_rx.clone();

        if self.config.duration_seconds > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.config.duration_seconds)) => {
                    info!(
                        duration_seconds = self.config.duration_seconds,
                        "capture duration reached, saving"
                    );
                }
                _ = stop_rx.wait_for(|stopped| *stopped) => {
                    info!("capture stop signal received, saving");
                }
            }
        } else {
            let _ = stop_rx.wait_for(|stopped| *stopped).await;
            info!("capture stop signal received, saving");
        }

        self.finish()
    }

    /// Stop ingestion, snapshot the store and write the capture file.
    ///
    /// At most one call wins; the duration timer and an explicit stop racing
    /// each other save once. The human-readable summary is printed even when
    /// the file write fails, before the failure is surfaced.
    pub fn finish(&self) -> Result<Option<PathBuf>> {
        if !self.store.stop() {
            return Ok(None);
        }
        let end_time = Utc::now();

        if self.store.message_count() == 0 {
            info!("no data captured");
            println!("{}", self.render_summary(end_time, None));
            return Ok(None);
        }

        let timestamp = self.store.start_time().format("%Y%m%d_%H%M%S");
        let file_stem = format!("captured_data_{}", timestamp);
        let output_file = self
            .config
            .output_directory
            .join(format!("{}.json", file_stem));

        let mut capture = self.store.snapshot(CAPTURE_DESCRIPTION, end_time);

        let manifest = self
            .images
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if !manifest.is_empty() {
            let images_dir = self
                .config
                .output_directory
                .join(format!("{}_images", file_stem));
            let copied = images::copy_captured_images(&manifest, &images_dir)?;
            capture.metadata.images_dir = Some(images_dir.display().to_string());
            capture.metadata.captured_images = copied;
        }

        let write_result = capture.save_to_file(&output_file);

        println!(
            "{}",
            self.render_summary(end_time, write_result.as_ref().ok().map(|_| output_file.as_path()))
        );

        write_result.context("Failed to write capture file")?;
        info!(path = %output_file.display(), "capture saved");

        Ok(Some(output_file))
    }

    /// Console summary: counts per type, unique entity lists, elapsed time.
    fn render_summary(&self, end_time: DateTime<Utc>, output_file: Option<&Path>) -> String {
        let stats = self.store.stats();
        let elapsed = (end_time - stats.start_time).num_milliseconds() as f64 / 1000.0;

        let mut out = String::new();
        let rule = "=".repeat(60);
        let thin = "-".repeat(60);

        out.push_str(&format!("\n{}\n  Capture session summary\n{}\n", rule, rule));
        out.push_str(&format!(
            "  Start: {}\n",
            stats.start_time.format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str(&format!("  End:   {}\n", end_time.format("%Y-%m-%d %H:%M:%S")));
        out.push_str(&format!(
            "  Elapsed: {:.1}s ({:.1}min)\n{}\n",
            elapsed,
            elapsed / 60.0,
            thin
        ));

        if stats.message_count == 0 {
            out.push_str(&format!("  No data captured.\n{}\n", rule));
            return out;
        }

        out.push_str(&format!("  Total messages: {}\n{}\n", stats.message_count, thin));
        out.push_str("  [messages per type]\n");
        for (entity_type, (count, unique)) in &stats.per_type {
            out.push_str(&format!(
                "    {}: {} ({} unique)\n",
                entity_type, count, unique
            ));
        }
        out.push_str(&format!("{}\n  [captured entities]\n", thin));
        out.push_str(&self.render_entity_lists());
        out.push_str(&thin);
        out.push('\n');
        if let Some(path) = output_file {
            out.push_str(&format!("  Saved to: {}\n", path.display()));
        }
        out.push_str(&rule);
        out.push('\n');
        out
    }

    fn render_entity_lists(&self) -> String {
        let mut out = String::new();

        let fleets = self.store.latest_states(EntityType::FleetState);
        for (fleet_name, fleet) in &fleets {
            let robots: Vec<String> = match fleet.get("robots") {
                Some(Value::Object(map)) => map.keys().cloned().collect(),
                Some(Value::Array(list)) => list
                    .iter()
                    .filter_map(|r| r.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            };
            out.push_str(&format!(
                "    Fleet '{}': {} robots ({})\n",
                fleet_name,
                robots.len(),
                preview(&robots, 5)
            ));
        }

        let tasks = self.store.latest_states(EntityType::TaskState);
        if !tasks.is_empty() {
            let ids: Vec<String> = tasks.keys().cloned().collect();
            out.push_str(&format!("    Task: {} ({})\n", ids.len(), preview(&ids, 3)));
        }

        for (entity_type, label) in [
            (EntityType::DoorState, "Door"),
            (EntityType::LiftState, "Lift"),
            (EntityType::DispenserState, "Dispenser"),
            (EntityType::IngestorState, "Ingestor"),
            (EntityType::BeaconState, "Beacon"),
        ] {
            let items = self.store.latest_states(entity_type);
            if !items.is_empty() {
                let keys: Vec<String> = items.keys().cloned().collect();
                out.push_str(&format!(
                    "    {}: {} ({})\n",
                    label,
                    keys.len(),
                    preview(&keys, 5)
                ));
            }
        }

        let maps = self.store.latest_states(EntityType::BuildingMap);
        if !maps.is_empty() {
            let names: Vec<String> = maps.keys().cloned().collect();
            out.push_str(&format!("    Building map: {}\n", names.join(", ")));
        }

        out
    }
}

/// First `limit` names, with a "+N more" tail.
fn preview(names: &[String], limit: usize) -> String {
    let shown: Vec<&str> = names.iter().take(limit).map(String::as_str).collect();
    if names.len() > limit {
        format!("{} +{} more", shown.join(", "), names.len() - limit)
    } else {
        shown.join(", ")
    }
}
