use crate::capture::CaptureFile;
use crate::entity::EntityType;
use crate::normalize;
use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

pub mod sink;
pub mod timeline;


pub use sink::{ChannelSink, InjectionRejected, NatsSink, ReplaySink};
use timeline::{build_timeline, scaled_delay, TimelineEntry};

/// How a capture file is re-injected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplayMode {
    /// One message per entity, final state only, no timing.
    #[default]
    LatestOnly,
    /// Full history in timestamp order, preserving scaled relative timing.
    Chronological,
}

impl std::str::FromStr for ReplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest-only" => Ok(ReplayMode::LatestOnly),
            "chronological" => Ok(ReplayMode::Chronological),
            other => Err(format!(
                "unknown replay mode '{}', expected 'latest-only' or 'chronological'",
                other
            )),
        }
    }
}

/// Configuration-level replay failure, reported before any submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayError {
    /// The speed multiplier must be a positive real.
    InvalidSpeed(f64),
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::InvalidSpeed(speed) => {
                write!(f, "speed multiplier must be > 0, got {}", speed)
            }
        }
    }
}

impl std::error::Error for ReplayError {}

/// Per-type outcome counters for one replay invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TypeReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// What a replay did, per type, so partial failures are observable without
/// digging through logs.
#[derive(Clone, Debug, Default)]
pub struct ReplayReport {
    pub per_type: BTreeMap<String, TypeReport>,
    pub cancelled: bool,
}

impl ReplayReport {
    fn entry(&mut self, type_name: &str) -> &mut TypeReport {
        self.per_type.entry(type_name.to_string()).or_default()
    }

    pub fn total_sent(&self) -> usize {
        self.per_type.values().map(|t| t.sent).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.per_type.values().map(|t| t.failed).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.per_type.values().map(|t| t.skipped).sum()
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "replay {}: {} sent, {} failed, {} skipped",
            if self.cancelled { "cancelled" } else { "complete" },
            self.total_sent(),
            self.total_failed(),
            self.total_skipped()
        )?;
        for (type_name, counts) in &self.per_type {
            writeln!(
                f,
                "  {}: {} sent, {} failed, {} skipped",
                type_name, counts.sent, counts.failed, counts.skipped
            )?;
        }
        Ok(())
    }
}

/// Cancels a running replay. Cooperative: takes effect at the next record
/// boundary, and interrupts an in-progress inter-record wait.
#[derive(Clone)]
pub struct ReplayHandle {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ReplayHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// Drives injection of a loaded capture file into a live-service sink.
///
/// Conceptually single-threaded: one timeline, one cursor, sequential
/// submissions, each awaited before the cursor advances. Already-submitted
/// records stay applied when the replay is cancelled.
pub struct ReplayScheduler<S: ReplaySink> {
    file: CaptureFile,
    sink: S,
    speed_multiplier: f64,
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl<S: ReplaySink> ReplayScheduler<S> {
    pub fn new(file: CaptureFile, sink: S) -> (Self, ReplayHandle) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let handle = ReplayHandle {
            cancelled: cancelled.clone(),
            notify: notify.clone(),
        };
        (
            Self {
                file,
                sink,
                speed_multiplier: 1.0,
                cancelled,
                notify,
            },
            handle,
        )
    }

    pub fn with_speed(mut self, speed_multiplier: f64) -> Self {
        self.speed_multiplier = speed_multiplier;
        self
    }

    /// Run the replay to completion (or cancellation).
    ///
    /// A non-positive speed multiplier fails before any submission; a
    /// rejected record is counted and replay continues with the next one.
    pub async fn run(self, mode: ReplayMode) -> Result<ReplayReport> {
        // Written as a negated comparison so NaN is rejected too.
        if !(self.speed_multiplier > 0.0) {
            return Err(ReplayError::InvalidSpeed(self.speed_multiplier).into());
        }

        let report = match mode {
            ReplayMode::LatestOnly => self.inject_latest().await,
            ReplayMode::Chronological => self.replay_history().await,
        };

        info!(
            sent = report.total_sent(),
            failed = report.total_failed(),
            skipped = report.total_skipped(),
            cancelled = report.cancelled,
            "replay finished"
        );
        Ok(report)
    }

    /// Latest-state injection: one message per entity, order unspecified, no
    /// timing beyond sink backpressure.
    async fn inject_latest(&self) -> ReplayReport {
        let mut report = ReplayReport::default();

        for (type_name, entities) in &self.file.latest_states {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let entity_type = match EntityType::from_str_name(type_name) {
                Some(t) => t,
                None => {
                    warn!(type_name = %type_name, "unknown entity type in capture file, skipping");
                    report.entry(type_name).skipped += entities.len();
                    continue;
                }
            };

            // Building maps have no ingestion message; they are seeded out of
            // band through the storage layer.
            let kind = match entity_type.update_kind() {
                Some(kind) => kind,
                None => {
                    warn!(type_name = %type_name, "no ingestion message for type, skipping");
                    report.entry(type_name).skipped += entities.len();
                    continue;
                }
            };

            for (id, payload) in entities {
                if self.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                match self.submit_record(entity_type, kind, payload).await {
                    Ok(()) => {
                        info!(kind = %kind, id = %id, "injected latest state");
                        report.entry(type_name).sent += 1;
                    }
                    Err(reason) => {
                        warn!(kind = %kind, id = %id, error = %reason, "injection failed");
                        report.entry(type_name).failed += 1;
                    }
                }
            }
        }

        report
    }

    /// Chronological replay: merged timeline, scaled inter-record waits.
    async fn replay_history(&self) -> ReplayReport {
        let mut report = ReplayReport::default();

        let (entries, unknown) = build_timeline(&self.file.history);
        for (type_name, count) in unknown {
            warn!(type_name = %type_name, count, "unknown entity type in history, skipping");
            report.entry(&type_name).skipped += count;
        }

        info!(
            records = entries.len(),
            speed = self.speed_multiplier,
            "replaying history"
        );

        let mut prev_timestamp = None;
        let total = entries.len();

        for (i, entry) in entries.iter().enumerate() {
            if let Some(prev) = prev_timestamp {
                let delay = scaled_delay(prev, entry.timestamp, self.speed_multiplier);
                self.interruptible_wait(delay).await;
            }
            if self.is_cancelled() {
                info!(submitted = i, "replay cancelled");
                report.cancelled = true;
                break;
            }
            prev_timestamp = Some(entry.timestamp);

            let type_name = entry.entity_type.as_str();
            let kind = match entry.entity_type.update_kind() {
                Some(kind) => kind,
                None => {
                    report.entry(type_name).skipped += 1;
                    continue;
                }
            };

            match self.submit_record(entry.entity_type, kind, &entry.data).await {
                Ok(()) => {
                    report.entry(type_name).sent += 1;
                    self.log_progress(i, total, entry, kind);
                }
                Err(reason) => {
                    warn!(kind = %kind, error = %reason, "injection failed, continuing");
                    report.entry(type_name).failed += 1;
                }
            }
        }

        report
    }

    /// Translate (fleet payloads to canonical form) and submit one record.
    /// Both conversion failures and sink rejections are per-record errors.
    async fn submit_record(
        &self,
        entity_type: EntityType,
        kind: &'static str,
        payload: &Value,
    ) -> Result<(), String> {
        let payload = if entity_type == EntityType::FleetState {
            normalize::fleet_to_canonical(payload).map_err(|e| e.to_string())?
        } else {
            payload.clone()
        };

        self.sink
            .submit(kind, payload)
            .await
            .map_err(|e| e.to_string())
    }

    /// First 10 submissions are logged individually, then every 100th.
    fn log_progress(&self, i: usize, total: usize, entry: &TimelineEntry, kind: &'static str) {
        if i < 10 {
            let id = entry
                .entity_type
                .resolve_key(&entry.data)
                .unwrap_or_else(|_| "unknown".to_string());
            info!(n = i + 1, kind = %kind, id = %id, "sent");
        } else if (i + 1) % 100 == 0 || i + 1 == total {
            info!(progress = format!("{}/{}", i + 1, total), "replaying");
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `delay`, waking early on cancellation so cancel latency is
    /// bounded by one inter-record interval even in very slow replays.
    async fn interruptible_wait(&self, delay: Duration) {
        if delay.is_zero() || self.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.notify.notified() => {}
        }
    }
}
