use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fmt;
use tracing::debug;

/// The live service refused one injected record (validation failure on its
/// side). Replay records the rejection and continues with the next record.
#[derive(Debug, Clone)]
pub struct InjectionRejected {
    pub kind: &'static str,
    pub reason: String,
}

impl fmt::Display for InjectionRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "live service rejected {}: {}", self.kind, self.reason)
    }
}

impl std::error::Error for InjectionRejected {}

/// The live service's ingestion interface as seen by replay: one tagged
/// `(kind, canonical payload)` message at a time. Submission is awaited
/// before the cursor advances so arrival order matches timeline order.
pub trait ReplaySink {
    fn submit(
        &self,
        kind: &'static str,
        payload: Value,
    ) -> impl std::future::Future<Output = Result<(), InjectionRejected>> + Send;
}

/// Sink that publishes ingestion messages to the service's intake subject
/// over NATS (`{prefix}.ingest.{kind}`, payload `{"type": ..., "data": ...}`,
/// the same envelope the internal socket channel carries).
#[derive(Clone)]
pub struct NatsSink {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsSink {
    pub async fn connect(url: &str, topic_prefix: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", url))?;
        Ok(Self {
            client,
            subject_prefix: format!("{}.ingest", topic_prefix),
        })
    }

    /// Wait until published messages have been flushed to the server.
    pub async fn flush(&self) -> Result<()> {
        self.client.flush().await.context("Failed to flush NATS client")
    }
}

impl ReplaySink for NatsSink {
    async fn submit(&self, kind: &'static str, payload: Value) -> Result<(), InjectionRejected> {
        let subject = format!("{}.{}", self.subject_prefix, kind);
        let body = serde_json::to_vec(&json!({ "type": kind, "data": payload })).map_err(|e| {
            InjectionRejected {
                kind,
                reason: format!("payload not serializable: {}", e),
            }
        })?;

        debug!(subject = %subject, "injecting record");

        self.client
            .publish(subject, body.into())
            .await
            .map_err(|e| InjectionRejected {
                kind,
                reason: e.to_string(),
            })
    }
}

/// In-process sink for embedding the engine in the service itself (and for
/// tests): forwards messages over an unbounded channel and never rejects.
#[derive(Clone)]
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<(&'static str, Value)>,
}

impl ChannelSink {
    pub fn new() -> (
        Self,
        tokio::sync::mpsc::UnboundedReceiver<(&'static str, Value)>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ReplaySink for ChannelSink {
    async fn submit(&self, kind: &'static str, payload: Value) -> Result<(), InjectionRejected> {
        self.tx.send((kind, payload)).map_err(|_| InjectionRejected {
            kind,
            reason: "ingestion channel closed".to_string(),
        })
    }
}
