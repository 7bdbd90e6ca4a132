//! Downstream sinks for signal events.
//!
//! The engine hands each event to a sink once. Durability beyond that is the
//! sink's own concern.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use chokepoint_core::{SignalEvent, SignalSink};

/// Logs each event at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl SignalSink for LogSink {
    async fn deliver(&self, event: &SignalEvent) -> Result<()> {
        let hints: Vec<&str> = event.impact_hints.iter().map(|h| h.as_str()).collect();
        tracing::info!(
            chokepoint = %event.chokepoint,
            signal = %event.signal_type,
            timestamp = %event.timestamp,
            value = %event.trigger.value,
            impact = ?hints,
            "Signal event"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Appends each event as one JSON line.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SignalSink for JsonlSink {
    async fn deliver(&self, event: &SignalEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}

/// Forwards events into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SignalEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<SignalEvent>) -> Self {
        Self { tx }
    }

    /// Creates a sink and the receiving end of its channel.
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<SignalEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl SignalSink for ChannelSink {
    async fn deliver(&self, event: &SignalEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| anyhow::anyhow!("signal channel closed"))
    }

    fn name(&self) -> &str {
        "channel"
    }
}
