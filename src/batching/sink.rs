//! Where flushed batches go.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::BatchPayload;

#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn deliver(&self, payload: &BatchPayload) -> Result<()>;
}

/// Logs a summary of every delivery and the full JSON at debug level.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl BatchSink for LogSink {
    async fn deliver(&self, payload: &BatchPayload) -> Result<()> {
        log::info!(
            "delivering {} batch(es), {} entries",
            payload.batches.len(),
            payload.entry_count()
        );
        if log::log_enabled!(log::Level::Debug) {
            let json = serde_json::to_string(payload).context("failed to encode batch payload")?;
            log::debug!("batch payload: {json}");
        }
        Ok(())
    }
}

/// Hands payloads to an in-process consumer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<BatchPayload>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BatchPayload>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl BatchSink for ChannelSink {
    async fn deliver(&self, payload: &BatchPayload) -> Result<()> {
        self.tx
            .send(payload.clone())
            .await
            .context("batch consumer has gone away")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::types::{Batch, BatchEntry};

    #[tokio::test]
    async fn test_channel_sink_forwards_and_reports_closed_consumer() {
        let (sink, mut rx) = ChannelSink::new(4);
        let mut batch = Batch::new("W", "cs");
        batch.entries.push(BatchEntry { text: "a".into() });
        let payload = BatchPayload {
            batches: vec![batch],
        };

        sink.deliver(&payload).await.unwrap();
        assert_eq!(rx.recv().await, Some(payload.clone()));

        drop(rx);
        assert!(sink.deliver(&payload).await.is_err());
    }
}
