//! Output side of the subscriber.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// The consumer of payloads went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("payload sink closed")]
pub struct SinkClosed;

/// Ordered, possibly bounded destination for received payloads.
///
/// `enqueue` waits while the sink is full, which in turn stops the
/// subscriber from reading further events.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    async fn enqueue(&self, payload: Vec<u8>) -> Result<(), SinkClosed>;
}

#[async_trait]
impl PayloadSink for mpsc::Sender<Vec<u8>> {
    async fn enqueue(&self, payload: Vec<u8>) -> Result<(), SinkClosed> {
        self.send(payload).await.map_err(|_| SinkClosed)
    }
}

#[async_trait]
impl PayloadSink for mpsc::UnboundedSender<Vec<u8>> {
    async fn enqueue(&self, payload: Vec<u8>) -> Result<(), SinkClosed> {
        self.send(payload).map_err(|_| SinkClosed)
    }
}
