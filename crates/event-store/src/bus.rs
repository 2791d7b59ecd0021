//! Publish side of the event transport.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::EventRecord;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("Event bus transport error: {0}")]
    Transport(String),
}

/// Delivers committed records to subscribers.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, record: &EventRecord) -> Result<(), BusError>;
}

/// In-process bus backed by an unbounded channel. Records arrive at the
/// [`EventReceiver`] in publish order.
#[derive(Debug, Clone)]
pub struct ChannelEventBus {
    sender: mpsc::UnboundedSender<EventRecord>,
}

impl ChannelEventBus {
    pub fn channel() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, EventReceiver { receiver })
    }
}

#[async_trait]
impl EventBus for ChannelEventBus {
    async fn publish(&self, record: &EventRecord) -> Result<(), BusError> {
        self.sender
            .send(record.clone())
            .map_err(|_| BusError::Closed)
    }
}

/// Consuming end of a [`ChannelEventBus`].
#[derive(Debug)]
pub struct EventReceiver {
    receiver: mpsc::UnboundedReceiver<EventRecord>,
}

impl EventReceiver {
    /// Next record, or `None` once every bus handle is dropped.
    pub async fn recv(&mut self) -> Option<EventRecord> {
        self.receiver.recv().await
    }

    /// Next record if one is already queued.
    pub fn try_recv(&mut self) -> Option<EventRecord> {
        self.receiver.try_recv().ok()
    }
}

/// Bus that drops everything. For stores without subscribers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventBus;

#[async_trait]
impl EventBus for NoopEventBus {
    async fn publish(&self, _record: &EventRecord) -> Result<(), BusError> {
        Ok(())
    }
}
