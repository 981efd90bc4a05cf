//! Event handler seam.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::events::types::LedgerEvent;

/// A handler refused or failed to process an event.
///
/// The subscriber stops advancing at that event and redelivers it on the next pass.
#[derive(Debug, Clone, Error)]
#[error("Handler error: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Consumer of a subscription's events.
///
/// Delivery is at-least-once; implementations must tolerate redelivery of an
/// event with the same (tx hash, log index).
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &LedgerEvent) -> Result<(), HandlerError>;
}

/// Forwards events into a bounded channel. A full channel applies backpressure.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::Sender<LedgerEvent>,
}

impl ChannelHandler {
    pub fn new(tx: mpsc::Sender<LedgerEvent>) -> Self {
        Self { tx }
    }

    /// Handler plus the receiving end of a channel with `capacity` slots.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LedgerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventHandler for ChannelHandler {
    async fn handle(&self, event: &LedgerEvent) -> Result<(), HandlerError> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| HandlerError::new("event receiver dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, TxHash};

    fn event() -> LedgerEvent {
        LedgerEvent {
            contract: "AidDistribution".to_string(),
            network: "local".to_string(),
            event_name: "DonationMade".to_string(),
            block_number: 1,
            log_index: 0,
            tx_hash: TxHash::ZERO,
            topics: Vec::new(),
            data: Bytes::new(),
            decoded: None,
        }
    }

    #[tokio::test]
    async fn test_channel_handler_forwards() {
        let (handler, mut rx) = ChannelHandler::channel(4);
        handler.handle(&event()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().block_number, 1);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_an_error() {
        let (handler, rx) = ChannelHandler::channel(1);
        drop(rx);
        assert!(handler.handle(&event()).await.is_err());
    }
}
