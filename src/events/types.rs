//! Event stream types.

use alloy::primitives::{Bytes, TxHash, B256};
use serde::Serialize;

use crate::blockchain::contract::AidEvent;
use crate::blockchain::types::ChainLog;

/// A contract event delivered to handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    pub contract: String,
    pub network: String,
    pub event_name: String,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: TxHash,
    pub topics: Vec<B256>,
    pub data: Bytes,
    /// Typed form, when the log decodes as one of the aid contract's events.
    pub decoded: Option<AidEvent>,
}

impl LedgerEvent {
    pub fn from_log(contract: &str, network: &str, event_name: &str, log: ChainLog) -> Self {
        let decoded = match AidEvent::decode(&log.topics, &log.data) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(
                    contract = %contract,
                    event = %event_name,
                    tx_hash = %log.tx_hash,
                    log_index = log.log_index,
                    error = %e,
                    "Log did not decode as a typed event"
                );
                None
            }
        };

        Self {
            contract: contract.to_string(),
            network: network.to_string(),
            event_name: event_name.to_string(),
            block_number: log.block_number,
            log_index: log.log_index,
            tx_hash: log.tx_hash,
            topics: log.topics,
            data: log.data,
            decoded,
        }
    }

    /// Identity of the event across redeliveries.
    pub fn key(&self) -> EventKey {
        EventKey {
            tx_hash: self.tx_hash,
            log_index: self.log_index,
        }
    }
}

/// (transaction hash, log index) uniquely names one emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EventKey {
    pub tx_hash: TxHash,
    pub log_index: u64,
}

/// Lifecycle of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubscriberState {
    Idle,
    /// Fetching and dispatching the backlog between the cursor and the safe head.
    Subscribing,
    /// Caught up; following new blocks.
    Streaming,
    /// Connection lost; waiting to reconnect.
    Reconnecting,
    Stopped,
}

impl std::fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
