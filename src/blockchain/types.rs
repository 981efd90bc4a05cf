//! Chain-specific types and error definitions.

use alloy::primitives::{hex, Address, Bytes, TxHash, B256, U256};
use alloy::sol_types::{Revert, SolError};
use alloy::transports::TransportError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{LedgerError, LedgerResult};

// Re-export NetworkConfig from config module to avoid duplication
pub use crate::config::schema::NetworkConfig;

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

/// Errors that can occur while talking to an RPC node.
#[derive(Debug, Clone, Error)]
pub enum BlockchainError {
    /// The request never got an answer (refused, reset, DNS, TLS).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<String>,
    },

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// Endpoint URL could not be parsed.
    #[error("Invalid RPC URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Chain configuration mismatch.
    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    /// The node answered with something we could not interpret.
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl BlockchainError {
    /// Build an RPC error without revert data.
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Transport-level failures that a retry or a fresh connection may fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }

    /// The node already holds this exact signed transaction.
    pub fn is_already_known(&self) -> bool {
        match self {
            Self::Rpc { message, .. } => {
                let message = message.to_ascii_lowercase();
                message.contains("already known") || message.contains("already imported")
            }
            _ => false,
        }
    }

    /// The node rejected the nonce we assigned.
    pub fn is_nonce_conflict(&self) -> bool {
        match self {
            Self::Rpc { message, .. } => {
                let message = message.to_ascii_lowercase();
                message.contains("nonce too low")
                    || message.contains("nonce too high")
                    || message.contains("nonce has already been used")
                    || message.contains("replacement transaction underpriced")
            }
            _ => false,
        }
    }

    /// Revert reason carried by an `execution reverted` answer, if this is one.
    ///
    /// ABI-encoded `Error(string)` data wins over the message text.
    pub fn revert_reason(&self) -> Option<String> {
        let Self::Rpc {
            code,
            message,
            data,
        } = self
        else {
            return None;
        };

        if !(*code == 3 || message.to_ascii_lowercase().contains("revert")) {
            return None;
        }

        if let Some(reason) = data.as_deref().and_then(decode_revert_data) {
            return Some(reason);
        }

        let reason = message
            .split_once("reverted")
            .map(|(_, rest)| rest.trim_start_matches(':').trim())
            .filter(|rest| !rest.is_empty())
            .unwrap_or(message.as_str());
        Some(reason.to_string())
    }
}

/// Decode `Error(string)` revert data from its JSON-RPC representation.
fn decode_revert_data(raw: &str) -> Option<String> {
    let bytes = hex::decode(raw.trim().trim_matches('"')).ok()?;
    Revert::abi_decode(&bytes).ok().map(|revert| revert.reason)
}

impl From<TransportError> for BlockchainError {
    fn from(err: TransportError) -> Self {
        match err.as_error_resp() {
            Some(payload) => Self::Rpc {
                code: payload.code,
                message: payload.message.to_string(),
                data: payload.data.as_ref().map(|data| data.get().to_string()),
            },
            None => Self::Connection(err.to_string()),
        }
    }
}

/// Result type for blockchain operations.
pub type BlockchainResult<T> = Result<T, BlockchainError>;

/// A read-only contract call. Also used to replay a mined transaction that reverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub input: Bytes,
    pub value: U256,
}

/// A signed transaction ready for broadcast.
///
/// `raw` is the EIP-2718 envelope sent to the node; the remaining fields mirror its
/// contents so callers never need to decode it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub hash: TxHash,
    pub raw: Bytes,
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
}

/// A contract log as returned by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: TxHash,
}

/// Range query for logs of one event on one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub topic0: B256,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogQuery {
    /// Whether `log` falls inside this query.
    pub fn matches(&self, log: &ChainLog) -> bool {
        log.address == self.address
            && log.topics.first() == Some(&self.topic0)
            && (self.from_block..=self.to_block).contains(&log.block_number)
    }
}

/// The parts of a receipt the ledger layer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
    pub logs: Vec<ChainLog>,
}

/// Why a transaction is reported as failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// Rejected by contract logic on-chain; carries the reason string verbatim.
    Revert(String),
    /// The network could not report on the transaction.
    Network(String),
    /// The requested depth was not observed before the deadline.
    Timeout,
    /// The local wait was cancelled.
    Cancelled,
}

impl FailureReason {
    /// Only an on-chain revert is final; the other reasons describe the local wait.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Revert(_))
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Revert(reason) => write!(f, "reverted: {}", reason),
            Self::Network(message) => write!(f, "network error: {}", message),
            Self::Timeout => write!(f, "timed out"),
            Self::Cancelled => write!(f, "wait cancelled"),
        }
    }
}

/// Transaction confirmation status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TxStatus {
    /// Submitted, not yet observed at the requested depth.
    Pending,
    /// Observed at the requested depth.
    Confirmed,
    /// See [`FailureReason`].
    Failed(FailureReason),
}

impl TxStatus {
    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Pending => false,
            Self::Confirmed => true,
            Self::Failed(reason) => reason.is_final(),
        }
    }
}

/// A transaction submitted through this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub hash: TxHash,
    pub nonce: u64,
    pub network: String,
    pub from: Address,
    pub status: TxStatus,
    /// Blocks observed since inclusion, the inclusion block counting as one.
    pub confirmation_count: u64,
    pub block_number: Option<u64>,
}

impl TransactionRecord {
    /// A freshly submitted transaction.
    pub fn pending(hash: TxHash, nonce: u64, network: &str, from: Address) -> Self {
        Self {
            hash,
            nonce,
            network: network.to_string(),
            from,
            status: TxStatus::Pending,
            confirmation_count: 0,
            block_number: None,
        }
    }

    /// Move to `status` unless the current status is terminal.
    ///
    /// Returns whether the status changed.
    pub fn advance(&mut self, status: TxStatus) -> bool {
        if self.status.is_terminal() || self.status == status {
            return false;
        }
        self.status = status;
        true
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TxStatus::Confirmed
    }

    /// Turn failure statuses into the matching [`LedgerError`].
    pub fn into_result(self, depth: u64) -> LedgerResult<Self> {
        match &self.status {
            TxStatus::Failed(FailureReason::Revert(reason)) => Err(LedgerError::Reverted {
                reason: reason.clone(),
                tx_hash: Some(self.hash),
            }),
            TxStatus::Failed(FailureReason::Timeout) | TxStatus::Failed(FailureReason::Cancelled) => {
                Err(LedgerError::ConfirmationTimeout {
                    tx_hash: self.hash,
                    depth,
                })
            }
            TxStatus::Failed(FailureReason::Network(message)) => Err(LedgerError::Connection {
                network: self.network.clone(),
                message: message.clone(),
            }),
            _ => Ok(self),
        }
    }
}
