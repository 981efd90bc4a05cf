//! Caller-facing error taxonomy for the ledger layer.
//!
//! Configuration errors (`UnknownNetwork`, `UnknownContract`, `Config`, `Abi`) are fatal
//! and surfaced immediately. `Connection` is the only transient class; it is retried
//! inside the provider pool and the event subscriber before it reaches a caller.
//! `SubmissionUnresolved` is never retried: the transaction may already be on chain.

use alloy::primitives::{Address, TxHash};
use thiserror::Error;

use crate::blockchain::types::BlockchainError;

/// Errors surfaced by the ledger layer.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// No network with this name is configured.
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    /// No deployment of the contract is known on the network.
    #[error("Unknown contract '{contract}' on network '{network}'")]
    UnknownContract { contract: String, network: String },

    /// The RPC endpoint could not be reached.
    #[error("Connection error on network '{network}': {message}")]
    Connection { network: String, message: String },

    /// The node disagrees with the locally tracked nonce. Always a bug.
    #[error("Nonce conflict for {address} on network '{network}' at nonce {nonce}: {message}")]
    NonceConflict {
        address: Address,
        network: String,
        nonce: u64,
        message: String,
    },

    /// The contract rejected the call.
    #[error("Transaction reverted: {reason}")]
    Reverted {
        reason: String,
        tx_hash: Option<TxHash>,
    },

    /// The transaction was not observed at the requested depth in time. It may still land.
    #[error("Transaction {tx_hash} not confirmed to depth {depth} before the deadline")]
    ConfirmationTimeout { tx_hash: TxHash, depth: u64 },

    /// Sending failed at the transport level and the node could not be asked whether
    /// it holds the transaction. The nonce stays spent; poll `tx_hash` to settle it.
    #[error("Transaction {tx_hash} on network '{network}' may have been sent (nonce {nonce}): {message}")]
    SubmissionUnresolved {
        network: String,
        tx_hash: TxHash,
        nonce: u64,
        message: String,
    },

    /// The node refused the transaction before it entered the mempool.
    #[error("Transaction rejected by node: {0}")]
    Rejected(String),

    /// The node answered a request with an error.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Gas price exceeded the configured ceiling.
    #[error("Gas price {current_gwei} gwei exceeds maximum {max_gwei} gwei")]
    GasPriceTooHigh { current_gwei: u64, max_gwei: u64 },

    /// Credential material is missing or unusable.
    #[error("Signer error: {0}")]
    Signer(String),

    /// ABI descriptor is malformed or does not match the typed binding.
    #[error("ABI error: {0}")]
    Abi(String),

    /// Invalid configuration detected at runtime.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transaction hash was not submitted through this layer.
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TxHash),

    /// Another live subscriber already owns this cursor.
    #[error("Subscription already active for {0}")]
    SubscriptionActive(String),

    /// The cursor store failed or refused a write.
    #[error("Cursor store error: {0}")]
    Cursor(String),

    /// A background task panicked or was aborted.
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl LedgerError {
    /// Map a chain-level error observed on `network` into the caller taxonomy.
    pub fn chain(network: &str, err: BlockchainError) -> Self {
        match err {
            BlockchainError::Connection(message) => Self::Connection {
                network: network.to_string(),
                message,
            },
            BlockchainError::Timeout(secs) => Self::Connection {
                network: network.to_string(),
                message: format!("RPC timeout after {} seconds", secs),
            },
            BlockchainError::ChainMismatch { .. } | BlockchainError::InvalidUrl { .. } => {
                Self::Config(format!("network '{}': {}", network, err))
            }
            other => Self::Rpc(other.to_string()),
        }
    }

    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
