//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! Environment Variables (private keys, RPC URL overrides)
//!     → wallet.rs (SignerManager: key custody, identities, nonce leases)
//!     → client.rs (Connection: RPC with timeouts)
//!     → pool.rs (ProviderPool: one shared connection per network)
//!     → transaction.rs (TransactionSubmitter: sign, broadcast, confirm)
//!     → contract.rs (typed calls and events)
//! ```
//!
//! # Security Constraints
//! - Private keys ONLY from environment variables
//! - Never log private keys or RPC credentials
//! - All RPC calls have configurable timeouts

pub mod client;
pub mod contract;
pub mod pool;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use client::{AlloyConnection, AlloyConnector, Connection, Connector};
pub use contract::{AidDistribution, AidEvent};
pub use pool::ProviderPool;
pub use transaction::{SubmissionPolicy, TransactionSubmitter};
pub use types::{
    BlockchainError, BlockchainResult, CallRequest, ChainId, ChainLog, FailureReason, LogQuery,
    ReceiptSummary, SignedTransaction, TransactionRecord, TxStatus,
};
pub use wallet::{parse_private_key, resolve_signers, NonceLease, SignerManager, SigningIdentity, UnsignedCall};
