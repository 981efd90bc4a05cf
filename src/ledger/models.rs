//! Domain records exposed by the facade and maintained by the projections.

use alloy::primitives::utils::{format_ether, parse_ether};
use alloy::primitives::{Address, TxHash, U256};
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;

use crate::blockchain::types::TransactionRecord;
use crate::error::{LedgerError, LedgerResult};

/// One donation, as emitted by `DonationMade`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Donation {
    pub donor: Address,
    /// Amount in wei.
    pub amount: U256,
    /// Block timestamp reported by the contract, seconds since epoch.
    pub timestamp: u64,
    pub tx_hash: TxHash,
}

/// Delivery state of an aid record. Encoded on-chain as `uint8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum AidStatus {
    Pending = 0,
    Delivered = 1,
    Cancelled = 2,
}

impl AidStatus {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for AidStatus {
    type Error = LedgerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Delivered),
            2 => Ok(Self::Cancelled),
            other => Err(LedgerError::Abi(format!("unknown aid status {}", other))),
        }
    }
}

impl FromStr for AidStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(LedgerError::Config(format!(
                "unknown aid status '{}' (expected pending, delivered or cancelled)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for AidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One aid record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AidRecord {
    pub id: U256,
    pub receiver: Address,
    /// Amount in wei.
    pub amount: U256,
    pub status: AidStatus,
}

/// How long a write waits after submission.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Depth to wait for. `None` returns as soon as the node accepted the transaction.
    pub confirmations: Option<u64>,
    /// Upper bound on the wait. Defaults to `transactions.confirmation_timeout_secs`.
    pub timeout: Option<Duration>,
}

impl WriteOptions {
    /// Return the `Pending` record without waiting.
    pub fn submit_only() -> Self {
        Self::default()
    }

    /// Wait until the transaction is `depth` blocks deep.
    pub fn confirmed(depth: u64) -> Self {
        Self {
            confirmations: Some(depth),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of `create_aid_record`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AidSubmission {
    pub record: TransactionRecord,
    /// Identifier assigned by the contract, known once the receipt was observed.
    pub aid_id: Option<U256>,
}

/// Parse a decimal ether amount ("2.5") into wei.
pub fn ether(amount: &str) -> LedgerResult<U256> {
    parse_ether(amount.trim())
        .map_err(|e| LedgerError::Config(format!("invalid ether amount '{}': {}", amount, e)))
}

/// Format wei as a decimal ether string.
pub fn display_ether(wei: U256) -> String {
    format_ether(wei)
}
