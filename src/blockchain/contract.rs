//! Typed binding for the aid distribution contract.
//!
//! One Rust call type per ABI method and one struct per event, generated by `sol!`.
//! Deployments check these against the loaded descriptor before use.

use alloy::primitives::B256;
use alloy::sol;
use alloy::sol_types::SolEvent;

use crate::error::{LedgerError, LedgerResult};

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface AidDistribution {
        /// Emitted when a donor sends value to the contract.
        event DonationMade(address indexed donor, uint256 amount, uint256 timestamp);

        /// Emitted when an aid record is registered for a receiver.
        event AidRecordCreated(uint256 indexed id, address indexed receiver, uint256 amount);

        /// Emitted when an aid record changes status.
        event AidStatusUpdated(uint256 indexed id, uint8 status);

        /// Emitted when the operator funds the contract.
        event ContractFunded(address indexed funder, uint256 amount);

        function donate() external payable;
        function createAidRecord(address receiver, uint256 amount) external returns (uint256 id);
        function updateAidStatus(uint256 id, uint8 status) external;
        function fund() external payable;
        function getDonorTotal(address donor) external view returns (uint256 total);
        function getAidRecord(uint256 id) external view returns (address receiver, uint256 amount, uint8 status);
    }
}

/// A decoded contract event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AidEvent {
    DonationMade(AidDistribution::DonationMade),
    AidRecordCreated(AidDistribution::AidRecordCreated),
    AidStatusUpdated(AidDistribution::AidStatusUpdated),
    ContractFunded(AidDistribution::ContractFunded),
}

impl AidEvent {
    /// Decode a raw log.
    ///
    /// Returns `Ok(None)` for logs that are not one of this contract's events.
    pub fn decode(topics: &[B256], data: &[u8]) -> LedgerResult<Option<Self>> {
        let Some(topic0) = topics.first() else {
            return Ok(None);
        };

        let topic0 = *topic0;
        let decoded = if topic0 == AidDistribution::DonationMade::SIGNATURE_HASH {
            decode_as::<AidDistribution::DonationMade>(topics, data).map(Self::DonationMade)
        } else if topic0 == AidDistribution::AidRecordCreated::SIGNATURE_HASH {
            decode_as::<AidDistribution::AidRecordCreated>(topics, data).map(Self::AidRecordCreated)
        } else if topic0 == AidDistribution::AidStatusUpdated::SIGNATURE_HASH {
            decode_as::<AidDistribution::AidStatusUpdated>(topics, data).map(Self::AidStatusUpdated)
        } else if topic0 == AidDistribution::ContractFunded::SIGNATURE_HASH {
            decode_as::<AidDistribution::ContractFunded>(topics, data).map(Self::ContractFunded)
        } else {
            return Ok(None);
        };

        decoded.map(Some)
    }

    /// Event name as declared in the ABI.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DonationMade(_) => "DonationMade",
            Self::AidRecordCreated(_) => "AidRecordCreated",
            Self::AidStatusUpdated(_) => "AidStatusUpdated",
            Self::ContractFunded(_) => "ContractFunded",
        }
    }
}

fn decode_as<E: SolEvent>(topics: &[B256], data: &[u8]) -> LedgerResult<E> {
    E::decode_raw_log(topics.iter().copied(), data)
        .map_err(|e| LedgerError::Abi(format!("cannot decode {}: {}", E::SIGNATURE, e)))
}
