//! Static registries resolved at startup.
//!
//! # Data Flow
//! ```text
//! LedgerConfig.networks            → networks.rs  (name → NetworkConfig)
//! address book + ABI descriptors   → contracts.rs (contract × network → ContractDeployment)
//! ```
//!
//! Both registries are plain values built once and passed into constructors.
//! Lookups never touch the network.

pub mod contracts;
pub mod networks;

pub use contracts::{parse_abi, ContractDeployment, ContractDirectory};
pub use networks::NetworkRegistry;
