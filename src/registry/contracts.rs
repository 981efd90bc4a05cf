//! Deployed contract addresses and ABI descriptors per network.
//!
//! # Responsibilities
//! - Load the JSON address book `{ "<contract>": { "<network>": "0x…" } }`
//! - Load one ABI descriptor per contract (bare array or build artifact with `abi`)
//! - Check typed bindings against the loaded descriptor
//!
//! # Data Flow
//! ```text
//! addresses.json ─┐
//!                 ├→ ContractDirectory::from_sources → (contract, network) → ContractDeployment
//! <name>.json   ──┘
//! ```

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, B256};
use alloy::sol_types::{SolCall, SolEvent};

use crate::config::schema::ContractsConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::registry::networks::NetworkRegistry;

/// One contract deployed on one network.
#[derive(Debug, Clone)]
pub struct ContractDeployment {
    pub contract_name: String,
    pub network: String,
    pub address: Address,
    pub abi: Arc<JsonAbi>,
}

impl ContractDeployment {
    /// Ensure the typed call `C` exists in the loaded descriptor.
    pub fn ensure_function<C: SolCall>(&self) -> LedgerResult<()> {
        let found = self.abi.functions().any(|f| f.selector().0 == C::SELECTOR);
        if found {
            Ok(())
        } else {
            Err(LedgerError::Abi(format!(
                "{} on '{}' has no function {}",
                self.contract_name, self.network, C::SIGNATURE
            )))
        }
    }

    /// Ensure the typed event `E` exists in the loaded descriptor.
    pub fn ensure_event<E: SolEvent>(&self) -> LedgerResult<()> {
        let found = self.abi.events().any(|e| e.selector() == E::SIGNATURE_HASH);
        if found {
            Ok(())
        } else {
            Err(LedgerError::Abi(format!(
                "{} on '{}' has no event {}",
                self.contract_name, self.network, E::SIGNATURE
            )))
        }
    }

    /// Topic hash of the named event.
    ///
    /// Overloaded events are ambiguous by name and rejected.
    pub fn event_topic(&self, event_name: &str) -> LedgerResult<B256> {
        match self.abi.event(event_name).map(Vec::as_slice) {
            Some([event]) => Ok(event.selector()),
            Some([]) | None => Err(LedgerError::Abi(format!(
                "{} on '{}' has no event named {}",
                self.contract_name, self.network, event_name
            ))),
            Some(_) => Err(LedgerError::Abi(format!(
                "event {} on {} is overloaded; subscribe by signature instead",
                event_name, self.contract_name
            ))),
        }
    }
}

/// Immutable mapping (contract name, network) → deployment.
#[derive(Debug, Clone, Default)]
pub struct ContractDirectory {
    deployments: HashMap<(String, String), ContractDeployment>,
}

impl ContractDirectory {
    /// Read the address book and ABI files named in the configuration.
    pub fn load(config: &ContractsConfig, networks: &NetworkRegistry) -> LedgerResult<Self> {
        let address_book = fs::read_to_string(&config.address_book).map_err(|e| {
            LedgerError::Config(format!(
                "cannot read address book {}: {}",
                config.address_book.display(),
                e
            ))
        })?;

        let mut abis = HashMap::new();
        for source in &config.abis {
            let raw = fs::read_to_string(&source.path).map_err(|e| {
                LedgerError::Abi(format!(
                    "cannot read ABI for {} at {}: {}",
                    source.name,
                    source.path.display(),
                    e
                ))
            })?;
            abis.insert(source.name.clone(), parse_abi(&raw)?);
        }

        Self::from_sources(&address_book, abis, networks)
    }

    /// Build the directory from an address book document and parsed ABIs.
    ///
    /// Entries for networks the registry does not know, or for contracts without a
    /// descriptor, are skipped with a warning. Malformed addresses are errors.
    pub fn from_sources(
        address_book: &str,
        abis: HashMap<String, JsonAbi>,
        networks: &NetworkRegistry,
    ) -> LedgerResult<Self> {
        let book: HashMap<String, HashMap<String, String>> = serde_json::from_str(address_book)
            .map_err(|e| LedgerError::Config(format!("malformed address book: {}", e)))?;

        let abis: HashMap<String, Arc<JsonAbi>> =
            abis.into_iter().map(|(name, abi)| (name, Arc::new(abi))).collect();

        let mut deployments = HashMap::new();
        for (contract, per_network) in book {
            let Some(abi) = abis.get(&contract) else {
                tracing::warn!(contract = %contract, "No ABI descriptor configured, skipping deployments");
                continue;
            };

            for (network, raw_address) in per_network {
                if !networks.contains(&network) {
                    tracing::warn!(
                        contract = %contract,
                        network = %network,
                        "Deployment on unconfigured network ignored"
                    );
                    continue;
                }

                let address = parse_address(&raw_address).map_err(|reason| {
                    LedgerError::Config(format!(
                        "invalid address for {} on '{}': {}",
                        contract, network, reason
                    ))
                })?;

                tracing::debug!(contract = %contract, network = %network, address = %address, "Deployment registered");
                deployments.insert(
                    (contract.clone(), network.clone()),
                    ContractDeployment {
                        contract_name: contract.clone(),
                        network,
                        address,
                        abi: abi.clone(),
                    },
                );
            }
        }

        Ok(Self { deployments })
    }

    /// Look up the deployment of `contract` on `network`.
    pub fn resolve(&self, contract: &str, network: &str) -> LedgerResult<&ContractDeployment> {
        self.deployments
            .get(&(contract.to_string(), network.to_string()))
            .ok_or_else(|| LedgerError::UnknownContract {
                contract: contract.to_string(),
                network: network.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }
}

/// Parse an ABI descriptor: either a bare JSON array or an artifact object with `abi`.
pub fn parse_abi(raw: &str) -> LedgerResult<JsonAbi> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| LedgerError::Abi(format!("ABI is not valid JSON: {}", e)))?;

    let abi_value = match value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(mut artifact) => artifact
            .remove("abi")
            .ok_or_else(|| LedgerError::Abi("artifact has no 'abi' field".to_string()))?,
        _ => return Err(LedgerError::Abi("ABI must be an array or an artifact object".to_string())),
    };

    serde_json::from_value(abi_value)
        .map_err(|e| LedgerError::Abi(format!("malformed ABI descriptor: {}", e)))
}

fn parse_address(raw: &str) -> Result<Address, String> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| format!("'{}' is missing the 0x prefix", raw))?;
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("'{}' is not a 20-byte hex address", raw));
    }
    let address: Address = digits.parse().map_err(|e| format!("'{}': {}", raw, e))?;
    if address == Address::ZERO {
        return Err("zero address".to_string());
    }
    Ok(address)
}
