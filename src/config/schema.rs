//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the ledger layer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the ledger layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LedgerConfig {
    /// Facade defaults (network, contract, operator identity).
    pub ledger: FacadeConfig,

    /// Networks the layer can talk to.
    pub networks: Vec<NetworkConfig>,

    /// Address book and ABI artifact locations.
    pub contracts: ContractsConfig,

    /// Credential references. Keys themselves live in the environment.
    pub signers: Vec<SignerConfig>,

    /// Retry policy for opening connections and for reconnecting subscribers.
    pub retry: RetryConfig,

    /// Transaction submission policy.
    pub transactions: TransactionConfig,

    /// Event subscription settings.
    pub events: EventsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Defaults used by the facade.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FacadeConfig {
    /// Network used when the caller does not name one.
    pub default_network: String,

    /// Contract the facade operations target.
    pub contract: String,

    /// Signer name used for write operations. Defaults to the first signer.
    pub operator: Option<String>,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            default_network: "local".to_string(),
            contract: "AidDistribution".to_string(),
            operator: None,
        }
    }
}

/// One network. Immutable after load; unique by name.
///
/// Exactly one endpoint per network; unknown keys are rejected.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Network name used by callers (e.g. "sepolia").
    pub name: String,

    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Environment variable that overrides `rpc_url` when set.
    pub rpc_url_env: Option<String>,

    /// Chain ID (e.g., 1 for Ethereum mainnet, 31337 for local Anvil).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Default confirmation depth for this network.
    pub confirmation_blocks: u64,
}

impl NetworkConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            rpc_url_env: None,
            chain_id: 31337,
            rpc_timeout_secs: 10,
            confirmation_blocks: 1,
        }
    }
}

/// Where deployments and ABI descriptors are read from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContractsConfig {
    /// Path to the JSON address book `{contract: {network: address}}`.
    pub address_book: PathBuf,

    /// ABI descriptor per contract name.
    pub abis: Vec<AbiSource>,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            address_book: PathBuf::from("deployments/addresses.json"),
            abis: Vec::new(),
        }
    }
}

/// ABI descriptor location for one contract.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AbiSource {
    pub name: String,
    pub path: PathBuf,
}

/// Reference to a private key held in the environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignerConfig {
    /// Name used to select the signer (e.g. as `ledger.operator`).
    pub name: String,

    /// Environment variable holding the hex-encoded key.
    pub key_env: String,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 4000,
        }
    }
}

/// Transaction submission policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Gas limit attached to every contract call.
    pub gas_limit: u64,

    /// Gas price multiplier (1.0 = node price, 1.2 = 20% buffer).
    pub gas_price_multiplier: f64,

    /// Maximum gas price in gwei (protection against spikes).
    pub max_gas_price_gwei: u64,

    /// Receipt polling interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Default confirmation wait in seconds.
    pub confirmation_timeout_secs: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            gas_limit: 300_000,
            gas_price_multiplier: 1.2,
            max_gas_price_gwei: 500,
            poll_interval_ms: 2000,
            confirmation_timeout_secs: 120,
        }
    }
}

/// Event subscription settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Cursor file. In-memory cursors when unset.
    pub cursor_path: Option<PathBuf>,

    /// Interval between head checks while streaming, in milliseconds.
    pub poll_interval_ms: u64,

    /// Largest block span requested in one log query.
    pub max_block_range: u64,

    /// Capacity of channel-backed subscriptions.
    pub channel_capacity: usize,

    /// Subscriptions started by the `run` command.
    pub subscriptions: Vec<SubscriptionConfig>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            cursor_path: None,
            poll_interval_ms: 4000,
            max_block_range: 2000,
            channel_capacity: 256,
            subscriptions: Vec::new(),
        }
    }
}

/// One configured event subscription.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionConfig {
    pub contract: String,
    pub event: String,
    /// Defaults to `ledger.default_network`.
    #[serde(default)]
    pub network: Option<String>,
    /// First block to scan when no cursor exists yet.
    #[serde(default)]
    pub start_block: Option<u64>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: LedgerConfig = toml::from_str(
            r#"
            [[networks]]
            name = "sepolia"
            rpc_url = "https://rpc.sepolia.org"
            chain_id = 11155111
            "#,
        )
        .unwrap();

        assert_eq!(config.networks.len(), 1);
        assert_eq!(config.networks[0].rpc_timeout_secs, 10);
        assert_eq!(config.networks[0].confirmation_blocks, 1);
        assert_eq!(config.ledger.contract, "AidDistribution");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.retry.max_delay_ms, 4000);
        assert!(config.events.cursor_path.is_none());
    }

    #[test]
    fn test_full_sections_parse() {
        let config: LedgerConfig = toml::from_str(
            r#"
            [ledger]
            default_network = "local"
            operator = "ops"

            [[signers]]
            name = "ops"
            key_env = "AID_LEDGER_OPERATOR_KEY"

            [contracts]
            address_book = "deployments/addresses.json"
            [[contracts.abis]]
            name = "AidDistribution"
            path = "abi/AidDistribution.json"

            [[events.subscriptions]]
            contract = "AidDistribution"
            event = "DonationMade"
            start_block = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.ledger.operator.as_deref(), Some("ops"));
        assert_eq!(config.signers[0].key_env, "AID_LEDGER_OPERATOR_KEY");
        assert_eq!(config.contracts.abis[0].name, "AidDistribution");
        assert_eq!(config.events.subscriptions[0].start_block, Some(10));
        assert_eq!(config.events.subscriptions[0].network, None);
    }

    #[test]
    fn test_network_takes_one_endpoint() {
        let result: Result<LedgerConfig, _> = toml::from_str(
            r#"
            [[networks]]
            name = "sepolia"
            rpc_url = "https://rpc.sepolia.org"
            failover_urls = ["https://backup.example"]
            chain_id = 11155111
            "#,
        );
        let err = result.unwrap_err().to_string();
        assert!(err.contains("failover_urls"), "unexpected error: {}", err);
    }
}
