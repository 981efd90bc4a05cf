//! Network name → endpoint and chain id.

use std::collections::HashMap;

use crate::config::schema::NetworkConfig;
use crate::error::{LedgerError, LedgerResult};

/// Immutable mapping from network name to its configuration.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: HashMap<String, NetworkConfig>,
}

impl NetworkRegistry {
    /// Build the registry. Duplicate names are a configuration error.
    pub fn new(networks: Vec<NetworkConfig>) -> LedgerResult<Self> {
        let mut map = HashMap::with_capacity(networks.len());
        for network in networks {
            if network.name.trim().is_empty() {
                return Err(LedgerError::Config("network name must not be empty".to_string()));
            }
            let name = network.name.clone();
            if map.insert(name.clone(), network).is_some() {
                return Err(LedgerError::Config(format!("duplicate network '{}'", name)));
            }
        }
        Ok(Self { networks: map })
    }

    /// Look up a network by name.
    pub fn resolve(&self, network: &str) -> LedgerResult<&NetworkConfig> {
        self.networks
            .get(network)
            .ok_or_else(|| LedgerError::UnknownNetwork(network.to_string()))
    }

    pub fn contains(&self, network: &str) -> bool {
        self.networks.contains_key(network)
    }

    /// Network names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.networks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(name: &str, chain_id: u64) -> NetworkConfig {
        NetworkConfig {
            name: name.to_string(),
            chain_id,
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn test_resolve_known_and_unknown() {
        let registry =
            NetworkRegistry::new(vec![network("local", 31337), network("sepolia", 11155111)])
                .unwrap();

        assert_eq!(registry.resolve("sepolia").unwrap().chain_id, 11155111);
        assert_eq!(registry.names(), vec!["local", "sepolia"]);
        match registry.resolve("mainnet") {
            Err(LedgerError::UnknownNetwork(name)) => assert_eq!(name, "mainnet"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = NetworkRegistry::new(vec![network("local", 1), network("local", 2)]);
        assert!(matches!(result, Err(LedgerError::Config(_))));
    }
}
