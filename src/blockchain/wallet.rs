//! Credential custody, signing identities and nonce allocation.
//!
//! # Security
//! - Private keys are loaded ONLY from environment variables
//! - Keys are never logged, serialized or handed out; callers get a [`SigningIdentity`]
//!
//! # Nonce discipline
//! Each (address, network) pair owns one async mutex. A [`NonceLease`] holds that
//! mutex from nonce assignment until the submission outcome is known, so
//! transactions from one identity are signed and broadcast strictly in nonce order.
//! The chain's pending transaction count is read once, when the pair is first used.

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::blockchain::pool::ProviderPool;
use crate::blockchain::types::SignedTransaction;
use crate::config::schema::SignerConfig;
use crate::error::{LedgerError, LedgerResult};

/// A signer bound to one network. Carries no key material.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SigningIdentity {
    pub address: Address,
    pub network: String,
    pub chain_id: u64,
}

/// Fields of a contract call that the signer does not decide itself.
#[derive(Debug, Clone)]
pub struct UnsignedCall {
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
    pub gas_price: u128,
}

#[derive(Debug, Default)]
struct NonceState {
    /// Next nonce to hand out; `None` until read from the chain.
    next: Option<u64>,
}

/// Exclusive right to use one nonce of one identity.
///
/// Holding the lease blocks every other nonce allocation for the identity.
/// [`NonceLease::commit`] marks the nonce as consumed; dropping the lease without
/// committing returns the nonce for reuse.
#[derive(Debug)]
pub struct NonceLease {
    identity: SigningIdentity,
    nonce: u64,
    guard: OwnedMutexGuard<NonceState>,
}

impl NonceLease {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    /// The transaction reached the network; the nonce is spent.
    pub fn commit(mut self) {
        self.guard.next = Some(self.nonce + 1);
        tracing::trace!(
            address = %self.identity.address,
            network = %self.identity.network,
            nonce = self.nonce,
            "Nonce committed"
        );
    }

    /// The transaction never reached the network; the nonce is handed out again.
    pub fn release(self) {
        tracing::debug!(
            address = %self.identity.address,
            network = %self.identity.network,
            nonce = self.nonce,
            "Nonce released"
        );
    }
}

/// Owner of all key material and per-identity nonce counters.
pub struct SignerManager {
    pool: Arc<ProviderPool>,
    wallets: HashMap<Address, EthereumWallet>,
    names: HashMap<String, Address>,
    slots: DashMap<(Address, String), Arc<Mutex<NonceState>>>,
}

impl SignerManager {
    /// Take ownership of already-parsed signers, named by position (`signer-0`, …).
    pub fn new(pool: Arc<ProviderPool>, signers: Vec<PrivateKeySigner>) -> Self {
        let named = signers
            .into_iter()
            .enumerate()
            .map(|(i, signer)| (format!("signer-{}", i), signer))
            .collect();
        Self::with_names(pool, named)
    }

    pub fn with_names(pool: Arc<ProviderPool>, signers: Vec<(String, PrivateKeySigner)>) -> Self {
        let mut wallets = HashMap::new();
        let mut names = HashMap::new();
        for (name, signer) in signers {
            let address = signer.address();
            tracing::info!(signer = %name, address = %address, "Signer loaded");
            names.insert(name, address);
            wallets.insert(address, EthereumWallet::from(signer));
        }

        Self {
            pool,
            wallets,
            names,
            slots: DashMap::new(),
        }
    }

    /// Load every configured signer from the environment variable it references.
    pub fn from_config(pool: Arc<ProviderPool>, configs: &[SignerConfig]) -> LedgerResult<Self> {
        Self::from_lookup(pool, configs, |name| std::env::var(name).ok())
    }

    /// Like [`SignerManager::from_config`] with an explicit variable lookup.
    pub fn from_lookup(
        pool: Arc<ProviderPool>,
        configs: &[SignerConfig],
        env: impl Fn(&str) -> Option<String>,
    ) -> LedgerResult<Self> {
        Ok(Self::with_names(pool, resolve_signers(configs, env)?))
    }

    /// Address of a named signer.
    pub fn address_of(&self, name: &str) -> LedgerResult<Address> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| LedgerError::Signer(format!("unknown signer '{}'", name)))
    }

    /// All addresses with key material, sorted.
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.wallets.keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    /// Identity of `address` on `network`.
    ///
    /// The first call for a pair reads the account's pending transaction count.
    pub async fn signer_for(&self, address: Address, network: &str) -> LedgerResult<SigningIdentity> {
        if !self.wallets.contains_key(&address) {
            return Err(LedgerError::Signer(format!("no key material for {}", address)));
        }
        let chain_id = self.pool.networks().resolve(network)?.chain_id;
        let identity = SigningIdentity {
            address,
            network: network.to_string(),
            chain_id,
        };

        let slot = self.slot(&identity);
        let mut state = slot.lock().await;
        self.sync_from_chain(&identity, &mut state).await?;

        Ok(identity)
    }

    /// Reserve the next nonce of `identity`. Waits for earlier leases to finish.
    pub async fn lease_nonce(&self, identity: &SigningIdentity) -> LedgerResult<NonceLease> {
        let slot = self.slot(identity);
        let mut guard = slot.lock_owned().await;
        let nonce = self.sync_from_chain(identity, &mut guard).await?;

        tracing::debug!(
            address = %identity.address,
            network = %identity.network,
            nonce = nonce,
            "Nonce leased"
        );

        Ok(NonceLease {
            identity: identity.clone(),
            nonce,
            guard,
        })
    }

    /// Next nonce that would be leased, if the identity has been initialised.
    pub async fn next_nonce(&self, identity: &SigningIdentity) -> Option<u64> {
        let slot = self
            .slots
            .get(&(identity.address, identity.network.clone()))
            .map(|slot| slot.clone())?;
        let state = slot.lock().await;
        state.next
    }

    /// Sign `call` with the leased nonce.
    pub async fn sign(&self, lease: &NonceLease, call: UnsignedCall) -> LedgerResult<SignedTransaction> {
        let identity = lease.identity();
        let wallet = self
            .wallets
            .get(&identity.address)
            .ok_or_else(|| LedgerError::Signer(format!("no key material for {}", identity.address)))?;

        let request = TransactionRequest::default()
            .with_from(identity.address)
            .with_to(call.to)
            .with_value(call.value)
            .with_input(call.input.clone())
            .with_nonce(lease.nonce())
            .with_chain_id(identity.chain_id)
            .with_gas_limit(call.gas_limit)
            .with_gas_price(call.gas_price);

        let envelope = request
            .build(wallet)
            .await
            .map_err(|e| LedgerError::Signer(format!("signing failed: {}", e)))?;

        Ok(SignedTransaction {
            hash: *envelope.tx_hash(),
            raw: Bytes::from(envelope.encoded_2718()),
            from: identity.address,
            to: call.to,
            nonce: lease.nonce(),
            value: call.value,
            input: call.input,
            gas_limit: call.gas_limit,
        })
    }

    fn slot(&self, identity: &SigningIdentity) -> Arc<Mutex<NonceState>> {
        self.slots
            .entry((identity.address, identity.network.clone()))
            .or_default()
            .clone()
    }

    /// Initialise the counter from the chain on first use. Caller holds the slot lock.
    async fn sync_from_chain(
        &self,
        identity: &SigningIdentity,
        state: &mut NonceState,
    ) -> LedgerResult<u64> {
        if let Some(next) = state.next {
            return Ok(next);
        }

        let connection = self.pool.acquire(&identity.network).await?;
        let count = match connection.transaction_count(identity.address).await {
            Ok(count) => count,
            Err(e) => {
                if e.is_transient() {
                    self.pool.evict(&identity.network, &connection).await;
                }
                return Err(LedgerError::chain(&identity.network, e));
            }
        };

        tracing::info!(
            address = %identity.address,
            network = %identity.network,
            nonce = count,
            "Nonce counter initialised from chain"
        );
        state.next = Some(count);
        Ok(count)
    }
}

impl std::fmt::Debug for SignerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerManager")
            .field("addresses", &self.addresses())
            .field("identities", &self.slots.len())
            .finish()
    }
}

/// Read each configured key from the variable it references.
pub fn resolve_signers(
    configs: &[SignerConfig],
    env: impl Fn(&str) -> Option<String>,
) -> LedgerResult<Vec<(String, PrivateKeySigner)>> {
    let mut signers = Vec::with_capacity(configs.len());
    for config in configs {
        let raw = env(&config.key_env).ok_or_else(|| {
            LedgerError::Signer(format!(
                "environment variable {} for signer '{}' is not set",
                config.key_env, config.name
            ))
        })?;
        let signer = parse_private_key(&raw)
            .map_err(|e| LedgerError::Signer(format!("signer '{}': {}", config.name, e)))?;
        signers.push((config.name.clone(), signer));
    }
    Ok(signers)
}

/// Parse a hex-encoded private key, with or without `0x` prefix.
pub fn parse_private_key(private_key_hex: &str) -> LedgerResult<PrivateKeySigner> {
    let trimmed = private_key_hex.trim();
    let key_hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    key_hex
        .parse()
        .map_err(|e| LedgerError::Signer(format!("Invalid private key format: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::client::{Connection, Connector};
    use crate::blockchain::types::{
        BlockchainResult, CallRequest, ChainId, ChainLog, LogQuery, NetworkConfig,
        ReceiptSummary,
    };
    use crate::registry::networks::NetworkRegistry;
    use crate::resilience::retries::RetryPolicy;
    use alloy::consensus::TxEnvelope;
    use alloy::eips::eip2718::Decodable2718;
    use alloy::primitives::TxHash;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Well-known test private key (Anvil's first account)
    const TEST_PRIVATE_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[derive(Debug, Default)]
    struct CountingConnection {
        count_queries: AtomicU32,
    }

    #[async_trait]
    impl Connection for CountingConnection {
        fn endpoint(&self) -> String {
            "stub".to_string()
        }
        async fn chain_id(&self) -> BlockchainResult<ChainId> {
            Ok(ChainId(31337))
        }
        async fn block_number(&self) -> BlockchainResult<u64> {
            Ok(0)
        }
        async fn transaction_count(&self, _address: Address) -> BlockchainResult<u64> {
            self.count_queries.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        }
        async fn gas_price(&self) -> BlockchainResult<u128> {
            Ok(1_000_000_000)
        }
        async fn send_raw_transaction(&self, tx: &SignedTransaction) -> BlockchainResult<TxHash> {
            Ok(tx.hash)
        }
        async fn transaction_receipt(&self, _hash: TxHash) -> BlockchainResult<Option<ReceiptSummary>> {
            Ok(None)
        }
        async fn call(&self, _request: &CallRequest, _block: Option<u64>) -> BlockchainResult<Bytes> {
            Ok(Bytes::new())
        }
        async fn logs(&self, _query: &LogQuery) -> BlockchainResult<Vec<ChainLog>> {
            Ok(Vec::new())
        }
    }

    #[derive(Debug)]
    struct SharedConnector(Arc<CountingConnection>);

    #[async_trait]
    impl Connector for SharedConnector {
        async fn connect(&self, _network: &NetworkConfig) -> BlockchainResult<Arc<dyn Connection>> {
            Ok(self.0.clone())
        }
    }

    fn manager() -> (SignerManager, Arc<CountingConnection>) {
        let connection = Arc::new(CountingConnection::default());
        let networks = NetworkRegistry::new(vec![NetworkConfig::default()]).unwrap();
        let pool = Arc::new(ProviderPool::new(
            networks,
            Arc::new(SharedConnector(connection.clone())),
            RetryPolicy::default(),
        ));
        let signer = parse_private_key(TEST_PRIVATE_KEY).unwrap();
        (SignerManager::new(pool, vec![signer]), connection)
    }

    #[test]
    fn test_parse_private_key() {
        let signer = parse_private_key(TEST_PRIVATE_KEY).unwrap();
        // This is the corresponding address for the test key
        assert_eq!(
            signer.address().to_string().to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );

        let prefixed = parse_private_key(&format!("0x{}", TEST_PRIVATE_KEY)).unwrap();
        assert_eq!(prefixed.address(), signer.address());
    }

    #[test]
    fn test_invalid_private_key() {
        let result = parse_private_key("invalid_key");
        assert!(result.unwrap_err().to_string().contains("Invalid private key"));
    }

    #[tokio::test]
    async fn test_from_lookup_missing_variable() {
        let (manager, _) = manager();
        let configs = vec![SignerConfig {
            name: "ops".to_string(),
            key_env: "AID_LEDGER_TEST_UNSET_KEY".to_string(),
        }];
        let err = SignerManager::from_lookup(manager.pool.clone(), &configs, |_| None).unwrap_err();
        assert!(err.to_string().contains("AID_LEDGER_TEST_UNSET_KEY"));
    }

    #[tokio::test]
    async fn test_chain_count_read_once() {
        let (manager, connection) = manager();
        let address = manager.address_of("signer-0").unwrap();
        let identity = manager.signer_for(address, "local").await.unwrap();
        assert_eq!(identity.chain_id, 31337);

        let lease = manager.lease_nonce(&identity).await.unwrap();
        assert_eq!(lease.nonce(), 7);
        lease.commit();

        let lease = manager.lease_nonce(&identity).await.unwrap();
        assert_eq!(lease.nonce(), 8);
        lease.commit();

        manager.signer_for(address, "local").await.unwrap();
        assert_eq!(connection.count_queries.load(Ordering::SeqCst), 1);
        assert_eq!(manager.next_nonce(&identity).await, Some(9));
    }

    #[tokio::test]
    async fn test_released_nonce_is_reused() {
        let (manager, _) = manager();
        let address = manager.address_of("signer-0").unwrap();
        let identity = manager.signer_for(address, "local").await.unwrap();

        let lease = manager.lease_nonce(&identity).await.unwrap();
        lease.release();
        let lease = manager.lease_nonce(&identity).await.unwrap();
        assert_eq!(lease.nonce(), 7);
        drop(lease);
        assert_eq!(manager.next_nonce(&identity).await, Some(7));
    }

    #[tokio::test]
    async fn test_unknown_identity() {
        let (manager, _) = manager();
        assert!(matches!(
            manager.signer_for(Address::repeat_byte(9), "local").await,
            Err(LedgerError::Signer(_))
        ));
        let address = manager.address_of("signer-0").unwrap();
        assert!(matches!(
            manager.signer_for(address, "mainnet").await,
            Err(LedgerError::UnknownNetwork(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_produces_decodable_envelope() {
        let (manager, _) = manager();
        let address = manager.address_of("signer-0").unwrap();
        let identity = manager.signer_for(address, "local").await.unwrap();
        let lease = manager.lease_nonce(&identity).await.unwrap();

        let signed = manager
            .sign(
                &lease,
                UnsignedCall {
                    to: Address::repeat_byte(0x11),
                    value: U256::from(5u64),
                    input: Bytes::from_static(&[0xd0, 0xe3, 0x0d, 0xb0]),
                    gas_limit: 100_000,
                    gas_price: 2_000_000_000,
                },
            )
            .await
            .unwrap();
        lease.commit();

        assert_eq!(signed.nonce, 7);
        assert_eq!(signed.from, address);
        let decoded = TxEnvelope::decode_2718(&mut signed.raw.as_ref()).unwrap();
        assert_eq!(*decoded.tx_hash(), signed.hash);
    }

    #[test]
    fn test_debug_hides_keys() {
        let signer = parse_private_key(TEST_PRIVATE_KEY).unwrap();
        let networks = NetworkRegistry::new(vec![NetworkConfig::default()]).unwrap();
        let pool = Arc::new(ProviderPool::new(
            networks,
            Arc::new(SharedConnector(Arc::new(CountingConnection::default()))),
            RetryPolicy::default(),
        ));
        let manager = SignerManager::new(pool, vec![signer]);
        let debug = format!("{:?}", manager);
        assert!(!debug.contains(TEST_PRIVATE_KEY));
    }
}
