//! Application entry point to the aid distribution contract.
//!
//! # Responsibilities
//! - Own the registries, the provider pool, signers, submitter and subscriber
//! - Expose donation, aid and funding operations in domain terms
//! - Route reads as plain calls and writes through the transaction submitter
//!
//! # Data Flow
//! ```text
//! write: facade → ContractDirectory → SignerManager::signer_for → TransactionSubmitter::submit
//!              → (optional) await_confirmation → TransactionRecord
//! read:  facade → ContractDirectory → ProviderPool::acquire → Connection::call → decoded return
//! ```

use alloy::primitives::{Address, TxHash, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{SolCall, SolEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::blockchain::client::{AlloyConnector, Connector};
use crate::blockchain::contract::AidDistribution;
use crate::blockchain::pool::ProviderPool;
use crate::blockchain::transaction::{SubmissionPolicy, TransactionSubmitter};
use crate::blockchain::types::{CallRequest, TransactionRecord};
use crate::blockchain::wallet::{resolve_signers, SignerManager};
use crate::config::schema::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::events::cursor::{CursorStore, FileCursorStore, MemoryCursorStore};
use crate::events::handler::EventHandler;
use crate::events::subscriber::{ActiveSubscriptions, EventSubscriber, SubscriptionHandle, SubscriptionOptions};
use crate::events::types::LedgerEvent;
use crate::ledger::models::{AidRecord, AidStatus, AidSubmission, WriteOptions};
use crate::registry::contracts::{ContractDeployment, ContractDirectory};
use crate::registry::networks::NetworkRegistry;
use crate::resilience::retries::RetryPolicy;

/// Explicit collaborators for [`LedgerFacade::assemble`].
pub struct LedgerComponents {
    pub networks: NetworkRegistry,
    pub contracts: ContractDirectory,
    pub connector: Arc<dyn Connector>,
    /// Named signers, in configuration order. The first one is the default operator.
    pub signers: Vec<(String, PrivateKeySigner)>,
    pub cursors: Arc<dyn CursorStore>,
}

#[derive(Debug)]
struct LedgerContext {
    config: LedgerConfig,
    contracts: ContractDirectory,
    pool: Arc<ProviderPool>,
    signers: Arc<SignerManager>,
    submitter: TransactionSubmitter,
    subscriber: EventSubscriber,
    operator: Option<Address>,
}

/// Caller-facing ledger operations, bound to one network.
///
/// Cheap to clone; clones share connections, nonce counters and subscriptions.
#[derive(Debug, Clone)]
pub struct LedgerFacade {
    inner: Arc<LedgerContext>,
    network: String,
}

impl LedgerFacade {
    /// Build everything from configuration: address book and ABIs from disk, keys
    /// from the environment, alloy HTTP connections and the configured cursor store.
    pub async fn from_config(config: LedgerConfig) -> LedgerResult<Self> {
        let networks = NetworkRegistry::new(config.networks.clone())?;
        let contracts = ContractDirectory::load(&config.contracts, &networks)?;
        let signers = resolve_signers(&config.signers, |name| std::env::var(name).ok())?;

        let cursors: Arc<dyn CursorStore> = match &config.events.cursor_path {
            Some(path) => Arc::new(FileCursorStore::open(path.clone()).await?),
            None => Arc::new(MemoryCursorStore::new()),
        };

        Self::assemble(
            config,
            LedgerComponents {
                networks,
                contracts,
                connector: Arc::new(AlloyConnector),
                signers,
                cursors,
            },
        )
    }

    /// Wire the facade from explicit components.
    pub fn assemble(config: LedgerConfig, components: LedgerComponents) -> LedgerResult<Self> {
        let network = config.ledger.default_network.clone();
        components.networks.resolve(&network)?;
        components.contracts.resolve(&config.ledger.contract, &network)?;

        let operator = match &config.ledger.operator {
            Some(name) => Some(
                components
                    .signers
                    .iter()
                    .find(|(signer, _)| signer == name)
                    .map(|(_, key)| key.address())
                    .ok_or_else(|| LedgerError::Signer(format!("operator '{}' is not a configured signer", name)))?,
            ),
            None => components.signers.first().map(|(_, key)| key.address()),
        };

        let pool = Arc::new(ProviderPool::new(
            components.networks,
            components.connector,
            RetryPolicy::from(&config.retry),
        ));
        let signers = Arc::new(SignerManager::with_names(pool.clone(), components.signers));
        let submitter = TransactionSubmitter::new(
            pool.clone(),
            signers.clone(),
            SubmissionPolicy::from_config(&config.transactions, &config.retry),
        );
        let subscriber = EventSubscriber::new(pool.clone(), components.cursors, ActiveSubscriptions::new());

        tracing::info!(
            network = %network,
            contract = %config.ledger.contract,
            operator = ?operator,
            "Ledger facade ready"
        );

        Ok(Self {
            inner: Arc::new(LedgerContext {
                config,
                contracts: components.contracts,
                pool,
                signers,
                submitter,
                subscriber,
                operator,
            }),
            network,
        })
    }

    /// The same facade bound to another configured network.
    pub fn with_network(&self, network: &str) -> LedgerResult<Self> {
        self.inner.pool.networks().resolve(network)?;
        Ok(Self {
            inner: self.inner.clone(),
            network: network.to_string(),
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.inner.config
    }

    /// Address used for operator writes (aid records, status updates, funding).
    pub fn operator(&self) -> LedgerResult<Address> {
        self.inner
            .operator
            .ok_or_else(|| LedgerError::Signer("no signer configured for operator writes".to_string()))
    }

    /// Address of a named signer.
    pub fn signer_address(&self, name: &str) -> LedgerResult<Address> {
        self.inner.signers.address_of(name)
    }

    /// Deployment of `contract` on this facade's network.
    pub fn deployment(&self, contract: &str) -> LedgerResult<&ContractDeployment> {
        self.inner.contracts.resolve(contract, &self.network)
    }

    pub fn pool(&self) -> &Arc<ProviderPool> {
        &self.inner.pool
    }

    // ---- writes ----

    /// Send `amount` wei from `donor` to the contract.
    ///
    /// `donor` must be one of the configured signers.
    pub async fn record_donation(
        &self,
        donor: Address,
        amount: U256,
        options: WriteOptions,
    ) -> LedgerResult<TransactionRecord> {
        self.write(donor, AidDistribution::donateCall {}, amount, &options)
            .await
    }

    /// Register an aid record for `receiver`, sent by the operator.
    pub async fn create_aid_record(
        &self,
        receiver: Address,
        amount: U256,
        options: WriteOptions,
    ) -> LedgerResult<AidSubmission> {
        let operator = self.operator()?;
        let record = self
            .write(
                operator,
                AidDistribution::createAidRecordCall { receiver, amount },
                U256::ZERO,
                &options,
            )
            .await?;

        let aid_id = self
            .inner
            .submitter
            .receipt_logs(record.hash)
            .iter()
            .filter(|log| log.topics.first() == Some(&AidDistribution::AidRecordCreated::SIGNATURE_HASH))
            .find_map(|log| {
                AidDistribution::AidRecordCreated::decode_raw_log(log.topics.iter().copied(), &log.data)
                    .ok()
                    .map(|created| created.id)
            });

        Ok(AidSubmission { record, aid_id })
    }

    /// Change the status of an aid record, sent by the operator.
    pub async fn update_aid_status(
        &self,
        id: U256,
        status: AidStatus,
        options: WriteOptions,
    ) -> LedgerResult<TransactionRecord> {
        let operator = self.operator()?;
        self.write(
            operator,
            AidDistribution::updateAidStatusCall {
                id,
                status: status.as_u8(),
            },
            U256::ZERO,
            &options,
        )
        .await
    }

    /// Send `amount` wei from the operator to the contract.
    pub async fn fund_contract(&self, amount: U256, options: WriteOptions) -> LedgerResult<TransactionRecord> {
        let operator = self.operator()?;
        self.write(operator, AidDistribution::fundCall {}, amount, &options)
            .await
    }

    // ---- reads ----

    /// Total donated by `donor`, in wei, as reported by the contract.
    pub async fn fetch_donor_totals(&self, donor: Address) -> LedgerResult<U256> {
        self.read(AidDistribution::getDonorTotalCall { donor }).await
    }

    pub async fn fetch_aid_record(&self, id: U256) -> LedgerResult<AidRecord> {
        let found = self.read(AidDistribution::getAidRecordCall { id }).await?;
        Ok(AidRecord {
            id,
            receiver: found.receiver,
            amount: found.amount,
            status: AidStatus::try_from(found.status)?,
        })
    }

    // ---- confirmations ----

    /// Wait for `hash` to reach `depth`. `wait` defaults to the configured timeout.
    ///
    /// Timeout and cancellation are returned as `Failed` records, not errors.
    pub async fn await_confirmation(
        &self,
        hash: TxHash,
        depth: u64,
        wait: Option<Duration>,
        cancel: Option<broadcast::Receiver<()>>,
    ) -> LedgerResult<TransactionRecord> {
        let wait = wait.unwrap_or_else(|| self.default_wait());
        self.inner
            .submitter
            .await_confirmation(hash, depth, wait, cancel)
            .await
    }

    /// Check `hash` once against `depth`.
    pub async fn poll_transaction(&self, hash: TxHash, depth: u64) -> LedgerResult<TransactionRecord> {
        self.inner.submitter.poll(hash, depth).await
    }

    /// Last known record of a transaction submitted through this facade.
    pub fn transaction(&self, hash: TxHash) -> Option<TransactionRecord> {
        self.inner.submitter.record(hash)
    }

    // ---- events ----

    /// Options for a subscription on this network, from configuration.
    pub fn subscription_options(&self) -> LedgerResult<SubscriptionOptions> {
        let confirmations = self.inner.pool.networks().resolve(&self.network)?.confirmation_blocks;
        Ok(SubscriptionOptions::from_config(
            &self.inner.config.events,
            &self.inner.config.retry,
            confirmations,
        ))
    }

    /// Deliver `event` of `contract` to `handler` until the handle is stopped.
    pub fn subscribe(
        &self,
        contract: &str,
        event: &str,
        handler: Arc<dyn EventHandler>,
    ) -> LedgerResult<SubscriptionHandle> {
        self.subscribe_with(contract, event, handler, self.subscription_options()?)
    }

    pub fn subscribe_with(
        &self,
        contract: &str,
        event: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscriptionOptions,
    ) -> LedgerResult<SubscriptionHandle> {
        let deployment = self.deployment(contract)?;
        self.inner
            .subscriber
            .subscribe(deployment, event, handler, options)
    }

    /// Deliver `event` of `contract` into a bounded queue.
    pub fn subscribe_channel(
        &self,
        contract: &str,
        event: &str,
    ) -> LedgerResult<(SubscriptionHandle, mpsc::Receiver<LedgerEvent>)> {
        let deployment = self.deployment(contract)?;
        self.inner.subscriber.subscribe_channel(
            deployment,
            event,
            self.inner.config.events.channel_capacity,
            self.subscription_options()?,
        )
    }

    fn default_wait(&self) -> Duration {
        Duration::from_secs(self.inner.config.transactions.confirmation_timeout_secs)
    }

    async fn write<C: SolCall>(
        &self,
        from: Address,
        call: C,
        value: U256,
        options: &WriteOptions,
    ) -> LedgerResult<TransactionRecord> {
        let deployment = self.deployment(&self.inner.config.ledger.contract)?;
        let identity = self.inner.signers.signer_for(from, &self.network).await?;
        let record = self
            .inner
            .submitter
            .submit(&identity, deployment, &call, value)
            .await?;

        let Some(depth) = options.confirmations else {
            return Ok(record);
        };
        let wait = options.timeout.unwrap_or_else(|| self.default_wait());
        self.inner
            .submitter
            .await_confirmation(record.hash, depth, wait, None)
            .await?
            .into_result(depth.max(1))
    }

    async fn read<C: SolCall>(&self, call: C) -> LedgerResult<C::Return> {
        let deployment = self.deployment(&self.inner.config.ledger.contract)?;
        deployment.ensure_function::<C>()?;

        let connection = self.inner.pool.acquire(&self.network).await?;
        let request = CallRequest {
            from: None,
            to: deployment.address,
            input: call.abi_encode().into(),
            value: U256::ZERO,
        };

        let output = match connection.call(&request, None).await {
            Ok(output) => output,
            Err(e) => {
                if let Some(reason) = e.revert_reason() {
                    return Err(LedgerError::Reverted { reason, tx_hash: None });
                }
                if e.is_transient() {
                    self.inner.pool.evict(&self.network, &connection).await;
                }
                return Err(LedgerError::chain(&self.network, e));
            }
        };

        C::abi_decode_returns(&output)
            .map_err(|e| LedgerError::Abi(format!("cannot decode {} result: {}", C::SIGNATURE, e)))
    }
}
