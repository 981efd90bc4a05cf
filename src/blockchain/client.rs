//! Blockchain RPC client with timeouts.
//!
//! # Responsibilities
//! - Define the `Connection` seam the rest of the crate talks to
//! - Connect to the network's single JSON-RPC endpoint over HTTP
//! - Query chain state (chain id, head, nonces, receipts, logs, calls)
//! - Classify failures: transport errors and timeouts are transient, RPC error answers are not

use alloy::eips::BlockId;
use alloy::network::{ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::transports::TransportResult;
use async_trait::async_trait;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::types::{
    BlockchainError, BlockchainResult, CallRequest, ChainId, ChainLog, LogQuery, NetworkConfig,
    ReceiptSummary, SignedTransaction,
};

/// One live RPC connection to one network.
///
/// Implementations are shared read-only between tasks.
#[async_trait]
pub trait Connection: Send + Sync + std::fmt::Debug {
    /// Endpoint description safe for logs (no credentials).
    fn endpoint(&self) -> String;

    async fn chain_id(&self) -> BlockchainResult<ChainId>;

    /// Latest block number.
    async fn block_number(&self) -> BlockchainResult<u64>;

    /// Account transaction count including pending transactions.
    async fn transaction_count(&self, address: Address) -> BlockchainResult<u64>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> BlockchainResult<u128>;

    async fn send_raw_transaction(&self, tx: &SignedTransaction) -> BlockchainResult<TxHash>;

    /// Receipt of a mined transaction, `None` while pending or unknown.
    async fn transaction_receipt(&self, hash: TxHash) -> BlockchainResult<Option<ReceiptSummary>>;

    /// Execute a call without creating a transaction, at `block` or the latest block.
    async fn call(&self, request: &CallRequest, block: Option<u64>) -> BlockchainResult<Bytes>;

    async fn logs(&self, query: &LogQuery) -> BlockchainResult<Vec<ChainLog>>;
}

/// Opens connections for the provider pool.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    async fn connect(&self, network: &NetworkConfig) -> BlockchainResult<Arc<dyn Connection>>;
}

/// Connector backed by alloy HTTP providers. Verifies the chain id on connect.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlloyConnector;

#[async_trait]
impl Connector for AlloyConnector {
    async fn connect(&self, network: &NetworkConfig) -> BlockchainResult<Arc<dyn Connection>> {
        let connection = AlloyConnection::new(network)?;

        let chain_id = connection.chain_id().await?;
        if chain_id.0 != network.chain_id {
            return Err(BlockchainError::ChainMismatch {
                expected: network.chain_id,
                actual: chain_id.0,
            });
        }

        tracing::info!(
            network = %network.name,
            endpoint = %connection.endpoint(),
            chain_id = network.chain_id,
            "Blockchain connection established"
        );
        Ok(Arc::new(connection))
    }
}

/// Alloy HTTP provider for one network endpoint.
///
/// Every call of a connection goes to the same node, so a head read and the log
/// query that follows it see the same chain.
#[derive(Clone)]
pub struct AlloyConnection {
    network: String,
    provider: DynProvider,
    /// Host of the endpoint, for logs.
    host: String,
    /// Request timeout duration.
    timeout_duration: Duration,
}

impl AlloyConnection {
    /// Build the provider for the network's endpoint. Does not touch the network.
    pub fn new(config: &NetworkConfig) -> BlockchainResult<Self> {
        let url: url::Url = config
            .rpc_url
            .parse()
            .map_err(|e: url::ParseError| BlockchainError::InvalidUrl {
                url: redact(&config.rpc_url),
                reason: e.to_string(),
            })?;

        Ok(Self {
            network: config.name.clone(),
            host: host_of(&url),
            provider: ProviderBuilder::new().connect_http(url).erased(),
            timeout_duration: config.rpc_timeout(),
        })
    }

    /// Run one request with the configured deadline.
    async fn request<T, R>(&self, operation: &'static str, request: R) -> BlockchainResult<T>
    where
        R: IntoFuture<Output = TransportResult<T>>,
    {
        match timeout(self.timeout_duration, request.into_future()).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                let err = BlockchainError::from(e);
                tracing::debug!(network = %self.network, operation = operation, error = %err, "RPC request failed");
                Err(err)
            }
            Err(_) => {
                tracing::warn!(network = %self.network, operation = operation, "RPC request timed out");
                Err(BlockchainError::Timeout(self.timeout_duration.as_secs()))
            }
        }
    }
}

#[async_trait]
impl Connection for AlloyConnection {
    fn endpoint(&self) -> String {
        self.host.clone()
    }

    async fn chain_id(&self) -> BlockchainResult<ChainId> {
        self.request("eth_chainId", self.provider.get_chain_id())
            .await
            .map(ChainId)
    }

    async fn block_number(&self) -> BlockchainResult<u64> {
        self.request("eth_blockNumber", self.provider.get_block_number())
            .await
    }

    async fn transaction_count(&self, address: Address) -> BlockchainResult<u64> {
        self.request(
            "eth_getTransactionCount",
            self.provider.get_transaction_count(address).pending(),
        )
        .await
    }

    async fn gas_price(&self) -> BlockchainResult<u128> {
        self.request("eth_gasPrice", self.provider.get_gas_price())
            .await
    }

    async fn send_raw_transaction(&self, tx: &SignedTransaction) -> BlockchainResult<TxHash> {
        self.request("eth_sendRawTransaction", async {
            self.provider
                .send_raw_transaction(&tx.raw)
                .await
                .map(|pending| *pending.tx_hash())
        })
        .await
    }

    async fn transaction_receipt(&self, hash: TxHash) -> BlockchainResult<Option<ReceiptSummary>> {
        let receipt = self
            .request("eth_getTransactionReceipt", self.provider.get_transaction_receipt(hash))
            .await?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let Some(block_number) = receipt.block_number else {
            return Ok(None);
        };

        Ok(Some(ReceiptSummary {
            tx_hash: hash,
            block_number,
            success: receipt.status(),
            logs: receipt.inner.logs().iter().filter_map(to_chain_log).collect(),
        }))
    }

    async fn call(&self, request: &CallRequest, block: Option<u64>) -> BlockchainResult<Bytes> {
        let mut tx = TransactionRequest::default()
            .with_to(request.to)
            .with_input(request.input.clone())
            .with_value(request.value);
        if let Some(from) = request.from {
            tx = tx.with_from(from);
        }

        self.request("eth_call", async {
            match block {
                Some(number) => self.provider.call(tx).block(BlockId::number(number)).await,
                None => self.provider.call(tx).await,
            }
        })
        .await
    }

    async fn logs(&self, query: &LogQuery) -> BlockchainResult<Vec<ChainLog>> {
        let filter = Filter::new()
            .address(query.address)
            .event_signature(query.topic0)
            .from_block(query.from_block)
            .to_block(query.to_block);

        let logs = self
            .request("eth_getLogs", self.provider.get_logs(&filter))
            .await?;

        Ok(logs.iter().filter_map(to_chain_log).collect())
    }
}

impl std::fmt::Debug for AlloyConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyConnection")
            .field("network", &self.network)
            .field("host", &self.host)
            .field("timeout_secs", &self.timeout_duration.as_secs())
            .finish()
    }
}

/// Mined logs only; pending logs carry no position.
fn to_chain_log(log: &Log) -> Option<ChainLog> {
    Some(ChainLog {
        address: log.address(),
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        block_number: log.block_number?,
        log_index: log.log_index?,
        tx_hash: log.transaction_hash?,
    })
}

fn host_of(url: &url::Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        _ => url.scheme().to_string(),
    }
}

/// Keep scheme and host of an endpoint; paths often embed API keys.
fn redact(raw: &str) -> String {
    match raw.parse::<url::Url>() {
        Ok(url) => format!("{}://{}", url.scheme(), host_of(&url)),
        Err(_) => "<unparsable>".to_string(),
    }
}
