//! Transaction building, signing, submission and confirmation tracking.
//!
//! # Responsibilities
//! - Price, sign and broadcast typed contract calls
//! - Keep a [`TransactionRecord`] per submitted hash
//! - Poll receipts until the caller's confirmation depth, a revert, a timeout or cancellation
//! - Recover revert reasons by replaying failed calls
//!
//! # Data Flow
//! ```text
//! submit(identity, deployment, call, value)
//!     → gas price check (before any nonce is taken)
//!     → SignerManager::lease_nonce → sign → broadcast (transport retries, same bytes)
//!     → transport failure: ask the node by hash and nonce whether it holds the bytes
//!     → commit or release the nonce → TransactionRecord { Pending }
//!
//! await_confirmation(hash, depth, timeout, cancel)
//!     → poll receipt every interval → Confirmed | Failed(Revert) | Failed(Timeout) | Failed(Cancelled)
//! ```

use alloy::primitives::{Bytes, TxHash, U256};
use alloy::sol_types::SolCall;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::blockchain::client::Connection;
use crate::blockchain::pool::ProviderPool;
use crate::blockchain::types::{
    BlockchainError, CallRequest, ChainLog, FailureReason, SignedTransaction, TransactionRecord, TxStatus,
};
use crate::blockchain::wallet::{SignerManager, SigningIdentity, UnsignedCall};
use crate::config::schema::{RetryConfig, TransactionConfig};
use crate::error::{LedgerError, LedgerResult};
use crate::observability::metrics;
use crate::registry::contracts::ContractDeployment;
use crate::resilience::retries::{retry_with_backoff, RetryPolicy};

const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Pricing and polling policy for submissions.
#[derive(Debug, Clone)]
pub struct SubmissionPolicy {
    pub gas_limit: u64,
    pub gas_price_multiplier: f64,
    pub max_gas_price_gwei: u64,
    pub poll_interval: Duration,
    /// Budget for re-sending the same signed bytes after transport failures.
    pub send_retry: RetryPolicy,
}

impl SubmissionPolicy {
    pub fn from_config(transactions: &TransactionConfig, retry: &RetryConfig) -> Self {
        Self {
            gas_limit: transactions.gas_limit,
            gas_price_multiplier: transactions.gas_price_multiplier,
            max_gas_price_gwei: transactions.max_gas_price_gwei,
            poll_interval: Duration::from_millis(transactions.poll_interval_ms),
            send_retry: RetryPolicy::from(retry),
        }
    }

    /// Node gas price with the safety multiplier applied, or an error above the ceiling.
    pub fn price(&self, node_price: u128) -> LedgerResult<u128> {
        let adjusted = (node_price as f64 * self.gas_price_multiplier) as u128;
        let adjusted_gwei = adjusted / WEI_PER_GWEI;
        if adjusted_gwei > self.max_gas_price_gwei as u128 {
            return Err(LedgerError::GasPriceTooHigh {
                current_gwei: adjusted_gwei.min(u64::MAX as u128) as u64,
                max_gwei: self.max_gas_price_gwei,
            });
        }
        Ok(adjusted)
    }
}

impl Default for SubmissionPolicy {
    fn default() -> Self {
        Self::from_config(&TransactionConfig::default(), &RetryConfig::default())
    }
}

/// Confirmations of a transaction included at `inclusion` when the head is `head`.
///
/// The inclusion block counts as the first confirmation.
pub fn confirmations(head: u64, inclusion: u64) -> u64 {
    head.saturating_sub(inclusion) + 1
}

/// What the node knows about a transaction whose every send failed in transport.
#[derive(Debug)]
enum SendOutcome {
    Received,
    NotReceived,
    Unknown(String),
}

#[derive(Debug, Clone)]
struct TrackedTransaction {
    record: TransactionRecord,
    /// The call as submitted, replayed to recover a revert reason.
    replay: CallRequest,
    logs: Vec<ChainLog>,
}

/// Builds, signs and submits transactions; tracks them to a terminal state.
#[derive(Debug)]
pub struct TransactionSubmitter {
    pool: Arc<ProviderPool>,
    signers: Arc<SignerManager>,
    policy: SubmissionPolicy,
    tracked: DashMap<TxHash, TrackedTransaction>,
}

impl TransactionSubmitter {
    /// Create a new transaction submitter.
    pub fn new(pool: Arc<ProviderPool>, signers: Arc<SignerManager>, policy: SubmissionPolicy) -> Self {
        Self {
            pool,
            signers,
            policy,
            tracked: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &SubmissionPolicy {
        &self.policy
    }

    /// Sign and broadcast `call` against `deployment` from `identity`.
    ///
    /// Returns a `Pending` record whose hash is final. The nonce is consumed once the
    /// node accepted the transaction; a rejection before acceptance frees it again.
    /// When every send failed in transport the node is asked for the transaction by
    /// hash and nonce: the nonce is freed only if the node provably never got it, and
    /// an unanswerable lookup yields `SubmissionUnresolved` with the hash still tracked.
    pub async fn submit<C: SolCall>(
        &self,
        identity: &SigningIdentity,
        deployment: &ContractDeployment,
        call: &C,
        value: U256,
    ) -> LedgerResult<TransactionRecord> {
        deployment.ensure_function::<C>()?;
        if deployment.network != identity.network {
            return Err(LedgerError::Config(format!(
                "identity on '{}' cannot submit to {} on '{}'",
                identity.network, deployment.contract_name, deployment.network
            )));
        }

        let network = identity.network.as_str();
        let connection = self.pool.acquire(network).await?;

        let node_price = match connection.gas_price().await {
            Ok(price) => price,
            Err(e) => return Err(self.fail_transport(network, &connection, e).await),
        };
        let gas_price = self.policy.price(node_price)?;

        let input: Bytes = call.abi_encode().into();
        let lease = self.signers.lease_nonce(identity).await?;
        let signed = self
            .signers
            .sign(
                &lease,
                UnsignedCall {
                    to: deployment.address,
                    value,
                    input: input.clone(),
                    gas_limit: self.policy.gas_limit,
                    gas_price,
                },
            )
            .await?;

        tracing::debug!(
            network = %network,
            tx_hash = %signed.hash,
            nonce = signed.nonce,
            function = C::SIGNATURE,
            "Broadcasting transaction"
        );

        let sent = retry_with_backoff(
            &self.policy.send_retry,
            "send_raw_transaction",
            || async {
                match connection.send_raw_transaction(&signed).await {
                    Err(e) if e.is_already_known() => Ok(signed.hash),
                    other => other,
                }
            },
            BlockchainError::is_transient,
        )
        .await;

        // A transport failure says nothing about whether the node took the bytes.
        let sent = match sent {
            Err(e) if e.is_transient() => {
                self.pool.evict(network, &connection).await;
                match self.settle_lost_send(identity, &signed).await {
                    SendOutcome::Received => {
                        tracing::warn!(
                            network = %network,
                            tx_hash = %signed.hash,
                            nonce = signed.nonce,
                            error = %e,
                            "Send failed in transport but the node has the transaction"
                        );
                        Ok(signed.hash)
                    }
                    SendOutcome::NotReceived => Err(e),
                    SendOutcome::Unknown(lookup_error) => {
                        lease.commit();
                        self.track(&signed, identity, deployment, input, value);
                        metrics::record_submission(network, "unresolved");
                        tracing::error!(
                            network = %network,
                            tx_hash = %signed.hash,
                            nonce = signed.nonce,
                            error = %e,
                            lookup_error = %lookup_error,
                            "Send outcome unknown, nonce kept"
                        );
                        return Err(LedgerError::SubmissionUnresolved {
                            network: network.to_string(),
                            tx_hash: signed.hash,
                            nonce: signed.nonce,
                            message: e.to_string(),
                        });
                    }
                }
            }
            other => other,
        };

        match sent {
            Ok(node_hash) => {
                if node_hash != signed.hash {
                    tracing::warn!(
                        network = %network,
                        tx_hash = %signed.hash,
                        node_hash = %node_hash,
                        "Node reported a different transaction hash"
                    );
                }
                lease.commit();
                let record = self.track(&signed, identity, deployment, input, value);

                metrics::record_submission(network, "submitted");
                tracing::info!(
                    network = %network,
                    tx_hash = %record.hash,
                    nonce = record.nonce,
                    from = %record.from,
                    function = C::SIGNATURE,
                    "Transaction submitted"
                );
                Ok(record)
            }
            Err(e) if e.is_nonce_conflict() => {
                // Another transaction holds this nonce on the node.
                lease.commit();
                metrics::record_submission(network, "nonce_conflict");
                tracing::error!(
                    network = %network,
                    address = %identity.address,
                    nonce = signed.nonce,
                    error = %e,
                    "Nonce conflict"
                );
                Err(LedgerError::NonceConflict {
                    address: identity.address,
                    network: network.to_string(),
                    nonce: signed.nonce,
                    message: e.to_string(),
                })
            }
            Err(e) => {
                lease.release();
                if let Some(reason) = e.revert_reason() {
                    metrics::record_submission(network, "reverted");
                    tracing::warn!(network = %network, tx_hash = %signed.hash, reason = %reason, "Transaction rejected with revert");
                    return Err(LedgerError::Reverted {
                        reason,
                        tx_hash: Some(signed.hash),
                    });
                }
                if e.is_transient() {
                    metrics::record_submission(network, "unreachable");
                    tracing::warn!(network = %network, tx_hash = %signed.hash, error = %e, "Transaction never reached the node");
                    return Err(LedgerError::chain(network, e));
                }
                metrics::record_submission(network, "rejected");
                tracing::warn!(network = %network, tx_hash = %signed.hash, error = %e, "Transaction rejected by node");
                Err(LedgerError::Rejected(e.to_string()))
            }
        }
    }

    /// Start tracking a transaction the node holds (or may hold) as `Pending`.
    fn track(
        &self,
        signed: &SignedTransaction,
        identity: &SigningIdentity,
        deployment: &ContractDeployment,
        input: Bytes,
        value: U256,
    ) -> TransactionRecord {
        let record = TransactionRecord::pending(signed.hash, signed.nonce, &identity.network, identity.address);
        self.tracked.insert(
            signed.hash,
            TrackedTransaction {
                record: record.clone(),
                replay: CallRequest {
                    from: Some(identity.address),
                    to: deployment.address,
                    input,
                    value,
                },
                logs: Vec::new(),
            },
        );
        record
    }

    /// Ask the node whether it holds `signed` after every send attempt failed in transport.
    ///
    /// A receipt, or a pending transaction count past the nonce, means received. A
    /// count still at the nonce means the bytes never arrived.
    async fn settle_lost_send(&self, identity: &SigningIdentity, signed: &SignedTransaction) -> SendOutcome {
        let network = identity.network.as_str();
        let connection = match self.pool.acquire(network).await {
            Ok(connection) => connection,
            Err(e) => return SendOutcome::Unknown(e.to_string()),
        };

        let lookup = async {
            if connection.transaction_receipt(signed.hash).await?.is_some() {
                return Ok(true);
            }
            let count = connection.transaction_count(identity.address).await?;
            Ok::<_, BlockchainError>(count > signed.nonce)
        };

        match lookup.await {
            Ok(true) => SendOutcome::Received,
            Ok(false) => SendOutcome::NotReceived,
            Err(e) => {
                if e.is_transient() {
                    self.pool.evict(network, &connection).await;
                }
                SendOutcome::Unknown(e.to_string())
            }
        }
    }

    /// Current record of a submitted transaction.
    pub fn record(&self, hash: TxHash) -> Option<TransactionRecord> {
        self.tracked.get(&hash).map(|t| t.record.clone())
    }

    /// Logs from the receipt, once the transaction has been observed mined.
    pub fn receipt_logs(&self, hash: TxHash) -> Vec<ChainLog> {
        self.tracked
            .get(&hash)
            .map(|t| t.logs.clone())
            .unwrap_or_default()
    }

    /// Check the transaction once against `depth`.
    ///
    /// Network failures are reported as `Failed(Network)` without changing the
    /// stored record.
    pub async fn poll(&self, hash: TxHash, depth: u64) -> LedgerResult<TransactionRecord> {
        let depth = depth.max(1);
        match self.observe(hash, depth).await {
            Err(e) if e.is_transient() => {
                let mut snapshot = self.record(hash).ok_or(LedgerError::UnknownTransaction(hash))?;
                snapshot.status = TxStatus::Failed(FailureReason::Network(e.to_string()));
                Ok(snapshot)
            }
            other => other,
        }
    }

    /// Wait until the transaction reaches `depth`, reverts, `wait` elapses or `cancel` fires.
    ///
    /// Timeout and cancellation return `Failed(Timeout)` / `Failed(Cancelled)` snapshots;
    /// the stored record stays `Pending` and can be polled again.
    pub async fn await_confirmation(
        &self,
        hash: TxHash,
        depth: u64,
        wait: Duration,
        cancel: Option<broadcast::Receiver<()>>,
    ) -> LedgerResult<TransactionRecord> {
        let depth = depth.max(1);
        let known = self.record(hash).ok_or(LedgerError::UnknownTransaction(hash))?;
        let network = known.network.clone();

        let poll_loop = async {
            let mut ticker = interval(self.policy.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match self.observe(hash, depth).await {
                    Ok(record) if record.status != TxStatus::Pending => return Ok(record),
                    Ok(record) => {
                        tracing::debug!(
                            tx_hash = %hash,
                            confirmations = record.confirmation_count,
                            required = depth,
                            "Waiting for confirmations"
                        );
                    }
                    Err(e) if e.is_transient() => {
                        tracing::warn!(tx_hash = %hash, error = %e, "Receipt poll failed, retrying");
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let outcome = tokio::select! {
            result = timeout(wait, poll_loop) => result.ok(),
            _ = cancelled(cancel) => {
                metrics::record_confirmation(&network, "cancelled");
                tracing::info!(tx_hash = %hash, "Confirmation wait cancelled");
                return self.snapshot(hash, FailureReason::Cancelled);
            }
        };

        match outcome {
            Some(Ok(record)) => {
                let outcome = if record.is_confirmed() { "confirmed" } else { "reverted" };
                metrics::record_confirmation(&network, outcome);
                Ok(record)
            }
            Some(Err(e)) => Err(e),
            None => {
                metrics::record_confirmation(&network, "timeout");
                tracing::warn!(tx_hash = %hash, depth = depth, wait_ms = wait.as_millis() as u64, "Confirmation wait timed out");
                self.snapshot(hash, FailureReason::Timeout)
            }
        }
    }

    /// One receipt check. Updates the stored record and returns it, judged against `depth`.
    async fn observe(&self, hash: TxHash, depth: u64) -> LedgerResult<TransactionRecord> {
        let tracked = self
            .tracked
            .get(&hash)
            .map(|t| t.clone())
            .ok_or(LedgerError::UnknownTransaction(hash))?;
        let stored = &tracked.record;

        match &stored.status {
            TxStatus::Confirmed if stored.confirmation_count >= depth => return Ok(stored.clone()),
            TxStatus::Failed(reason) if reason.is_final() => return Ok(stored.clone()),
            _ => {}
        }

        let network = stored.network.as_str();
        let connection = self.pool.acquire(network).await?;

        let receipt = match connection.transaction_receipt(hash).await {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.fail_transport(network, &connection, e).await),
        };
        let Some(receipt) = receipt else {
            return Ok(stored.clone());
        };

        let head = match connection.block_number().await {
            Ok(head) => head,
            Err(e) => return Err(self.fail_transport(network, &connection, e).await),
        };
        let count = confirmations(head, receipt.block_number);

        let status = if !receipt.success {
            let reason = self
                .revert_reason(&connection, &tracked.replay, receipt.block_number)
                .await;
            tracing::warn!(network = %network, tx_hash = %hash, reason = %reason, "Transaction reverted on-chain");
            TxStatus::Failed(FailureReason::Revert(reason))
        } else if count >= depth {
            TxStatus::Confirmed
        } else {
            TxStatus::Pending
        };

        let mut updated = match self.tracked.get_mut(&hash) {
            Some(mut entry) => {
                entry.record.block_number = Some(receipt.block_number);
                entry.record.confirmation_count = entry.record.confirmation_count.max(count);
                if entry.record.advance(status.clone()) {
                    tracing::info!(
                        network = %network,
                        tx_hash = %hash,
                        block = receipt.block_number,
                        status = ?status,
                        "Transaction status changed"
                    );
                }
                entry.logs = receipt.logs;
                entry.record.clone()
            }
            None => return Err(LedgerError::UnknownTransaction(hash)),
        };

        // A record confirmed at a shallower depth is still pending for this caller.
        if updated.is_confirmed() && updated.confirmation_count < depth {
            updated.status = TxStatus::Pending;
        }
        Ok(updated)
    }

    /// Replay the call against the parent block's state to learn why it reverted.
    async fn revert_reason(&self, connection: &Arc<dyn Connection>, replay: &CallRequest, block: u64) -> String {
        match connection.call(replay, Some(block.saturating_sub(1))).await {
            Err(e) => e
                .revert_reason()
                .unwrap_or_else(|| format!("execution reverted ({})", e)),
            Ok(_) => "execution reverted".to_string(),
        }
    }

    fn snapshot(&self, hash: TxHash, reason: FailureReason) -> LedgerResult<TransactionRecord> {
        let mut snapshot = self.record(hash).ok_or(LedgerError::UnknownTransaction(hash))?;
        if !snapshot.status.is_terminal() {
            snapshot.status = TxStatus::Failed(reason);
        }
        Ok(snapshot)
    }

    /// Evict a connection after a transport failure and build the caller error.
    async fn fail_transport(&self, network: &str, connection: &Arc<dyn Connection>, e: BlockchainError) -> LedgerError {
        if e.is_transient() {
            self.pool.evict(network, connection).await;
        }
        LedgerError::chain(network, e)
    }
}

/// Resolve when the receiver fires. A closed channel never cancels.
async fn cancelled(cancel: Option<broadcast::Receiver<()>>) {
    let Some(mut rx) = cancel else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => return std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_counting() {
        assert_eq!(confirmations(100, 100), 1);
        assert_eq!(confirmations(102, 100), 3);
        // Head observed on a lagging node
        assert_eq!(confirmations(99, 100), 1);
    }

    #[test]
    fn test_gas_price_policy() {
        let policy = SubmissionPolicy {
            gas_price_multiplier: 1.5,
            max_gas_price_gwei: 100,
            ..SubmissionPolicy::default()
        };
        assert_eq!(policy.price(10 * WEI_PER_GWEI).unwrap(), 15 * WEI_PER_GWEI);

        match policy.price(80 * WEI_PER_GWEI) {
            Err(LedgerError::GasPriceTooHigh { current_gwei, max_gwei }) => {
                assert_eq!(current_gwei, 120);
                assert_eq!(max_gwei, 100);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_policy_from_config() {
        let policy = SubmissionPolicy::default();
        assert_eq!(policy.gas_limit, 300_000);
        assert_eq!(policy.poll_interval, Duration::from_millis(2000));
        assert_eq!(policy.send_retry.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_closed_cancel_channel_never_fires() {
        let (tx, rx) = broadcast::channel::<()>(1);
        drop(tx);
        let fired = timeout(Duration::from_millis(20), cancelled(Some(rx))).await;
        assert!(fired.is_err());

        let (tx, rx) = broadcast::channel::<()>(1);
        tx.send(()).unwrap();
        assert!(timeout(Duration::from_millis(20), cancelled(Some(rx))).await.is_ok());
    }
}
