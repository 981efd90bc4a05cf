//! One shared RPC connection per network.
//!
//! # Responsibilities
//! - Open connections lazily on first `acquire`
//! - Share one connection between all callers of a network
//! - Retry opening with exponential backoff, then fail with a connection error
//! - Replace a broken connection only after it was explicitly evicted
//!
//! # Data Flow
//! ```text
//! acquire(network) → slot lock (per network) → cached? return clone
//!                                           → no: Connector::connect with retries → cache
//! evict(network, &conn) → clears the slot only if it still holds `conn`
//! ```

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::blockchain::client::{Connection, Connector};
use crate::error::{LedgerError, LedgerResult};
use crate::observability::metrics;
use crate::registry::networks::NetworkRegistry;
use crate::resilience::retries::{retry_with_backoff, RetryPolicy};

type Slot = Arc<Mutex<Option<Arc<dyn Connection>>>>;

/// Lazily populated map of network name → live connection.
#[derive(Debug)]
pub struct ProviderPool {
    networks: NetworkRegistry,
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
    slots: DashMap<String, Slot>,
}

impl ProviderPool {
    pub fn new(networks: NetworkRegistry, connector: Arc<dyn Connector>, retry: RetryPolicy) -> Self {
        Self {
            networks,
            connector,
            retry,
            slots: DashMap::new(),
        }
    }

    pub fn networks(&self) -> &NetworkRegistry {
        &self.networks
    }

    /// Connection for `network`, opening it if needed.
    ///
    /// Concurrent callers for the same network wait on one connection attempt.
    pub async fn acquire(&self, network: &str) -> LedgerResult<Arc<dyn Connection>> {
        let config = self.networks.resolve(network)?;

        let slot = self
            .slots
            .entry(network.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut guard = slot.lock().await;
        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }

        let result = retry_with_backoff(
            &self.retry,
            "connect",
            || self.connector.connect(config),
            |e| e.is_transient(),
        )
        .await;

        match result {
            Ok(connection) => {
                metrics::record_connection_health(network, true);
                *guard = Some(connection.clone());
                Ok(connection)
            }
            Err(e) => {
                metrics::record_connection_health(network, false);
                tracing::error!(network = %network, error = %e, "Failed to open RPC connection");
                Err(LedgerError::chain(network, e))
            }
        }
    }

    /// Drop the cached connection for `network` if it is still `connection`.
    ///
    /// Callers that observed a broken connection evict it; the next `acquire`
    /// opens a fresh one. A connection that was already replaced is left alone.
    pub async fn evict(&self, network: &str, connection: &Arc<dyn Connection>) -> bool {
        let Some(slot) = self.slots.get(network).map(|slot| slot.clone()) else {
            return false;
        };

        let mut guard = slot.lock().await;
        let same = guard
            .as_ref()
            .is_some_and(|cached| Arc::ptr_eq(cached, connection));
        if same {
            *guard = None;
            metrics::record_connection_health(network, false);
            tracing::warn!(network = %network, "RPC connection evicted");
        }
        same
    }

    /// Whether a connection for `network` is currently cached.
    pub async fn is_connected(&self, network: &str) -> bool {
        match self.slots.get(network).map(|slot| slot.clone()) {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }
}
