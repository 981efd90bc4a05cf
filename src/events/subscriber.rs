//! Event subscriptions with durable cursors and gap replay.
//!
//! # Responsibilities
//! - Follow one event of one deployed contract on one network
//! - Deliver events in (block, log index) order, at least once, without duplicates
//!   inside one process
//! - Advance the persisted cursor only after the handler consumed a block
//! - Survive connection loss by evicting, reconnecting and replaying the gap
//!
//! # States
//! ```text
//! Idle → Subscribing → Streaming ─(connection lost)→ Reconnecting → Subscribing → …
//!          │              │
//!          └──────────────┴─(stop / fatal error)→ Stopped
//! ```
//!
//! # Data Flow
//! ```text
//! Subscribing: cursor (store) → logs (cursor, safe head] in ranges → handler → cursor
//! Streaming:   every poll interval, the same pass from the cursor to the new safe head
//! ```

use alloy::primitives::{Address, B256};
use dashmap::DashSet;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::blockchain::client::Connection;
use crate::blockchain::pool::ProviderPool;
use crate::blockchain::types::LogQuery;
use crate::config::schema::{EventsConfig, RetryConfig};
use crate::error::{LedgerError, LedgerResult};
use crate::events::cursor::{CursorKey, CursorStore, EventCursor};
use crate::events::handler::{ChannelHandler, EventHandler};
use crate::events::types::{EventKey, LedgerEvent, SubscriberState};
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::registry::contracts::ContractDeployment;
use crate::resilience::retries::RetryPolicy;

/// Tuning for one subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    /// Interval between head checks while streaming.
    pub poll_interval: Duration,
    /// Largest block span requested in one log query.
    pub max_block_range: u64,
    /// Depth a block needs before its events are delivered. 1 = the head itself.
    pub confirmations: u64,
    /// First block to scan when no cursor exists. `None` starts at the current safe head.
    pub start_block: Option<u64>,
    /// Backoff curve between reconnect attempts.
    pub reconnect: RetryPolicy,
}

impl SubscriptionOptions {
    pub fn from_config(events: &EventsConfig, retry: &RetryConfig, confirmations: u64) -> Self {
        Self {
            poll_interval: Duration::from_millis(events.poll_interval_ms),
            max_block_range: events.max_block_range,
            confirmations,
            start_block: None,
            reconnect: RetryPolicy::from(retry),
        }
    }

    pub fn with_start_block(mut self, start_block: Option<u64>) -> Self {
        self.start_block = start_block;
        self
    }

    /// Highest block whose events may be delivered when the head is `head`.
    pub fn safe_head(&self, head: u64) -> u64 {
        head.saturating_sub(self.confirmations.max(1) - 1)
    }
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self::from_config(&EventsConfig::default(), &RetryConfig::default(), 1)
    }
}

/// Cursor keys with a live subscriber in this process.
#[derive(Debug, Clone, Default)]
pub struct ActiveSubscriptions {
    keys: Arc<DashSet<CursorKey>>,
}

impl ActiveSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(&self, key: &CursorKey) -> LedgerResult<SubscriptionClaim> {
        if !self.keys.insert(key.clone()) {
            return Err(LedgerError::SubscriptionActive(key.to_string()));
        }
        Ok(SubscriptionClaim {
            keys: self.keys.clone(),
            key: key.clone(),
        })
    }

    pub fn is_active(&self, key: &CursorKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Exclusive ownership of a cursor key; released on drop.
#[derive(Debug)]
struct SubscriptionClaim {
    keys: Arc<DashSet<CursorKey>>,
    key: CursorKey,
}

impl Drop for SubscriptionClaim {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}

/// Starts subscription tasks.
#[derive(Debug, Clone)]
pub struct EventSubscriber {
    pool: Arc<ProviderPool>,
    cursors: Arc<dyn CursorStore>,
    active: ActiveSubscriptions,
}

impl EventSubscriber {
    pub fn new(pool: Arc<ProviderPool>, cursors: Arc<dyn CursorStore>, active: ActiveSubscriptions) -> Self {
        Self {
            pool,
            cursors,
            active,
        }
    }

    pub fn active(&self) -> &ActiveSubscriptions {
        &self.active
    }

    /// Subscribe `handler` to `event_name` on `deployment`.
    ///
    /// Fails if the event is not in the deployment's ABI or if another live
    /// subscription owns the same cursor. Must be called inside a Tokio runtime.
    pub fn subscribe(
        &self,
        deployment: &ContractDeployment,
        event_name: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscriptionOptions,
    ) -> LedgerResult<SubscriptionHandle> {
        let topic0 = deployment.event_topic(event_name)?;
        let key = CursorKey::new(&deployment.contract_name, &deployment.network, event_name);
        let claim = self.active.claim(&key)?;

        let (state_tx, state_rx) = watch::channel(SubscriberState::Idle);
        let shutdown = Shutdown::new();

        let task = SubscriptionTask {
            key: key.clone(),
            address: deployment.address,
            topic0,
            pool: self.pool.clone(),
            cursors: self.cursors.clone(),
            handler,
            options,
            state: state_tx,
            shutdown: shutdown.clone(),
            delivered: BTreeMap::new(),
            reconnects: 0,
            claim: Some(claim),
        };

        tracing::info!(subscription = %key, address = %deployment.address, "Starting event subscription");
        let join = tokio::spawn(task.run());

        Ok(SubscriptionHandle {
            key,
            state: state_rx,
            shutdown,
            task: Some(join),
        })
    }

    /// Subscribe with a bounded channel as the handler.
    pub fn subscribe_channel(
        &self,
        deployment: &ContractDeployment,
        event_name: &str,
        capacity: usize,
        options: SubscriptionOptions,
    ) -> LedgerResult<(SubscriptionHandle, mpsc::Receiver<LedgerEvent>)> {
        let (handler, rx) = ChannelHandler::channel(capacity);
        let handle = self.subscribe(deployment, event_name, Arc::new(handler), options)?;
        Ok((handle, rx))
    }
}

/// Controls one running subscription. Dropping the handle stops it.
#[derive(Debug)]
pub struct SubscriptionHandle {
    key: CursorKey,
    state: watch::Receiver<SubscriberState>,
    shutdown: Shutdown,
    task: Option<JoinHandle<LedgerResult<()>>>,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &CursorKey {
        &self.key
    }

    pub fn state(&self) -> SubscriberState {
        *self.state.borrow()
    }

    /// Receiver of state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SubscriberState> {
        self.state.clone()
    }

    /// Wait until the subscription reaches `target` or stops. Returns the state reached.
    pub async fn wait_for(&mut self, target: SubscriberState) -> SubscriberState {
        let reached = self
            .state
            .wait_for(|state| *state == target || *state == SubscriberState::Stopped)
            .await
            .map(|state| *state);
        match reached {
            Ok(state) => state,
            Err(_) => *self.state.borrow(),
        }
    }

    /// Stop the subscription and wait for its task.
    ///
    /// Returns the error that stopped the subscription, if one did.
    pub async fn stop(mut self) -> LedgerResult<()> {
        self.shutdown.trigger();
        self.join_task().await
    }

    /// Wait for the subscription to end on its own (fatal error or external stop).
    pub async fn join(mut self) -> LedgerResult<()> {
        self.join_task().await
    }

    /// Stop trigger shared with the task, for wiring into a process-wide shutdown.
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    async fn join_task(&mut self) -> LedgerResult<()> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| LedgerError::TaskFailed(format!("subscription {}: {}", self.key, e)))?,
            None => Ok(()),
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.shutdown.trigger();
        }
    }
}

/// Result of one catch-up pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Cursor reached the safe head.
    Drained,
    /// A handler failed; the cursor stopped before the failing event's block.
    Halted,
}

struct SubscriptionTask {
    key: CursorKey,
    address: Address,
    topic0: B256,
    pool: Arc<ProviderPool>,
    cursors: Arc<dyn CursorStore>,
    handler: Arc<dyn EventHandler>,
    options: SubscriptionOptions,
    state: watch::Sender<SubscriberState>,
    shutdown: Shutdown,
    /// Events delivered in blocks above the cursor, by block.
    delivered: BTreeMap<u64, HashSet<EventKey>>,
    reconnects: u32,
    /// Released before the task reports `Stopped`.
    claim: Option<SubscriptionClaim>,
}

impl SubscriptionTask {
    async fn run(mut self) -> LedgerResult<()> {
        let mut stop = self.shutdown.subscribe();
        let result = self.drive(&mut stop).await;
        if let Err(e) = &result {
            tracing::error!(subscription = %self.key, error = %e, "Subscription failed");
        }
        self.claim.take();
        self.set_state(SubscriberState::Stopped);
        result
    }

    async fn drive(&mut self, stop: &mut broadcast::Receiver<()>) -> LedgerResult<()> {
        loop {
            if self.shutdown.is_triggered() {
                return Ok(());
            }
            self.set_state(SubscriberState::Subscribing);

            let result = tokio::select! {
                _ = stop.recv() => return Ok(()),
                result = self.stream() => result,
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    self.set_state(SubscriberState::Reconnecting);
                    self.reconnects += 1;
                    let delay = self.options.reconnect.delay_for(self.reconnects);
                    metrics::record_reconnect(&self.key.to_string());
                    tracing::warn!(
                        subscription = %self.key,
                        attempt = self.reconnects,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Connection lost, reconnecting"
                    );
                    tokio::select! {
                        _ = stop.recv() => return Ok(()),
                        _ = sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Acquire a connection, replay the backlog, then follow new blocks.
    ///
    /// Only returns with an error; transport errors evict the connection first.
    async fn stream(&mut self) -> LedgerResult<()> {
        let connection = self.pool.acquire(&self.key.network).await?;
        let result = self.follow(&connection).await;
        if let Err(e) = &result {
            if e.is_transient() {
                self.pool.evict(&self.key.network, &connection).await;
            }
        }
        result
    }

    async fn follow(&mut self, connection: &Arc<dyn Connection>) -> LedgerResult<()> {
        let mut cursor = self.load_cursor(connection).await?;
        let mut ticker = interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        while self.catch_up(connection, &mut cursor).await? == Pass::Halted {
            ticker.tick().await;
        }

        self.reconnects = 0;
        self.set_state(SubscriberState::Streaming);

        loop {
            ticker.tick().await;
            self.catch_up(connection, &mut cursor).await?;
        }
    }

    async fn load_cursor(&self, connection: &Arc<dyn Connection>) -> LedgerResult<EventCursor> {
        if let Some(cursor) = self.cursors.load(&self.key).await? {
            tracing::debug!(subscription = %self.key, block = cursor.last_processed_block, "Cursor loaded");
            return Ok(cursor);
        }

        let initial = match self.options.start_block {
            Some(start) => start.saturating_sub(1),
            None => {
                let head = self.head(connection).await?;
                self.options.safe_head(head)
            }
        };
        let cursor = EventCursor::new(&self.key, initial);
        self.cursors.save(&cursor).await?;
        tracing::info!(subscription = %self.key, block = initial, "Cursor initialised");
        Ok(cursor)
    }

    /// Deliver every event in (cursor, safe head].
    async fn catch_up(&mut self, connection: &Arc<dyn Connection>, cursor: &mut EventCursor) -> LedgerResult<Pass> {
        let safe = self.options.safe_head(self.head(connection).await?);
        let span = self.options.max_block_range.max(1);

        while cursor.last_processed_block < safe {
            let from = cursor.last_processed_block + 1;
            let to = safe.min(from.saturating_add(span - 1));

            let query = LogQuery {
                address: self.address,
                topic0: self.topic0,
                from_block: from,
                to_block: to,
            };
            let mut logs = connection
                .logs(&query)
                .await
                .map_err(|e| LedgerError::chain(&self.key.network, e))?;
            logs.retain(|log| query.matches(log));
            logs.sort_by_key(|log| (log.block_number, log.log_index));

            tracing::debug!(subscription = %self.key, from = from, to = to, logs = logs.len(), "Fetched log range");

            for log in logs {
                let block = log.block_number;
                // Every earlier block in the range is fully consumed.
                self.advance(cursor, block - 1).await?;

                let event = LedgerEvent::from_log(&self.key.contract, &self.key.network, &self.key.event, log);
                let event_key = event.key();
                if self.delivered.get(&block).is_some_and(|keys| keys.contains(&event_key)) {
                    continue;
                }

                if let Err(e) = self.handler.handle(&event).await {
                    tracing::warn!(
                        subscription = %self.key,
                        block = block,
                        tx_hash = %event.tx_hash,
                        log_index = event.log_index,
                        error = %e,
                        "Handler failed, event will be redelivered"
                    );
                    return Ok(Pass::Halted);
                }

                self.delivered.entry(block).or_default().insert(event_key);
                metrics::record_event_delivered(&self.key.event);
            }

            self.advance(cursor, to).await?;
        }

        Ok(Pass::Drained)
    }

    async fn advance(&mut self, cursor: &mut EventCursor, block: u64) -> LedgerResult<()> {
        let previous = cursor.last_processed_block;
        if !cursor.advance_to(block) {
            return Ok(());
        }
        if let Err(e) = self.cursors.save(cursor).await {
            cursor.last_processed_block = previous;
            return Err(e);
        }

        self.delivered = self.delivered.split_off(&(block + 1));
        metrics::record_cursor(&self.key.to_string(), block);
        tracing::trace!(subscription = %self.key, block = block, "Cursor advanced");
        Ok(())
    }

    async fn head(&self, connection: &Arc<dyn Connection>) -> LedgerResult<u64> {
        connection
            .block_number()
            .await
            .map_err(|e| LedgerError::chain(&self.key.network, e))
    }

    fn set_state(&self, next: SubscriberState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(subscription = %self.key, from = %previous, to = %next, "Subscription state changed");
        }
    }
}
