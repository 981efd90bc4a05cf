//! Event-derived views of donations and aid records.
//!
//! Both projections are idempotent on the event identity (tx hash, log index), so
//! they can sit behind an at-least-once subscription.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

use crate::blockchain::contract::AidEvent;
use crate::events::handler::{EventHandler, HandlerError};
use crate::events::types::{EventKey, LedgerEvent};
use crate::ledger::models::{AidRecord, AidStatus, Donation};

/// Donations seen on `DonationMade`.
#[derive(Debug, Clone, Default)]
pub struct DonorLedger {
    donations: Arc<DashMap<EventKey, Donation>>,
}

impl DonorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a donation. Returns false if the event was already applied.
    pub fn apply(&self, key: EventKey, donation: Donation) -> bool {
        match self.donations.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(donation);
                true
            }
        }
    }

    /// Sum of all donations by `donor`, in wei.
    pub fn total_for(&self, donor: Address) -> U256 {
        self.donations
            .iter()
            .filter(|d| d.donor == donor)
            .fold(U256::ZERO, |acc, d| acc.saturating_add(d.amount))
    }

    /// Donations by `donor`, oldest first.
    pub fn donations_of(&self, donor: Address) -> Vec<Donation> {
        let mut entries: Vec<(EventKey, Donation)> = self
            .donations
            .iter()
            .filter(|d| d.donor == donor)
            .map(|d| (*d.key(), d.value().clone()))
            .collect();
        entries.sort_by_key(|(key, d)| (d.timestamp, *key));
        entries.into_iter().map(|(_, d)| d).collect()
    }

    pub fn len(&self) -> usize {
        self.donations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.donations.is_empty()
    }
}

#[async_trait]
impl EventHandler for DonorLedger {
    async fn handle(&self, event: &LedgerEvent) -> Result<(), HandlerError> {
        if let Some(AidEvent::DonationMade(made)) = &event.decoded {
            let donation = Donation {
                donor: made.donor,
                amount: made.amount,
                timestamp: made.timestamp.saturating_to::<u64>(),
                tx_hash: event.tx_hash,
            };
            if self.apply(event.key(), donation) {
                tracing::debug!(donor = %made.donor, amount = %made.amount, tx_hash = %event.tx_hash, "Donation projected");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct AidEntry {
    created: Option<(Address, U256)>,
    status: AidStatus,
    /// Position of the status update last applied.
    status_at: Option<(u64, u64)>,
}

impl Default for AidEntry {
    fn default() -> Self {
        Self {
            created: None,
            status: AidStatus::Pending,
            status_at: None,
        }
    }
}

/// Aid records built from `AidRecordCreated` and `AidStatusUpdated`.
///
/// Creation and status updates may come from separate subscriptions in any
/// relative order; a status update only wins over an older one.
#[derive(Debug, Clone, Default)]
pub struct AidRegistry {
    entries: Arc<DashMap<U256, AidEntry>>,
    applied: Arc<DashSet<EventKey>>,
}

impl AidRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_created(&self, key: EventKey, id: U256, receiver: Address, amount: U256) -> bool {
        if !self.applied.insert(key) {
            return false;
        }
        self.entries.entry(id).or_default().created = Some((receiver, amount));
        true
    }

    /// Apply a status update observed at (block, log index).
    pub fn apply_status(&self, key: EventKey, id: U256, status: AidStatus, position: (u64, u64)) -> bool {
        if !self.applied.insert(key) {
            return false;
        }
        let mut entry = self.entries.entry(id).or_default();
        if entry.status_at.is_some_and(|at| at > position) {
            return false;
        }
        entry.status = status;
        entry.status_at = Some(position);
        true
    }

    /// The record, once its creation has been seen.
    pub fn record(&self, id: U256) -> Option<AidRecord> {
        let entry = self.entries.get(&id)?;
        let (receiver, amount) = entry.created?;
        Some(AidRecord {
            id,
            receiver,
            amount,
            status: entry.status,
        })
    }

    /// All known records, by id.
    pub fn records(&self) -> Vec<AidRecord> {
        let mut ids: Vec<U256> = self.entries.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.record(id)).collect()
    }
}

#[async_trait]
impl EventHandler for AidRegistry {
    async fn handle(&self, event: &LedgerEvent) -> Result<(), HandlerError> {
        match &event.decoded {
            Some(AidEvent::AidRecordCreated(created)) => {
                self.apply_created(event.key(), created.id, created.receiver, created.amount);
            }
            Some(AidEvent::AidStatusUpdated(updated)) => match AidStatus::try_from(updated.status) {
                Ok(status) => {
                    self.apply_status(event.key(), updated.id, status, (event.block_number, event.log_index));
                }
                Err(e) => {
                    tracing::warn!(id = %updated.id, tx_hash = %event.tx_hash, error = %e, "Ignoring status update");
                }
            },
            _ => {}
        }
        Ok(())
    }
}

/// Both projections behind one handler.
#[derive(Debug, Clone, Default)]
pub struct Projections {
    pub donors: DonorLedger,
    pub aid: AidRegistry,
}

impl Projections {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventHandler for Projections {
    async fn handle(&self, event: &LedgerEvent) -> Result<(), HandlerError> {
        self.donors.handle(event).await?;
        self.aid.handle(event).await
    }
}
