//! Durable event cursors.
//!
//! A cursor records the last block whose events were fully consumed by the
//! handler of one (contract, network, event) subscription. Stores refuse to
//! move a cursor backwards.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::error::{LedgerError, LedgerResult};

/// Identifies one subscription's cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CursorKey {
    pub contract: String,
    pub network: String,
    pub event: String,
}

impl CursorKey {
    pub fn new(contract: &str, network: &str, event: &str) -> Self {
        Self {
            contract: contract.to_string(),
            network: network.to_string(),
            event: event.to_string(),
        }
    }
}

impl std::fmt::Display for CursorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.contract, self.event, self.network)
    }
}

/// Progress of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCursor {
    pub contract_name: String,
    pub network: String,
    pub event_name: String,
    pub last_processed_block: u64,
}

impl EventCursor {
    pub fn new(key: &CursorKey, last_processed_block: u64) -> Self {
        Self {
            contract_name: key.contract.clone(),
            network: key.network.clone(),
            event_name: key.event.clone(),
            last_processed_block,
        }
    }

    pub fn key(&self) -> CursorKey {
        CursorKey::new(&self.contract_name, &self.network, &self.event_name)
    }

    /// Move forward to `block`. Returns whether the cursor moved.
    pub fn advance_to(&mut self, block: u64) -> bool {
        if block > self.last_processed_block {
            self.last_processed_block = block;
            true
        } else {
            false
        }
    }
}

/// Persistence for event cursors.
#[async_trait]
pub trait CursorStore: Send + Sync + std::fmt::Debug {
    async fn load(&self, key: &CursorKey) -> LedgerResult<Option<EventCursor>>;

    /// Persist `cursor`. Fails if the stored cursor is further ahead.
    async fn save(&self, cursor: &EventCursor) -> LedgerResult<()>;
}

fn regression(key: &CursorKey, stored: u64, attempted: u64) -> LedgerError {
    LedgerError::Cursor(format!(
        "cursor {} cannot move back from block {} to {}",
        key, stored, attempted
    ))
}

/// Cursors kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: DashMap<CursorKey, EventCursor>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, key: &CursorKey) -> LedgerResult<Option<EventCursor>> {
        Ok(self.cursors.get(key).map(|c| c.clone()))
    }

    async fn save(&self, cursor: &EventCursor) -> LedgerResult<()> {
        let key = cursor.key();
        let mut entry = self.cursors.entry(key.clone()).or_insert_with(|| cursor.clone());
        if entry.last_processed_block > cursor.last_processed_block {
            return Err(regression(&key, entry.last_processed_block, cursor.last_processed_block));
        }
        *entry = cursor.clone();
        Ok(())
    }
}

/// Cursors kept in one JSON document on disk.
///
/// Every save rewrites the document through a temporary file and a rename,
/// so a crash leaves either the old or the new document.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
    cursors: Mutex<BTreeMap<CursorKey, EventCursor>>,
}

impl FileCursorStore {
    /// Open the store, reading existing cursors if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        let path = path.into();
        let cursors = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let list: Vec<EventCursor> = serde_json::from_slice(&bytes).map_err(|e| {
                    LedgerError::Cursor(format!("malformed cursor file {}: {}", path.display(), e))
                })?;
                list.into_iter().map(|c| (c.key(), c)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(LedgerError::Cursor(format!(
                    "cannot read cursor file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        tracing::info!(path = %path.display(), cursors = cursors.len(), "Cursor store opened");
        Ok(Self {
            path,
            cursors: Mutex::new(cursors),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn write(&self, cursors: &BTreeMap<CursorKey, EventCursor>) -> LedgerResult<()> {
        let list: Vec<&EventCursor> = cursors.values().collect();
        let json = serde_json::to_vec_pretty(&list)
            .map_err(|e| LedgerError::Cursor(format!("cannot encode cursors: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LedgerError::Cursor(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| LedgerError::Cursor(format!("cannot write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            LedgerError::Cursor(format!("cannot replace {}: {}", self.path.display(), e))
        })
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self, key: &CursorKey) -> LedgerResult<Option<EventCursor>> {
        Ok(self.cursors.lock().await.get(key).cloned())
    }

    async fn save(&self, cursor: &EventCursor) -> LedgerResult<()> {
        let key = cursor.key();
        let mut cursors = self.cursors.lock().await;
        if let Some(stored) = cursors.get(&key) {
            if stored.last_processed_block > cursor.last_processed_block {
                return Err(regression(&key, stored.last_processed_block, cursor.last_processed_block));
            }
            if stored == cursor {
                return Ok(());
            }
        }

        let mut next = cursors.clone();
        next.insert(key, cursor.clone());
        self.write(&next).await?;
        *cursors = next;
        Ok(())
    }
}
