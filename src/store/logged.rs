use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::model::{Condition, Event, Item, Key, Mutation};
use crate::wal::Wal;

use super::{InMemoryStore, ScanFilter, Store, StoreError};

/// Durable store: in-memory state rebuilt from a write-ahead log on open.
///
/// Writes are serialized through the log mutex. A write is appended and
/// fsynced before it becomes visible, so readers never observe state the log
/// does not hold. Reads go straight to memory.
pub struct WalStore {
    state: InMemoryStore,
    wal: Mutex<Wal>,
    compact_threshold: u64,
}

impl WalStore {
    pub fn open(path: &Path, compact_threshold: u64) -> io::Result<Self> {
        let (wal, events) = Wal::open(path)?;
        let state = InMemoryStore::new();
        for event in &events {
            state.insert(event.item().clone());
        }
        info!("replayed {} log records from {}", events.len(), path.display());
        Ok(Self {
            state,
            wal: Mutex::new(wal),
            compact_threshold,
        })
    }

    /// Append, then apply. Compacts when the threshold is crossed.
    fn commit(&self, wal: &mut Wal, event: Event) -> Result<(), StoreError> {
        wal.append(&event)
            .map_err(|e| StoreError::Unavailable(format!("log append failed: {e}")))?;
        let item = match event {
            Event::Put { item } | Event::Updated { item } => item,
        };
        self.state.insert(item);

        if self.compact_threshold > 0 && wal.appends_since_compact() >= self.compact_threshold {
            let snapshot: Vec<Event> = self
                .state
                .snapshot()
                .into_iter()
                .map(|item| Event::Put { item })
                .collect();
            match wal.compact(&snapshot) {
                Ok(()) => {
                    metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
                    info!("compacted {} to {} records", wal.path().display(), snapshot.len());
                }
                // The append above is already durable; retry on the next crossing.
                Err(e) => warn!("compaction of {} failed: {e}", wal.path().display()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Store for WalStore {
    async fn get(&self, key: &Key) -> Result<Option<Item>, StoreError> {
        Ok(self.state.get_sync(key))
    }

    async fn put(&self, key: Key, item: Item, if_not_exists: bool) -> Result<(), StoreError> {
        if item.key() != key {
            return Err(StoreError::Invalid(format!("item does not belong under {key}")));
        }
        let mut wal = self.wal.lock().await;
        if if_not_exists && self.state.get_sync(&key).is_some() {
            return Err(StoreError::ConditionFailed(key));
        }
        self.commit(&mut wal, Event::Put { item })
    }

    async fn update(
        &self,
        key: &Key,
        mutation: Mutation,
        condition: Option<Condition>,
    ) -> Result<Item, StoreError> {
        let mut wal = self.wal.lock().await;
        let next = self.state.preview_update(key, mutation, condition)?;
        self.commit(&mut wal, Event::Updated { item: next.clone() })?;
        Ok(next)
    }

    async fn scan(&self, filter: ScanFilter<'_>) -> Result<Vec<Item>, StoreError> {
        Ok(self.state.scan_sync(filter))
    }
}
