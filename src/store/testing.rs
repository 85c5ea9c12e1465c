use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::model::*;

use super::{InMemoryStore, ScanFilter, Store, StoreError};

/// In-memory store with switchable faults.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: InMemoryStore,
    /// Fail every `put` of a reservation.
    pub fail_reservation_puts: AtomicBool,
    /// Fail every unconditional resource update (i.e. every release).
    pub fail_releases: AtomicBool,
    /// Sleep this many milliseconds before each `get`.
    pub get_delay_ms: AtomicU64,
    pub release_calls: AtomicU64,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn get(&self, key: &Key) -> Result<Option<Item>, StoreError> {
        let delay = self.get_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: Key, item: Item, if_not_exists: bool) -> Result<(), StoreError> {
        if key.table == Table::Reservations && self.fail_reservation_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected put failure".into()));
        }
        self.inner.put(key, item, if_not_exists).await
    }

    async fn update(
        &self,
        key: &Key,
        mutation: Mutation,
        condition: Option<Condition>,
    ) -> Result<Item, StoreError> {
        if key.table == Table::Resources && condition.is_none() {
            self.release_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_releases.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("injected release failure".into()));
            }
        }
        self.inner.update(key, mutation, condition).await
    }

    async fn scan(&self, filter: ScanFilter<'_>) -> Result<Vec<Item>, StoreError> {
        self.inner.scan(filter).await
    }
}
