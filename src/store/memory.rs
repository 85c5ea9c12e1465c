use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::model::{Condition, Item, Key, Mutation};

use super::{ScanFilter, Store, StoreError};

/// Store held entirely in process memory. Conditional writes are atomic per
/// key: the shard lock is held from condition check to write.
pub struct InMemoryStore {
    items: DashMap<Key, Item>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self { items: DashMap::new() }
    }

    /// Unconditional insert, used when replaying a log.
    pub(super) fn insert(&self, item: Item) {
        self.items.insert(item.key(), item);
    }

    pub(super) fn snapshot(&self) -> Vec<Item> {
        self.items.iter().map(|e| e.value().clone()).collect()
    }

    pub(super) fn get_sync(&self, key: &Key) -> Option<Item> {
        self.items.get(key).map(|e| e.value().clone())
    }

    pub(super) fn put_sync(&self, key: Key, item: Item, if_not_exists: bool) -> Result<(), StoreError> {
        if item.key() != key {
            return Err(StoreError::Invalid(format!("item does not belong under {key}")));
        }
        match self.items.entry(key) {
            Entry::Occupied(e) if if_not_exists => Err(StoreError::ConditionFailed(e.key().clone())),
            Entry::Occupied(mut e) => {
                e.insert(item);
                Ok(())
            }
            Entry::Vacant(e) => {
                e.insert(item);
                Ok(())
            }
        }
    }

    /// Check `condition`, then mutate in place under the entry lock.
    pub(super) fn update_sync(
        &self,
        key: &Key,
        mutation: Mutation,
        condition: Option<Condition>,
    ) -> Result<Item, StoreError> {
        let mut entry = self
            .items
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if let Some(cond) = condition
            && !cond.holds(entry.value())
        {
            return Err(StoreError::ConditionFailed(key.clone()));
        }
        let mut next = entry.value().clone();
        if !mutation.apply(&mut next) {
            return Err(StoreError::Invalid(format!("{mutation:?} does not apply to {key}")));
        }
        *entry.value_mut() = next.clone();
        Ok(next)
    }

    /// Evaluate a write without applying it. Returns the item that the write
    /// would store.
    pub(super) fn preview_update(
        &self,
        key: &Key,
        mutation: Mutation,
        condition: Option<Condition>,
    ) -> Result<Item, StoreError> {
        let current = self.get_sync(key).ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if let Some(cond) = condition
            && !cond.holds(&current)
        {
            return Err(StoreError::ConditionFailed(key.clone()));
        }
        let mut next = current;
        if !mutation.apply(&mut next) {
            return Err(StoreError::Invalid(format!("{mutation:?} does not apply to {key}")));
        }
        Ok(next)
    }

    pub(super) fn scan_sync(&self, filter: ScanFilter<'_>) -> Vec<Item> {
        self.items
            .iter()
            .filter(|e| filter(e.value()))
            .map(|e| e.value().clone())
            .collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, key: &Key) -> Result<Option<Item>, StoreError> {
        Ok(self.get_sync(key))
    }

    async fn put(&self, key: Key, item: Item, if_not_exists: bool) -> Result<(), StoreError> {
        self.put_sync(key, item, if_not_exists)
    }

    async fn update(
        &self,
        key: &Key,
        mutation: Mutation,
        condition: Option<Condition>,
    ) -> Result<Item, StoreError> {
        self.update_sync(key, mutation, condition)
    }

    async fn scan(&self, filter: ScanFilter<'_>) -> Result<Vec<Item>, StoreError> {
        Ok(self.scan_sync(filter))
    }
}
