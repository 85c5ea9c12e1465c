mod logged;
mod memory;
#[cfg(test)]
pub(crate) mod testing;

pub use logged::WalStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;

use crate::model::{Condition, Item, Key, Mutation};

#[derive(Debug)]
pub enum StoreError {
    NotFound(Key),
    ConditionFailed(Key),
    /// The mutation does not apply to the stored item.
    Invalid(String),
    Unavailable(String),
    TimedOut(&'static str),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(key) => write!(f, "item not found: {key}"),
            StoreError::ConditionFailed(key) => write!(f, "condition failed on {key}"),
            StoreError::Invalid(msg) => write!(f, "invalid write: {msg}"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            StoreError::TimedOut(op) => write!(f, "store {op} timed out"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Predicate passed to [`Store::scan`].
pub type ScanFilter<'a> = &'a (dyn Fn(&Item) -> bool + Send + Sync);

/// Key/item store with single-key conditional writes and no transactions.
///
/// The only synchronization primitive the engine relies on is the
/// conditional `update`: implementations must evaluate the condition and apply
/// the mutation atomically with respect to other writers of the same key.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &Key) -> Result<Option<Item>, StoreError>;

    /// Write `item` under `key`. With `if_not_exists`, fails with
    /// `ConditionFailed` when the key is already present.
    async fn put(&self, key: Key, item: Item, if_not_exists: bool) -> Result<(), StoreError>;

    /// Apply `mutation` to the stored item, optionally guarded by `condition`.
    /// Returns the item as stored after the write.
    async fn update(
        &self,
        key: &Key,
        mutation: Mutation,
        condition: Option<Condition>,
    ) -> Result<Item, StoreError>;

    /// Full scan. Returns every item matching `filter`; there is no paging.
    async fn scan(&self, filter: ScanFilter<'_>) -> Result<Vec<Item>, StoreError>;
}
