mod conflict;
mod error;
mod mutations;
mod queries;
mod request;
mod resource;

pub use conflict::has_conflict_in;
pub use error::{EngineError, Entity, ErrorKind};
pub use queries::GroupWithResources;
pub use request::{
    CreateReservation, GroupSearch, NewGroup, ReservationFilter, ValidatedReservation,
};
pub use resource::DeadLetter;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ulid::Ulid;

use crate::notify::NotifyHub;
use crate::retry::RetryPolicy;
use crate::store::{Store, StoreError};

/// Tuning for an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline applied to every individual store call.
    pub store_timeout: Duration,
    /// Retry policy for compensating releases.
    pub release_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            release_retry: RetryPolicy::default(),
        }
    }
}

/// The reservation engine. Holds no reservation state of its own: everything
/// shared lives in the injected [`Store`].
pub struct Engine {
    store: Arc<dyn Store>,
    config: EngineConfig,
    pub notify: Arc<NotifyHub>,
    /// Releases that exhausted their retries, keyed by resource id.
    pub(super) dead_letters: DashMap<String, DeadLetter>,
    id_gen: fn() -> Ulid,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            notify: Arc::new(NotifyHub::new()),
            dead_letters: DashMap::new(),
            id_gen: Ulid::new,
        }
    }

    /// Replace the reservation id generator.
    pub fn with_id_generator(mut self, id_gen: fn() -> Ulid) -> Self {
        self.id_gen = id_gen;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(super) fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub(super) fn next_id(&self) -> Ulid {
        (self.id_gen)()
    }

    /// Run one store call under the configured deadline.
    pub(super) async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.config.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                metrics::counter!(crate::observability::STORE_TIMEOUTS_TOTAL, "op" => op).increment(1);
                Err(StoreError::TimedOut(op))
            }
        }
    }
}
