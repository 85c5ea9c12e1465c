use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::limits::MAX_DEAD_LETTERS;
use crate::model::*;
use crate::notify::ReservationEvent;
use crate::observability::{DEAD_LETTERS, RELEASE_FAILURES_TOTAL};
use crate::retry::retry_with_backoff;
use crate::store::StoreError;

use super::{Engine, EngineError, Entity};

/// A release that could not be completed. The resource may be stuck Reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    pub resource_id: String,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

fn release_mutation() -> Mutation {
    Mutation::SetResourceStatus(ResourceStatus::Available)
}

impl Engine {
    /// Available → Reserved, as a compare-and-swap on the stored status.
    ///
    /// This is the single serialization point between concurrent reservations
    /// of the same resource.
    pub async fn reserve(&self, resource_id: &str) -> Result<Resource, EngineError> {
        let key = Key::resource(resource_id);
        let result = self
            .call(
                "update",
                self.store().update(
                    &key,
                    Mutation::SetResourceStatus(ResourceStatus::Reserved),
                    Some(Condition::ResourceStatusIs(ResourceStatus::Available)),
                ),
            )
            .await;
        match result {
            Ok(item) => {
                // A successful CAS proves the resource is not stuck.
                self.forget_dead_letter(resource_id);
                item.into_resource()
                    .ok_or_else(|| EngineError::Storage(format!("{key} is not a resource")))
            }
            Err(StoreError::ConditionFailed(_)) => {
                Err(EngineError::ResourceUnavailable(resource_id.to_string()))
            }
            Err(StoreError::NotFound(_)) => {
                Err(EngineError::NotFound(Entity::Resource, resource_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Set the resource back to Available, unconditionally. Idempotent.
    ///
    /// Never fails the caller: retries per the release policy, and a release
    /// that still fails is logged, counted, broadcast and dead-lettered.
    /// Returns whether the resource was released.
    pub async fn release(&self, resource_id: &str) -> bool {
        let key = &Key::resource(resource_id);
        let result = retry_with_backoff(
            &self.config().release_retry,
            move || self.call("update", self.store().update(key, release_mutation(), None)),
            |e| !matches!(e, StoreError::NotFound(_) | StoreError::Invalid(_)),
        )
        .await;

        match result {
            Ok(_) => {
                self.forget_dead_letter(resource_id);
                debug!("released resource {resource_id}");
                true
            }
            Err((StoreError::NotFound(_), _)) => {
                warn!("release skipped: resource {resource_id} does not exist");
                metrics::counter!(RELEASE_FAILURES_TOTAL, "reason" => "not_found").increment(1);
                false
            }
            Err((e, attempts)) => {
                error!("release of resource {resource_id} failed after {attempts} attempts: {e}");
                metrics::counter!(RELEASE_FAILURES_TOTAL, "reason" => "store").increment(1);
                self.dead_letter(resource_id, e.to_string(), attempts);
                self.notify.send(ReservationEvent::ReleaseFailed {
                    resource_id: resource_id.to_string(),
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Drop the resource's dead letter, if any, keeping the gauge in step.
    fn forget_dead_letter(&self, resource_id: &str) {
        if self.dead_letters.remove(resource_id).is_some() {
            metrics::gauge!(DEAD_LETTERS).set(self.dead_letters.len() as f64);
        }
    }

    fn dead_letter(&self, resource_id: &str, reason: String, attempts: u32) {
        if let Some(mut existing) = self.dead_letters.get_mut(resource_id) {
            existing.attempts += attempts;
            existing.reason = reason;
            return;
        }
        if self.dead_letters.len() >= MAX_DEAD_LETTERS {
            error!("dead-letter table full, dropping stuck release of {resource_id}");
            return;
        }
        self.dead_letters.insert(
            resource_id.to_string(),
            DeadLetter {
                resource_id: resource_id.to_string(),
                reason,
                attempts,
                failed_at: Utc::now(),
            },
        );
        metrics::gauge!(DEAD_LETTERS).set(self.dead_letters.len() as f64);
    }

    /// Snapshot of releases awaiting retry, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        let mut out: Vec<DeadLetter> = self.dead_letters.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|d| d.failed_at);
        out
    }

    /// One more attempt at every dead-lettered release. Returns how many
    /// resources were released.
    pub async fn retry_dead_letters(&self) -> usize {
        let pending: Vec<String> = self.dead_letters.iter().map(|e| e.key().clone()).collect();
        let mut released = 0;
        for resource_id in pending {
            let key = Key::resource(&resource_id);
            match self.call("update", self.store().update(&key, release_mutation(), None)).await {
                Ok(_) => {
                    self.dead_letters.remove(&resource_id);
                    info!("released stuck resource {resource_id}");
                    released += 1;
                }
                Err(StoreError::NotFound(_)) => {
                    self.dead_letters.remove(&resource_id);
                    warn!("dropping dead letter for deleted resource {resource_id}");
                }
                Err(e) => {
                    if let Some(mut dl) = self.dead_letters.get_mut(&resource_id) {
                        dl.attempts += 1;
                        dl.reason = e.to_string();
                    }
                    debug!("resource {resource_id} still stuck: {e}");
                }
            }
        }
        metrics::gauge!(DEAD_LETTERS).set(self.dead_letters.len() as f64);
        released
    }
}
