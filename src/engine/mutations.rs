use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::limits::MAX_NAME_LEN;
use crate::model::*;
use crate::notify::ReservationEvent;
use crate::observability::{
    CANCELLATIONS_TOTAL, COMPENSATIONS_TOTAL, RESERVATIONS_TOTAL, RESERVATION_DURATION_SECONDS,
};
use crate::store::StoreError;

use super::request::required_id;
use super::{CreateReservation, Engine, EngineError, Entity, NewGroup};

impl Engine {
    /// Book a slot on a resource.
    ///
    /// Steps run strictly in order: validate, resolve group, resolve resource,
    /// derive the end time, check for overlapping bookings, reserve the
    /// resource, persist the reservation. Only the last two steps write; if
    /// persisting fails after the resource was reserved, the resource is
    /// released again before the error is returned.
    pub async fn create_reservation(&self, req: CreateReservation) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.run_create(req).await;
        let outcome = match &result {
            Ok(_) => "booked",
            Err(e) => e.kind().as_str(),
        };
        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(RESERVATION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn run_create(&self, req: CreateReservation) -> Result<Reservation, EngineError> {
        let req = req.validate()?;

        self.get_group(&req.group_id).await?;
        let resource = self.get_resource(&req.resource_id).await?;
        if resource.group_id != req.group_id {
            return Err(EngineError::Mismatch {
                resource_id: req.resource_id,
                group_id: req.group_id,
            });
        }

        let slot = Slot::from_start(req.start, req.duration_hours);
        let end_time = format_clock(slot.end);
        debug!(
            "reservation request for {} on {} {}-{}",
            req.resource_id, req.date, req.start_time, end_time
        );

        if self.has_conflict(&req.resource_id, req.date, slot.start, slot.end).await? {
            warn!(
                "rejected {} on {} {}-{}: slot already booked",
                req.resource_id, req.date, req.start_time, end_time
            );
            return Err(EngineError::Conflict("slot already booked".into()));
        }

        self.reserve(&req.resource_id).await?;

        // The resource is now Reserved: every failure below must release it.
        let reservation = Reservation {
            id: self.next_id(),
            resource_id: req.resource_id,
            group_id: req.group_id,
            date: req.date,
            start_time: req.start_time,
            end_time,
            duration_hours: req.duration_hours,
            status: ReservationStatus::Booked,
            requester_id: req.requester_id,
            created_at: Utc::now(),
        };
        let key = Key::reservation(reservation.id);
        let persisted = self
            .call("put", self.store().put(key, Item::Reservation(reservation.clone()), true))
            .await;

        if let Err(e) = persisted {
            error!(
                "persisting reservation {} failed, releasing resource {}: {e}",
                reservation.id, reservation.resource_id
            );
            let released = self.release(&reservation.resource_id).await;
            let outcome = if released { "released" } else { "release_failed" };
            metrics::counter!(COMPENSATIONS_TOTAL, "outcome" => outcome).increment(1);
            return Err(match e {
                StoreError::ConditionFailed(_) => EngineError::IdConflict(reservation.id.to_string()),
                other => other.into(),
            });
        }

        info!(
            "booked {} on {} {} {}-{} for {}",
            reservation.id,
            reservation.resource_id,
            reservation.date,
            reservation.start_time,
            reservation.end_time,
            reservation.requester_id
        );
        self.notify.send(ReservationEvent::Booked {
            reservation_id: reservation.id,
            resource_id: reservation.resource_id.clone(),
        });
        Ok(reservation)
    }

    /// Mark a reservation Cancelled and release its resource.
    ///
    /// Cancelling an already-cancelled reservation is an error every time, so
    /// callers can tell duplicate requests apart.
    pub async fn cancel_reservation(&self, reservation_id: Ulid) -> Result<Reservation, EngineError> {
        let result = self.run_cancel(reservation_id).await;
        let outcome = match &result {
            Ok(_) => "cancelled",
            Err(e) => e.kind().as_str(),
        };
        metrics::counter!(CANCELLATIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn run_cancel(&self, reservation_id: Ulid) -> Result<Reservation, EngineError> {
        let existing = self.get_reservation(reservation_id).await?;
        if existing.status == ReservationStatus::Cancelled {
            return Err(EngineError::AlreadyCancelled(reservation_id.to_string()));
        }

        // Conditional, so of two concurrent cancels only one releases the court.
        let key = Key::reservation(reservation_id);
        let updated = self
            .call(
                "update",
                self.store().update(
                    &key,
                    Mutation::SetReservationStatus(ReservationStatus::Cancelled),
                    Some(Condition::ReservationStatusIs(ReservationStatus::Booked)),
                ),
            )
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => {
                    EngineError::NotFound(Entity::Reservation, reservation_id.to_string())
                }
                StoreError::ConditionFailed(_) => {
                    EngineError::AlreadyCancelled(reservation_id.to_string())
                }
                other => other.into(),
            })?
            .into_reservation()
            .ok_or_else(|| EngineError::Storage(format!("{key} is not a reservation")))?;

        self.release(&updated.resource_id).await;

        info!("cancelled {} on {}", updated.id, updated.resource_id);
        self.notify.send(ReservationEvent::Cancelled {
            reservation_id: updated.id,
            resource_id: updated.resource_id.clone(),
        });
        Ok(updated)
    }

    // ── Administration ───────────────────────────────────────

    pub async fn create_group(&self, new: NewGroup) -> Result<Group, EngineError> {
        let name = checked_name(new.name)?;
        for (field, value) in [("open_time", &new.open_time), ("close_time", &new.close_time)] {
            if let Some(t) = value
                && parse_clock(t).is_none()
            {
                return Err(EngineError::Validation(format!("{field} {t:?} is not 24-hour HH:MM")));
            }
        }
        let group = Group {
            id: Ulid::new().to_string(),
            name,
            district: new.district,
            address: new.address,
            open_time: new.open_time,
            close_time: new.close_time,
        };
        self.call("put", self.store().put(Key::group(&group.id), Item::Group(group.clone()), true))
            .await
            .map_err(|e| match e {
                StoreError::ConditionFailed(_) => EngineError::IdConflict(group.id.clone()),
                other => other.into(),
            })?;
        info!("created group {} ({})", group.id, group.name);
        Ok(group)
    }

    /// Register a court under an existing group. New courts start Available.
    pub async fn create_resource(&self, group_id: &str, name: String) -> Result<Resource, EngineError> {
        let group_id = required_id("group_id", Some(group_id.to_string()))?;
        let name = checked_name(name)?;
        self.get_group(&group_id).await?;
        let resource = Resource {
            id: Ulid::new().to_string(),
            group_id,
            name,
            status: ResourceStatus::Available,
        };
        self.call(
            "put",
            self.store().put(Key::resource(&resource.id), Item::Resource(resource.clone()), true),
        )
        .await
        .map_err(|e| match e {
            StoreError::ConditionFailed(_) => EngineError::IdConflict(resource.id.clone()),
            other => other.into(),
        })?;
        info!("created resource {} in group {}", resource.id, resource.group_id);
        Ok(resource)
    }
}

fn checked_name(name: String) -> Result<String, EngineError> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(EngineError::Validation("name is required".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::Validation("name too long".into()));
    }
    Ok(name)
}
