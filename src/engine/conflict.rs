use chrono::NaiveDate;
use tracing::debug;

use crate::model::*;

use super::{Engine, EngineError};

/// Slot occupied by a stored reservation. `None` when either time is missing.
/// A time that is present but unparseable is a storage fault.
fn stored_slot(r: &Reservation) -> Result<Option<Slot>, EngineError> {
    if r.start_time.is_empty() || r.end_time.is_empty() {
        return Ok(None);
    }
    let parse = |field: &str, value: &str| {
        parse_clock(value).ok_or_else(|| {
            EngineError::Storage(format!("reservation {} has malformed {field} {value:?}", r.id))
        })
    };
    let start = parse("start_time", &r.start_time)?;
    let end = parse("end_time", &r.end_time)?;
    Ok(Some(Slot::new(start, end)))
}

/// True if `proposed` overlaps any Booked reservation in `existing`.
/// Callers pass reservations already narrowed to one resource and date.
pub fn has_conflict_in<'a>(
    existing: impl IntoIterator<Item = &'a Reservation>,
    proposed: &Slot,
) -> Result<bool, EngineError> {
    for r in existing {
        if r.status != ReservationStatus::Booked {
            continue;
        }
        let Some(slot) = stored_slot(r)? else {
            debug!("skipping reservation {} with missing times", r.id);
            continue;
        };
        if proposed.overlaps(&slot) {
            debug!("proposed {proposed:?} overlaps reservation {} at {slot:?}", r.id);
            return Ok(true);
        }
    }
    Ok(false)
}

impl Engine {
    /// Whether `[start, end)` on `date` overlaps a Booked reservation of the
    /// resource. A plain read: the answer can be stale by the time the caller
    /// acts on it.
    pub async fn has_conflict(
        &self,
        resource_id: &str,
        date: NaiveDate,
        start: Minutes,
        end: Minutes,
    ) -> Result<bool, EngineError> {
        let same_day = |item: &Item| {
            item.as_reservation()
                .is_some_and(|r| r.resource_id == resource_id && r.date == date)
        };
        let items = self.call("scan", self.store().scan(&same_day)).await?;
        let existing: Vec<Reservation> = items.into_iter().filter_map(Item::into_reservation).collect();
        has_conflict_in(&existing, &Slot::new(start, end))
    }
}
