use chrono::NaiveDate;
use serde::Deserialize;

use crate::limits::*;
use crate::model::{parse_clock, Minutes};

use super::EngineError;

/// Inbound reservation request as received from a caller. Every field is
/// optional here so that a missing field is a validation error, not a
/// decoding failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateReservation {
    pub resource_id: Option<String>,
    pub group_id: Option<String>,
    /// `YYYY-MM-DD`
    pub date: Option<String>,
    /// `HH:MM`, 24-hour
    pub start_time: Option<String>,
    pub duration_hours: Option<i64>,
    pub requester_id: Option<String>,
}

/// A request that passed [`CreateReservation::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedReservation {
    pub resource_id: String,
    pub group_id: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub start: Minutes,
    pub duration_hours: u32,
    pub requester_id: String,
}

impl CreateReservation {
    pub fn new(
        resource_id: &str,
        group_id: &str,
        date: &str,
        start_time: &str,
        duration_hours: i64,
        requester_id: &str,
    ) -> Self {
        Self {
            resource_id: Some(resource_id.to_string()),
            group_id: Some(group_id.to_string()),
            date: Some(date.to_string()),
            start_time: Some(start_time.to_string()),
            duration_hours: Some(duration_hours),
            requester_id: Some(requester_id.to_string()),
        }
    }

    pub fn validate(self) -> Result<ValidatedReservation, EngineError> {
        let resource_id = required_id("resource_id", self.resource_id)?;
        let group_id = required_id("group_id", self.group_id)?;
        let requester_id = required_id("requester_id", self.requester_id)?;

        let date_str = self
            .date
            .ok_or_else(|| EngineError::Validation("date is required".into()))?;
        // chrono accepts unpadded fields and a leading sign; only the canonical form passes.
        let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .ok()
            .filter(|d| d.format("%Y-%m-%d").to_string() == date_str)
            .ok_or_else(|| EngineError::Validation(format!("date {date_str:?} is not YYYY-MM-DD")))?;

        let start_time = self
            .start_time
            .ok_or_else(|| EngineError::Validation("start_time is required".into()))?;
        let start = parse_clock(&start_time).ok_or_else(|| {
            EngineError::Validation(format!("start_time {start_time:?} is not 24-hour HH:MM"))
        })?;

        let hours = self
            .duration_hours
            .ok_or_else(|| EngineError::Validation("duration_hours is required".into()))?;
        let duration_hours = u32::try_from(hours)
            .ok()
            .filter(|h| *h > 0)
            .ok_or_else(|| {
                EngineError::Validation(format!("duration_hours must be a positive integer, got {hours}"))
            })?;

        Ok(ValidatedReservation {
            resource_id,
            group_id,
            date,
            start_time,
            start,
            duration_hours,
            requester_id,
        })
    }
}

pub(super) fn required_id(field: &str, value: Option<String>) -> Result<String, EngineError> {
    let value = value.unwrap_or_default();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    if trimmed.len() > MAX_ID_LEN {
        return Err(EngineError::Validation(format!("{field} too long")));
    }
    Ok(trimmed.to_string())
}

/// Club to register.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub open_time: Option<String>,
    #[serde(default)]
    pub close_time: Option<String>,
}

/// Conjunctive filter for [`Engine::list_reservations`](super::Engine::list_reservations).
/// Unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReservationFilter {
    #[serde(default)]
    pub requester_id: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// Club search. Each set field must occur in the club's value as a
/// substring; at least one must be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupSearch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    /// Max clubs returned. Defaults to, and is capped at, `MAX_SEARCH_GROUPS`.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl GroupSearch {
    pub(super) fn validate(&self) -> Result<(Option<&str>, Option<&str>, usize), EngineError> {
        fn term(v: &Option<String>) -> Option<&str> {
            v.as_deref().map(str::trim).filter(|t| !t.is_empty())
        }
        let (name, district) = (term(&self.name), term(&self.district));
        if name.is_none() && district.is_none() {
            return Err(EngineError::Validation("name or district is required".into()));
        }
        if name.is_some_and(|t| t.len() > MAX_NAME_LEN) || district.is_some_and(|t| t.len() > MAX_NAME_LEN) {
            return Err(EngineError::Validation("search term too long".into()));
        }
        let limit = self.limit.unwrap_or(MAX_SEARCH_GROUPS).clamp(1, MAX_SEARCH_GROUPS);
        Ok((name, district, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> CreateReservation {
        CreateReservation::new("court-1", "club-1", "2026-03-14", "18:00", 2, "player-7")
    }

    fn validation_message(req: CreateReservation) -> String {
        match req.validate() {
            Err(EngineError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_well_formed_request() {
        let v = valid().validate().unwrap();
        assert_eq!(v.date, NaiveDate::from_ymd_opt(2026, 3, 14).unwrap());
        assert_eq!(v.start, 18 * 60);
        assert_eq!(v.duration_hours, 2);
        assert_eq!(v.start_time, "18:00");
    }

    #[test]
    fn trims_ids() {
        let mut req = valid();
        req.resource_id = Some("  court-1 ".into());
        assert_eq!(req.validate().unwrap().resource_id, "court-1");
    }

    #[test]
    fn rejects_missing_fields() {
        let mut req = valid();
        req.group_id = None;
        assert_eq!(validation_message(req), "group_id is required");

        let mut req = valid();
        req.requester_id = Some("   ".into());
        assert_eq!(validation_message(req), "requester_id is required");

        let mut req = valid();
        req.duration_hours = None;
        assert_eq!(validation_message(req), "duration_hours is required");
    }

    #[test]
    fn search_needs_a_term() {
        let empty = GroupSearch { name: Some("  ".into()), ..Default::default() };
        assert!(matches!(empty.validate(), Err(EngineError::Validation(_))));

        let by_district = GroupSearch { district: Some("District 7".into()), limit: Some(10_000), ..Default::default() };
        let (name, district, limit) = by_district.validate().unwrap();
        assert_eq!((name, district, limit), (None, Some("District 7"), MAX_SEARCH_GROUPS));
    }

    #[test]
    fn rejects_bad_date() {
        for bad in [
            "2026-02-30",
            "14/03/2026",
            "2026-3-14x",
            "",
            "2026-3-14",
            "2026-03-4",
            "+2026-03-14",
            " 2026-03-14",
        ] {
            let mut req = valid();
            req.date = Some(bad.into());
            assert!(matches!(req.validate(), Err(EngineError::Validation(_))), "{bad:?}");
        }
    }

    #[test]
    fn rejects_bad_start_time() {
        for bad in ["24:00", "7:00", "07:5", "noon"] {
            let mut req = valid();
            req.start_time = Some(bad.into());
            assert!(matches!(req.validate(), Err(EngineError::Validation(_))), "{bad:?}");
        }
    }

    #[test]
    fn rejects_non_positive_duration() {
        for bad in [0, -1, i64::from(u32::MAX) + 1] {
            let mut req = valid();
            req.duration_hours = Some(bad);
            assert!(matches!(req.validate(), Err(EngineError::Validation(_))), "{bad}");
        }
    }

    #[test]
    fn rejects_overlong_id() {
        let mut req = valid();
        req.resource_id = Some("x".repeat(MAX_ID_LEN + 1));
        assert!(matches!(req.validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn missing_fields_decode_as_none() {
        let req: CreateReservation = serde_json::from_str(r#"{"resource_id":"court-1"}"#).unwrap();
        assert!(req.group_id.is_none());
        assert!(matches!(req.validate(), Err(EngineError::Validation(_))));
    }
}
