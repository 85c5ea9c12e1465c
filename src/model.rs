use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since midnight — the only time-of-day type.
pub type Minutes = u32;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Half-open slot `[start, end)` within a day, in minutes.
///
/// No ordering is enforced between `start` and `end`: a slot whose end wrapped
/// past midnight has `end < start` and is compared as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: Minutes,
    pub end: Minutes,
}

impl Slot {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        Self { start, end }
    }

    /// Start plus whole hours, wrapped modulo one day.
    pub fn from_start(start: Minutes, duration_hours: u32) -> Self {
        let end = (u64::from(start) + u64::from(duration_hours) * 60) % u64::from(MINUTES_PER_DAY);
        Self { start, end: end as Minutes }
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Parse a 24-hour `HH:MM` string into minutes since midnight.
pub fn parse_clock(s: &str) -> Option<Minutes> {
    let b = s.as_bytes();
    if b.len() != 5 || b[2] != b':' {
        return None;
    }
    let digit = |c: u8| c.is_ascii_digit().then(|| u32::from(c - b'0'));
    let hh = digit(b[0])? * 10 + digit(b[1])?;
    let mm = digit(b[3])? * 10 + digit(b[4])?;
    if hh > 23 || mm > 59 {
        return None;
    }
    Some(hh * 60 + mm)
}

/// Format minutes since midnight as `HH:MM`, wrapping past midnight.
pub fn format_clock(mins: Minutes) -> String {
    let wrapped = mins % MINUTES_PER_DAY;
    format!("{:02}:{:02}", wrapped / 60, wrapped % 60)
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Available,
    Reserved,
    Maintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Booked,
    Cancelled,
}

/// A club: the owner of a set of courts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub district: Option<String>,
    pub address: Option<String>,
    pub open_time: Option<String>,
    pub close_time: Option<String>,
}

/// A court with a single availability flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub group_id: String,
    pub name: String,
    pub status: ResourceStatus,
}

/// A booking. `end_time` is derived once at creation and stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: String,
    pub group_id: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub duration_hours: u32,
    pub status: ReservationStatus,
    pub requester_id: String,
    pub created_at: DateTime<Utc>,
}

// ── Store records ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    Groups,
    Resources,
    Reservations,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub table: Table,
    pub id: String,
}

impl Key {
    pub fn group(id: &str) -> Self {
        Self { table: Table::Groups, id: id.to_string() }
    }

    pub fn resource(id: &str) -> Self {
        Self { table: Table::Resources, id: id.to_string() }
    }

    pub fn reservation(id: Ulid) -> Self {
        Self { table: Table::Reservations, id: id.to_string() }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = match self.table {
            Table::Groups => "groups",
            Table::Resources => "resources",
            Table::Reservations => "reservations",
        };
        write!(f, "{table}/{}", self.id)
    }
}

/// Everything the store holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Item {
    Group(Group),
    Resource(Resource),
    Reservation(Reservation),
}

impl Item {
    pub fn key(&self) -> Key {
        match self {
            Item::Group(g) => Key::group(&g.id),
            Item::Resource(r) => Key::resource(&r.id),
            Item::Reservation(r) => Key::reservation(r.id),
        }
    }

    pub fn into_group(self) -> Option<Group> {
        match self {
            Item::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn into_resource(self) -> Option<Resource> {
        match self {
            Item::Resource(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_reservation(self) -> Option<Reservation> {
        match self {
            Item::Reservation(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_reservation(&self) -> Option<&Reservation> {
        match self {
            Item::Reservation(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Item::Resource(r) => Some(r),
            _ => None,
        }
    }
}

/// A single-attribute change applied by `Store::update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    SetResourceStatus(ResourceStatus),
    SetReservationStatus(ReservationStatus),
}

impl Mutation {
    /// Apply to an item in place. Returns false if the item has no such attribute.
    pub fn apply(&self, item: &mut Item) -> bool {
        match (self, item) {
            (Mutation::SetResourceStatus(s), Item::Resource(r)) => {
                r.status = *s;
                true
            }
            (Mutation::SetReservationStatus(s), Item::Reservation(r)) => {
                r.status = *s;
                true
            }
            _ => false,
        }
    }
}

/// Predicate guarding a conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    ResourceStatusIs(ResourceStatus),
    ReservationStatusIs(ReservationStatus),
}

impl Condition {
    pub fn holds(&self, item: &Item) -> bool {
        match (self, item) {
            (Condition::ResourceStatusIs(s), Item::Resource(r)) => r.status == *s,
            (Condition::ReservationStatusIs(s), Item::Reservation(r)) => r.status == *s,
            _ => false,
        }
    }
}

/// The WAL record format. Each record carries the full item after the write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Put { item: Item },
    Updated { item: Item },
}

impl Event {
    pub fn item(&self) -> &Item {
        match self {
            Event::Put { item } | Event::Updated { item } => item,
        }
    }
}
