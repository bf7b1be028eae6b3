use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::recurrence::Recurrence;

/// Absolute UTC instant, the only stored time type.
pub type Instant = DateTime<Utc>;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Instant,
    pub end: Instant,
}

impl Span {
    pub fn new(start: Instant, end: Instant) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for untrusted input.
    pub fn try_new(start: Instant, end: Instant) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Instant) -> bool {
        self.start <= t && t < self.end
    }
}

/// Minutes always; seconds and fractions only when the instant has them, so
/// the text names the stored instant exactly.
fn display_instant(t: &Instant) -> impl std::fmt::Display + '_ {
    if t.second() == 0 && t.nanosecond() == 0 {
        t.format("%Y-%m-%d %H:%M")
    } else {
        t.format("%Y-%m-%d %H:%M:%S%.f")
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to {} UTC",
            display_instant(&self.start),
            display_instant(&self.end)
        )
    }
}

/// Date-only fields are stored as 12:00 UTC on that date so that no
/// local-timezone offset can move them onto a neighbouring day.
pub fn midday_utc(date: NaiveDate) -> Instant {
    Utc.from_utc_datetime(&(date.and_time(NaiveTime::default()) + Duration::hours(12)))
}

/// Inverse of [`midday_utc`].
pub fn pinned_date(instant: Instant) -> NaiveDate {
    instant.date_naive()
}

// ── Tables ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Rooms,
    Bookings,
    ContractorVisits,
    GuestVisits,
    Contractors,
    Partners,
    Caretakers,
    WeekendAssignments,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Rooms => "rooms",
            Table::Bookings => "bookings",
            Table::ContractorVisits => "contractor_visits",
            Table::GuestVisits => "guest_visits",
            Table::Contractors => "contractors",
            Table::Partners => "partners",
            Table::Caretakers => "caretakers",
            Table::WeekendAssignments => "weekend_assignments",
        }
    }

    pub fn holds_reservations(&self) -> bool {
        matches!(self, Table::Bookings | Table::ContractorVisits | Table::GuestVisits)
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Records ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub name: String,
    pub notes: Option<String>,
}

/// Who a reservation is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    Contractor(Ulid),
    Partner(Ulid),
    User(String),
}

/// A booking, contractor visit or guest visit. The three share one shape;
/// the table they live in tells them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// `None` for visits that do not occupy a room.
    pub room_id: Option<Ulid>,
    pub span: Span,
    /// The rule this row was generated from. Rows of one series are
    /// independent snapshots; editing the rule never touches siblings.
    pub recurrence: Recurrence,
    pub owner: Owner,
    pub title: String,
    pub notes: Option<String>,
    /// Shared by every row created by the same recurring or multi-room submission.
    pub series_id: Option<Ulid>,
    /// Visit day, pinned to midday UTC.
    pub visit_date: Option<Instant>,
    /// Room bookings made on behalf of a visit point back at the visit row.
    pub linked_visit: Option<Ulid>,
    pub authorized_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub organisation: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    Contractor,
    Partner,
    Caretaker,
}

impl ContactKind {
    pub fn table(&self) -> Table {
        match self {
            ContactKind::Contractor => Table::Contractors,
            ContactKind::Partner => Table::Partners,
            ContactKind::Caretaker => Table::Caretakers,
        }
    }

    pub fn wrap(&self, contact: Contact) -> RecordBody {
        match self {
            ContactKind::Contractor => RecordBody::Contractor(contact),
            ContactKind::Partner => RecordBody::Partner(contact),
            ContactKind::Caretaker => RecordBody::Caretaker(contact),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekendAssignment {
    pub caretaker_id: Ulid,
    /// The Saturday of the weekend, pinned to midday UTC.
    pub weekend: Instant,
    pub notes: Option<String>,
}

/// Typed row contents, one variant per table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordBody {
    Room(Room),
    Booking(Reservation),
    ContractorVisit(Reservation),
    GuestVisit(Reservation),
    Contractor(Contact),
    Partner(Contact),
    Caretaker(Contact),
    WeekendAssignment(WeekendAssignment),
}

impl RecordBody {
    pub fn table(&self) -> Table {
        match self {
            RecordBody::Room(_) => Table::Rooms,
            RecordBody::Booking(_) => Table::Bookings,
            RecordBody::ContractorVisit(_) => Table::ContractorVisits,
            RecordBody::GuestVisit(_) => Table::GuestVisits,
            RecordBody::Contractor(_) => Table::Contractors,
            RecordBody::Partner(_) => Table::Partners,
            RecordBody::Caretaker(_) => Table::Caretakers,
            RecordBody::WeekendAssignment(_) => Table::WeekendAssignments,
        }
    }

    pub fn as_reservation(&self) -> Option<&Reservation> {
        match self {
            RecordBody::Booking(r) | RecordBody::ContractorVisit(r) | RecordBody::GuestVisit(r) => {
                Some(r)
            }
            _ => None,
        }
    }

    pub fn as_contact(&self) -> Option<&Contact> {
        match self {
            RecordBody::Contractor(c) | RecordBody::Partner(c) | RecordBody::Caretaker(c) => Some(c),
            _ => None,
        }
    }
}

/// A stored row: server-assigned id and creation time around the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: Ulid,
    pub created_at: Instant,
    pub body: RecordBody,
}

impl Record {
    pub fn table(&self) -> Table {
        self.body.table()
    }

    /// Time range the record occupies, used for range filters and ordering.
    /// A weekend assignment covers Saturday midday to Sunday midday.
    pub fn span(&self) -> Option<Span> {
        match &self.body {
            RecordBody::WeekendAssignment(w) => {
                Some(Span::new(w.weekend, w.weekend + Duration::days(1)))
            }
            body => body.as_reservation().map(|r| r.span),
        }
    }

    pub fn room_id(&self) -> Option<Ulid> {
        self.body.as_reservation().and_then(|r| r.room_id)
    }

    pub fn label(&self) -> &str {
        match &self.body {
            RecordBody::Room(room) => &room.name,
            RecordBody::WeekendAssignment(_) => "weekend assignment",
            body => body
                .as_reservation()
                .map(|r| r.title.as_str())
                .or_else(|| body.as_contact().map(|c| c.name.as_str()))
                .unwrap_or_default(),
        }
    }
}

/// The WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Inserted(Record),
    Updated(Record),
    Deleted { table: Table, id: Ulid },
}
