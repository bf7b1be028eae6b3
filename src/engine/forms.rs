//! Submission payloads and their validation.
//!
//! Every form describes its checks as a static [`Rule`] table and exposes its
//! fields through [`Form::value`]; [`validate`] runs the table. Adding a field
//! check means adding a row, not another hand-written `if`.

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::Deserialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::Instant;
use crate::recurrence::{end_of_local_day, Recurrence};

use super::{EngineError, FieldError};

/// A form field as seen by the validator.
#[derive(Debug, Clone, Copy)]
pub enum Value<'a> {
    Missing,
    Text(&'a str),
    Id(Ulid),
    Ids(&'a [Ulid]),
    Instant(Instant),
    Date(NaiveDate),
    Time(NaiveTime),
    Recurrence(&'a Recurrence),
}

impl Value<'_> {
    fn is_blank(&self) -> bool {
        match self {
            Value::Missing => true,
            Value::Text(s) => s.trim().is_empty(),
            Value::Ids(ids) => ids.is_empty(),
            _ => false,
        }
    }
}

fn text(v: &Option<String>) -> Value<'_> {
    v.as_deref().map_or(Value::Missing, Value::Text)
}

fn opt<T>(v: Option<T>, f: impl FnOnce(T) -> Value<'static>) -> Value<'static> {
    v.map_or(Value::Missing, f)
}

#[derive(Debug, Clone, Copy)]
pub enum Check {
    Required,
    /// Required whenever the named field is filled in.
    RequiredWith(&'static str),
    MaxLen(usize),
    MaxItems(usize),
    /// Strictly later than the named field (instants or times of day).
    After(&'static str),
    /// Not before the current instant, or before today for dates.
    NotInPast,
    Saturday,
    ValidRecurrence,
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub field: &'static str,
    pub check: Check,
    pub message: &'static str,
}

const fn rule(field: &'static str, check: Check, message: &'static str) -> Rule {
    Rule { field, check, message }
}

pub trait Form {
    fn rules(&self) -> &'static [Rule];
    fn value(&self, field: &str) -> Value<'_>;
}

/// Run the form's rule table. Reports at most one error per field, in table
/// order. Checks other than `Required*` pass on empty fields.
pub fn validate<F: Form + ?Sized>(form: &F, now: Instant, tz: Tz) -> Result<(), EngineError> {
    let mut errors: Vec<FieldError> = Vec::new();
    for rule in form.rules() {
        if errors.iter().any(|e| e.field == rule.field) {
            continue;
        }
        if let Some(message) = run_check(form, rule, now, tz) {
            errors.push(FieldError::new(rule.field, message));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(errors))
    }
}

fn run_check<F: Form + ?Sized>(form: &F, rule: &Rule, now: Instant, tz: Tz) -> Option<String> {
    let value = form.value(rule.field);
    let failed = match rule.check {
        Check::Required => value.is_blank(),
        Check::RequiredWith(other) => value.is_blank() && !form.value(other).is_blank(),
        Check::MaxLen(n) => matches!(value, Value::Text(s) if s.chars().count() > n),
        Check::MaxItems(n) => matches!(value, Value::Ids(ids) if ids.len() > n),
        Check::After(other) => match (value, form.value(other)) {
            (Value::Instant(a), Value::Instant(b)) => a <= b,
            (Value::Time(a), Value::Time(b)) => a <= b,
            _ => false,
        },
        Check::NotInPast => match value {
            Value::Instant(t) => t < now,
            Value::Date(d) => d < now.with_timezone(&tz).date_naive(),
            _ => false,
        },
        Check::Saturday => matches!(value, Value::Date(d) if d.weekday() != Weekday::Sat),
        Check::ValidRecurrence => {
            if let Value::Recurrence(r) = value
                && let Err(detail) = r.validate()
            {
                return Some(format!("{}: {detail}", rule.message));
            }
            false
        }
    };
    failed.then(|| rule.message.to_string())
}

/// Turn an inclusive "repeat until" day into the rule's exclusive `until`.
fn effective_rule(rule: &Recurrence, repeat_until: Option<NaiveDate>, tz: Tz) -> Recurrence {
    match repeat_until {
        Some(day) => rule.clone().with_until(end_of_local_day(day, tz)),
        None => rule.clone(),
    }
}

// ── Room bookings ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingForm {
    #[serde(default)]
    pub room_ids: Vec<Ulid>,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
    #[serde(default)]
    pub recurrence: Recurrence,
    /// Last day (inclusive, facility time) of a recurring series.
    pub repeat_until: Option<NaiveDate>,
    pub title: Option<String>,
    pub booked_by: Option<String>,
    pub notes: Option<String>,
}

const BOOKING_RULES: &[Rule] = &[
    rule("room_ids", Check::Required, "Select at least one room"),
    rule("room_ids", Check::MaxItems(MAX_ROOMS_PER_SUBMISSION), "Too many rooms selected"),
    rule("title", Check::Required, "Title is required"),
    rule("title", Check::MaxLen(MAX_TITLE_LEN), "Title is too long"),
    rule("booked_by", Check::Required, "Say who the booking is for"),
    rule("booked_by", Check::MaxLen(MAX_NAME_LEN), "Name is too long"),
    rule("start", Check::Required, "Start time is required"),
    rule("start", Check::NotInPast, "Start time is in the past"),
    rule("end", Check::Required, "End time is required"),
    rule("end", Check::After("start"), "End time must be after the start time"),
    rule("recurrence", Check::ValidRecurrence, "Invalid repeat"),
    rule("notes", Check::MaxLen(MAX_NOTES_LEN), "Notes are too long"),
];

impl Form for BookingForm {
    fn rules(&self) -> &'static [Rule] {
        BOOKING_RULES
    }

    fn value(&self, field: &str) -> Value<'_> {
        match field {
            "room_ids" => Value::Ids(&self.room_ids),
            "title" => text(&self.title),
            "booked_by" => text(&self.booked_by),
            "start" => opt(self.start, Value::Instant),
            "end" => opt(self.end, Value::Instant),
            "recurrence" => Value::Recurrence(&self.recurrence),
            "notes" => text(&self.notes),
            _ => Value::Missing,
        }
    }
}

impl BookingForm {
    pub fn rule(&self, tz: Tz) -> Recurrence {
        effective_rule(&self.recurrence, self.repeat_until, tz)
    }
}

// ── Contractor and guest visits ──────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitKind {
    Contractor,
    Guest,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisitForm {
    /// Contractor (contractor visits) or partner (guest visits).
    pub contact_id: Option<Ulid>,
    pub date: Option<NaiveDate>,
    /// Facility-local times; both absent means the whole day.
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    /// Rooms to book alongside the visit. May be empty.
    #[serde(default)]
    pub room_ids: Vec<Ulid>,
    #[serde(default)]
    pub recurrence: Recurrence,
    pub repeat_until: Option<NaiveDate>,
    pub purpose: Option<String>,
    /// Staff member who authorised (contractors) or hosts (guests) the visit.
    pub authorized_by: Option<String>,
    pub notes: Option<String>,
}

const CONTRACTOR_VISIT_RULES: &[Rule] = &[
    rule("contact_id", Check::Required, "Select a contractor"),
    rule("date", Check::Required, "Visit date is required"),
    rule("date", Check::NotInPast, "Visit date is in the past"),
    rule("start_time", Check::RequiredWith("end_time"), "Start time is required with an end time"),
    rule("end_time", Check::RequiredWith("start_time"), "End time is required with a start time"),
    rule("end_time", Check::After("start_time"), "End time must be after the start time"),
    rule("authorized_by", Check::Required, "Authorizer is required"),
    rule("authorized_by", Check::MaxLen(MAX_NAME_LEN), "Name is too long"),
    rule("room_ids", Check::MaxItems(MAX_ROOMS_PER_SUBMISSION), "Too many rooms selected"),
    rule("purpose", Check::MaxLen(MAX_TITLE_LEN), "Purpose is too long"),
    rule("recurrence", Check::ValidRecurrence, "Invalid repeat"),
    rule("notes", Check::MaxLen(MAX_NOTES_LEN), "Notes are too long"),
];

const GUEST_VISIT_RULES: &[Rule] = &[
    rule("contact_id", Check::Required, "Select a partner"),
    rule("date", Check::Required, "Visit date is required"),
    rule("date", Check::NotInPast, "Visit date is in the past"),
    rule("start_time", Check::RequiredWith("end_time"), "Start time is required with an end time"),
    rule("end_time", Check::RequiredWith("start_time"), "End time is required with a start time"),
    rule("end_time", Check::After("start_time"), "End time must be after the start time"),
    rule("authorized_by", Check::Required, "Host is required"),
    rule("authorized_by", Check::MaxLen(MAX_NAME_LEN), "Name is too long"),
    rule("room_ids", Check::MaxItems(MAX_ROOMS_PER_SUBMISSION), "Too many rooms selected"),
    rule("purpose", Check::MaxLen(MAX_TITLE_LEN), "Purpose is too long"),
    rule("recurrence", Check::ValidRecurrence, "Invalid repeat"),
    rule("notes", Check::MaxLen(MAX_NOTES_LEN), "Notes are too long"),
];

/// A visit form together with the kind of visit it is submitted as.
pub struct VisitSubmission<'a> {
    pub kind: VisitKind,
    pub form: &'a VisitForm,
}

impl Form for VisitSubmission<'_> {
    fn rules(&self) -> &'static [Rule] {
        match self.kind {
            VisitKind::Contractor => CONTRACTOR_VISIT_RULES,
            VisitKind::Guest => GUEST_VISIT_RULES,
        }
    }

    fn value(&self, field: &str) -> Value<'_> {
        let f = self.form;
        match field {
            "contact_id" => opt(f.contact_id, Value::Id),
            "date" => opt(f.date, Value::Date),
            "start_time" => opt(f.start_time, Value::Time),
            "end_time" => opt(f.end_time, Value::Time),
            "room_ids" => Value::Ids(&f.room_ids),
            "authorized_by" => text(&f.authorized_by),
            "purpose" => text(&f.purpose),
            "recurrence" => Value::Recurrence(&f.recurrence),
            "notes" => text(&f.notes),
            _ => Value::Missing,
        }
    }
}

impl VisitForm {
    pub fn rule(&self, tz: Tz) -> Recurrence {
        effective_rule(&self.recurrence, self.repeat_until, tz)
    }
}

// ── Weekend caretakers ───────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeekendForm {
    pub caretaker_id: Option<Ulid>,
    /// The Saturday of the weekend.
    pub weekend: Option<NaiveDate>,
    pub notes: Option<String>,
}

const WEEKEND_RULES: &[Rule] = &[
    rule("caretaker_id", Check::Required, "Select a caretaker"),
    rule("weekend", Check::Required, "Weekend is required"),
    rule("weekend", Check::Saturday, "Pick the Saturday of the weekend"),
    rule("weekend", Check::NotInPast, "Weekend is in the past"),
    rule("notes", Check::MaxLen(MAX_NOTES_LEN), "Notes are too long"),
];

impl Form for WeekendForm {
    fn rules(&self) -> &'static [Rule] {
        WEEKEND_RULES
    }

    fn value(&self, field: &str) -> Value<'_> {
        match field {
            "caretaker_id" => opt(self.caretaker_id, Value::Id),
            "weekend" => opt(self.weekend, Value::Date),
            "notes" => text(&self.notes),
            _ => Value::Missing,
        }
    }
}

// ── Reference data ───────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomForm {
    pub name: Option<String>,
    pub notes: Option<String>,
}

const ROOM_RULES: &[Rule] = &[
    rule("name", Check::Required, "Room name is required"),
    rule("name", Check::MaxLen(MAX_NAME_LEN), "Room name is too long"),
    rule("notes", Check::MaxLen(MAX_NOTES_LEN), "Notes are too long"),
];

impl Form for RoomForm {
    fn rules(&self) -> &'static [Rule] {
        ROOM_RULES
    }

    fn value(&self, field: &str) -> Value<'_> {
        match field {
            "name" => text(&self.name),
            "notes" => text(&self.notes),
            _ => Value::Missing,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactForm {
    pub name: Option<String>,
    pub organisation: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

const CONTACT_RULES: &[Rule] = &[
    rule("name", Check::Required, "Name is required"),
    rule("name", Check::MaxLen(MAX_NAME_LEN), "Name is too long"),
    rule("organisation", Check::MaxLen(MAX_NAME_LEN), "Organisation is too long"),
    rule("email", Check::MaxLen(MAX_NAME_LEN), "E-mail address is too long"),
    rule("phone", Check::MaxLen(MAX_NAME_LEN), "Phone number is too long"),
];

impl Form for ContactForm {
    fn rules(&self) -> &'static [Rule] {
        CONTACT_RULES
    }

    fn value(&self, field: &str) -> Value<'_> {
        match field {
            "name" => text(&self.name),
            "organisation" => text(&self.organisation),
            "email" => text(&self.email),
            "phone" => text(&self.phone),
            _ => Value::Missing,
        }
    }
}
