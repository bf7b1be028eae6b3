use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::recurrence::{end_of_local_day, resolve_local};
use crate::store::Filter;

use super::forms::{self, BookingForm, ContactForm, RoomForm, VisitForm, VisitKind, VisitSubmission, WeekendForm};
use super::{Engine, EngineError};

/// Rows written by one visit submission.
#[derive(Debug, Clone, Serialize)]
pub struct VisitReceipt {
    pub visits: Vec<Record>,
    /// Room bookings made for the visits, each linked to its visit row.
    pub bookings: Vec<Record>,
}

/// Trimmed text, `None` when blank.
fn clean(text: &Option<String>) -> Option<String> {
    text.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn required(text: &Option<String>, field: &'static str) -> Result<String, EngineError> {
    clean(text).ok_or_else(|| EngineError::invalid(field, "This field is required"))
}

fn record_submission<T>(kind: &'static str, result: &Result<T, EngineError>) {
    let status = match result {
        Ok(_) => "accepted",
        Err(e) => e.kind(),
    };
    metrics::counter!(crate::observability::SUBMISSIONS_TOTAL, "kind" => kind, "status" => status)
        .increment(1);
    if let Err(e) = result {
        tracing::warn!("{kind} submission rejected: {e}");
    }
}

/// Whole local day when no times are given, otherwise the given local times.
fn visit_span(
    date: NaiveDate,
    start_time: Option<NaiveTime>,
    end_time: Option<NaiveTime>,
    tz: Tz,
) -> Result<Span, EngineError> {
    let (start, end) = match (start_time, end_time) {
        (Some(s), Some(e)) => (resolve_local(tz, date.and_time(s)), resolve_local(tz, date.and_time(e))),
        _ => (
            resolve_local(tz, date.and_time(NaiveTime::default())),
            end_of_local_day(date, tz),
        ),
    };
    start
        .zip(end)
        .and_then(|(s, e)| Span::try_new(s, e))
        .ok_or_else(|| EngineError::invalid("end_time", "Visit times do not exist on this date"))
}

impl Engine {
    // ── Bookings and visits ──────────────────────────────────

    /// Book one or more rooms, once or repeatedly. Either every occurrence in
    /// every room is written or none is.
    pub async fn submit_booking(&self, form: &BookingForm) -> Result<Vec<Record>, EngineError> {
        let result = self.try_submit_booking(form).await;
        record_submission("booking", &result);
        result
    }

    async fn try_submit_booking(&self, form: &BookingForm) -> Result<Vec<Record>, EngineError> {
        let tz = self.settings.tz;
        forms::validate(form, self.now(), tz)?;
        let start = form.start.ok_or_else(|| EngineError::invalid("start", "Start time is required"))?;
        let end = form.end.ok_or_else(|| EngineError::invalid("end", "End time is required"))?;
        let base = Span::try_new(start, end)
            .ok_or_else(|| EngineError::invalid("end", "End time must be after the start time"))?;
        let title = required(&form.title, "title")?;
        let booked_by = required(&form.booked_by, "booked_by")?;

        let rule = form.rule(tz);
        let occurrences = self.expand(base, &rule, self.settings.booking_horizon_months)?;
        let rooms = self.resolve_rooms(&form.room_ids).await?;
        self.check_rooms(&rooms, &occurrences).await?;

        let series_id = (rooms.len() * occurrences.len() > 1).then(Ulid::new);
        let notes = clean(&form.notes);
        let bodies = rooms
            .iter()
            .flat_map(|room| {
                occurrences.iter().map(|span| {
                    RecordBody::Booking(Reservation {
                        room_id: Some(room.id),
                        span: *span,
                        recurrence: rule.clone(),
                        owner: Owner::User(booked_by.clone()),
                        title: title.clone(),
                        notes: notes.clone(),
                        series_id,
                        visit_date: None,
                        linked_visit: None,
                        authorized_by: None,
                    })
                })
            })
            .collect();
        let rows = self.insert_all(bodies).await?;
        info!(
            "booked {} occurrence(s) in {} room(s) for {booked_by}: {title}",
            occurrences.len(),
            rooms.len()
        );
        Ok(rows)
    }

    /// Record a contractor or guest visit, repeatedly if asked, and book the
    /// selected rooms for each occurrence. Visit rows are written first; if a
    /// room booking fails, the visits are removed too.
    pub async fn submit_visit(&self, kind: VisitKind, form: &VisitForm) -> Result<VisitReceipt, EngineError> {
        let result = self.try_submit_visit(kind, form).await;
        let label = match kind {
            VisitKind::Contractor => "contractor_visit",
            VisitKind::Guest => "guest_visit",
        };
        record_submission(label, &result);
        result
    }

    async fn try_submit_visit(&self, kind: VisitKind, form: &VisitForm) -> Result<VisitReceipt, EngineError> {
        let tz = self.settings.tz;
        forms::validate(&VisitSubmission { kind, form }, self.now(), tz)?;
        let contact_id = form
            .contact_id
            .ok_or_else(|| EngineError::invalid("contact_id", "This field is required"))?;
        let date = form
            .date
            .ok_or_else(|| EngineError::invalid("date", "Visit date is required"))?;
        let authorized_by = required(&form.authorized_by, "authorized_by")?;

        let (contact_table, owner, noun) = match kind {
            VisitKind::Contractor => (Table::Contractors, Owner::Contractor(contact_id), "contractor"),
            VisitKind::Guest => (Table::Partners, Owner::Partner(contact_id), "partner"),
        };
        let contact = self
            .store
            .get(contact_table, contact_id)
            .await?
            .ok_or_else(|| EngineError::invalid("contact_id", format!("Unknown {noun}")))?;
        if contact.body.as_contact().is_some_and(|c| !c.active) {
            return Err(EngineError::invalid(
                "contact_id",
                format!("{} is no longer an active {noun}", contact.label()),
            ));
        }

        let base = visit_span(date, form.start_time, form.end_time, tz)?;
        let rule = form.rule(tz);
        let occurrences = self.expand(base, &rule, self.settings.visit_horizon_months)?;
        let rooms = self.resolve_rooms(&form.room_ids).await?;
        self.check_rooms(&rooms, &occurrences).await?;

        let series_id = (occurrences.len() > 1 || rooms.len() > 1).then(Ulid::new);
        let title = clean(&form.purpose).unwrap_or_else(|| format!("Visit: {}", contact.label()));
        let notes = clean(&form.notes);
        let reservation = |span: Span| Reservation {
            room_id: None,
            span,
            recurrence: rule.clone(),
            owner: owner.clone(),
            title: title.clone(),
            notes: notes.clone(),
            series_id,
            visit_date: Some(midday_utc(span.start.with_timezone(&tz).date_naive())),
            linked_visit: None,
            authorized_by: Some(authorized_by.clone()),
        };

        let visit_bodies = occurrences
            .iter()
            .map(|span| match kind {
                VisitKind::Contractor => RecordBody::ContractorVisit(reservation(*span)),
                VisitKind::Guest => RecordBody::GuestVisit(reservation(*span)),
            })
            .collect();
        let visits = self.insert_all(visit_bodies).await?;

        let booking_bodies = visits
            .iter()
            .flat_map(|visit| {
                let span = visit.span().unwrap_or(base);
                rooms.iter().map(move |room| (visit.id, room.id, span))
            })
            .map(|(visit_id, room_id, span)| {
                RecordBody::Booking(Reservation {
                    room_id: Some(room_id),
                    linked_visit: Some(visit_id),
                    ..reservation(span)
                })
            })
            .collect();
        let bookings = match self.insert_all(booking_bodies).await {
            Ok(rows) => rows,
            Err(e) => {
                self.roll_back(&visits).await;
                return Err(e);
            }
        };

        info!(
            "recorded {} {noun} visit(s) for {} with {} room booking(s)",
            visits.len(),
            contact.label(),
            bookings.len()
        );
        Ok(VisitReceipt { visits, bookings })
    }

    /// Delete a single occurrence. Deleting a visit also deletes the room
    /// bookings made for it; other occurrences of a series are untouched.
    /// Returns the number of rows removed.
    pub async fn delete_reservation(&self, table: Table, id: Ulid) -> Result<usize, EngineError> {
        if !table.holds_reservations() {
            return Err(EngineError::invalid("table", format!("{table} does not hold reservations")));
        }
        self.store
            .get(table, id)
            .await?
            .ok_or(EngineError::NotFound { table, id })?;

        let mut removed = 0;
        if table != Table::Bookings {
            let linked = self
                .store
                .query(Table::Bookings, &Filter::all().linked_to(id))
                .await?;
            for booking in linked {
                self.store.delete(Table::Bookings, booking.id).await?;
                removed += 1;
            }
        }
        self.store.delete(table, id).await?;
        removed += 1;
        info!("deleted {table} {id} ({removed} rows)");
        Ok(removed)
    }

    // ── Rooms ────────────────────────────────────────────────

    async fn ensure_unique_room_name(&self, name: &str, except: Option<Ulid>) -> Result<(), EngineError> {
        let taken = self
            .store
            .query(Table::Rooms, &Filter::all())
            .await?
            .iter()
            .any(|r| Some(r.id) != except && r.label().eq_ignore_ascii_case(name));
        if taken {
            return Err(EngineError::invalid("name", "A room with this name already exists"));
        }
        Ok(())
    }

    pub async fn create_room(&self, form: &RoomForm) -> Result<Record, EngineError> {
        forms::validate(form, self.now(), self.settings.tz)?;
        let name = required(&form.name, "name")?;
        self.ensure_unique_room_name(&name, None).await?;
        let record = self
            .store
            .insert(RecordBody::Room(Room {
                name,
                notes: clean(&form.notes),
            }))
            .await?;
        info!("created room {} ({})", record.label(), record.id);
        Ok(record)
    }

    pub async fn rename_room(&self, id: Ulid, form: &RoomForm) -> Result<Record, EngineError> {
        self.store
            .get(Table::Rooms, id)
            .await?
            .ok_or(EngineError::NotFound { table: Table::Rooms, id })?;
        forms::validate(form, self.now(), self.settings.tz)?;
        let name = required(&form.name, "name")?;
        self.ensure_unique_room_name(&name, Some(id)).await?;
        let record = self
            .store
            .update(
                id,
                RecordBody::Room(Room {
                    name,
                    notes: clean(&form.notes),
                }),
            )
            .await?;
        info!("renamed room {id} to {}", record.label());
        Ok(record)
    }

    /// Remove a room that no booking refers to any more.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        self.store
            .get(Table::Rooms, id)
            .await?
            .ok_or(EngineError::NotFound { table: Table::Rooms, id })?;
        let bookings = self.store.query(Table::Bookings, &Filter::all().room(id)).await?;
        if !bookings.is_empty() {
            return Err(EngineError::InUse("room still has bookings"));
        }
        self.store.delete(Table::Rooms, id).await?;
        info!("deleted room {id}");
        Ok(())
    }

    // ── Contractors, partners and caretakers ─────────────────

    pub async fn create_contact(&self, kind: ContactKind, form: &ContactForm) -> Result<Record, EngineError> {
        forms::validate(form, self.now(), self.settings.tz)?;
        let contact = Contact {
            name: required(&form.name, "name")?,
            organisation: clean(&form.organisation),
            email: clean(&form.email),
            phone: clean(&form.phone),
            active: true,
        };
        let record = self.store.insert(kind.wrap(contact)).await?;
        info!("created {} {} ({})", kind.table(), record.label(), record.id);
        Ok(record)
    }

    async fn load_contact(&self, kind: ContactKind, id: Ulid) -> Result<Contact, EngineError> {
        let table = kind.table();
        self.store
            .get(table, id)
            .await?
            .and_then(|r| r.body.as_contact().cloned())
            .ok_or(EngineError::NotFound { table, id })
    }

    /// Replace a contact's details; the active flag is kept.
    pub async fn update_contact(
        &self,
        kind: ContactKind,
        id: Ulid,
        form: &ContactForm,
    ) -> Result<Record, EngineError> {
        let current = self.load_contact(kind, id).await?;
        forms::validate(form, self.now(), self.settings.tz)?;
        let contact = Contact {
            name: required(&form.name, "name")?,
            organisation: clean(&form.organisation),
            email: clean(&form.email),
            phone: clean(&form.phone),
            active: current.active,
        };
        Ok(self.store.update(id, kind.wrap(contact)).await?)
    }

    /// Deactivated contacts keep their history but cannot be picked for new
    /// visits or weekends.
    pub async fn set_contact_active(&self, kind: ContactKind, id: Ulid, active: bool) -> Result<Record, EngineError> {
        let mut contact = self.load_contact(kind, id).await?;
        contact.active = active;
        let record = self.store.update(id, kind.wrap(contact)).await?;
        info!("{} {id} active={active}", kind.table());
        Ok(record)
    }

    // ── Weekend caretakers ───────────────────────────────────

    /// Put an active caretaker on duty for a free weekend.
    pub async fn assign_weekend(&self, form: &WeekendForm) -> Result<Record, EngineError> {
        forms::validate(form, self.now(), self.settings.tz)?;
        let caretaker_id = form
            .caretaker_id
            .ok_or_else(|| EngineError::invalid("caretaker_id", "Select a caretaker"))?;
        let saturday = form
            .weekend
            .ok_or_else(|| EngineError::invalid("weekend", "Weekend is required"))?;

        let caretaker = self
            .store
            .get(Table::Caretakers, caretaker_id)
            .await?
            .ok_or_else(|| EngineError::invalid("caretaker_id", "Unknown caretaker"))?;
        if caretaker.body.as_contact().is_some_and(|c| !c.active) {
            return Err(EngineError::invalid(
                "caretaker_id",
                format!("{} is no longer an active caretaker", caretaker.label()),
            ));
        }

        let assignment = WeekendAssignment {
            caretaker_id,
            weekend: midday_utc(saturday),
            notes: clean(&form.notes),
        };
        let weekend_span = Span::new(assignment.weekend, assignment.weekend + chrono::Duration::days(1));
        let taken = self
            .store
            .query(Table::WeekendAssignments, &Filter::all().overlapping(weekend_span))
            .await?;
        if let Some(existing) = taken.first() {
            let holder = match &existing.body {
                RecordBody::WeekendAssignment(w) => self
                    .store
                    .get(Table::Caretakers, w.caretaker_id)
                    .await?
                    .map(|c| c.label().to_string()),
                _ => None,
            };
            return Err(EngineError::invalid(
                "weekend",
                format!(
                    "The weekend of {saturday} is already covered by {}",
                    holder.as_deref().unwrap_or("another caretaker")
                ),
            ));
        }

        let record = self.store.insert(RecordBody::WeekendAssignment(assignment)).await?;
        info!("{} is on duty the weekend of {saturday}", caretaker.label());
        Ok(record)
    }

    pub async fn unassign_weekend(&self, id: Ulid) -> Result<(), EngineError> {
        self.store.delete(Table::WeekendAssignments, id).await?;
        info!("removed weekend assignment {id}");
        Ok(())
    }
}
