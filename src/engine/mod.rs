mod conflict;
mod error;
mod forms;
mod mutations;
mod queries;

pub use conflict::{find_conflicts, has_conflict};
pub use error::{ConflictReport, EngineError, FieldError};
pub use forms::{BookingForm, ContactForm, RoomForm, VisitForm, VisitKind, WeekendForm};
pub use mutations::VisitReceipt;
pub use queries::{CalendarWindow, WeekendSlot};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::recurrence::{series_bound, Occurrences, Recurrence};
use crate::store::{Filter, Store};

use conflict::{check_batch, validate_span};

/// Facility-wide scheduling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Wall-clock zone of the facility. Recurrence steps and date-only
    /// form fields are interpreted in it.
    pub tz: Tz,
    /// Horizon for open-ended recurring room bookings.
    pub booking_horizon_months: u32,
    /// Horizon for open-ended recurring visits.
    pub visit_horizon_months: u32,
    pub window: CalendarWindow,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tz: chrono_tz::UTC,
            booking_horizon_months: 3,
            visit_horizon_months: 12,
            window: CalendarWindow::default(),
        }
    }
}

pub type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Booking service: validates submissions, expands recurring ones, checks
/// them for double bookings and writes them through the injected [`Store`].
///
/// Each call is one sequential unit of work. Two clients racing for the same
/// slot are not serialised against each other.
pub struct Engine {
    store: Arc<dyn Store>,
    settings: Settings,
    clock: Clock,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, settings: Settings) -> Self {
        Self::with_clock(store, settings, Arc::new(Utc::now))
    }

    pub fn with_clock(store: Arc<dyn Store>, settings: Settings, clock: Clock) -> Self {
        Self {
            store,
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(super) fn now(&self) -> Instant {
        (self.clock)()
    }

    /// Load the selected rooms, dropping repeated ids. Unknown rooms are a
    /// form error, not a lookup failure.
    pub(super) async fn resolve_rooms(&self, ids: &[Ulid]) -> Result<Vec<Record>, EngineError> {
        let mut seen = HashSet::with_capacity(ids.len());
        let mut rooms = Vec::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(*id) {
                continue;
            }
            match self.store.get(Table::Rooms, *id).await? {
                Some(room) => rooms.push(room),
                None => {
                    return Err(EngineError::invalid(
                        "room_ids",
                        format!("Unknown room {id}"),
                    ));
                }
            }
        }
        Ok(rooms)
    }

    /// Concrete occurrences of `rule` applied to `base`, bounded by the rule's
    /// end date or `horizon_months`.
    pub(super) fn expand(
        &self,
        base: Span,
        rule: &Recurrence,
        horizon_months: u32,
    ) -> Result<Vec<Span>, EngineError> {
        validate_span(&base)?;
        rule.validate()
            .map_err(|detail| EngineError::invalid("recurrence", detail))?;
        if let Some(until) = rule.until()
            && until <= base.start
        {
            return Err(EngineError::invalid(
                "repeat_until",
                "Repeat end date must be after the first occurrence",
            ));
        }

        let tz = self.settings.tz;
        let bound = series_bound(base.start, rule, horizon_months, tz);
        let occurrences: Vec<Span> = Occurrences::new(base, rule, bound, tz)
            .take(MAX_OCCURRENCES_PER_SERIES + 1)
            .collect();
        if occurrences.len() > MAX_OCCURRENCES_PER_SERIES {
            return Err(EngineError::invalid(
                "recurrence",
                format!(
                    "Repeats more than {MAX_OCCURRENCES_PER_SERIES} times; choose an earlier end date"
                ),
            ));
        }
        if occurrences.is_empty() {
            return Err(EngineError::invalid("start", "No occurrence falls before the end date"));
        }
        metrics::histogram!(crate::observability::OCCURRENCES_GENERATED)
            .record(occurrences.len() as f64);
        debug!("expanded {base} into {} occurrences", occurrences.len());
        Ok(occurrences)
    }

    /// Check every occurrence in every room against the stored bookings and
    /// against each other. One range query per room. All clashes across all
    /// rooms are reported together.
    pub(super) async fn check_rooms(
        &self,
        rooms: &[Record],
        occurrences: &[Span],
    ) -> Result<(), EngineError> {
        let (Some(first), Some(last)) = (occurrences.first(), occurrences.last()) else {
            return Ok(());
        };
        let window = Span::new(first.start, last.end);

        let mut reports = Vec::new();
        for room in rooms {
            let existing = self
                .store
                .query(
                    Table::Bookings,
                    &Filter::all().room(room.id).overlapping(window),
                )
                .await?;
            reports.extend(check_batch(room, occurrences, &existing));
        }
        if reports.is_empty() {
            return Ok(());
        }
        metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(reports.len() as u64);
        Err(EngineError::Conflict(reports))
    }

    /// Insert `bodies` in order. If one insert fails, the rows written before
    /// it are deleted again and the store error is returned.
    pub(super) async fn insert_all(&self, bodies: Vec<RecordBody>) -> Result<Vec<Record>, EngineError> {
        let mut written = Vec::with_capacity(bodies.len());
        for body in bodies {
            match self.store.insert(body).await {
                Ok(record) => written.push(record),
                Err(e) => {
                    warn!("insert failed after {} rows: {e}", written.len());
                    self.roll_back(&written).await;
                    return Err(EngineError::Store(e));
                }
            }
        }
        Ok(written)
    }

    /// Best-effort removal of rows written by a failed submission. Failures
    /// are logged; the caller reports the original error.
    pub(super) async fn roll_back(&self, rows: &[Record]) {
        if rows.is_empty() {
            return;
        }
        metrics::counter!(crate::observability::ROLLBACKS_TOTAL).increment(1);
        for row in rows.iter().rev() {
            if let Err(e) = self.store.delete(row.table(), row.id).await {
                warn!("rollback: could not delete {} {}: {e}", row.table(), row.id);
            }
        }
        warn!("rolled back {} rows", rows.len());
    }
}
