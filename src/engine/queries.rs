use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use chrono_tz::Tz;
use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::recurrence::resolve_local;
use crate::store::{Filter, Order};

use super::{Engine, EngineError};

/// How far a month view reaches into the neighbouring months, so that the
/// leading and trailing days of the calendar grid are filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarWindow {
    pub lookback_days: u32,
    pub lookahead_days: u32,
}

impl Default for CalendarWindow {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            lookahead_days: 14,
        }
    }
}

impl CalendarWindow {
    /// Span covering local month `year-month` in `tz`, widened by the window.
    /// `None` for a month that does not exist.
    pub fn month(&self, year: i32, month: u32, tz: Tz) -> Option<Span> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        let from = first.checked_sub_signed(Duration::days(i64::from(self.lookback_days)))?;
        let to = next.checked_add_signed(Duration::days(i64::from(self.lookahead_days)))?;
        let start = resolve_local(tz, from.and_hms_opt(0, 0, 0)?)?;
        let end = resolve_local(tz, to.and_hms_opt(0, 0, 0)?)?;
        Span::try_new(start, end)
    }
}

/// One weekend in the caretaker rota.
#[derive(Debug, Clone, Serialize)]
pub struct WeekendSlot {
    pub saturday: NaiveDate,
    pub assignment: Option<Record>,
    pub caretaker: Option<Record>,
}

fn by_name(rows: &mut [Record]) {
    rows.sort_by_cached_key(|r| r.label().to_lowercase());
}

impl Engine {
    /// Today's date on the facility's wall clock.
    pub fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.settings.tz).date_naive()
    }

    /// All rooms, alphabetically.
    pub async fn rooms(&self) -> Result<Vec<Record>, EngineError> {
        let mut rows = self.store.query(Table::Rooms, &Filter::all()).await?;
        by_name(&mut rows);
        Ok(rows)
    }

    /// Contractors, partners or caretakers, alphabetically.
    pub async fn contacts(&self, kind: ContactKind, include_inactive: bool) -> Result<Vec<Record>, EngineError> {
        let filter = if include_inactive { Filter::all() } else { Filter::all().active() };
        let mut rows = self.store.query(kind.table(), &filter).await?;
        by_name(&mut rows);
        Ok(rows)
    }

    /// Reservations shown on the month view of `year-month`, optionally for
    /// one room only, ordered by start.
    pub async fn calendar(
        &self,
        table: Table,
        year: i32,
        month: u32,
        room: Option<Ulid>,
    ) -> Result<Vec<Record>, EngineError> {
        let window = self
            .settings
            .window
            .month(year, month, self.settings.tz)
            .ok_or_else(|| EngineError::invalid("month", format!("{year}-{month} is not a month")))?;
        self.reservations_between(table, window, room).await
    }

    pub async fn reservations_between(
        &self,
        table: Table,
        window: Span,
        room: Option<Ulid>,
    ) -> Result<Vec<Record>, EngineError> {
        if !table.holds_reservations() {
            return Err(EngineError::invalid("table", format!("{table} does not hold reservations")));
        }
        let mut filter = Filter::all().overlapping(window);
        if let Some(room) = room {
            filter = filter.room(room);
        }
        Ok(self.store.query(table, &filter).await?)
    }

    /// Every remaining row of a series, ordered by start.
    pub async fn series(&self, table: Table, series_id: Ulid) -> Result<Vec<Record>, EngineError> {
        let filter = Filter::all().series(series_id).ordered_by(Order::Start);
        Ok(self.store.query(table, &filter).await?)
    }

    /// The next `count` weekends starting with the first Saturday on or after
    /// `from`, with their caretaker if one is on duty.
    pub async fn upcoming_weekends(&self, from: NaiveDate, count: usize) -> Result<Vec<WeekendSlot>, EngineError> {
        let count = count.min(MAX_WEEKENDS_LISTED);
        if count == 0 {
            return Ok(Vec::new());
        }
        let offset = (7 + Weekday::Sat.num_days_from_monday() - from.weekday().num_days_from_monday()) % 7;
        let first = from
            .checked_add_signed(Duration::days(i64::from(offset)))
            .ok_or_else(|| EngineError::invalid("from", "Date out of range"))?;
        let saturdays: Vec<NaiveDate> = (0..count)
            .map_while(|i| first.checked_add_signed(Duration::weeks(i as i64)))
            .collect();
        let (Some(head), Some(tail)) = (saturdays.first(), saturdays.last()) else {
            return Ok(Vec::new());
        };
        let range = Span::new(midday_utc(*head), midday_utc(*tail) + Duration::days(1));

        let assignments = self
            .store
            .query(Table::WeekendAssignments, &Filter::all().overlapping(range))
            .await?;
        let caretakers: HashMap<Ulid, Record> = self
            .store
            .query(Table::Caretakers, &Filter::all())
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let mut by_day: HashMap<NaiveDate, Record> = HashMap::new();
        for record in assignments {
            if let RecordBody::WeekendAssignment(w) = &record.body {
                by_day.insert(pinned_date(w.weekend), record);
            }
        }

        Ok(saturdays
            .into_iter()
            .map(|saturday| {
                let assignment = by_day.remove(&saturday);
                let caretaker = assignment.as_ref().and_then(|a| match &a.body {
                    RecordBody::WeekendAssignment(w) => caretakers.get(&w.caretaker_id).cloned(),
                    _ => None,
                });
                WeekendSlot {
                    saturday,
                    assignment,
                    caretaker,
                }
            })
            .collect())
    }
}
