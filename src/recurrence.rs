//! Recurrence rules and occurrence generation.
//!
//! Calendar steps (days, weeks, months) are taken on the facility's local wall
//! clock so that a 09:00 booking stays at 09:00 across daylight-saving changes.
//! Every occurrence keeps the duration of the base span.

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::limits::*;
use crate::model::{Instant, Span};

/// Set of weekdays, one bit per day starting at Monday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Weekday>", into = "Vec<Weekday>")]
pub struct Weekdays(u8);

impl Weekdays {
    pub const EMPTY: Weekdays = Weekdays(0);

    fn bit(day: Weekday) -> u8 {
        1 << day.num_days_from_monday()
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= Self::bit(day);
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & Self::bit(day) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Days in Monday-first order.
    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        (0..7u8)
            .filter(|i| self.0 & (1 << i) != 0)
            .filter_map(|i| Weekday::try_from(i).ok())
    }
}

impl FromIterator<Weekday> for Weekdays {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Weekdays::EMPTY;
        for day in iter {
            set.insert(day);
        }
        set
    }
}

impl From<Vec<Weekday>> for Weekdays {
    fn from(days: Vec<Weekday>) -> Self {
        days.into_iter().collect()
    }
}

impl From<Weekdays> for Vec<Weekday> {
    fn from(set: Weekdays) -> Self {
        set.iter().collect()
    }
}

/// How a reservation repeats. `until` is exclusive: no occurrence starts at
/// or after it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    #[default]
    None,
    Daily {
        interval: u32,
        until: Option<Instant>,
    },
    Weekly {
        interval: u32,
        #[serde(default)]
        days_of_week: Weekdays,
        until: Option<Instant>,
    },
    Monthly {
        interval: u32,
        until: Option<Instant>,
    },
}

impl Recurrence {
    pub fn is_recurring(&self) -> bool {
        !matches!(self, Recurrence::None)
    }

    pub fn interval(&self) -> Option<u32> {
        match self {
            Recurrence::None => None,
            Recurrence::Daily { interval, .. }
            | Recurrence::Weekly { interval, .. }
            | Recurrence::Monthly { interval, .. } => Some(*interval),
        }
    }

    pub fn until(&self) -> Option<Instant> {
        match self {
            Recurrence::None => None,
            Recurrence::Daily { until, .. }
            | Recurrence::Weekly { until, .. }
            | Recurrence::Monthly { until, .. } => *until,
        }
    }

    /// Same rule with `until` replaced. No-op for non-recurring rules.
    pub fn with_until(self, new_until: Option<Instant>) -> Self {
        match self {
            Recurrence::None => Recurrence::None,
            Recurrence::Daily { interval, .. } => Recurrence::Daily { interval, until: new_until },
            Recurrence::Weekly { interval, days_of_week, .. } => Recurrence::Weekly {
                interval,
                days_of_week,
                until: new_until,
            },
            Recurrence::Monthly { interval, .. } => Recurrence::Monthly { interval, until: new_until },
        }
    }

    /// Structural checks that do not depend on the base span.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self.interval() {
            None => Ok(()),
            Some(0) => Err("repeat interval must be at least 1"),
            Some(n) if n > MAX_RECURRENCE_INTERVAL => Err("repeat interval too large"),
            Some(_) => Ok(()),
        }
    }
}

/// Exclusive upper bound for a series: the rule's `until` when set, otherwise
/// `horizon_months` calendar months after the base start.
pub fn series_bound(base_start: Instant, rule: &Recurrence, horizon_months: u32, tz: Tz) -> Instant {
    if let Some(until) = rule.until() {
        return until;
    }
    let local = base_start.with_timezone(&tz).naive_local();
    local
        .checked_add_months(Months::new(horizon_months))
        .and_then(|naive| resolve_local(tz, naive))
        .unwrap_or(base_start + Duration::days(31 * i64::from(horizon_months)))
}

/// First instant after `date` in `tz`, i.e. the following local midnight.
/// Forms turn an inclusive "last day" into an exclusive `until` with this.
pub fn end_of_local_day(date: NaiveDate, tz: Tz) -> Option<Instant> {
    let next = date.succ_opt()?.and_hms_opt(0, 0, 0)?;
    resolve_local(tz, next)
}

/// Map a local wall-clock time to an instant. Ambiguous times (clocks going
/// back) take the earlier instant; times inside a gap (clocks going forward)
/// are moved forward by one hour.
pub fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<Instant> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            naive
                .checked_add_signed(Duration::hours(1))
                .and_then(|shifted| tz.from_local_datetime(&shifted).earliest())
        })
        .map(|t| t.with_timezone(&Utc))
}

/// Lazy occurrence sequence. A clone continues from the same position; a
/// fresh [`Occurrences::new`] with the same inputs replays the same sequence.
#[derive(Debug, Clone)]
pub struct Occurrences {
    base: Span,
    rule: Recurrence,
    bound: Instant,
    tz: Tz,
    local_start: NaiveDateTime,
    duration: Duration,
    /// Occurrences emitted so far.
    emitted: u32,
    /// Days walked so far (weekly rules with explicit weekdays).
    walked: i64,
    done: bool,
}

impl Occurrences {
    pub fn new(base: Span, rule: &Recurrence, bound: Instant, tz: Tz) -> Self {
        Self {
            base,
            rule: rule.clone(),
            bound,
            tz,
            local_start: base.start.with_timezone(&tz).naive_local(),
            duration: base.duration(),
            emitted: 0,
            walked: 0,
            done: false,
        }
    }

    fn local_days(&self, days: i64) -> Option<NaiveDateTime> {
        self.local_start.checked_add_signed(Duration::try_days(days)?)
    }

    /// Local start of the next candidate after the seed, or `None` when the
    /// rule cannot produce another one.
    fn next_candidate(&mut self) -> Option<NaiveDateTime> {
        let k = i64::from(self.emitted);
        match &self.rule {
            Recurrence::None => None,
            Recurrence::Daily { interval, .. } => self.local_days(k * i64::from(*interval)),
            Recurrence::Weekly { interval, days_of_week, .. } if days_of_week.is_empty() => {
                self.local_days(k * 7 * i64::from(*interval))
            }
            Recurrence::Weekly { interval, days_of_week, .. } => {
                let (interval, days) = (i64::from(*interval), *days_of_week);
                // Walk day by day through 7-day blocks; after each block skip
                // (interval - 1) whole weeks.
                loop {
                    self.walked += 1;
                    let offset = (self.walked / 7) * 7 * interval + self.walked % 7;
                    let candidate = self.local_days(offset)?;
                    if days.contains(candidate.weekday()) {
                        return Some(candidate);
                    }
                    // A non-matching day past the bound ends the walk too.
                    if resolve_local(self.tz, candidate).is_none_or(|t| t >= self.bound) {
                        return None;
                    }
                }
            }
            Recurrence::Monthly { interval, .. } => {
                let months = u32::try_from(k).ok()?.checked_mul(*interval)?;
                // Day-of-month clamps to the end of shorter months.
                self.local_start.checked_add_months(Months::new(months))
            }
        }
    }
}

impl Iterator for Occurrences {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        if self.done {
            return None;
        }
        if self.emitted == 0 {
            self.emitted = 1;
            if self.base.start >= self.bound {
                self.done = true;
                return None;
            }
            return Some(self.base);
        }
        let start = self
            .next_candidate()
            .and_then(|naive| resolve_local(self.tz, naive))
            .filter(|start| *start >= self.base.start && *start < self.bound);
        match start {
            Some(start) => {
                self.emitted += 1;
                Some(Span::new(start, start + self.duration))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// All occurrences of `rule` applied to `base`, seed included, strictly
/// increasing in start time, none starting at or after `bound`.
pub fn generate_occurrences(base: Span, rule: &Recurrence, bound: Instant, tz: Tz) -> Vec<Span> {
    Occurrences::new(base, rule, bound, tz).collect()
}
