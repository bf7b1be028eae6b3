/// Rooms a single submission may target.
pub const MAX_ROOMS_PER_SUBMISSION: usize = 16;

/// Rows a single recurring series may expand to (per room).
pub const MAX_OCCURRENCES_PER_SERIES: usize = 520;

/// Largest accepted "every N days/weeks/months" step.
pub const MAX_RECURRENCE_INTERVAL: u32 = 366;

/// Longest single reservation, in days.
pub const MAX_SPAN_DAYS: i64 = 31;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_NAME_LEN: usize = 120;
pub const MAX_NOTES_LEN: usize = 4_000;

/// Longest request line the front end accepts, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Most weekends a single listing may return.
pub const MAX_WEEKENDS_LISTED: usize = 104;
