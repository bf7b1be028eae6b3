use chrono::Duration;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.duration() > Duration::days(MAX_SPAN_DAYS) {
        return Err(EngineError::invalid(
            "end",
            format!("a reservation may last at most {MAX_SPAN_DAYS} days"),
        ));
    }
    Ok(())
}

fn occupies(record: &Record, resource_id: Ulid, span: &Span) -> bool {
    record.room_id() == Some(resource_id) && record.span().is_some_and(|s| s.overlaps(span))
}

/// True if any reservation in `existing` holds `resource_id` during `span`.
/// Rows for other rooms never conflict; touching spans never conflict.
pub fn has_conflict(resource_id: Ulid, span: &Span, existing: &[Record]) -> bool {
    existing.iter().any(|r| occupies(r, resource_id, span))
}

/// Every reservation in `existing` that holds `resource_id` during `span`.
pub fn find_conflicts<'a>(resource_id: Ulid, span: &Span, existing: &'a [Record]) -> Vec<&'a Record> {
    existing
        .iter()
        .filter(|r| occupies(r, resource_id, span))
        .collect()
}

/// Check each occurrence against `existing` and against the occurrences of
/// the same batch accepted before it. An occurrence that clashes is not
/// accepted, so later siblings are not reported against it.
pub(crate) fn check_batch(
    room: &Record,
    occurrences: &[Span],
    existing: &[Record],
) -> Vec<super::ConflictReport> {
    let room_name = room.label().to_string();
    let mut accepted: Vec<Span> = Vec::with_capacity(occurrences.len());
    let mut reports = Vec::new();

    for span in occurrences {
        let mut clashed = false;
        for hit in find_conflicts(room.id, span, existing) {
            clashed = true;
            reports.push(super::ConflictReport {
                room_id: room.id,
                room_name: room_name.clone(),
                requested: *span,
                conflicting_id: Some(hit.id),
                conflicting: hit.span().unwrap_or(*span),
                conflicting_title: hit.label().to_string(),
            });
        }
        if let Some(sibling) = accepted.iter().find(|s| s.overlaps(span)) {
            clashed = true;
            reports.push(super::ConflictReport {
                room_id: room.id,
                room_name: room_name.clone(),
                requested: *span,
                conflicting_id: None,
                conflicting: *sibling,
                conflicting_title: String::new(),
            });
        }
        if !clashed {
            accepted.push(*span);
        }
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::Recurrence;
    use chrono::{TimeZone, Utc};

    fn at(h: u32, m: u32) -> Instant {
        Utc.with_ymd_and_hms(2024, 2, 12, h, m, 0).unwrap()
    }

    fn span(h1: u32, m1: u32, h2: u32, m2: u32) -> Span {
        Span::new(at(h1, m1), at(h2, m2))
    }

    fn room(name: &str) -> Record {
        Record {
            id: Ulid::new(),
            created_at: Utc::now(),
            body: RecordBody::Room(Room {
                name: name.into(),
                notes: None,
            }),
        }
    }

    fn booking(room_id: Ulid, span: Span, title: &str) -> Record {
        Record {
            id: Ulid::new(),
            created_at: Utc::now(),
            body: RecordBody::Booking(Reservation {
                room_id: Some(room_id),
                span,
                recurrence: Recurrence::None,
                owner: Owner::User("desk".into()),
                title: title.into(),
                notes: None,
                series_id: None,
                visit_date: None,
                linked_visit: None,
                authorized_by: None,
            }),
        }
    }

    #[test]
    fn touching_boundary_is_not_a_conflict() {
        let r = Ulid::new();
        let existing = vec![booking(r, span(10, 0, 11, 0), "standup")];
        assert!(!has_conflict(r, &span(9, 0, 10, 0), &existing));
        assert!(!has_conflict(r, &span(11, 0, 12, 0), &existing));
    }

    #[test]
    fn partial_overlap_conflicts() {
        let r = Ulid::new();
        let existing = vec![booking(r, span(10, 0, 11, 0), "standup")];
        assert!(has_conflict(r, &span(9, 30, 10, 30), &existing));
        assert!(has_conflict(r, &span(10, 59, 12, 0), &existing));
        assert!(has_conflict(r, &span(9, 0, 12, 0), &existing));
        assert!(has_conflict(r, &span(10, 15, 10, 45), &existing));
    }

    #[test]
    fn other_room_never_conflicts() {
        let r = Ulid::new();
        let existing = vec![booking(r, span(10, 0, 11, 0), "standup")];
        assert!(!has_conflict(Ulid::new(), &span(10, 0, 11, 0), &existing));
    }

    #[test]
    fn roomless_rows_are_ignored() {
        let r = Ulid::new();
        let mut visit = booking(r, span(10, 0, 11, 0), "visit");
        if let RecordBody::Booking(res) = &mut visit.body {
            res.room_id = None;
        }
        assert!(!has_conflict(r, &span(10, 0, 11, 0), &[visit]));
    }

    #[test]
    fn find_conflicts_collects_all() {
        let r = Ulid::new();
        let existing = vec![
            booking(r, span(9, 0, 10, 0), "a"),
            booking(r, span(10, 0, 11, 0), "b"),
            booking(r, span(12, 0, 13, 0), "c"),
            booking(Ulid::new(), span(9, 0, 13, 0), "other room"),
        ];
        let hits = find_conflicts(r, &span(9, 30, 12, 30), &existing);
        let titles: Vec<&str> = hits.iter().map(|h| h.label()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }

    #[test]
    fn batch_reports_existing_and_sibling_clashes() {
        let hall = room("Hall");
        let existing = vec![booking(hall.id, span(10, 0, 11, 0), "choir")];
        let occurrences = vec![
            span(8, 0, 9, 0),   // free
            span(8, 30, 9, 30), // clashes with the first sibling
            span(10, 30, 11, 30), // clashes with "choir"
            span(12, 0, 13, 0), // free
        ];
        let reports = check_batch(&hall, &occurrences, &existing);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].conflicting_id, None);
        assert_eq!(reports[0].conflicting, span(8, 0, 9, 0));
        assert_eq!(reports[1].conflicting_id, Some(existing[0].id));
        assert_eq!(reports[1].conflicting_title, "choir");
        assert_eq!(reports[1].room_name, "Hall");
    }

    #[test]
    fn clean_batch_has_no_reports() {
        let hall = room("Hall");
        let occurrences = vec![span(8, 0, 9, 0), span(9, 0, 10, 0)];
        assert!(check_batch(&hall, &occurrences, &[]).is_empty());
    }

    #[test]
    fn overlong_span_is_rejected() {
        let s = Span::new(at(0, 0), at(0, 0) + Duration::days(MAX_SPAN_DAYS + 1));
        assert!(matches!(validate_span(&s), Err(EngineError::Validation(_))));
        assert!(validate_span(&span(9, 0, 10, 0)).is_ok());
    }
}
