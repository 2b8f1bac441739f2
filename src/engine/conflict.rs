use ulid::Ulid;

use crate::model::*;

use super::error::{EngineError, Field, FieldErrors};

const RESERVED_AT_START: &str = "classroom is already reserved at this start time";
const RESERVED_AT_END: &str = "classroom is already reserved at this end time";
const PERIOD_AT_START: &str = "start date falls inside another academic period";
const PERIOD_AT_END: &str = "end date falls inside another academic period";

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    let mut errors = FieldErrors::new();
    if span.start < MIN_VALID_TIMESTAMP_MS || span.start > MAX_VALID_TIMESTAMP_MS {
        errors.insert(Field::StartTime, "timestamp out of range");
    }
    if span.end < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        errors.insert(Field::EndTime, "timestamp out of range");
    }
    if span.end <= span.start {
        errors.insert(Field::EndTime, "end time must be after start time");
    } else if errors.is_empty() && span.duration_ms() > MAX_RESERVATION_DURATION_MS {
        errors.insert(Field::EndTime, "reservation longer than one day");
    }
    errors.into_validation()
}

pub(crate) fn validate_date_span(span: &DateSpan) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(EngineError::validation(
            Field::EndDate,
            "end date must be after start date",
        ));
    }
    Ok(())
}

/// Which ends of an overlapping candidate land inside the existing range.
/// A candidate that encloses the existing range implicates both.
fn implicated<T: PartialOrd>(cs: &T, ce: &T, es: &T, ee: &T) -> (bool, bool) {
    let start_inside = es <= cs && cs < ee;
    let end_inside = es < ce && ce <= ee;
    if start_inside || end_inside {
        (start_inside, end_inside)
    } else {
        (true, true)
    }
}

pub fn reservation_conflict_fields(candidate: &Span, existing: &Span) -> FieldErrors {
    let (start, end) = implicated(&candidate.start, &candidate.end, &existing.start, &existing.end);
    let mut errors = FieldErrors::new();
    if start {
        errors.insert(Field::StartTime, RESERVED_AT_START);
    }
    if end {
        errors.insert(Field::EndTime, RESERVED_AT_END);
    }
    errors
}

pub fn period_conflict_fields(candidate: &DateSpan, existing: &DateSpan) -> FieldErrors {
    let (start, end) = implicated(&candidate.start, &candidate.end, &existing.start, &existing.end);
    let mut errors = FieldErrors::new();
    if start {
        errors.insert(Field::StartDate, PERIOD_AT_START);
    }
    if end {
        errors.insert(Field::EndDate, PERIOD_AT_END);
    }
    errors
}

/// First reservation in `existing` (input order) that sits in `classroom_id`,
/// is not `exclude`, and overlaps `candidate`.
pub fn find_reservation_conflict<'a, I>(
    candidate: &Span,
    classroom_id: Ulid,
    existing: I,
    exclude: Option<Ulid>,
) -> Option<&'a Reservation>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    existing.into_iter().find(|r| {
        r.classroom_id == classroom_id && Some(r.id) != exclude && r.span.overlaps(candidate)
    })
}

pub fn check_reservation_conflict<'a, I>(
    candidate: &Span,
    classroom_id: Ulid,
    existing: I,
    exclude: Option<Ulid>,
) -> Result<(), EngineError>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    match find_reservation_conflict(candidate, classroom_id, existing, exclude) {
        Some(hit) => Err(EngineError::Conflict(reservation_conflict_fields(
            candidate, &hit.span,
        ))),
        None => Ok(()),
    }
}

pub fn find_period_conflict<'a, I>(
    candidate: &DateSpan,
    existing: I,
    exclude: Option<Ulid>,
) -> Option<&'a AcademicPeriod>
where
    I: IntoIterator<Item = &'a AcademicPeriod>,
{
    existing
        .into_iter()
        .find(|p| Some(p.id) != exclude && p.span.overlaps(candidate))
}

pub fn check_period_conflict<'a, I>(
    candidate: &DateSpan,
    existing: I,
    exclude: Option<Ulid>,
) -> Result<(), EngineError>
where
    I: IntoIterator<Item = &'a AcademicPeriod>,
{
    match find_period_conflict(candidate, existing, exclude) {
        Some(hit) => Err(EngineError::Conflict(period_conflict_fields(
            candidate, &hit.span,
        ))),
        None => Ok(()),
    }
}

/// Conflict check against a classroom's own reservation list, skipping
/// everything outside the candidate window.
pub(crate) fn check_no_conflict(
    cs: &ClassroomState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    check_reservation_conflict(span, cs.info.id, cs.overlapping(span), exclude)
}

/// Reject a batch whose members overlap each other within one classroom.
pub(crate) fn check_batch_disjoint(drafts: &[&ReservationDraft]) -> Result<(), EngineError> {
    for i in 0..drafts.len() {
        for j in (i + 1)..drafts.len() {
            let (a, b) = (drafts[i], drafts[j]);
            if a.classroom_id == b.classroom_id && a.span.overlaps(&b.span) {
                return Err(EngineError::Conflict(reservation_conflict_fields(
                    &b.span, &a.span,
                )));
            }
        }
    }
    Ok(())
}
