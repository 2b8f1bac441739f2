use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use ulid::Ulid;

use crate::limits::MAX_WEEK_OFFSET;
use crate::model::{ReservationDraft, Span};

use super::error::{EngineError, Field, FieldErrors};

/// A reservation request as submitted: every field still text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationForm {
    pub classroom_id: String,
    pub user_id: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM` or `HH:MM:SS`
    pub start_hour: String,
    pub end_hour: String,
    /// `+HH:MM`, `-HH:MM`, `Z` or empty for UTC.
    pub utc_offset: Option<String>,
    /// Comma separated, e.g. `1,3,5`. Empty means a single occurrence.
    pub repeat_on_weeks: String,
    pub course: String,
    pub description: Option<String>,
}

/// A parsed, not yet expanded, weekly reservation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservationRequest {
    pub classroom_id: Ulid,
    pub user_id: Ulid,
    pub date: NaiveDate,
    pub utc_offset: FixedOffset,
    pub start_hour: NaiveTime,
    pub end_hour: NaiveTime,
    pub repeat_on_weeks: Vec<u32>,
    pub course: String,
    pub description: Option<String>,
}

/// One expanded instance. `week` is the 1-based offset it came from; a request
/// without repeats yields a single week-1 occurrence on the base date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub week: u32,
    pub span: Span,
}

impl ReservationForm {
    /// Parse every field, collecting all malformed ones before failing.
    pub fn parse(&self) -> Result<NewReservationRequest, EngineError> {
        let mut errors = FieldErrors::new();

        let classroom_id = Ulid::from_string(self.classroom_id.trim())
            .map_err(|e| errors.insert(Field::ClassroomId, format!("invalid id: {e}")))
            .ok();
        let user_id = Ulid::from_string(self.user_id.trim())
            .map_err(|e| errors.insert(Field::UserId, format!("invalid id: {e}")))
            .ok();
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .map_err(|e| errors.insert(Field::Date, format!("invalid date: {e}")))
            .ok();
        let start_hour = parse_time_of_day(&self.start_hour)
            .map_err(|e| errors.insert(Field::StartTime, e))
            .ok();
        let end_hour = parse_time_of_day(&self.end_hour)
            .map_err(|e| errors.insert(Field::EndTime, e))
            .ok();
        let utc_offset = parse_utc_offset(self.utc_offset.as_deref())
            .map_err(|e| errors.insert(Field::UtcOffset, e))
            .ok();
        let repeat_on_weeks = parse_week_list(&self.repeat_on_weeks)
            .map_err(|e| errors.insert(Field::RepeatOnWeeks, e))
            .ok();

        match (classroom_id, user_id, date, start_hour, end_hour, utc_offset, repeat_on_weeks) {
            (
                Some(classroom_id),
                Some(user_id),
                Some(date),
                Some(start_hour),
                Some(end_hour),
                Some(utc_offset),
                Some(repeat_on_weeks),
            ) if errors.is_empty() => Ok(NewReservationRequest {
                classroom_id,
                user_id,
                date,
                utc_offset,
                start_hour,
                end_hour,
                repeat_on_weeks,
                course: self.course.clone(),
                description: self.description.clone(),
            }),
            _ => Err(EngineError::Validation(errors)),
        }
    }
}

impl NewReservationRequest {
    pub fn occurrences(&self) -> Result<Vec<Occurrence>, EngineError> {
        expand(
            self.date,
            self.utc_offset,
            self.start_hour,
            self.end_hour,
            &self.repeat_on_weeks,
        )
    }

    /// Expand into drafts sharing classroom, user, course and description.
    /// Course and description are normalized later, at validation.
    pub fn drafts(&self) -> Result<Vec<(u32, ReservationDraft)>, EngineError> {
        Ok(self
            .occurrences()?
            .into_iter()
            .map(|occ| {
                let draft = ReservationDraft {
                    classroom_id: self.classroom_id,
                    user_id: self.user_id,
                    span: occ.span,
                    course: self.course.clone(),
                    description: self.description.clone(),
                };
                (occ.week, draft)
            })
            .collect())
    }
}

/// Expand a weekly request into concrete occurrences, in ascending week order.
///
/// Week `w` lands `7 * (w - 1)` days after `date`; an empty `weeks` set yields
/// the base date alone. Times are local to `offset`. `end <= start` is rejected
/// rather than rolled over into the next day.
pub fn expand(
    date: NaiveDate,
    offset: FixedOffset,
    start: NaiveTime,
    end: NaiveTime,
    weeks: &[u32],
) -> Result<Vec<Occurrence>, EngineError> {
    if end <= start {
        return Err(EngineError::validation(
            Field::EndTime,
            "end time must be after start time",
        ));
    }
    let weeks = normalize_weeks(weeks)?;
    let weeks = if weeks.is_empty() { vec![1] } else { weeks };

    let mut occurrences = Vec::with_capacity(weeks.len());
    for week in weeks {
        let day = date
            .checked_add_days(Days::new(7 * u64::from(week - 1)))
            .ok_or_else(|| EngineError::validation(Field::Date, "date out of range"))?;
        let start_at = local_instant(offset, day, start, Field::StartTime)?;
        let end_at = local_instant(offset, day, end, Field::EndTime)?;
        occurrences.push(Occurrence {
            week,
            span: Span::new(start_at.timestamp_millis(), end_at.timestamp_millis()),
        });
    }
    Ok(occurrences)
}

/// Sort and dedup week offsets. Offsets are 1-based and bounded.
pub fn normalize_weeks(weeks: &[u32]) -> Result<Vec<u32>, EngineError> {
    if let Some(bad) = weeks.iter().find(|w| **w == 0 || **w > MAX_WEEK_OFFSET) {
        return Err(EngineError::validation(
            Field::RepeatOnWeeks,
            format!("week {bad} outside 1..={MAX_WEEK_OFFSET}"),
        ));
    }
    let mut weeks = weeks.to_vec();
    weeks.sort_unstable();
    weeks.dedup();
    Ok(weeks)
}

fn local_instant(
    offset: FixedOffset,
    day: NaiveDate,
    time: NaiveTime,
    field: Field,
) -> Result<DateTime<FixedOffset>, EngineError> {
    offset
        .from_local_datetime(&day.and_time(time))
        .single()
        .ok_or_else(|| EngineError::validation(field, "time does not exist at this offset"))
}

fn parse_time_of_day(s: &str) -> Result<NaiveTime, String> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| format!("invalid time of day {s:?}: {e}"))
}

fn parse_utc_offset(s: Option<&str>) -> Result<FixedOffset, String> {
    let s = s.map(str::trim).unwrap_or("");
    if s.is_empty() || s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| "invalid offset".to_string());
    }
    s.parse::<FixedOffset>()
        .map_err(|e| format!("invalid UTC offset {s:?}: {e}"))
}

fn parse_week_list(s: &str) -> Result<Vec<u32>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| format!("invalid week offset {part:?}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ErrorKind;

    const H: i64 = 3_600_000;
    const DAY: i64 = 24 * H;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn millis(d: NaiveDate, t: NaiveTime) -> i64 {
        d.and_time(t).and_utc().timestamp_millis()
    }

    fn form() -> ReservationForm {
        ReservationForm {
            classroom_id: Ulid::new().to_string(),
            user_id: Ulid::new().to_string(),
            date: "2024-03-04".into(),
            start_hour: "08:00".into(),
            end_hour: "10:00".into(),
            utc_offset: None,
            repeat_on_weeks: "1,3".into(),
            course: "calc i".into(),
            description: None,
        }
    }

    #[test]
    fn weekly_request_expands_to_listed_weeks() {
        let occ = expand(date(2024, 3, 4), utc(), time(8, 0), time(10, 0), &[1, 3]).unwrap();
        assert_eq!(occ.len(), 2);
        assert_eq!(occ[0].week, 1);
        assert_eq!(
            occ[0].span,
            Span::new(millis(date(2024, 3, 4), time(8, 0)), millis(date(2024, 3, 4), time(10, 0)))
        );
        assert_eq!(occ[1].week, 3);
        assert_eq!(
            occ[1].span,
            Span::new(millis(date(2024, 3, 18), time(8, 0)), millis(date(2024, 3, 18), time(10, 0)))
        );
    }

    #[test]
    fn instance_count_and_spacing_hold_for_any_week_set() {
        let bases = [date(2024, 1, 1), date(2024, 2, 26), date(2023, 12, 28)];
        let week_sets: [&[u32]; 5] = [&[], &[1], &[2, 5], &[4, 1, 2], &[1, 10, 53]];
        for base in bases {
            let base_start = millis(base, time(14, 30));
            for weeks in week_sets {
                let occ = expand(base, utc(), time(14, 30), time(16, 0), weeks).unwrap();
                assert_eq!(occ.len(), weeks.len().max(1));
                if weeks.is_empty() {
                    assert_eq!(occ[0].span.start, base_start);
                }
                for o in &occ {
                    assert_eq!(o.span.start - base_start, 7 * DAY * i64::from(o.week - 1));
                    assert_eq!(o.span.duration_ms(), 90 * 60_000);
                }
                assert!(occ.windows(2).all(|w| w[0].week < w[1].week));
            }
        }
    }

    #[test]
    fn duplicate_and_unsorted_weeks_are_normalized() {
        let occ = expand(date(2024, 3, 4), utc(), time(8, 0), time(9, 0), &[3, 1, 3]).unwrap();
        let weeks: Vec<u32> = occ.iter().map(|o| o.week).collect();
        assert_eq!(weeks, vec![1, 3]);
    }

    #[test]
    fn week_zero_rejected() {
        let err = expand(date(2024, 3, 4), utc(), time(8, 0), time(9, 0), &[0, 1]).unwrap_err();
        assert!(err.field_errors().unwrap().contains(Field::RepeatOnWeeks));
    }

    #[test]
    fn week_beyond_limit_rejected() {
        let err = expand(
            date(2024, 3, 4),
            utc(),
            time(8, 0),
            time(9, 0),
            &[MAX_WEEK_OFFSET + 1],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn end_not_after_start_rejected() {
        for (start, end) in [(time(10, 0), time(8, 0)), (time(10, 0), time(10, 0))] {
            let err = expand(date(2024, 3, 4), utc(), start, end, &[]).unwrap_err();
            assert!(err.field_errors().unwrap().contains(Field::EndTime));
        }
    }

    #[test]
    fn offset_shifts_the_instant() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let occ = expand(date(2024, 3, 4), plus_two, time(8, 0), time(10, 0), &[]).unwrap();
        assert_eq!(occ[0].span.start, millis(date(2024, 3, 4), time(6, 0)));
    }

    #[test]
    fn form_parses() {
        let req = form().parse().unwrap();
        assert_eq!(req.date, date(2024, 3, 4));
        assert_eq!(req.start_hour, time(8, 0));
        assert_eq!(req.repeat_on_weeks, vec![1, 3]);
        assert_eq!(req.utc_offset, utc());
        let drafts = req.drafts().unwrap();
        assert_eq!(drafts.len(), 2);
        assert!(drafts.iter().all(|(_, d)| d.classroom_id == req.classroom_id));
    }

    #[test]
    fn form_accepts_offsets_and_seconds() {
        let mut f = form();
        f.utc_offset = Some("-05:00".into());
        f.start_hour = "08:00:00".into();
        f.repeat_on_weeks = " ".into();
        let req = f.parse().unwrap();
        assert_eq!(req.utc_offset, FixedOffset::west_opt(5 * 3600).unwrap());
        assert!(req.repeat_on_weeks.is_empty());
        assert_eq!(req.occurrences().unwrap().len(), 1);
    }

    #[test]
    fn form_reports_every_malformed_field() {
        let mut f = form();
        f.classroom_id = "nope".into();
        f.date = "2024-13-40".into();
        f.end_hour = "25:99".into();
        f.repeat_on_weeks = "1,x".into();
        f.utc_offset = Some("somewhere".into());
        let err = f.parse().unwrap_err();
        let fields: Vec<Field> = err.field_errors().unwrap().fields().collect();
        assert_eq!(
            fields,
            vec![
                Field::ClassroomId,
                Field::Date,
                Field::EndTime,
                Field::UtcOffset,
                Field::RepeatOnWeeks
            ]
        );
    }
}
