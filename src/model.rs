use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

/// Half-open overlap: `[s1, e1)` and `[s2, e2)` share at least one point.
pub fn half_open_overlap<T: PartialOrd>(s1: &T, e1: &T, s2: &T, e2: &T) -> bool {
    s1 < e2 && s2 < e1
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        half_open_overlap(&self.start, &self.end, &other.start, &other.end)
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Half-open calendar range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateSpan start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        half_open_overlap(&self.start, &self.end, &other.start, &other.end)
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub classroom_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    /// Always uppercase.
    pub course: String,
    pub description: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// A reservation that has been validated and expanded but not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDraft {
    pub classroom_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub course: String,
    pub description: Option<String>,
}

impl ReservationDraft {
    pub(crate) fn into_reservation(self, id: Ulid, created_at: Ms, updated_at: Ms) -> Reservation {
        Reservation {
            id,
            classroom_id: self.classroom_id,
            user_id: self.user_id,
            span: self.span,
            course: self.course,
            description: self.description,
            created_at,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassroomInfo {
    pub id: Ulid,
    pub name: String,
    /// Seat count. Informational only; a classroom holds one reservation at a time.
    pub capacity: u32,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone)]
pub struct ClassroomState {
    pub info: ClassroomInfo,
    /// Sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl ClassroomState {
    pub fn new(info: ClassroomInfo) -> Self {
        Self {
            info,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get_reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcademicPeriod {
    pub id: Ulid,
    pub name: String,
    pub span: DateSpan,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEntity {
    Classroom,
    Reservation,
    Period,
}

impl AuditEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEntity::Classroom => "classroom",
            AuditEntity::Reservation => "reservation",
            AuditEntity::Period => "period",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Ulid,
    pub at: Ms,
    pub actor: String,
    pub action: AuditAction,
    pub entity: AuditEntity,
    pub entity_id: Ulid,
}

/// State changes, flat with no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ClassroomCreated { classroom: ClassroomInfo },
    ClassroomUpdated { classroom: ClassroomInfo },
    ClassroomDeleted { id: Ulid },
    ReservationCreated { reservation: Reservation },
    /// `previous_classroom_id` differs from `reservation.classroom_id` when the
    /// reservation moved.
    ReservationUpdated {
        reservation: Reservation,
        previous_classroom_id: Ulid,
    },
    ReservationDeleted { id: Ulid, classroom_id: Ulid },
    PeriodCreated { period: AcademicPeriod },
    PeriodUpdated { period: AcademicPeriod },
    PeriodDeleted { id: Ulid },
}

/// One WAL entry. A mutation and its audit row share a single `Commit`, so
/// they become durable together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecord {
    Commit { event: Event, audit: AuditEntry },
    /// State written by compaction; carries no audit row of its own.
    Event(Event),
    /// Audit history written by compaction.
    Audit(AuditEntry),
    /// Several mutations that commit together, e.g. a multi-row insert.
    Batch { commits: Vec<(Event, AuditEntry)> },
}
