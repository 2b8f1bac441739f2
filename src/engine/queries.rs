use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::free_slots;
use super::{Engine, EngineError, Field};

impl Engine {
    pub async fn get_classroom(&self, id: Ulid) -> Result<ClassroomInfo, EngineError> {
        let cs = self
            .get_classroom_state(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = cs.read().await;
        Ok(guard.info.clone())
    }

    /// All classrooms, ordered by id.
    pub async fn list_classrooms(&self) -> Vec<ClassroomInfo> {
        let states: Vec<_> = self.classrooms.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(states.len());
        for cs in states {
            infos.push(cs.read().await.info.clone());
        }
        infos.sort_by_key(|c| c.id);
        infos
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let classroom_id = self
            .get_classroom_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let cs = self
            .get_classroom_state(&classroom_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = cs.read().await;
        guard
            .get_reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// A classroom's reservations, ordered by start.
    pub async fn list_reservations(&self, classroom_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let cs = self
            .get_classroom_state(&classroom_id)
            .ok_or(EngineError::NotFound(classroom_id))?;
        let guard = cs.read().await;
        Ok(guard.reservations.clone())
    }

    /// Every reservation in the institution, ordered by start then classroom.
    pub async fn list_all_reservations(&self) -> Vec<Reservation> {
        let states: Vec<_> = self.classrooms.iter().map(|e| e.value().clone()).collect();
        let mut all = Vec::new();
        for cs in states {
            all.extend(cs.read().await.reservations.iter().cloned());
        }
        all.sort_by_key(|r| (r.span.start, r.classroom_id));
        all
    }

    /// Reservations of one classroom that overlap `[start, end)`.
    pub async fn reservations_in_window(
        &self,
        classroom_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<Reservation>, EngineError> {
        let query = query_window(start, end)?;
        let cs = self
            .get_classroom_state(&classroom_id)
            .ok_or(EngineError::NotFound(classroom_id))?;
        let guard = cs.read().await;
        Ok(guard.overlapping(&query).cloned().collect())
    }

    pub async fn free_slots(
        &self,
        classroom_id: Ulid,
        start: Ms,
        end: Ms,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        let query = query_window(start, end)?;
        let cs = self
            .get_classroom_state(&classroom_id)
            .ok_or(EngineError::NotFound(classroom_id))?;
        let guard = cs.read().await;

        let mut free = free_slots(&guard, &query);
        if let Some(min_dur) = min_duration_ms {
            free.retain(|span| span.duration_ms() >= min_dur);
        }
        Ok(free)
    }

    /// Academic periods, ordered by start date.
    pub async fn list_periods(&self) -> Vec<AcademicPeriod> {
        self.periods.read().await.clone()
    }

    pub async fn get_period(&self, id: Ulid) -> Result<AcademicPeriod, EngineError> {
        self.periods
            .read()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn period_containing(&self, date: NaiveDate) -> Option<AcademicPeriod> {
        self.periods
            .read()
            .await
            .iter()
            .find(|p| p.span.contains_date(date))
            .cloned()
    }

    /// Audit history in commit order, optionally narrowed to one entity.
    pub async fn audit_log(&self, entity_id: Option<Ulid>) -> Vec<AuditEntry> {
        let audit = self.audit.lock().await;
        audit
            .iter()
            .filter(|e| entity_id.is_none_or(|id| e.entity_id == id))
            .cloned()
            .collect()
    }
}

fn query_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if end <= start {
        return Err(EngineError::validation(
            Field::EndTime,
            "end time must be after start time",
        ));
    }
    if end
        .checked_sub(start)
        .is_none_or(|width| width > MAX_QUERY_WINDOW_MS)
    {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(Span::new(start, end))
}
