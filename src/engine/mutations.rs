use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_batch_disjoint, check_no_conflict, check_period_conflict, now_ms, validate_date_span,
    validate_span,
};
use super::recurrence::NewReservationRequest;
use super::{apply_to_classroom, apply_to_periods, Engine, EngineError, Field, FieldErrors, WalCommand};

/// How a recurring request is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecurrencePolicy {
    /// Each week is checked and persisted on its own. A conflicting week
    /// neither undoes earlier weeks nor stops later ones.
    #[default]
    PerInstance,
    /// Every week is persisted, or none is.
    Atomic,
}

/// Result for one expanded week of a recurring request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceOutcome {
    pub week: u32,
    pub span: Span,
    pub result: Result<Reservation, EngineError>,
}

fn validate_name(name: &str) -> Result<String, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::validation(Field::Name, "name is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::validation(Field::Name, "name too long"));
    }
    Ok(name.to_string())
}

/// Uppercase the course, drop a blank description, check the span.
pub(crate) fn normalize_draft(draft: ReservationDraft) -> Result<ReservationDraft, EngineError> {
    let mut errors = FieldErrors::new();

    let course = draft.course.trim().to_uppercase();
    if course.is_empty() {
        errors.insert(Field::Course, "course is required");
    } else if course.len() > MAX_COURSE_LEN {
        errors.insert(Field::Course, "course too long");
    }

    let description = draft
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    if description.as_ref().is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        errors.insert(Field::Description, "description too long");
    }

    match validate_span(&draft.span) {
        Ok(()) => {}
        Err(EngineError::Validation(span_errors)) => errors.extend(span_errors),
        Err(other) => return Err(other),
    }
    errors.into_validation()?;

    Ok(ReservationDraft {
        course,
        description,
        ..draft
    })
}

/// A missing classroom named by a reservation form is a field error, not a
/// missing entity.
fn classroom_field_err(e: EngineError) -> EngineError {
    match e {
        EngineError::NotFound(id) => {
            EngineError::validation(Field::ClassroomId, format!("unknown classroom {id}"))
        }
        other => other,
    }
}

impl Engine {
    pub async fn create_classroom(
        &self,
        id: Ulid,
        name: &str,
        capacity: u32,
        actor: &str,
    ) -> Result<ClassroomInfo, EngineError> {
        let _catalog = self.catalog.write().await;
        if self.classrooms.len() >= MAX_CLASSROOMS_PER_INSTITUTION {
            return Err(EngineError::LimitExceeded("too many classrooms"));
        }
        let name = validate_name(name)?;
        if self.classrooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let now = now_ms();
        let info = ClassroomInfo {
            id,
            name,
            capacity,
            created_at: now,
            updated_at: now,
        };
        let event = Event::ClassroomCreated {
            classroom: info.clone(),
        };
        let audit = Engine::audit_entry(actor, AuditAction::Create, AuditEntity::Classroom, id, now);
        self.commit(&event, audit).await?;
        self.classrooms
            .insert(id, Arc::new(RwLock::new(ClassroomState::new(info.clone()))));
        Ok(info)
    }

    pub async fn update_classroom(
        &self,
        id: Ulid,
        name: &str,
        capacity: u32,
        actor: &str,
    ) -> Result<ClassroomInfo, EngineError> {
        let name = validate_name(name)?;
        let mut guard = self.lock_classroom(id).await?;

        let now = now_ms();
        let info = ClassroomInfo {
            id,
            name,
            capacity,
            created_at: guard.info.created_at,
            updated_at: now,
        };
        let event = Event::ClassroomUpdated {
            classroom: info.clone(),
        };
        let audit = Engine::audit_entry(actor, AuditAction::Update, AuditEntity::Classroom, id, now);
        self.persist_and_apply(&mut guard, &event, audit).await?;
        Ok(info)
    }

    pub async fn delete_classroom(&self, id: Ulid, actor: &str) -> Result<(), EngineError> {
        let _catalog = self.catalog.write().await;
        // Held until the map entry is gone so queued writers see the deletion.
        let guard = self.lock_classroom(id).await?;
        if !guard.reservations.is_empty() {
            return Err(EngineError::HasReservations(id));
        }

        let now = now_ms();
        let event = Event::ClassroomDeleted { id };
        let audit = Engine::audit_entry(actor, AuditAction::Delete, AuditEntity::Classroom, id, now);
        self.commit(&event, audit).await?;
        self.classrooms.remove(&id);
        drop(guard);
        Ok(())
    }

    pub async fn create_reservation(
        &self,
        id: Ulid,
        draft: ReservationDraft,
        actor: &str,
    ) -> Result<Reservation, EngineError> {
        let draft = normalize_draft(draft)?;
        let mut guard = self
            .lock_classroom(draft.classroom_id)
            .await
            .map_err(classroom_field_err)?;
        self.insert_locked(&mut guard, id, draft, actor).await
    }

    /// Conflict-check and persist one normalized draft into a locked classroom.
    async fn insert_locked(
        &self,
        cs: &mut ClassroomState,
        id: Ulid,
        draft: ReservationDraft,
        actor: &str,
    ) -> Result<Reservation, EngineError> {
        if cs.reservations.len() >= MAX_RESERVATIONS_PER_CLASSROOM {
            return Err(EngineError::LimitExceeded("too many reservations in classroom"));
        }
        if self.reservation_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        check_no_conflict(cs, &draft.span, None)?;

        let now = now_ms();
        let reservation = draft.into_reservation(id, now, now);
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        let audit = Engine::audit_entry(actor, AuditAction::Create, AuditEntity::Reservation, id, now);
        self.persist_and_apply(cs, &event, audit).await?;
        Ok(reservation)
    }

    /// Create several reservations all-or-nothing: if any one conflicts with an
    /// existing reservation or with another member of the batch, none are
    /// committed. Members may target different classrooms.
    pub async fn create_reservations_atomic(
        &self,
        batch: Vec<(Ulid, ReservationDraft)>,
        actor: &str,
    ) -> Result<Vec<Reservation>, EngineError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if batch.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let batch = batch
            .into_iter()
            .map(|(id, draft)| Ok::<_, EngineError>((id, normalize_draft(draft)?)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::with_capacity(batch.len());
        for (id, _) in &batch {
            if !seen.insert(*id) || self.reservation_index.contains_key(id) {
                return Err(EngineError::AlreadyExists(*id));
            }
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut classroom_ids: Vec<Ulid> = batch.iter().map(|(_, d)| d.classroom_id).collect();
        classroom_ids.sort();
        classroom_ids.dedup();

        let mut guards = Vec::with_capacity(classroom_ids.len());
        let mut slot = HashMap::with_capacity(classroom_ids.len());
        for cid in &classroom_ids {
            let guard = self
                .lock_classroom(*cid)
                .await
                .map_err(classroom_field_err)?;
            slot.insert(*cid, guards.len());
            guards.push(guard);
        }

        // Phase 1: validate everything against current state and within the batch.
        for (_, draft) in &batch {
            let cs = &guards[slot[&draft.classroom_id]];
            if cs.reservations.len() >= MAX_RESERVATIONS_PER_CLASSROOM {
                return Err(EngineError::LimitExceeded("too many reservations in classroom"));
            }
            check_no_conflict(cs, &draft.span, None)?;
        }
        let drafts: Vec<&ReservationDraft> = batch.iter().map(|(_, d)| d).collect();
        check_batch_disjoint(&drafts)?;

        // Phase 2: all validated, one WAL record for the batch, then apply.
        let now = now_ms();
        let created: Vec<Reservation> = batch
            .into_iter()
            .map(|(id, draft)| draft.into_reservation(id, now, now))
            .collect();
        let commits: Vec<(Event, AuditEntry)> = created
            .iter()
            .map(|reservation| {
                let audit = Engine::audit_entry(
                    actor,
                    AuditAction::Create,
                    AuditEntity::Reservation,
                    reservation.id,
                    now,
                );
                let event = Event::ReservationCreated {
                    reservation: reservation.clone(),
                };
                (event, audit)
            })
            .collect();
        self.commit_batch(commits.clone()).await?;
        for (event, _) in &commits {
            if let Event::ReservationCreated { reservation } = event {
                let idx = slot[&reservation.classroom_id];
                apply_to_classroom(&mut guards[idx], event, &self.reservation_index);
            }
        }
        Ok(created)
    }

    /// Expand a weekly request and persist its occurrences under `policy`.
    ///
    /// Malformed or out-of-range input fails the whole request before anything
    /// is written. Under [`RecurrencePolicy::PerInstance`] the returned outcomes
    /// hold one result per week, in week order.
    pub async fn request_reservations(
        &self,
        request: &NewReservationRequest,
        policy: RecurrencePolicy,
        actor: &str,
    ) -> Result<Vec<InstanceOutcome>, EngineError> {
        let drafts = request
            .drafts()?
            .into_iter()
            .map(|(week, draft)| Ok::<_, EngineError>((week, normalize_draft(draft)?)))
            .collect::<Result<Vec<_>, _>>()?;
        if !self.classrooms.contains_key(&request.classroom_id) {
            return Err(classroom_field_err(EngineError::NotFound(request.classroom_id)));
        }

        match policy {
            RecurrencePolicy::PerInstance => {
                let mut outcomes = Vec::with_capacity(drafts.len());
                for (week, draft) in drafts {
                    let span = draft.span;
                    let result = self.create_reservation(Ulid::new(), draft, actor).await;
                    outcomes.push(InstanceOutcome { week, span, result });
                }
                Ok(outcomes)
            }
            RecurrencePolicy::Atomic => {
                let weeks: Vec<(u32, Span)> = drafts.iter().map(|(w, d)| (*w, d.span)).collect();
                let batch = drafts
                    .into_iter()
                    .map(|(_, draft)| (Ulid::new(), draft))
                    .collect();
                let created = self.create_reservations_atomic(batch, actor).await?;
                Ok(weeks
                    .into_iter()
                    .zip(created)
                    .map(|((week, span), reservation)| InstanceOutcome {
                        week,
                        span,
                        result: Ok(reservation),
                    })
                    .collect())
            }
        }
    }

    /// Replace a reservation's fields. The conflict re-check ignores the
    /// reservation itself; moving to another classroom locks both rooms.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        draft: ReservationDraft,
        actor: &str,
    ) -> Result<Reservation, EngineError> {
        let draft = normalize_draft(draft)?;
        let current = self
            .get_classroom_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let target = draft.classroom_id;

        if current == target {
            let (_, mut guard) = self.resolve_reservation_write(id).await?;
            if guard.info.id != target {
                // Moved by a concurrent update while we waited.
                return Err(EngineError::NotFound(id));
            }
            let created_at = guard
                .get_reservation(id)
                .map(|r| r.created_at)
                .ok_or(EngineError::NotFound(id))?;
            check_no_conflict(&guard, &draft.span, Some(id))?;

            let now = now_ms();
            let reservation = draft.into_reservation(id, created_at, now);
            let event = Event::ReservationUpdated {
                reservation: reservation.clone(),
                previous_classroom_id: current,
            };
            let audit = Engine::audit_entry(actor, AuditAction::Update, AuditEntity::Reservation, id, now);
            self.persist_and_apply(&mut guard, &event, audit).await?;
            return Ok(reservation);
        }

        let (mut from, mut to) = self.lock_move(id, current, target).await?;
        let created_at = from
            .get_reservation(id)
            .map(|r| r.created_at)
            .ok_or(EngineError::NotFound(id))?;
        if to.reservations.len() >= MAX_RESERVATIONS_PER_CLASSROOM {
            return Err(EngineError::LimitExceeded("too many reservations in classroom"));
        }
        check_no_conflict(&to, &draft.span, Some(id))?;

        let now = now_ms();
        let reservation = draft.into_reservation(id, created_at, now);
        let event = Event::ReservationUpdated {
            reservation: reservation.clone(),
            previous_classroom_id: current,
        };
        let audit = Engine::audit_entry(actor, AuditAction::Update, AuditEntity::Reservation, id, now);
        self.commit(&event, audit).await?;
        apply_to_classroom(&mut from, &event, &self.reservation_index);
        apply_to_classroom(&mut to, &event, &self.reservation_index);
        Ok(reservation)
    }

    /// Lock source and target classrooms in sorted order; returns `(from, to)`.
    async fn lock_move(
        &self,
        reservation_id: Ulid,
        current: Ulid,
        target: Ulid,
    ) -> Result<
        (
            OwnedRwLockWriteGuard<ClassroomState>,
            OwnedRwLockWriteGuard<ClassroomState>,
        ),
        EngineError,
    > {
        let (first, second) = if current < target {
            (current, target)
        } else {
            (target, current)
        };
        let map_err = |cid: Ulid| {
            move |e: EngineError| {
                if cid == current {
                    EngineError::NotFound(reservation_id)
                } else {
                    classroom_field_err(e)
                }
            }
        };
        let first_guard = self.lock_classroom(first).await.map_err(map_err(first))?;
        let second_guard = self.lock_classroom(second).await.map_err(map_err(second))?;
        if first == current {
            Ok((first_guard, second_guard))
        } else {
            Ok((second_guard, first_guard))
        }
    }

    pub async fn delete_reservation(&self, id: Ulid, actor: &str) -> Result<Ulid, EngineError> {
        let (classroom_id, mut guard) = self.resolve_reservation_write(id).await?;
        let now = now_ms();
        let event = Event::ReservationDeleted { id, classroom_id };
        let audit = Engine::audit_entry(actor, AuditAction::Delete, AuditEntity::Reservation, id, now);
        self.persist_and_apply(&mut guard, &event, audit).await?;
        Ok(classroom_id)
    }

    pub async fn create_period(
        &self,
        id: Ulid,
        name: &str,
        span: DateSpan,
        actor: &str,
    ) -> Result<AcademicPeriod, EngineError> {
        let name = validate_name(name)?;
        validate_date_span(&span)?;

        let mut periods = self.periods.write().await;
        if periods.len() >= MAX_PERIODS_PER_INSTITUTION {
            return Err(EngineError::LimitExceeded("too many academic periods"));
        }
        if periods.iter().any(|p| p.id == id) {
            return Err(EngineError::AlreadyExists(id));
        }
        check_period_conflict(&span, periods.iter(), None)?;

        let now = now_ms();
        let period = AcademicPeriod {
            id,
            name,
            span,
            created_at: now,
            updated_at: now,
        };
        let event = Event::PeriodCreated {
            period: period.clone(),
        };
        let audit = Engine::audit_entry(actor, AuditAction::Create, AuditEntity::Period, id, now);
        self.commit(&event, audit).await?;
        apply_to_periods(&mut periods, &event);
        Ok(period)
    }

    pub async fn update_period(
        &self,
        id: Ulid,
        name: &str,
        span: DateSpan,
        actor: &str,
    ) -> Result<AcademicPeriod, EngineError> {
        let name = validate_name(name)?;
        validate_date_span(&span)?;

        let mut periods = self.periods.write().await;
        let created_at = periods
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.created_at)
            .ok_or(EngineError::NotFound(id))?;
        check_period_conflict(&span, periods.iter(), Some(id))?;

        let now = now_ms();
        let period = AcademicPeriod {
            id,
            name,
            span,
            created_at,
            updated_at: now,
        };
        let event = Event::PeriodUpdated {
            period: period.clone(),
        };
        let audit = Engine::audit_entry(actor, AuditAction::Update, AuditEntity::Period, id, now);
        self.commit(&event, audit).await?;
        apply_to_periods(&mut periods, &event);
        Ok(period)
    }

    pub async fn delete_period(&self, id: Ulid, actor: &str) -> Result<(), EngineError> {
        let mut periods = self.periods.write().await;
        if !periods.iter().any(|p| p.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let now = now_ms();
        let event = Event::PeriodDeleted { id };
        let audit = Engine::audit_entry(actor, AuditAction::Delete, AuditEntity::Period, id, now);
        self.commit(&event, audit).await?;
        apply_to_periods(&mut periods, &event);
        Ok(())
    }

    /// Rewrite the WAL with only the records needed to recreate the current
    /// state and audit history.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.write().await;
        let mut ids: Vec<Ulid> = self.classrooms.iter().map(|e| *e.key()).collect();
        ids.sort();

        // Read locks are held until the rewrite lands so no mutation slips
        // between the snapshot and the swap.
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(cs) = self.get_classroom_state(&id) {
                guards.push(cs.read_owned().await);
            }
        }
        let periods = self.periods.read().await;
        let audit = self.audit.lock().await;

        let mut records: Vec<WalRecord> = audit.iter().cloned().map(WalRecord::Audit).collect();
        for cs in &guards {
            records.push(WalRecord::Event(Event::ClassroomCreated {
                classroom: cs.info.clone(),
            }));
            for reservation in &cs.reservations {
                records.push(WalRecord::Event(Event::ReservationCreated {
                    reservation: reservation.clone(),
                }));
            }
        }
        for period in periods.iter() {
            records.push(WalRecord::Event(Event::PeriodCreated {
                period: period.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                records,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
