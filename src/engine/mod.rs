mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
pub mod recurrence;

pub use availability::{free_slots, merge_overlapping, subtract_intervals};
pub use conflict::{
    check_period_conflict, check_reservation_conflict, find_period_conflict,
    find_reservation_conflict, period_conflict_fields, reservation_conflict_fields,
};
pub use error::{EngineError, ErrorKind, Field, FieldErrors};
pub use mutations::{InstanceOutcome, RecurrencePolicy};
pub use recurrence::{NewReservationRequest, Occurrence, ReservationForm};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedClassroomState = Arc<RwLock<ClassroomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        record: WalRecord,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<WalRecord>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => {
                            batch.push((record, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            timed_flush(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    timed_flush(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type PendingAppend = (WalRecord, oneshot::Sender<io::Result<()>>);

fn timed_flush(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (record, _) in batch {
        if let Err(e) = wal.append_buffered(record) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: &mut Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// One institution's classrooms, reservations, academic periods and audit log.
pub struct Engine {
    pub(super) classrooms: DashMap<Ulid, SharedClassroomState>,
    /// Reverse lookup: reservation id → classroom id
    pub(super) reservation_index: DashMap<Ulid, Ulid>,
    /// Sorted by `span.start`.
    pub(super) periods: RwLock<Vec<AcademicPeriod>>,
    pub(super) audit: Mutex<Vec<AuditEntry>>,
    /// Taken exclusively by classroom create/delete and by compaction, so a
    /// compaction snapshot never misses a committed classroom or keeps a
    /// deleted one. Ordered before any classroom lock.
    pub(super) catalog: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply a reservation or classroom event to one classroom (caller holds the lock).
/// A moved reservation is detached from the previous classroom and attached to
/// the new one; call this once per affected classroom.
fn apply_to_classroom(cs: &mut ClassroomState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ClassroomUpdated { classroom } => {
            cs.info = classroom.clone();
        }
        Event::ReservationCreated { reservation } => {
            cs.insert_reservation(reservation.clone());
            index.insert(reservation.id, reservation.classroom_id);
        }
        Event::ReservationUpdated {
            reservation,
            previous_classroom_id,
        } => {
            if cs.info.id == *previous_classroom_id {
                cs.remove_reservation(reservation.id);
            }
            if cs.info.id == reservation.classroom_id {
                cs.insert_reservation(reservation.clone());
                index.insert(reservation.id, reservation.classroom_id);
            }
        }
        Event::ReservationDeleted { id, .. } => {
            cs.remove_reservation(*id);
            index.remove(id);
        }
        // Classroom create/delete are handled at the DashMap level, periods elsewhere
        Event::ClassroomCreated { .. }
        | Event::ClassroomDeleted { .. }
        | Event::PeriodCreated { .. }
        | Event::PeriodUpdated { .. }
        | Event::PeriodDeleted { .. } => {}
    }
}

fn apply_to_periods(periods: &mut Vec<AcademicPeriod>, event: &Event) {
    match event {
        Event::PeriodCreated { period } => {
            let pos = periods
                .binary_search_by_key(&period.span.start, |p| p.span.start)
                .unwrap_or_else(|e| e);
            periods.insert(pos, period.clone());
        }
        Event::PeriodUpdated { period } => {
            periods.retain(|p| p.id != period.id);
            apply_to_periods(
                periods,
                &Event::PeriodCreated {
                    period: period.clone(),
                },
            );
        }
        Event::PeriodDeleted { id } => periods.retain(|p| p.id != *id),
        _ => {}
    }
}

/// Classrooms whose reservation lists an event touches.
fn event_classroom_ids(event: &Event) -> Vec<Ulid> {
    match event {
        Event::ClassroomUpdated { classroom } => vec![classroom.id],
        Event::ReservationCreated { reservation } => vec![reservation.classroom_id],
        Event::ReservationUpdated {
            reservation,
            previous_classroom_id,
        } if *previous_classroom_id != reservation.classroom_id => {
            vec![*previous_classroom_id, reservation.classroom_id]
        }
        Event::ReservationUpdated { reservation, .. } => vec![reservation.classroom_id],
        Event::ReservationDeleted { classroom_id, .. } => vec![*classroom_id],
        Event::ClassroomCreated { .. }
        | Event::ClassroomDeleted { .. }
        | Event::PeriodCreated { .. }
        | Event::PeriodUpdated { .. }
        | Event::PeriodDeleted { .. } => vec![],
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let (records, wal) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let classrooms: DashMap<Ulid, SharedClassroomState> = DashMap::new();
        let reservation_index = DashMap::new();
        let mut periods = Vec::new();
        let mut audit = Vec::new();

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never use blocking_write here: this may run inside an async
        // context (lazy institution creation).
        for record in records {
            let commits = match record {
                WalRecord::Commit { event, audit } => vec![(Some(event), Some(audit))],
                WalRecord::Event(event) => vec![(Some(event), None)],
                WalRecord::Audit(entry) => vec![(None, Some(entry))],
                WalRecord::Batch { commits } => commits
                    .into_iter()
                    .map(|(event, entry)| (Some(event), Some(entry)))
                    .collect(),
            };
            for (event, entry) in commits {
                if let Some(event) = event {
                    replay_event(&classrooms, &reservation_index, &mut periods, &event);
                }
                if let Some(entry) = entry {
                    audit.push(entry);
                }
            }
        }

        Ok(Self {
            classrooms,
            reservation_index,
            periods: RwLock::new(periods),
            audit: Mutex::new(audit),
            catalog: RwLock::new(()),
            wal_tx,
        })
    }

    /// Write a record to the WAL via the background group-commit writer.
    async fn wal_append(&self, record: WalRecord) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                record,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Durably record `event` together with its audit row, then publish the row.
    pub(super) async fn commit(&self, event: &Event, audit: AuditEntry) -> Result<(), EngineError> {
        self.wal_append(WalRecord::Commit {
            event: event.clone(),
            audit: audit.clone(),
        })
        .await?;
        self.audit.lock().await.push(audit);
        Ok(())
    }

    /// Durably record several events as one WAL record; none of them is
    /// visible after a crash unless all are.
    pub(super) async fn commit_batch(
        &self,
        commits: Vec<(Event, AuditEntry)>,
    ) -> Result<(), EngineError> {
        let entries: Vec<AuditEntry> = commits.iter().map(|(_, audit)| audit.clone()).collect();
        self.wal_append(WalRecord::Batch { commits }).await?;
        self.audit.lock().await.extend(entries);
        Ok(())
    }

    /// Commit + apply to a locked classroom in one call.
    pub(super) async fn persist_and_apply(
        &self,
        cs: &mut ClassroomState,
        event: &Event,
        audit: AuditEntry,
    ) -> Result<(), EngineError> {
        self.commit(event, audit).await?;
        apply_to_classroom(cs, event, &self.reservation_index);
        Ok(())
    }

    pub fn get_classroom_state(&self, id: &Ulid) -> Option<SharedClassroomState> {
        self.classrooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_classroom_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_index.get(reservation_id).map(|e| *e.value())
    }

    /// Write-lock a classroom, failing if it was deleted while we waited.
    pub(super) async fn lock_classroom(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ClassroomState>, EngineError> {
        let cs = self
            .get_classroom_state(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = cs.write_owned().await;
        if !self.classrooms.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    /// Lookup reservation → classroom, acquire the classroom write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ClassroomState>), EngineError> {
        let classroom_id = self
            .get_classroom_for_reservation(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let guard = self.lock_classroom(classroom_id).await?;
        if guard.get_reservation(reservation_id).is_none() {
            return Err(EngineError::NotFound(reservation_id));
        }
        Ok((classroom_id, guard))
    }

    pub(super) fn audit_entry(
        actor: &str,
        action: AuditAction,
        entity: AuditEntity,
        entity_id: Ulid,
        at: Ms,
    ) -> AuditEntry {
        AuditEntry {
            id: Ulid::new(),
            at,
            actor: actor.to_string(),
            action,
            entity,
            entity_id,
        }
    }
}

fn replay_event(
    classrooms: &DashMap<Ulid, SharedClassroomState>,
    index: &DashMap<Ulid, Ulid>,
    periods: &mut Vec<AcademicPeriod>,
    event: &Event,
) {
    match event {
        Event::ClassroomCreated { classroom } => {
            let cs = ClassroomState::new(classroom.clone());
            classrooms.insert(classroom.id, Arc::new(RwLock::new(cs)));
        }
        Event::ClassroomDeleted { id } => {
            if let Some((_, cs)) = classrooms.remove(id)
                && let Ok(guard) = cs.try_read() {
                    for r in &guard.reservations {
                        index.remove(&r.id);
                    }
                }
        }
        Event::PeriodCreated { .. } | Event::PeriodUpdated { .. } | Event::PeriodDeleted { .. } => {
            apply_to_periods(periods, event);
        }
        other => {
            for classroom_id in event_classroom_ids(other) {
                if let Some(entry) = classrooms.get(&classroom_id) {
                    let cs = entry.value().clone();
                    drop(entry);
                    if let Ok(mut guard) = cs.try_write() {
                        apply_to_classroom(&mut guard, other, index);
                    }
                }
            }
        }
    }
}
