mod availability;
mod conflict;
mod error;
mod matcher;
mod queries;
mod scheduling;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use matcher::{REASON_BUSY, REASON_NOT_REGISTERED};

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::dispatch::NotificationDispatcher;
use crate::limits::MAX_NAME_LEN;
use crate::model::*;
use crate::notify::EventBus;
use crate::wal::Wal;

pub type SharedRoom = Arc<RwLock<RoomState>>;
pub type SharedStaff = Arc<RwLock<StaffState>>;
pub type SharedEquipment = Arc<RwLock<EquipmentState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Commit {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    CommitsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches commits for group commit.
/// 1. Block until the first Commit arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Commits (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Commit { events, response } => {
                let mut batch = vec![(events, response)];

                // Drain all immediately available commits
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Commit { events, response }) => {
                            batch.push((events, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-commit command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_commit(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_commit(&mut wal, other),
        }
    }
}

type PendingCommit = (Vec<Event>, oneshot::Sender<io::Result<()>>);

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingCommit>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [PendingCommit]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (events, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(events) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<PendingCommit>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_commit(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::CommitsSinceCompact { response } => {
            let _ = response.send(wal.commits_since_compact());
        }
        WalCommand::Commit { .. } => unreachable!(),
    }
}

// ── Transaction lock set ─────────────────────────────────

/// Write guards held for the duration of one scheduling transaction.
///
/// Acquisition order is room → staff (ascending id) → equipment (ascending
/// id); every writer follows it, which rules out lock-order deadlocks.
#[derive(Default)]
pub(super) struct TxnLocks {
    pub room: Option<(Ulid, OwnedRwLockWriteGuard<RoomState>)>,
    pub staff: BTreeMap<Ulid, OwnedRwLockWriteGuard<StaffState>>,
    pub equipment: BTreeMap<Ulid, OwnedRwLockWriteGuard<EquipmentState>>,
}

/// The scheduling core: resource pools, committed schedule state, and the
/// WAL writer that makes commits durable.
///
/// The persistent-store handle (WAL path) and the event bus are injected;
/// there is no process-global state.
pub struct Engine {
    pub(super) users: DashMap<Ulid, UserInfo>,
    pub(super) rooms: DashMap<Ulid, SharedRoom>,
    pub(super) staff: DashMap<Ulid, SharedStaff>,
    pub(super) equipment: DashMap<Ulid, SharedEquipment>,
    pub(super) operations: DashMap<Ulid, Operation>,
    /// Assignment rows keyed by owning operation.
    pub(super) assignments: DashMap<Ulid, Vec<AssignmentRow>>,
    /// Persisted notification rows keyed by staff member.
    pub(super) notifications: DashMap<Ulid, Vec<NotificationRow>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) dispatcher: NotificationDispatcher,
}

impl Engine {
    pub fn new(wal_path: &Path, bus: Arc<dyn EventBus>) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            users: DashMap::new(),
            rooms: DashMap::new(),
            staff: DashMap::new(),
            equipment: DashMap::new(),
            operations: DashMap::new(),
            assignments: DashMap::new(),
            notifications: DashMap::new(),
            wal_tx,
            dispatcher: NotificationDispatcher::new(bus),
        };

        // Replay — we're the sole owner of every Arc here, so the
        // uncontended try_write inside apply always succeeds instantly.
        let mut locks = TxnLocks::default();
        for event in &events {
            engine.apply(event, &mut locks);
        }

        Ok(engine)
    }

    /// Make a commit durable, then apply it to in-memory state.
    ///
    /// All-or-nothing: a WAL failure applies none of the events. Every
    /// room/staff/equipment touched by `events` must already be locked in
    /// `locks` (replay passes an empty set and locks uncontended).
    pub(super) async fn commit(
        &self,
        events: Vec<Event>,
        locks: &mut TxnLocks,
    ) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Commit {
                events: events.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        for event in &events {
            self.apply(event, locks);
        }
        Ok(())
    }

    /// Apply one durably committed event to in-memory state.
    fn apply(&self, event: &Event, locks: &mut TxnLocks) {
        match event {
            Event::UserRegistered { id, username, role } => {
                self.users.insert(
                    *id,
                    UserInfo {
                        id: *id,
                        username: username.clone(),
                        role: *role,
                    },
                );
            }
            Event::RoomRegistered { id, name, is_active } => {
                self.rooms.insert(
                    *id,
                    Arc::new(RwLock::new(RoomState {
                        id: *id,
                        name: name.clone(),
                        is_active: *is_active,
                        book: CommitmentBook::default(),
                    })),
                );
            }
            Event::StaffRegistered {
                id,
                user_id,
                specialization,
            } => {
                self.staff.insert(
                    *id,
                    Arc::new(RwLock::new(StaffState {
                        id: *id,
                        user_id: *user_id,
                        specialization: specialization.clone(),
                        book: CommitmentBook::default(),
                    })),
                );
            }
            Event::EquipmentRegistered { id, name } => {
                self.equipment.insert(
                    *id,
                    Arc::new(RwLock::new(EquipmentState {
                        id: *id,
                        name: name.clone(),
                        status: EquipmentStatus::Available,
                        book: CommitmentBook::default(),
                    })),
                );
            }
            Event::OperationScheduled {
                id,
                name,
                description,
                date,
                start,
                duration_min,
                room_id,
                scheduler_id,
            } => {
                let op = Operation {
                    id: *id,
                    name: name.clone(),
                    description: description.clone(),
                    date: *date,
                    start: *start,
                    duration_min: *duration_min,
                    room_id: *room_id,
                    scheduler_id: *scheduler_id,
                    status: OperationStatus::Scheduled,
                };
                let commitment = Commitment {
                    operation_id: *id,
                    date: *date,
                    span: op.span(),
                };
                self.with_room_mut(locks, room_id, |room| room.book.insert(commitment));
                self.operations.insert(*id, op);
            }
            Event::ResourceAssigned {
                operation_id,
                staff_id,
                equipment_id,
                assigned_by,
                assigned_at,
            } => {
                let row = AssignmentRow {
                    operation_id: *operation_id,
                    staff_id: *staff_id,
                    equipment_id: *equipment_id,
                    assigned_by: *assigned_by,
                    assigned_at: *assigned_at,
                    notified: false,
                };
                // The owning operation is always applied earlier in the
                // same commit (or an earlier one).
                if let Some(op) = self.operations.get(operation_id) {
                    let commitment = Commitment {
                        operation_id: *operation_id,
                        date: op.date,
                        span: op.span(),
                    };
                    drop(op);
                    if let Some(sid) = staff_id {
                        self.with_staff_mut(locks, sid, |s| s.book.insert(commitment));
                    }
                    if let Some(eid) = equipment_id {
                        self.with_equipment_mut(locks, eid, |e| e.book.insert(commitment));
                    }
                }
                self.assignments.entry(*operation_id).or_default().push(row);
            }
            Event::EquipmentStatusChanged { id, status } => {
                self.with_equipment_mut(locks, id, |e| e.status = *status);
            }
            Event::NotificationQueued {
                id,
                staff_id,
                operation_id,
                text,
                time,
            } => {
                self.notifications.entry(*staff_id).or_default().push(NotificationRow {
                    id: *id,
                    staff_id: *staff_id,
                    operation_id: *operation_id,
                    text: text.clone(),
                    time: *time,
                    is_read: false,
                });
            }
        }
    }

    fn with_room_mut(&self, locks: &mut TxnLocks, id: &Ulid, f: impl FnOnce(&mut RoomState)) {
        if let Some((locked_id, guard)) = locks.room.as_mut()
            && *locked_id == *id {
                f(&mut *guard);
                return;
            }
        if let Some(room) = self.get_room(id) {
            f(&mut room.try_write().expect("apply: uncontended write"));
        }
    }

    fn with_staff_mut(&self, locks: &mut TxnLocks, id: &Ulid, f: impl FnOnce(&mut StaffState)) {
        if let Some(guard) = locks.staff.get_mut(id) {
            f(&mut *guard);
            return;
        }
        if let Some(staff) = self.get_staff(id) {
            f(&mut staff.try_write().expect("apply: uncontended write"));
        }
    }

    fn with_equipment_mut(
        &self,
        locks: &mut TxnLocks,
        id: &Ulid,
        f: impl FnOnce(&mut EquipmentState),
    ) {
        if let Some(guard) = locks.equipment.get_mut(id) {
            f(&mut *guard);
            return;
        }
        if let Some(equipment) = self.get_equipment(id) {
            f(&mut equipment.try_write().expect("apply: uncontended write"));
        }
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoom> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_staff(&self, id: &Ulid) -> Option<SharedStaff> {
        self.staff.get(id).map(|e| e.value().clone())
    }

    pub fn get_equipment(&self, id: &Ulid) -> Option<SharedEquipment> {
        self.equipment.get(id).map(|e| e.value().clone())
    }

    pub fn user(&self, id: &Ulid) -> Option<UserInfo> {
        self.users.get(id).map(|e| e.value().clone())
    }

    // ── Reference-data registration (write path of the external
    //    administration workflows; minimal by design) ──────────

    pub async fn register_user(
        &self,
        id: Ulid,
        username: &str,
        role: crate::auth::Role,
    ) -> Result<(), EngineError> {
        if username.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("username too long"));
        }
        if self.users.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::UserRegistered {
            id,
            username: username.to_string(),
            role,
        };
        self.commit(vec![event], &mut TxnLocks::default()).await
    }

    pub async fn register_room(&self, id: Ulid, name: &str) -> Result<RoomInfo, EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::RoomRegistered {
            id,
            name: name.to_string(),
            is_active: true,
        };
        self.commit(vec![event], &mut TxnLocks::default()).await?;
        let info = RoomInfo {
            room_id: id,
            room_name: name.to_string(),
            is_active: true,
        };
        self.dispatcher.notify_room_update("added", &info);
        Ok(info)
    }

    pub async fn register_staff(
        &self,
        id: Ulid,
        user_id: Ulid,
        specialization: Option<&str>,
    ) -> Result<(), EngineError> {
        if self.staff.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::StaffRegistered {
            id,
            user_id,
            specialization: specialization.map(str::to_string),
        };
        self.commit(vec![event], &mut TxnLocks::default()).await
    }

    pub async fn register_equipment(&self, id: Ulid, name: &str) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("equipment name too long"));
        }
        if self.equipment.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::EquipmentRegistered {
            id,
            name: name.to_string(),
        };
        self.commit(vec![event], &mut TxnLocks::default()).await
    }

    // ── WAL compaction ───────────────────────────────────────

    /// Minimal event sequence that recreates the current state on replay.
    pub(super) fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();

        for entry in self.users.iter() {
            let u = entry.value();
            events.push(Event::UserRegistered {
                id: u.id,
                username: u.username.clone(),
                role: u.role,
            });
        }
        for (_, room) in self.collect_rooms() {
            let guard = room.try_read().expect("compact: uncontended read");
            events.push(Event::RoomRegistered {
                id: guard.id,
                name: guard.name.clone(),
                is_active: guard.is_active,
            });
        }
        for (_, staff) in self.collect_staff() {
            let guard = staff.try_read().expect("compact: uncontended read");
            events.push(Event::StaffRegistered {
                id: guard.id,
                user_id: guard.user_id,
                specialization: guard.specialization.clone(),
            });
        }
        let mut equipment_status = Vec::new();
        for (_, equipment) in self.collect_equipment() {
            let guard = equipment.try_read().expect("compact: uncontended read");
            events.push(Event::EquipmentRegistered {
                id: guard.id,
                name: guard.name.clone(),
            });
            if guard.status != EquipmentStatus::Available {
                equipment_status.push(Event::EquipmentStatusChanged {
                    id: guard.id,
                    status: guard.status,
                });
            }
        }

        // Operations in id order so assignment rows land after their owner
        let mut ops: Vec<Operation> =
            self.operations.iter().map(|e| e.value().clone()).collect();
        ops.sort_by_key(|o| o.id);
        for op in ops {
            events.push(Event::OperationScheduled {
                id: op.id,
                name: op.name.clone(),
                description: op.description.clone(),
                date: op.date,
                start: op.start,
                duration_min: op.duration_min,
                room_id: op.room_id,
                scheduler_id: op.scheduler_id,
            });
            if let Some(rows) = self.assignments.get(&op.id) {
                for row in rows.iter() {
                    events.push(Event::ResourceAssigned {
                        operation_id: row.operation_id,
                        staff_id: row.staff_id,
                        equipment_id: row.equipment_id,
                        assigned_by: row.assigned_by,
                        assigned_at: row.assigned_at,
                    });
                }
            }
        }

        events.extend(equipment_status);

        for entry in self.notifications.iter() {
            for row in entry.value() {
                events.push(Event::NotificationQueued {
                    id: row.id,
                    staff_id: row.staff_id,
                    operation_id: row.operation_id,
                    text: row.text.clone(),
                    time: row.time,
                });
            }
        }

        events
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let events = self.snapshot_events();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_commits_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::CommitsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    // ── Arc collection helpers (never hold a DashMap shard ref
    //    across an await point) ───────────────────────────────

    pub(super) fn collect_rooms(&self) -> Vec<(Ulid, SharedRoom)> {
        self.rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub(super) fn collect_staff(&self) -> Vec<(Ulid, SharedStaff)> {
        self.staff
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub(super) fn collect_equipment(&self) -> Vec<(Ulid, SharedEquipment)> {
        self.equipment
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }
}
