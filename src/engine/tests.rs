use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use super::*;
use crate::auth::{Principal, Role};
use crate::notify::{BroadcastBus, EventBus, PublishError};
use crate::request::ScheduleRequest;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("otsched_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn day() -> NaiveDate {
    "2099-03-01".parse().unwrap()
}

/// Unix ms of `h:m` on the test day.
fn at(h: u32, m: u32) -> Ms {
    day()
        .and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
        .and_utc()
        .timestamp_millis()
}

struct Fixture {
    engine: Arc<Engine>,
    bus: Arc<BroadcastBus>,
    scheduler: Principal,
    room: Ulid,
    room2: Ulid,
    /// alice, bob, carol
    staff: Vec<Ulid>,
    /// "Anesthesia Machine", "C-Arm"
    equipment: Vec<Ulid>,
}

async fn fixture(name: &str) -> Fixture {
    let bus = Arc::new(BroadcastBus::new());
    let engine = Arc::new(Engine::new(&test_wal_path(name), bus.clone()).unwrap());

    let scheduler_user = Ulid::new();
    engine
        .register_user(scheduler_user, "drlee", Role::Scheduler)
        .await
        .unwrap();
    let scheduler = Principal {
        user_id: scheduler_user,
        role: Role::Scheduler,
    };

    let room = Ulid::new();
    engine.register_room(room, "OT-1").await.unwrap();
    let room2 = Ulid::new();
    engine.register_room(room2, "OT-2").await.unwrap();

    let mut staff = Vec::new();
    for username in ["alice", "bob", "carol"] {
        let user_id = Ulid::new();
        engine.register_user(user_id, username, Role::Staff).await.unwrap();
        let staff_id = Ulid::new();
        engine
            .register_staff(staff_id, user_id, Some("surgery"))
            .await
            .unwrap();
        staff.push(staff_id);
    }

    let mut equipment = Vec::new();
    for name in ["Anesthesia Machine", "C-Arm"] {
        let id = Ulid::new();
        engine.register_equipment(id, name).await.unwrap();
        equipment.push(id);
    }

    Fixture {
        engine,
        bus,
        scheduler,
        room,
        room2,
        staff,
        equipment,
    }
}

fn request(
    name: &str,
    room: Ulid,
    h: u32,
    m: u32,
    duration_min: u32,
    staff: &[Ulid],
    equipment: &[Ulid],
) -> ScheduleRequest {
    ScheduleRequest {
        operation_name: name.into(),
        description: Some("routine".into()),
        date: day(),
        start: at(h, m),
        duration_min,
        room_id: room,
        staff_ids: staff.to_vec(),
        equipment_ids: equipment.to_vec(),
    }
}

async fn equipment_status(fx: &Fixture, id: Ulid) -> EquipmentStatus {
    fx.engine.get_equipment(&id).unwrap().read().await.status
}

// ── Scheduling transaction ───────────────────────────────

#[tokio::test]
async fn end_to_end_schedule_then_room_conflict() {
    let fx = fixture("end_to_end.wal").await;
    let s1 = fx.staff[0];
    let e1 = fx.equipment[0];

    let req = request("Appendectomy", fx.room, 9, 0, 60, &[s1], &[e1]);
    let result = fx.engine.schedule_operation(&fx.scheduler, &req).await.unwrap();

    assert_eq!(result.assignments.staff_assigned, vec![s1]);
    assert_eq!(result.assignments.equipment_assigned, vec![e1]);
    assert!(result.assignments.staff_failed.is_empty());
    assert!(result.assignments.equipment_failed.is_empty());
    assert_eq!(result.operation.room_name, "OT-1");
    assert_eq!(result.operation.scheduler_name.as_deref(), Some("drlee"));
    assert_eq!(result.operation.operation.status, OperationStatus::Scheduled);

    // One notification row with the templated text
    let notifications = fx.engine.notifications_for(&s1);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].text, "Assigned to: Appendectomy on 2099-03-01");
    assert!(!notifications[0].is_read);

    // Equipment flipped to In Use
    assert_eq!(equipment_status(&fx, e1).await, EquipmentStatus::InUse);

    // Re-read through the enriched detail path
    let detail = fx
        .engine
        .operation_detail(&result.operation.operation.id)
        .await
        .unwrap();
    assert_eq!(detail, result.operation);

    // Overlapping window in the same room names the conflicting operation
    let overlapping = request("Bypass", fx.room, 9, 30, 60, &[], &[]);
    let err = fx
        .engine
        .schedule_operation(&fx.scheduler, &overlapping)
        .await
        .unwrap_err();
    match err {
        EngineError::RoomConflict { operation_name } => {
            assert_eq!(operation_name, "Appendectomy");
        }
        other => panic!("expected RoomConflict, got {other}"),
    }
}

#[tokio::test]
async fn adjacent_room_windows_do_not_conflict() {
    let fx = fixture("adjacent.wal").await;

    let first = request("Appendectomy", fx.room, 9, 0, 60, &[], &[]);
    fx.engine.schedule_operation(&fx.scheduler, &first).await.unwrap();

    // [10:00, 11:00) touches [09:00, 10:00) only at the boundary
    let second = request("Bypass", fx.room, 10, 0, 60, &[], &[]);
    fx.engine.schedule_operation(&fx.scheduler, &second).await.unwrap();
}

#[tokio::test]
async fn scheduling_in_the_past_rejected() {
    let fx = fixture("past.wal").await;
    let mut req = request("Appendectomy", fx.room, 9, 0, 60, &[], &[]);
    req.date = "2000-01-01".parse().unwrap();
    req.start = req
        .date
        .and_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap())
        .and_utc()
        .timestamp_millis();

    let err = fx.engine.schedule_operation(&fx.scheduler, &req).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    assert_eq!(err.status_code(), 400);
    assert!(fx.engine.list_operations().await.is_empty());
}

#[tokio::test]
async fn unknown_room_rejected() {
    let fx = fixture("unknown_room.wal").await;
    let req = request("Appendectomy", Ulid::new(), 9, 0, 60, &[], &[]);
    let err = fx.engine.schedule_operation(&fx.scheduler, &req).await.unwrap_err();
    assert!(matches!(err, EngineError::RoomNotFound));
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn staff_role_cannot_schedule() {
    let fx = fixture("forbidden.wal").await;
    let principal = Principal {
        user_id: Ulid::new(),
        role: Role::Staff,
    };
    let req = request("Appendectomy", fx.room, 9, 0, 60, &[], &[]);
    let err = fx.engine.schedule_operation(&principal, &req).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn busy_staff_recorded_as_partial_failure() {
    let fx = fixture("partial_failure.wal").await;
    let (s1, s2) = (fx.staff[0], fx.staff[1]);

    // s1 is busy 09:00-10:00 in the other room
    let first = request("Bypass", fx.room2, 9, 0, 60, &[s1], &[]);
    fx.engine.schedule_operation(&fx.scheduler, &first).await.unwrap();

    let second = request("Appendectomy", fx.room, 9, 30, 60, &[s1, s2], &[]);
    let result = fx.engine.schedule_operation(&fx.scheduler, &second).await.unwrap();

    assert_eq!(result.assignments.staff_assigned, vec![s2]);
    assert_eq!(result.assignments.staff_failed.len(), 1);
    assert_eq!(result.assignments.staff_failed[0].id, s1);
    assert_eq!(result.assignments.staff_failed[0].reason, REASON_BUSY);

    // The operation itself is still created
    assert_eq!(fx.engine.list_operations().await.len(), 2);
    // And only s2 got a notification row
    assert_eq!(fx.engine.notifications_for(&s1).len(), 1); // from the first op
    assert_eq!(fx.engine.notifications_for(&s2).len(), 1);
}

#[tokio::test]
async fn operation_created_even_if_every_resource_fails() {
    let fx = fixture("all_fail.wal").await;
    let s1 = fx.staff[0];
    let e1 = fx.equipment[0];

    let first = request("Bypass", fx.room2, 9, 0, 120, &[s1], &[e1]);
    fx.engine.schedule_operation(&fx.scheduler, &first).await.unwrap();

    let second = request("Appendectomy", fx.room, 9, 30, 60, &[s1], &[e1]);
    let result = fx.engine.schedule_operation(&fx.scheduler, &second).await.unwrap();

    assert!(result.assignments.staff_assigned.is_empty());
    assert!(result.assignments.equipment_assigned.is_empty());
    assert_eq!(result.assignments.staff_failed[0].reason, REASON_BUSY);
    assert_eq!(result.assignments.equipment_failed[0].reason, REASON_BUSY);
    assert_eq!(fx.engine.list_operations().await.len(), 2);
    assert!(fx.engine.assignments_for(&result.operation.operation.id).is_empty());
}

#[tokio::test]
async fn three_staff_share_one_equipment_unit() {
    let fx = fixture("shared_equipment.wal").await;
    let e1 = fx.equipment[0];

    let req = request("Appendectomy", fx.room, 9, 0, 60, &fx.staff, &[e1]);
    let result = fx.engine.schedule_operation(&fx.scheduler, &req).await.unwrap();

    assert_eq!(result.assignments.staff_assigned, fx.staff);
    assert_eq!(result.assignments.equipment_assigned, vec![e1]);
    assert!(result.assignments.staff_failed.is_empty());
    assert!(result.assignments.equipment_failed.is_empty());

    let rows = fx.engine.assignments_for(&result.operation.operation.id);
    assert_eq!(rows.len(), 3);
    let with_equipment = rows.iter().filter(|r| r.equipment_id.is_some()).count();
    assert_eq!(with_equipment, 1);
}

#[tokio::test]
async fn unclaimed_equipment_assigned_staff_less() {
    let fx = fixture("staffless.wal").await;
    let e1 = fx.equipment[0];

    let req = request("Appendectomy", fx.room, 9, 0, 60, &[], &[e1]);
    let result = fx.engine.schedule_operation(&fx.scheduler, &req).await.unwrap();

    assert_eq!(result.assignments.equipment_assigned, vec![e1]);
    let rows = fx.engine.assignments_for(&result.operation.operation.id);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].staff_id, None);
    assert_eq!(rows[0].equipment_id, Some(e1));
    assert_eq!(rows[0].assigned_by, fx.scheduler.user_id);
}

#[tokio::test]
async fn unregistered_staff_reported_not_registered() {
    let fx = fixture("ghost_staff.wal").await;
    let ghost = Ulid::new();

    let req = request("Appendectomy", fx.room, 9, 0, 60, &[ghost], &[]);
    let result = fx.engine.schedule_operation(&fx.scheduler, &req).await.unwrap();

    assert_eq!(result.assignments.staff_failed.len(), 1);
    assert_eq!(result.assignments.staff_failed[0].reason, REASON_NOT_REGISTERED);
    assert_eq!(fx.engine.list_operations().await.len(), 1);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test]
async fn concurrent_requests_for_same_staff_grant_exactly_one() {
    let fx = fixture("concurrent_staff.wal").await;
    let s1 = fx.staff[0];

    let a = request("Appendectomy", fx.room, 9, 0, 60, &[s1], &[]);
    let b = request("Bypass", fx.room2, 9, 30, 60, &[s1], &[]);

    let (ra, rb) = tokio::join!(
        fx.engine.schedule_operation(&fx.scheduler, &a),
        fx.engine.schedule_operation(&fx.scheduler, &b),
    );
    let ra = ra.unwrap();
    let rb = rb.unwrap();

    // Different rooms, so both operations commit — but the contended staff
    // member is granted exactly once.
    let granted = ra.assignments.staff_assigned.len() + rb.assignments.staff_assigned.len();
    assert_eq!(granted, 1);
    let failed: Vec<_> = ra
        .assignments
        .staff_failed
        .iter()
        .chain(rb.assignments.staff_failed.iter())
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason, REASON_BUSY);

    // The §3 core invariant: one assignment row for s1 across both operations
    let rows_for_s1 = fx
        .engine
        .assignments_for(&ra.operation.operation.id)
        .into_iter()
        .chain(fx.engine.assignments_for(&rb.operation.operation.id))
        .filter(|r| r.staff_id == Some(s1))
        .count();
    assert_eq!(rows_for_s1, 1);
}

#[tokio::test]
async fn concurrent_requests_for_same_room_grant_exactly_one() {
    let fx = fixture("concurrent_room.wal").await;

    let a = request("Appendectomy", fx.room, 9, 0, 60, &[], &[]);
    let b = request("Bypass", fx.room, 9, 30, 60, &[], &[]);

    let (ra, rb) = tokio::join!(
        fx.engine.schedule_operation(&fx.scheduler, &a),
        fx.engine.schedule_operation(&fx.scheduler, &b),
    );

    let oks = [ra.is_ok(), rb.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(oks, 1, "exactly one of two overlapping requests must win");
    let err = if ra.is_err() { ra.unwrap_err() } else { rb.unwrap_err() };
    assert!(matches!(err, EngineError::RoomConflict { .. }));
}

#[tokio::test]
async fn concurrent_requests_for_same_equipment_grant_exactly_one() {
    let fx = fixture("concurrent_equipment.wal").await;
    let e1 = fx.equipment[0];

    let a = request("Appendectomy", fx.room, 9, 0, 60, &[], &[e1]);
    let b = request("Bypass", fx.room2, 9, 30, 60, &[], &[e1]);

    let (ra, rb) = tokio::join!(
        fx.engine.schedule_operation(&fx.scheduler, &a),
        fx.engine.schedule_operation(&fx.scheduler, &b),
    );
    let ra = ra.unwrap();
    let rb = rb.unwrap();
    let granted =
        ra.assignments.equipment_assigned.len() + rb.assignments.equipment_assigned.len();
    assert_eq!(granted, 1);
}

// ── Availability query ───────────────────────────────────

#[tokio::test]
async fn availability_excludes_busy_staff_and_in_use_equipment() {
    let fx = fixture("availability.wal").await;
    let s1 = fx.staff[0];
    let e1 = fx.equipment[0];

    let req = request("Appendectomy", fx.room, 9, 0, 60, &[s1], &[e1]);
    fx.engine.schedule_operation(&fx.scheduler, &req).await.unwrap();

    let overlapping = crate::request::AvailabilityRequest {
        date: day(),
        span: Span::from_start_duration(at(9, 30), 60),
    };
    let available = fx
        .engine
        .available_resources(&fx.scheduler, &overlapping)
        .await
        .unwrap();

    let staff_names: Vec<&str> = available
        .available_staff
        .iter()
        .map(|s| s.username.as_str())
        .collect();
    assert_eq!(staff_names, vec!["bob", "carol"]); // alice busy, sorted by username
    let equipment_names: Vec<&str> = available
        .available_equipment
        .iter()
        .map(|e| e.equipment_name.as_str())
        .collect();
    assert_eq!(equipment_names, vec!["C-Arm"]);

    // A later window frees the staff member, but the equipment status cache
    // still says In Use until the release sweep runs.
    let later = crate::request::AvailabilityRequest {
        date: day(),
        span: Span::from_start_duration(at(11, 0), 60),
    };
    let available = fx
        .engine
        .available_resources(&fx.scheduler, &later)
        .await
        .unwrap();
    assert!(available.available_staff.iter().any(|s| s.staff_id == s1));
    assert!(!available
        .available_equipment
        .iter()
        .any(|e| e.equipment_id == e1));
}

#[tokio::test]
async fn availability_requires_scheduler_role() {
    let fx = fixture("availability_role.wal").await;
    let principal = Principal {
        user_id: Ulid::new(),
        role: Role::Staff,
    };
    let req = crate::request::AvailabilityRequest {
        date: day(),
        span: Span::from_start_duration(at(9, 0), 60),
    };
    let err = fx
        .engine
        .available_resources(&principal, &req)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_schedule_state() {
    let path = test_wal_path("replay.wal");
    let bus = Arc::new(BroadcastBus::new());
    let scheduler_user = Ulid::new();
    let (room, staff_id, equipment_id) = (Ulid::new(), Ulid::new(), Ulid::new());

    {
        let engine = Engine::new(&path, bus.clone()).unwrap();
        engine
            .register_user(scheduler_user, "drlee", Role::Scheduler)
            .await
            .unwrap();
        engine.register_room(room, "OT-1").await.unwrap();
        let user = Ulid::new();
        engine.register_user(user, "alice", Role::Staff).await.unwrap();
        engine.register_staff(staff_id, user, None).await.unwrap();
        engine
            .register_equipment(equipment_id, "C-Arm")
            .await
            .unwrap();

        let scheduler = Principal {
            user_id: scheduler_user,
            role: Role::Scheduler,
        };
        let req = request("Appendectomy", room, 9, 0, 60, &[staff_id], &[equipment_id]);
        engine.schedule_operation(&scheduler, &req).await.unwrap();
    }

    let engine = Engine::new(&path, bus).unwrap();
    let operations = engine.list_operations().await;
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].operation.name, "Appendectomy");
    assert_eq!(operations[0].staff_count, 1);
    assert_eq!(operations[0].equipment_count, 1);
    assert_eq!(operations[0].room_name, "OT-1");
    assert_eq!(
        engine.get_equipment(&equipment_id).unwrap().read().await.status,
        EquipmentStatus::InUse
    );
    assert_eq!(engine.notifications_for(&staff_id).len(), 1);

    // The rebuilt commitment books still enforce the room invariant
    let scheduler = Principal {
        user_id: scheduler_user,
        role: Role::Scheduler,
    };
    let overlapping = request("Bypass", room, 9, 30, 60, &[], &[]);
    let err = engine
        .schedule_operation(&scheduler, &overlapping)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RoomConflict { .. }));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let bus = Arc::new(BroadcastBus::new());

    let (room, staff_id, equipment_id, scheduler_user) =
        (Ulid::new(), Ulid::new(), Ulid::new(), Ulid::new());
    {
        let engine = Engine::new(&path, bus.clone()).unwrap();
        engine
            .register_user(scheduler_user, "drlee", Role::Scheduler)
            .await
            .unwrap();
        engine.register_room(room, "OT-1").await.unwrap();
        let user = Ulid::new();
        engine.register_user(user, "alice", Role::Staff).await.unwrap();
        engine.register_staff(staff_id, user, None).await.unwrap();
        engine
            .register_equipment(equipment_id, "C-Arm")
            .await
            .unwrap();
        let scheduler = Principal {
            user_id: scheduler_user,
            role: Role::Scheduler,
        };
        let req = request("Appendectomy", room, 9, 0, 60, &[staff_id], &[equipment_id]);
        engine.schedule_operation(&scheduler, &req).await.unwrap();

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_commits_since_compact().await, 0);
    }

    let engine = Engine::new(&path, bus).unwrap();
    let operations = engine.list_operations().await;
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].staff_count, 1);
    assert_eq!(
        engine.get_equipment(&equipment_id).unwrap().read().await.status,
        EquipmentStatus::InUse
    );
    assert_eq!(engine.notifications_for(&staff_id).len(), 1);
}

// ── Equipment release sweep ──────────────────────────────

#[tokio::test]
async fn idle_equipment_released_after_last_commitment_ends() {
    let fx = fixture("release.wal").await;
    let e1 = fx.equipment[0];

    let req = request("Appendectomy", fx.room, 9, 0, 60, &[], &[e1]);
    fx.engine.schedule_operation(&fx.scheduler, &req).await.unwrap();
    assert_eq!(equipment_status(&fx, e1).await, EquipmentStatus::InUse);

    // Still committed at 09:30 — nothing released
    let released = fx.engine.release_idle_equipment(at(9, 30)).await.unwrap();
    assert!(released.is_empty());
    assert_eq!(equipment_status(&fx, e1).await, EquipmentStatus::InUse);

    // Window over at 10:00 — back to the pool
    let mut rx = fx.bus.subscribe("equipment-updated");
    let released = fx.engine.release_idle_equipment(at(10, 0)).await.unwrap();
    assert_eq!(released, vec![e1]);
    assert_eq!(equipment_status(&fx, e1).await, EquipmentStatus::Available);
    let payload = rx.recv().await.unwrap();
    assert_eq!(payload["status"], "Available");

    // Sweep is idempotent
    let released = fx.engine.release_idle_equipment(at(10, 0)).await.unwrap();
    assert!(released.is_empty());
}

// ── Real-time fan-out ────────────────────────────────────

#[tokio::test]
async fn scheduling_publishes_operation_staff_and_equipment_events() {
    let fx = fixture("events.wal").await;
    let s1 = fx.staff[0];
    let e1 = fx.equipment[0];

    let mut op_rx = fx.bus.subscribe("operation-updated");
    let mut staff_rx = fx.bus.subscribe(&format!("staff-{s1}-assignments"));
    let mut equipment_rx = fx.bus.subscribe("equipment-updated");

    let req = request("Appendectomy", fx.room, 9, 0, 60, &[s1], &[e1]);
    fx.engine.schedule_operation(&fx.scheduler, &req).await.unwrap();

    let op_event = op_rx.recv().await.unwrap();
    assert_eq!(op_event["action"], "scheduled");
    assert_eq!(op_event["operation"]["room_name"], "OT-1");

    let staff_event = staff_rx.recv().await.unwrap();
    assert_eq!(staff_event["type"], "new_assignment");
    assert_eq!(
        staff_event["message"],
        "You have been assigned to: Appendectomy"
    );

    let equipment_event = equipment_rx.recv().await.unwrap();
    assert_eq!(equipment_event["status"], "In Use");
}

struct FailingBus;

impl EventBus for FailingBus {
    fn publish(&self, _topic: &str, _payload: serde_json::Value) -> Result<(), PublishError> {
        Err(PublishError("bus down".into()))
    }
}

#[tokio::test]
async fn publish_failure_never_fails_the_request() {
    let path = test_wal_path("failing_bus.wal");
    let engine = Engine::new(&path, Arc::new(FailingBus)).unwrap();

    let scheduler_user = Ulid::new();
    engine
        .register_user(scheduler_user, "drlee", Role::Scheduler)
        .await
        .unwrap();
    let room = Ulid::new();
    engine.register_room(room, "OT-1").await.unwrap();

    let scheduler = Principal {
        user_id: scheduler_user,
        role: Role::Scheduler,
    };
    let req = request("Appendectomy", room, 9, 0, 60, &[], &[]);
    let result = engine.schedule_operation(&scheduler, &req).await.unwrap();
    assert_eq!(result.operation.operation.name, "Appendectomy");
    assert_eq!(engine.list_operations().await.len(), 1);
}

// ── Read side ────────────────────────────────────────────

#[tokio::test]
async fn list_operations_newest_first_with_counts() {
    let fx = fixture("list_ops.wal").await;
    let s1 = fx.staff[0];
    let e1 = fx.equipment[0];

    let early = request("Appendectomy", fx.room, 9, 0, 60, &[s1], &[e1]);
    fx.engine.schedule_operation(&fx.scheduler, &early).await.unwrap();
    let late = request("Bypass", fx.room2, 14, 0, 120, &[], &[]);
    fx.engine.schedule_operation(&fx.scheduler, &late).await.unwrap();

    let operations = fx.engine.list_operations().await;
    assert_eq!(operations.len(), 2);
    assert_eq!(operations[0].operation.name, "Bypass");
    assert_eq!(operations[0].staff_count, 0);
    assert_eq!(operations[1].operation.name, "Appendectomy");
    assert_eq!(operations[1].staff_count, 1);
    assert_eq!(operations[1].equipment_count, 1);
}

#[tokio::test]
async fn staff_daily_schedule_lists_assignments_in_order() {
    let fx = fixture("staff_schedule.wal").await;
    let (s1, s2) = (fx.staff[0], fx.staff[1]);
    let e1 = fx.equipment[0];

    let morning = request("Appendectomy", fx.room, 9, 0, 60, &[s1, s2], &[e1]);
    fx.engine.schedule_operation(&fx.scheduler, &morning).await.unwrap();
    let noon = request("Bypass", fx.room2, 12, 0, 90, &[s1], &[]);
    fx.engine.schedule_operation(&fx.scheduler, &noon).await.unwrap();
    // Not s1's — must not show up
    let other = request("Debridement", fx.room, 15, 0, 30, &[s2], &[]);
    fx.engine.schedule_operation(&fx.scheduler, &other).await.unwrap();

    let schedule = fx
        .engine
        .staff_daily_schedule(s1, day(), at(8, 0))
        .await
        .unwrap();
    assert_eq!(schedule.entries.len(), 2);
    assert_eq!(schedule.entries[0].operation.operation.name, "Appendectomy");
    assert_eq!(schedule.entries[1].operation.operation.name, "Bypass");
    assert_eq!(schedule.total_duration_min, 150);
    assert_eq!(schedule.entries[0].progress, OperationProgress::Upcoming);
    // Team-mates exclude the requesting staff member
    assert_eq!(schedule.entries[0].team.len(), 1);
    assert_eq!(schedule.entries[0].team[0].username, "bob");
    assert_eq!(schedule.entries[0].equipment.len(), 1);

    let err = fx
        .engine
        .staff_daily_schedule(Ulid::new(), day(), at(8, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn public_schedule_filters_by_date_and_room() {
    let fx = fixture("public_schedule.wal").await;

    let a = request("Appendectomy", fx.room, 9, 0, 60, &[], &[]);
    fx.engine.schedule_operation(&fx.scheduler, &a).await.unwrap();
    let b = request("Bypass", fx.room2, 11, 0, 60, &[], &[]);
    fx.engine.schedule_operation(&fx.scheduler, &b).await.unwrap();

    let all = fx.engine.public_schedule(None, None).await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].operation.name, "Appendectomy"); // ordered by start

    let in_room = fx.engine.public_schedule(Some(day()), Some(fx.room)).await;
    assert_eq!(in_room.len(), 1);
    assert_eq!(in_room[0].operation.name, "Appendectomy");

    let other_day = fx
        .engine
        .public_schedule(Some("2099-03-02".parse().unwrap()), None)
        .await;
    assert!(other_day.is_empty());
}

// ── Registration ─────────────────────────────────────────

#[tokio::test]
async fn duplicate_registration_rejected() {
    let fx = fixture("dup_registration.wal").await;
    let err = fx.engine.register_room(fx.room, "OT-1 again").await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));
    let err = fx
        .engine
        .register_equipment(fx.equipment[0], "again")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));
}

#[tokio::test]
async fn room_registration_publishes_room_updated() {
    let path = test_wal_path("room_event.wal");
    let bus = Arc::new(BroadcastBus::new());
    let engine = Engine::new(&path, bus.clone()).unwrap();

    let mut rx = bus.subscribe("room-updated");
    engine.register_room(Ulid::new(), "OT-9").await.unwrap();

    let payload = rx.recv().await.unwrap();
    assert_eq!(payload["action"], "added");
    assert_eq!(payload["room"]["room_name"], "OT-9");
}
