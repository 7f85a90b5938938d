use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::auth::Role;

/// Unix milliseconds — the only time type inside the engine.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Current wall-clock time in unix ms.
pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
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

    /// The window occupied by a procedure starting at `start` and running
    /// for `duration_min` minutes.
    pub fn from_start_duration(start: Ms, duration_min: u32) -> Self {
        Self::new(start, start + duration_min as Ms * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// The overlap predicate every conflict check in the system goes through.
    /// Half-open semantics: windows that merely touch do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Lifecycle of an operation. This core only ever produces `Scheduled`;
/// cancel/complete transitions belong to future workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Scheduled,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquipmentStatus {
    Available,
    #[serde(rename = "In Use")]
    InUse,
    Maintenance,
}

impl std::fmt::Display for EquipmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EquipmentStatus::Available => write!(f, "Available"),
            EquipmentStatus::InUse => write!(f, "In Use"),
            EquipmentStatus::Maintenance => write!(f, "Maintenance"),
        }
    }
}

/// One committed claim on a room, staff member, or equipment unit.
///
/// A commitment exists exactly while its owning operation is `Scheduled`;
/// the commitment books below are therefore the authoritative busy index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub operation_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
}

/// Per-resource commitment list, sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct CommitmentBook {
    commitments: Vec<Commitment>,
}

impl CommitmentBook {
    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, commitment: Commitment) {
        let pos = self
            .commitments
            .binary_search_by_key(&commitment.span.start, |c| c.span.start)
            .unwrap_or_else(|e| e);
        self.commitments.insert(pos, commitment);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Commitment> {
        self.commitments.iter()
    }

    /// Commitments on `date` whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping<'a>(
        &'a self,
        date: NaiveDate,
        query: &Span,
    ) -> impl Iterator<Item = &'a Commitment> {
        let right_bound = self
            .commitments
            .partition_point(|c| c.span.start < query.end);
        let query = *query;
        self.commitments[..right_bound]
            .iter()
            .filter(move |c| c.date == date && c.span.end > query.start)
    }

    pub fn has_overlap(&self, date: NaiveDate, query: &Span) -> bool {
        self.overlapping(date, query).next().is_some()
    }

    /// True if any commitment is still running or yet to start at `now`.
    pub fn busy_after(&self, now: Ms) -> bool {
        self.commitments.iter().any(|c| c.span.end > now)
    }
}

// ── Resource pool state ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub name: String,
    pub is_active: bool,
    pub book: CommitmentBook,
}

#[derive(Debug, Clone)]
pub struct StaffState {
    pub id: Ulid,
    pub user_id: Ulid,
    pub specialization: Option<String>,
    pub book: CommitmentBook,
}

#[derive(Debug, Clone)]
pub struct EquipmentState {
    pub id: Ulid,
    pub name: String,
    pub status: EquipmentStatus,
    pub book: CommitmentBook,
}

/// Reference data joined for `scheduler_name` enrichment and staff listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: Ulid,
    pub username: String,
    pub role: Role,
}

// ── Persisted rows ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub start: Ms,
    pub duration_min: u32,
    pub room_id: Ulid,
    pub scheduler_id: Ulid,
    pub status: OperationStatus,
}

impl Operation {
    pub fn span(&self) -> Span {
        Span::from_start_duration(self.start, self.duration_min)
    }
}

/// One resource-assignment row. `staff_id` and `equipment_id` are never
/// both absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub operation_id: Ulid,
    pub staff_id: Option<Ulid>,
    pub equipment_id: Option<Ulid>,
    pub assigned_by: Ulid,
    pub assigned_at: Ms,
    pub notified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub operation_id: Ulid,
    pub text: String,
    pub time: Ms,
    pub is_read: bool,
}

/// The event types — flat, no nesting. This is the WAL record format;
/// one durable commit is a `Vec<Event>` framed as a single WAL record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        username: String,
        role: Role,
    },
    RoomRegistered {
        id: Ulid,
        name: String,
        is_active: bool,
    },
    StaffRegistered {
        id: Ulid,
        user_id: Ulid,
        specialization: Option<String>,
    },
    EquipmentRegistered {
        id: Ulid,
        name: String,
    },
    OperationScheduled {
        id: Ulid,
        name: String,
        description: Option<String>,
        date: NaiveDate,
        start: Ms,
        duration_min: u32,
        room_id: Ulid,
        scheduler_id: Ulid,
    },
    ResourceAssigned {
        operation_id: Ulid,
        staff_id: Option<Ulid>,
        equipment_id: Option<Ulid>,
        assigned_by: Ulid,
        assigned_at: Ms,
    },
    EquipmentStatusChanged {
        id: Ulid,
        status: EquipmentStatus,
    },
    NotificationQueued {
        id: Ulid,
        staff_id: Ulid,
        operation_id: Ulid,
        text: String,
        time: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaffInfo {
    pub staff_id: Ulid,
    pub user_id: Ulid,
    pub username: String,
    pub specialization: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EquipmentInfo {
    pub equipment_id: Ulid,
    pub equipment_name: String,
    pub status: EquipmentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    pub room_id: Ulid,
    pub room_name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableResources {
    pub available_staff: Vec<StaffInfo>,
    pub available_equipment: Vec<EquipmentInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentFailure {
    pub id: Ulid,
    pub reason: String,
}

/// Per-request matcher output: granted and failed resource requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssignmentPlan {
    pub staff_assigned: Vec<Ulid>,
    pub equipment_assigned: Vec<Ulid>,
    pub staff_failed: Vec<AssignmentFailure>,
    pub equipment_failed: Vec<AssignmentFailure>,
}

/// Operation enriched with joined room and scheduler names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationDetail {
    #[serde(flatten)]
    pub operation: Operation,
    pub room_name: String,
    pub scheduler_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationSummary {
    #[serde(flatten)]
    pub operation: Operation,
    pub room_name: String,
    pub scheduler_name: Option<String>,
    pub staff_count: usize,
    pub equipment_count: usize,
}

/// Response of a successful scheduling request, partial failures included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledOperation {
    pub operation: OperationDetail,
    pub assignments: AssignmentPlan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationProgress {
    Upcoming,
    InProgress,
    Completed,
}

impl OperationProgress {
    pub fn at(span: &Span, now: Ms) -> Self {
        if now < span.start {
            OperationProgress::Upcoming
        } else if span.contains_instant(now) {
            OperationProgress::InProgress
        } else {
            OperationProgress::Completed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaffScheduleEntry {
    pub operation: OperationDetail,
    pub equipment: Vec<EquipmentInfo>,
    pub team: Vec<StaffInfo>,
    pub progress: OperationProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaffDaySchedule {
    pub date: NaiveDate,
    pub staff_id: Ulid,
    pub entries: Vec<StaffScheduleEntry>,
    pub total_duration_min: u32,
}
