use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Operation with joined room and scheduler names.
    pub(super) async fn enrich(&self, operation: &Operation) -> OperationDetail {
        let room_name = match self.get_room(&operation.room_id) {
            Some(room) => room.read().await.name.clone(),
            None => String::new(),
        };
        let scheduler_name = self.user(&operation.scheduler_id).map(|u| u.username);
        OperationDetail {
            operation: operation.clone(),
            room_name,
            scheduler_name,
        }
    }

    pub async fn operation_detail(&self, id: &Ulid) -> Option<OperationDetail> {
        let operation = self.operations.get(id).map(|e| e.value().clone())?;
        Some(self.enrich(&operation).await)
    }

    /// All operations with per-operation staff/equipment counts, newest
    /// first (date desc, start desc).
    pub async fn list_operations(&self) -> Vec<OperationSummary> {
        let mut operations: Vec<Operation> =
            self.operations.iter().map(|e| e.value().clone()).collect();
        operations.sort_by(|a, b| b.date.cmp(&a.date).then(b.start.cmp(&a.start)));

        let mut summaries = Vec::with_capacity(operations.len());
        for operation in operations {
            let (staff_count, equipment_count) = self
                .assignments
                .get(&operation.id)
                .map(|rows| {
                    (
                        rows.iter().filter(|r| r.staff_id.is_some()).count(),
                        rows.iter().filter(|r| r.equipment_id.is_some()).count(),
                    )
                })
                .unwrap_or((0, 0));
            let detail = self.enrich(&operation).await;
            summaries.push(OperationSummary {
                operation: detail.operation,
                room_name: detail.room_name,
                scheduler_name: detail.scheduler_name,
                staff_count,
                equipment_count,
            });
        }
        summaries
    }

    /// One staff member's assignments for a day, with equipment and
    /// team-mates per operation, ordered by start time.
    pub async fn staff_daily_schedule(
        &self,
        staff_id: Ulid,
        date: NaiveDate,
        now: Ms,
    ) -> Result<StaffDaySchedule, EngineError> {
        if !self.staff.contains_key(&staff_id) {
            return Err(EngineError::NotFound(staff_id));
        }

        let mut operations: Vec<Operation> = self
            .operations
            .iter()
            .filter(|e| {
                e.value().date == date
                    && self
                        .assignments
                        .get(e.key())
                        .is_some_and(|rows| rows.iter().any(|r| r.staff_id == Some(staff_id)))
            })
            .map(|e| e.value().clone())
            .collect();
        operations.sort_by_key(|o| o.start);

        let mut entries = Vec::with_capacity(operations.len());
        let mut total_duration_min = 0;
        for operation in operations {
            total_duration_min += operation.duration_min;
            let progress = OperationProgress::at(&operation.span(), now);
            let (equipment, team) = self.assignment_details(&operation.id, staff_id).await;
            entries.push(StaffScheduleEntry {
                operation: self.enrich(&operation).await,
                equipment,
                team,
                progress,
            });
        }

        Ok(StaffDaySchedule {
            date,
            staff_id,
            entries,
            total_duration_min,
        })
    }

    /// Equipment assigned to an operation plus the other staff on it.
    async fn assignment_details(
        &self,
        operation_id: &Ulid,
        excluding_staff: Ulid,
    ) -> (Vec<EquipmentInfo>, Vec<StaffInfo>) {
        let rows: Vec<AssignmentRow> = self
            .assignments
            .get(operation_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut equipment = Vec::new();
        let mut team = Vec::new();
        for row in rows {
            if let Some(eid) = row.equipment_id
                && let Some(state) = self.get_equipment(&eid) {
                    let guard = state.read().await;
                    equipment.push(EquipmentInfo {
                        equipment_id: guard.id,
                        equipment_name: guard.name.clone(),
                        status: guard.status,
                    });
                }
            if let Some(sid) = row.staff_id
                && sid != excluding_staff
                && let Some(state) = self.get_staff(&sid) {
                    let guard = state.read().await;
                    if let Some(user) = self.user(&guard.user_id) {
                        team.push(StaffInfo {
                            staff_id: guard.id,
                            user_id: guard.user_id,
                            username: user.username,
                            specialization: guard.specialization.clone(),
                        });
                    }
                }
        }
        (equipment, team)
    }

    /// Scheduled operations in active rooms, optionally filtered by date
    /// and room. No authentication — this is the public board.
    pub async fn public_schedule(
        &self,
        date: Option<NaiveDate>,
        room_id: Option<Ulid>,
    ) -> Vec<OperationDetail> {
        let mut operations: Vec<Operation> = self
            .operations
            .iter()
            .filter(|e| {
                let op = e.value();
                op.status == OperationStatus::Scheduled
                    && date.is_none_or(|d| op.date == d)
                    && room_id.is_none_or(|r| op.room_id == r)
            })
            .map(|e| e.value().clone())
            .collect();
        operations.sort_by_key(|o| (o.date, o.start));

        let mut details = Vec::new();
        for operation in operations {
            let Some(room) = self.get_room(&operation.room_id) else {
                continue;
            };
            if !room.read().await.is_active {
                continue;
            }
            details.push(self.enrich(&operation).await);
        }
        details
    }

    /// Persisted notifications for one staff member, oldest first.
    pub fn notifications_for(&self, staff_id: &Ulid) -> Vec<NotificationRow> {
        self.notifications
            .get(staff_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Assignment rows of one operation.
    pub fn assignments_for(&self, operation_id: &Ulid) -> Vec<AssignmentRow> {
        self.assignments
            .get(operation_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}
