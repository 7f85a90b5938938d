use std::collections::BTreeSet;
use std::time::Instant;

use tracing::info;
use ulid::Ulid;

use crate::auth::{self, Principal};
use crate::model::*;
use crate::observability;
use crate::request::ScheduleRequest;

use super::conflict::{first_room_conflict, validate_window};
use super::{matcher, Engine, EngineError, TxnLocks};

impl Engine {
    /// Validate, conflict-check, and commit one operation together with its
    /// resource assignments and staff notifications.
    ///
    /// The availability re-checks and the commit run while holding write
    /// locks on the room and on every registered requested resource, so two
    /// concurrent requests can never both claim the same window — the
    /// check-then-insert race is closed by construction.
    pub async fn schedule_operation(
        &self,
        principal: &Principal,
        request: &ScheduleRequest,
    ) -> Result<ScheduledOperation, EngineError> {
        auth::require_scheduler(principal)?;
        let started = Instant::now();

        let span = Span::from_start_duration(request.start, request.duration_min);
        validate_window(&span)?;
        let now = now_ms();
        if request.start < now {
            return Err(EngineError::InvalidInput(
                "cannot schedule operations in the past".into(),
            ));
        }

        let room_arc = self
            .get_room(&request.room_id)
            .ok_or(EngineError::RoomNotFound)?;

        // Transaction scope: room lock first, then staff and equipment in
        // ascending id order (see TxnLocks).
        let room_guard = room_arc.write_owned().await;
        if !room_guard.is_active {
            return Err(EngineError::RoomNotFound);
        }
        if let Some(operation_name) =
            first_room_conflict(&room_guard, request.date, &span, &self.operations)
        {
            metrics::counter!(observability::ROOM_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::RoomConflict { operation_name });
        }

        let mut locks = TxnLocks {
            room: Some((request.room_id, room_guard)),
            ..TxnLocks::default()
        };
        for staff_id in ordered_ids(&request.staff_ids) {
            if let Some(staff) = self.get_staff(&staff_id) {
                locks.staff.insert(staff_id, staff.write_owned().await);
            }
        }
        for equipment_id in ordered_ids(&request.equipment_ids) {
            if let Some(equipment) = self.get_equipment(&equipment_id) {
                locks
                    .equipment
                    .insert(equipment_id, equipment.write_owned().await);
            }
        }

        let operation = Operation {
            id: Ulid::new(),
            name: request.operation_name.clone(),
            description: request.description.clone(),
            date: request.date,
            start: request.start,
            duration_min: request.duration_min,
            room_id: request.room_id,
            scheduler_id: principal.user_id,
            status: OperationStatus::Scheduled,
        };

        let mut events = vec![Event::OperationScheduled {
            id: operation.id,
            name: operation.name.clone(),
            description: operation.description.clone(),
            date: operation.date,
            start: operation.start,
            duration_min: operation.duration_min,
            room_id: operation.room_id,
            scheduler_id: operation.scheduler_id,
        }];

        let outcome = matcher::pair_resources(
            &operation,
            &request.staff_ids,
            &request.equipment_ids,
            &locks,
            principal.user_id,
            now,
        );
        events.extend(outcome.events);

        for &staff_id in &outcome.plan.staff_assigned {
            events.push(Event::NotificationQueued {
                id: Ulid::new(),
                staff_id,
                operation_id: operation.id,
                text: format!("Assigned to: {} on {}", operation.name, operation.date),
                time: now,
            });
        }

        self.commit(events, &mut locks).await.map_err(|e| match e {
            EngineError::WalError(msg) => EngineError::SchedulingFailed(msg),
            other => other,
        })?;
        drop(locks);

        let plan = outcome.plan;
        metrics::counter!(observability::OPERATIONS_SCHEDULED_TOTAL).increment(1);
        metrics::counter!(observability::ASSIGNMENTS_TOTAL)
            .increment((plan.staff_assigned.len() + plan.equipment_assigned.len()) as u64);
        metrics::counter!(observability::ASSIGNMENT_FAILURES_TOTAL)
            .increment((plan.staff_failed.len() + plan.equipment_failed.len()) as u64);
        metrics::histogram!(observability::SCHEDULE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        info!(
            "scheduled {} in room {} on {} ({} staff, {} equipment)",
            operation.name,
            operation.room_id,
            operation.date,
            plan.staff_assigned.len(),
            plan.equipment_assigned.len(),
        );

        // Post-commit fan-out is best effort: the state change is durable,
        // so a publish failure only gets logged.
        let detail = self.enrich(&operation).await;
        self.dispatcher.notify_operation_update("scheduled", &detail);
        if !plan.staff_assigned.is_empty() {
            self.dispatcher
                .notify_staff_assignment(&plan.staff_assigned, &detail);
        }
        for &equipment_id in &plan.equipment_assigned {
            self.dispatcher
                .notify_equipment_update(equipment_id, EquipmentStatus::InUse);
        }

        Ok(ScheduledOperation {
            operation: detail,
            assignments: plan,
        })
    }

    /// Return equipment whose every commitment has ended to the Available
    /// pool. Invoked periodically by `reaper::run_releaser`.
    pub async fn release_idle_equipment(&self, now: Ms) -> Result<Vec<Ulid>, EngineError> {
        let mut released = Vec::new();
        for (id, equipment) in self.collect_equipment() {
            let guard = equipment.write_owned().await;
            if guard.status != EquipmentStatus::InUse || guard.book.busy_after(now) {
                continue;
            }
            let mut locks = TxnLocks::default();
            locks.equipment.insert(id, guard);
            self.commit(
                vec![Event::EquipmentStatusChanged {
                    id,
                    status: EquipmentStatus::Available,
                }],
                &mut locks,
            )
            .await?;
            drop(locks);
            metrics::counter!(observability::EQUIPMENT_RELEASED_TOTAL).increment(1);
            info!("equipment {id} returned to Available pool");
            self.dispatcher
                .notify_equipment_update(id, EquipmentStatus::Available);
            released.push(id);
        }
        Ok(released)
    }
}

/// Deduplicated ascending lock order for one resource class.
fn ordered_ids(ids: &[Ulid]) -> BTreeSet<Ulid> {
    ids.iter().copied().collect()
}
