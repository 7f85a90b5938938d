//! Greedy staff→equipment pairing.
//!
//! Order-sensitive on purpose: staff are served in request order, and each
//! scans the equipment list in request order for the first free unclaimed
//! unit. Who wins a contended resource within one request is part of the
//! observable contract.

use std::collections::HashSet;

use ulid::Ulid;

use crate::model::*;

use super::TxnLocks;

pub const REASON_BUSY: &str = "No longer available";
pub const REASON_NOT_REGISTERED: &str = "Not registered";

pub(super) struct MatchOutcome {
    pub plan: AssignmentPlan,
    /// Assignment and equipment-status events, staged for the commit.
    pub events: Vec<Event>,
}

/// Pair requested staff with requested equipment against the locked
/// resource states.
///
/// Each staff member gets at most one device; each device is claimed once.
/// Equipment left unclaimed is assigned staff-less as a shared resource.
/// Failures are recorded per resource and never abort the operation.
pub(super) fn pair_resources(
    operation: &Operation,
    staff_req: &[Ulid],
    equipment_req: &[Ulid],
    locks: &TxnLocks,
    assigned_by: Ulid,
    now: Ms,
) -> MatchOutcome {
    let mut plan = AssignmentPlan::default();
    let mut events = Vec::new();
    let span = operation.span();

    // Equipment claimed so far in this request (staged rows are not yet
    // visible in the books, so the claim set carries that knowledge).
    let mut claimed: HashSet<Ulid> = HashSet::new();
    let mut assigned_staff: HashSet<Ulid> = HashSet::new();

    for &staff_id in staff_req {
        let Some(staff) = locks.staff.get(&staff_id) else {
            tracing::debug!("staff {staff_id} not registered, skipping");
            plan.staff_failed.push(AssignmentFailure {
                id: staff_id,
                reason: REASON_NOT_REGISTERED.into(),
            });
            continue;
        };
        if assigned_staff.contains(&staff_id)
            || staff.book.has_overlap(operation.date, &span)
        {
            tracing::debug!("staff {staff_id} busy for {:?}", span);
            plan.staff_failed.push(AssignmentFailure {
                id: staff_id,
                reason: REASON_BUSY.into(),
            });
            continue;
        }

        // First free unclaimed equipment, scanned in request order.
        let mut equipment_pick = None;
        for &equipment_id in equipment_req {
            if claimed.contains(&equipment_id) {
                continue;
            }
            let Some(equipment) = locks.equipment.get(&equipment_id) else {
                continue; // reported in the shared pass below
            };
            if !equipment.book.has_overlap(operation.date, &span) {
                equipment_pick = Some(equipment_id);
                claimed.insert(equipment_id);
                break;
            }
        }

        assigned_staff.insert(staff_id);
        events.push(Event::ResourceAssigned {
            operation_id: operation.id,
            staff_id: Some(staff_id),
            equipment_id: equipment_pick,
            assigned_by,
            assigned_at: now,
        });
        plan.staff_assigned.push(staff_id);

        if let Some(equipment_id) = equipment_pick {
            events.push(Event::EquipmentStatusChanged {
                id: equipment_id,
                status: EquipmentStatus::InUse,
            });
            plan.equipment_assigned.push(equipment_id);
        }
    }

    // Equipment nobody claimed goes in as a shared (staff-less) resource.
    let mut shared: HashSet<Ulid> = HashSet::new();
    for &equipment_id in equipment_req {
        if claimed.contains(&equipment_id) {
            continue;
        }
        let Some(equipment) = locks.equipment.get(&equipment_id) else {
            plan.equipment_failed.push(AssignmentFailure {
                id: equipment_id,
                reason: REASON_NOT_REGISTERED.into(),
            });
            continue;
        };
        if shared.contains(&equipment_id)
            || equipment.book.has_overlap(operation.date, &span)
        {
            plan.equipment_failed.push(AssignmentFailure {
                id: equipment_id,
                reason: REASON_BUSY.into(),
            });
            continue;
        }
        shared.insert(equipment_id);
        events.push(Event::ResourceAssigned {
            operation_id: operation.id,
            staff_id: None,
            equipment_id: Some(equipment_id),
            assigned_by,
            assigned_at: now,
        });
        events.push(Event::EquipmentStatusChanged {
            id: equipment_id,
            status: EquipmentStatus::InUse,
        });
        plan.equipment_assigned.push(equipment_id);
    }

    MatchOutcome { plan, events }
}
