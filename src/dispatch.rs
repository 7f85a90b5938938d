//! Real-time event fan-out for committed state changes.
//!
//! Every method here runs after the owning transaction has committed, so a
//! failed publish is logged and swallowed — it must never surface to the
//! caller as a scheduling failure.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::{now_ms, EquipmentStatus, OperationDetail, RoomInfo};
use crate::notify::EventBus;
use crate::observability;

pub struct NotificationDispatcher {
    bus: Arc<dyn EventBus>,
}

impl NotificationDispatcher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    fn emit(&self, topic: &str, payload: serde_json::Value) {
        match self.bus.publish(topic, payload) {
            Ok(()) => {
                metrics::counter!(observability::NOTIFICATIONS_PUBLISHED_TOTAL).increment(1);
                debug!("published to {topic}");
            }
            Err(e) => warn!("dropped event on {topic}: {e}"),
        }
    }

    /// `action` ∈ {scheduled, updated, cancelled, completed}.
    pub fn notify_operation_update(&self, action: &str, operation: &OperationDetail) {
        self.emit(
            "operation-updated",
            json!({
                "action": action,
                "operation": operation,
                "timestamp": now_ms(),
            }),
        );
    }

    /// Addressed per staff member on `staff-<id>-assignments`.
    pub fn notify_staff_assignment(&self, staff_ids: &[Ulid], operation: &OperationDetail) {
        for staff_id in staff_ids {
            self.emit(
                &format!("staff-{staff_id}-assignments"),
                json!({
                    "type": "new_assignment",
                    "operation": operation,
                    "message": format!("You have been assigned to: {}", operation.operation.name),
                    "timestamp": now_ms(),
                }),
            );
        }
    }

    pub fn notify_equipment_update(&self, equipment_id: Ulid, status: EquipmentStatus) {
        self.emit(
            "equipment-updated",
            json!({
                "equipment_id": equipment_id,
                "status": status,
                "timestamp": now_ms(),
            }),
        );
    }

    /// `action` ∈ {added, updated, deleted}.
    pub fn notify_room_update(&self, action: &str, room: &RoomInfo) {
        self.emit(
            "room-updated",
            json!({
                "action": action,
                "room": room,
                "timestamp": now_ms(),
            }),
        );
    }
}
