use crate::auth::{self, Principal};
use crate::model::*;
use crate::request::AvailabilityRequest;

use super::conflict::validate_window;
use super::{Engine, EngineError};

impl Engine {
    /// Staff and equipment free for the requested window.
    ///
    /// Staff qualify when no commitment of a Scheduled operation on the date
    /// overlaps the window; equipment must additionally report status
    /// `Available`. The result is advisory — `schedule_operation` re-checks
    /// every resource under its transaction locks before committing.
    pub async fn available_resources(
        &self,
        principal: &Principal,
        request: &AvailabilityRequest,
    ) -> Result<AvailableResources, EngineError> {
        auth::require_scheduler(principal)?;
        validate_window(&request.span)?;

        let mut available_staff = Vec::new();
        for (_, staff) in self.collect_staff() {
            let guard = staff.read().await;
            if guard.book.has_overlap(request.date, &request.span) {
                continue;
            }
            // Inner join against users: staff without a user record is
            // never offered.
            if let Some(user) = self.user(&guard.user_id) {
                available_staff.push(StaffInfo {
                    staff_id: guard.id,
                    user_id: guard.user_id,
                    username: user.username,
                    specialization: guard.specialization.clone(),
                });
            }
        }
        available_staff.sort_by(|a, b| a.username.cmp(&b.username));

        let mut available_equipment = Vec::new();
        for (_, equipment) in self.collect_equipment() {
            let guard = equipment.read().await;
            if guard.status == EquipmentStatus::Available
                && !guard.book.has_overlap(request.date, &request.span)
            {
                available_equipment.push(EquipmentInfo {
                    equipment_id: guard.id,
                    equipment_name: guard.name.clone(),
                    status: guard.status,
                });
            }
        }
        available_equipment.sort_by(|a, b| a.equipment_name.cmp(&b.equipment_name));

        Ok(AvailableResources {
            available_staff,
            available_equipment,
        })
    }
}
