//! Authenticated principal consumed from the (external) auth layer.
//!
//! Token issuance and verification live outside this crate; by the time a
//! request reaches the engine it carries a resolved `Principal`.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Scheduler,
    Staff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Ulid,
    pub role: Role,
}

impl Principal {
    pub fn can_schedule(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Scheduler)
    }
}

/// Guard for operations restricted to Admin or Scheduler.
pub fn require_scheduler(principal: &Principal) -> Result<(), EngineError> {
    if principal.can_schedule() {
        Ok(())
    } else {
        Err(EngineError::Forbidden("requires Admin or Scheduler role"))
    }
}
