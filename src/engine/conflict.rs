use chrono::NaiveDate;
use dashmap::DashMap;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(super) fn validate_window(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Name of the first Scheduled operation already occupying the room window,
/// if any. Must be called with the room write lock held.
pub(super) fn first_room_conflict(
    room: &RoomState,
    date: NaiveDate,
    span: &Span,
    operations: &DashMap<Ulid, Operation>,
) -> Option<String> {
    room.book.overlapping(date, span).next().map(|c| {
        operations
            .get(&c.operation_id)
            .map(|op| op.name.clone())
            .unwrap_or_else(|| c.operation_id.to_string())
    })
}
