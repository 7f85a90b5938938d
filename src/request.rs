//! Untyped request payloads validated into typed requests.
//!
//! The engine never sees a raw payload: shape errors fail here with
//! `InvalidInput` before any storage is touched.

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::{Ms, Span};

/// Wire shape of `POST operations`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawScheduleRequest {
    pub operation_name: Option<String>,
    pub description: Option<String>,
    pub scheduled_date: Option<String>,
    pub scheduled_start: Option<String>,
    pub duration_minutes: Option<i64>,
    pub room_id: Option<Ulid>,
    #[serde(default)]
    pub staff_ids: Vec<Ulid>,
    #[serde(default)]
    pub equipment_ids: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub operation_name: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub start: Ms,
    pub duration_min: u32,
    pub room_id: Ulid,
    pub staff_ids: Vec<Ulid>,
    pub equipment_ids: Vec<Ulid>,
}

/// Wire shape of `GET available-resources`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawAvailabilityRequest {
    pub scheduled_date: Option<String>,
    pub scheduled_start: Option<String>,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityRequest {
    pub date: NaiveDate,
    pub span: Span,
}

impl RawScheduleRequest {
    pub fn validate(self) -> Result<ScheduleRequest, EngineError> {
        let (Some(operation_name), Some(date), Some(start), Some(duration), Some(room_id)) = (
            self.operation_name,
            self.scheduled_date.as_deref(),
            self.scheduled_start.as_deref(),
            self.duration_minutes,
            self.room_id,
        ) else {
            return Err(EngineError::InvalidInput(
                "operation_name, scheduled_date, scheduled_start, duration_minutes, and room_id are required".into(),
            ));
        };

        if operation_name.trim().is_empty() {
            return Err(EngineError::InvalidInput("operation_name must not be empty".into()));
        }
        if operation_name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("operation name too long"));
        }
        if let Some(ref d) = self.description
            && d.len() > MAX_DESCRIPTION_LEN {
                return Err(EngineError::LimitExceeded("description too long"));
            }
        if self.staff_ids.len() > MAX_REQUEST_RESOURCES
            || self.equipment_ids.len() > MAX_REQUEST_RESOURCES
        {
            return Err(EngineError::LimitExceeded("too many requested resources"));
        }

        let duration_min = parse_duration(duration)?;
        let (date, start) = parse_instant(date, start)?;

        Ok(ScheduleRequest {
            operation_name,
            description: self.description,
            date,
            start,
            duration_min,
            room_id,
            staff_ids: self.staff_ids,
            equipment_ids: self.equipment_ids,
        })
    }
}

impl RawAvailabilityRequest {
    pub fn validate(self) -> Result<AvailabilityRequest, EngineError> {
        let (Some(date), Some(start), Some(duration)) = (
            self.scheduled_date.as_deref(),
            self.scheduled_start.as_deref(),
            self.duration_minutes,
        ) else {
            return Err(EngineError::InvalidInput(
                "scheduled_date, scheduled_start, and duration_minutes are required".into(),
            ));
        };

        let duration_min = parse_duration(duration)?;
        let (date, start) = parse_instant(date, start)?;
        Ok(AvailabilityRequest {
            date,
            span: Span::from_start_duration(start, duration_min),
        })
    }
}

fn parse_duration(raw: i64) -> Result<u32, EngineError> {
    if raw <= 0 {
        return Err(EngineError::InvalidInput(
            "duration_minutes must be a positive integer".into(),
        ));
    }
    if raw > MAX_DURATION_MINUTES as i64 {
        return Err(EngineError::LimitExceeded("duration too long"));
    }
    Ok(raw as u32)
}

/// Combine `scheduled_date` with the time-of-day of `scheduled_start`.
///
/// `scheduled_start` may arrive as a bare clock time, an ISO datetime, or a
/// space-separated datetime, with or without fractional seconds; only its
/// time-of-day is used — the calendar day always comes from `scheduled_date`.
fn parse_instant(date: &str, start: &str) -> Result<(NaiveDate, Ms), EngineError> {
    let invalid = || EngineError::InvalidInput("invalid date/time value provided".into());

    let date: NaiveDate = date.parse().map_err(|_| invalid())?;
    let time = parse_time_of_day(start).ok_or_else(invalid)?;
    let start_ms = date.and_time(time).and_utc().timestamp_millis();
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&start_ms) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok((date, start_ms))
}

fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let tail = s
        .split_once('T')
        .or_else(|| s.split_once(' '))
        .map_or(s, |(_, t)| t);
    let tail = tail.split('.').next().unwrap_or(tail).trim_end_matches('Z');
    NaiveTime::parse_from_str(tail, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(tail, "%H:%M"))
        .ok()
}
