//! otsched — operating-theatre scheduling engine.
//!
//! Schedules procedures against shared rooms, staff, and equipment with a
//! guarantee that no resource is double-booked for overlapping windows.
//! State lives in memory behind per-resource locks and is made durable
//! through an append-only WAL; committed changes fan out as persisted
//! notifications and real-time events on an injected bus.

pub mod auth;
pub mod dispatch;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod request;
pub mod wal;
