use ulid::Ulid;

/// Error taxonomy of the scheduling core.
///
/// Partial per-resource assignment failures are *not* errors — they travel
/// as data inside a successful `AssignmentPlan`.
#[derive(Debug)]
pub enum EngineError {
    /// Missing or malformed request fields, non-positive duration, past date.
    InvalidInput(String),
    LimitExceeded(&'static str),
    /// Principal lacks the required role.
    Forbidden(&'static str),
    /// Room does not exist or is inactive.
    RoomNotFound,
    /// Another Scheduled operation already occupies the room window.
    RoomConflict { operation_name: String },
    AlreadyExists(Ulid),
    NotFound(Ulid),
    /// Durable storage failure.
    WalError(String),
    /// Unexpected failure inside the scheduling transaction; nothing was
    /// persisted.
    SchedulingFailed(String),
}

impl EngineError {
    /// HTTP status for the (external) transport layer.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::InvalidInput(_)
            | EngineError::LimitExceeded(_)
            | EngineError::RoomNotFound
            | EngineError::RoomConflict { .. }
            | EngineError::AlreadyExists(_) => 400,
            EngineError::Forbidden(_) => 403,
            EngineError::NotFound(_) => 404,
            EngineError::WalError(_) | EngineError::SchedulingFailed(_) => 500,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::RoomNotFound => write!(f, "OT room not found or inactive"),
            EngineError::RoomConflict { operation_name } => {
                write!(f, "room not available: conflicts with \"{operation_name}\"")
            }
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
            EngineError::SchedulingFailed(e) => write!(f, "failed to schedule operation: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
