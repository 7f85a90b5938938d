//! Hard caps enforced at the request boundary.

/// Maximum length of an operation, room, or equipment name.
pub const MAX_NAME_LEN: usize = 100;

/// Maximum length of an operation description.
pub const MAX_DESCRIPTION_LEN: usize = 1_000;

/// Longest schedulable procedure (24 hours).
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

/// Maximum staff or equipment identities in one scheduling request.
pub const MAX_REQUEST_RESOURCES: usize = 64;

/// Valid timestamp range: [1970-01-01, 9999-12-31) in unix ms.
pub const MIN_VALID_TIMESTAMP_MS: i64 = 0;
pub const MAX_VALID_TIMESTAMP_MS: i64 = 253_402_300_800_000;
