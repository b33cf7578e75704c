//! Hard bounds applied at the engine and query boundaries.

/// Max reservations held per space type partition.
pub const MAX_RESERVATIONS_PER_SPACE: usize = 100_000;

/// Longest stay a single reservation may cover, in days.
pub const MAX_STAY_DAYS: i64 = 3 * 366;

/// Max length of a contact field (name, email, phone, company, ...).
pub const MAX_FIELD_LEN: usize = 256;

/// Max length of the accumulated admin notes on one reservation.
pub const MAX_NOTES_LEN: usize = 16 * 1024;

/// Alternative ranges proposed when a request is rejected.
pub const MAX_SUGGESTIONS: usize = 3;

/// Forward scan bound for alternative ranges, in days past the requested end.
pub const SUGGESTION_LOOKAHEAD_DAYS: i64 = 180;

/// Max length of a space type slug accepted from clients.
pub const MAX_SLUG_LEN: usize = 64;
