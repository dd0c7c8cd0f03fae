use crate::model::Ms;

pub const MAX_COACHES: usize = 1_000;
pub const MAX_BOOKINGS_PER_COACH: usize = 200_000;

pub const MAX_SLUG_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_CALENDAR_ID_LEN: usize = 512;

/// One day. Sessions never cross into the next working day.
pub const MAX_SESSION_MINUTES: u32 = 24 * 60;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
