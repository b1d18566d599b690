use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

pub const MAX_TIMESLOTS_PER_SERVICE: usize = 100_000;
pub const MAX_BUDGET_ITEMS_PER_EVENT: usize = 1_000;
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;

/// Longest accepted request line on the wire, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
