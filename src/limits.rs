//! Hard input limits. Policy knobs that vary per deployment live in
//! [`crate::settings`]; these are fixed ceilings on what the engine accepts.

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_REASON_LEN: usize = 512;

/// Widest window `check_capacity` / `attendance_summary` will scan.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 732;

pub const MAX_EXTENSION_DAYS: u32 = 365;
pub const MAX_EXTRA_DAYS: u32 = 365;
pub const MAX_PLAN_MONTHS: u32 = 36;
pub const MAX_SLOT_CAPACITY: u32 = 500;

/// Dates outside this year span are rejected as malformed input.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2100;

/// Longest accepted wire request line.
pub const MAX_LINE_LEN: usize = 64 * 1024;
