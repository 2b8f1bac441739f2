use crate::model::Ms;

pub const MAX_CLASSROOMS_PER_INSTITUTION: usize = 10_000;
pub const MAX_RESERVATIONS_PER_CLASSROOM: usize = 100_000;
pub const MAX_PERIODS_PER_INSTITUTION: usize = 1_000;
pub const MAX_BATCH_SIZE: usize = 1_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_COURSE_LEN: usize = 128;
pub const MAX_DESCRIPTION_LEN: usize = 4_096;

/// Highest accepted `repeat_on_weeks` entry (one year of weekly repeats).
pub const MAX_WEEK_OFFSET: u32 = 53;

/// Largest encoded WAL record; a full reservation batch stays well below it.
pub const MAX_WAL_RECORD_BYTES: u32 = 64 * 1024 * 1024;

pub const MAX_INSTITUTIONS: usize = 1_024;
pub const MAX_INSTITUTION_NAME_LEN: usize = 128;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// A single reservation never spans more than one day.
pub const MAX_RESERVATION_DURATION_MS: Ms = 24 * 3_600_000;
/// Widest window accepted by free-slot and windowed listing queries (366 days).
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
