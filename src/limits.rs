//! Hard limits and retry defaults.

pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_TUTOR_NAME_LEN: usize = 128;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MAX_USERS: usize = 1_000_000;
pub const MAX_TUTORS: usize = 100_000;

/// Bookings a single tutor-day or user-day may hold.
pub const MAX_BOOKINGS_PER_SCOPE: usize = 1_440;

/// How long a mutation waits on one lock before counting as contended.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 250;
/// Attempts (including the first) before contention becomes a transient error.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// First backoff delay; doubled on each further attempt.
pub const DEFAULT_BACKOFF_MS: u64 = 10;
pub const MAX_BACKOFF_MS: u64 = 1_000;
