use chrono::NaiveDate;

use crate::model::{BookingId, UserId};
use crate::store::StoreError;

/// Which no-overlap invariant a create would have broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    TutorBusy,
    UserBusy,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::TutorBusy => "tutor-busy",
            ConflictReason::UserBusy => "user-busy",
        }
    }
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    PastDate { date: NaiveDate, today: NaiveDate },
    Conflict(ConflictReason),
    /// Absent or not owned by the caller. Deliberately indistinguishable.
    NotFound(BookingId),
    /// The caller's identity no longer maps to a registered user.
    UnknownUser(UserId),
    /// Lock contention outlasted every retry.
    Transient { attempts: u32 },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::PastDate { date, today } => {
                write!(f, "date {date} is before today ({today})")
            }
            EngineError::Conflict(reason) => write!(f, "booking conflict: {reason}"),
            EngineError::NotFound(_) => write!(f, "booking not found"),
            EngineError::UnknownUser(id) => write!(f, "unknown user: {id}"),
            EngineError::Transient { attempts } => {
                write!(f, "busy, gave up after {attempts} attempts; retry later")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownUser(id) => EngineError::UnknownUser(id),
            StoreError::UnknownTutor(id) => EngineError::Validation(format!("unknown tutor: {id}")),
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::EmailTaken(_) => EngineError::Validation("email already taken".into()),
            StoreError::Contention => EngineError::Transient { attempts: 1 },
            StoreError::LimitExceeded(msg) => EngineError::LimitExceeded(msg),
            StoreError::WalError(e) => EngineError::WalError(e),
        }
    }
}
