use crate::model::{BookingId, TutorId, UserId};

#[derive(Debug)]
pub enum StoreError {
    UnknownUser(UserId),
    UnknownTutor(TutorId),
    /// Absent, or owned by someone else. Callers cannot tell which.
    NotFound(BookingId),
    EmailTaken(String),
    /// A lock could not be acquired within the store's lock timeout.
    Contention,
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::UnknownUser(id) => write!(f, "unknown user: {id}"),
            StoreError::UnknownTutor(id) => write!(f, "unknown tutor: {id}"),
            StoreError::NotFound(id) => write!(f, "booking not found: {id}"),
            StoreError::EmailTaken(email) => write!(f, "email already taken: {email}"),
            StoreError::Contention => write!(f, "lock acquisition timed out"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
