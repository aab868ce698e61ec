use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type UserId = Ulid;
pub type TutorId = Ulid;
pub type BookingId = Ulid;

/// Half-open wall-clock interval `[start, end)` on an implicit date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Interval {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "Interval start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tutor {
    pub id: TutorId,
    pub name: String,
}

/// A committed reservation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub user_id: UserId,
    pub tutor_id: TutorId,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Booking {
    pub fn interval(&self) -> Interval {
        Interval {
            start: self.start,
            end: self.end,
        }
    }

    pub fn tutor_scope(&self) -> ScopeKey {
        ScopeKey::new(Party::Tutor(self.tutor_id), self.date)
    }

    pub fn user_scope(&self) -> ScopeKey {
        ScopeKey::new(Party::User(self.user_id), self.date)
    }
}

/// Either side of a booking. Tutors order before users, which fixes the
/// lock acquisition order for a create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Party {
    Tutor(TutorId),
    User(UserId),
}

/// Coordination key: one party on one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeKey {
    pub party: Party,
    pub date: NaiveDate,
}

impl ScopeKey {
    pub fn new(party: Party, date: NaiveDate) -> Self {
        Self { party, date }
    }
}

/// Bookings of one scope, sorted by `start`.
#[derive(Debug, Clone, Default)]
pub struct DaySchedule {
    pub bookings: Vec<Booking>,
}

impl DaySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    /// Insert booking maintaining sort order by start.
    pub fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.start, |b| b.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Bookings whose interval overlaps `query`.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Interval) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.end > query.start)
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// `credential` is the user's password hash, if they registered with one.
    UserRegistered {
        id: UserId,
        email: String,
        credential: Option<String>,
    },
    /// Cascades to every booking owned by the user.
    UserRemoved { id: UserId },
    TutorAdded { id: TutorId, name: String },
    /// Cascades to every booking with the tutor.
    TutorRemoved { id: TutorId },
    BookingCreated { booking: Booking },
    BookingCancelled { id: BookingId },
}
