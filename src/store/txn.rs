use chrono::NaiveDate;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLockReadGuard};
use tracing::debug;

use crate::limits::MAX_BOOKINGS_PER_SCOPE;
use crate::model::*;

use super::{ReservationStore, StoreError};

/// Exclusive hold on the tutor-day and user-day of one prospective booking.
///
/// While a `ScopeTxn` is alive no other writer can touch either scope and
/// neither party can be removed. Dropping it without `commit` releases
/// everything and leaves the store untouched.
pub struct ScopeTxn<'a> {
    store: &'a ReservationStore,
    tutor_id: TutorId,
    user_id: UserId,
    date: NaiveDate,
    // Field order is drop order: scopes release before party and gate guards.
    tutor_day: OwnedRwLockWriteGuard<DaySchedule>,
    user_day: OwnedRwLockWriteGuard<DaySchedule>,
    _user: OwnedRwLockReadGuard<bool>,
    _tutor: OwnedRwLockReadGuard<bool>,
    _gate: RwLockReadGuard<'a, ()>,
}

impl ScopeTxn<'_> {
    /// Bookings already held by the tutor on this date, sorted by start.
    pub fn tutor_day(&self) -> &DaySchedule {
        &self.tutor_day
    }

    /// Bookings already held by the user on this date, sorted by start.
    pub fn user_day(&self) -> &DaySchedule {
        &self.user_day
    }

    /// Persist `interval` as a new booking and release both scopes.
    /// The caller has already checked it against both days.
    pub async fn commit(mut self, interval: Interval) -> Result<Booking, StoreError> {
        if self.tutor_day.len() >= MAX_BOOKINGS_PER_SCOPE
            || self.user_day.len() >= MAX_BOOKINGS_PER_SCOPE
        {
            return Err(StoreError::LimitExceeded("too many bookings on one day"));
        }
        let booking = Booking {
            id: ulid::Ulid::new(),
            user_id: self.user_id,
            tutor_id: self.tutor_id,
            date: self.date,
            start: interval.start,
            end: interval.end,
        };
        self.store
            .wal_append(&Event::BookingCreated {
                booking: booking.clone(),
            })
            .await?;
        self.store
            .link(&booking, &mut self.tutor_day, &mut self.user_day);
        debug!("booking {} committed", booking.id);
        Ok(booking)
    }
}

impl ReservationStore {
    /// Open a scope transaction on `(tutor, date)` and `(user, date)`.
    ///
    /// Fails with `UnknownUser`/`UnknownTutor` if either party is absent or
    /// being removed, and with `Contention` if any lock stays busy past the
    /// lock timeout.
    pub async fn begin(
        &self,
        tutor_id: TutorId,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<ScopeTxn<'_>, StoreError> {
        let gate = self.commit_gate.read().await;

        let user_liveness = self
            .users
            .get(&user_id)
            .map(|e| e.liveness.clone())
            .ok_or(StoreError::UnknownUser(user_id))?;
        let tutor_liveness = self
            .tutors
            .get(&tutor_id)
            .map(|e| e.liveness.clone())
            .ok_or(StoreError::UnknownTutor(tutor_id))?;

        let user_guard = self.bounded(user_liveness.read_owned()).await?;
        if !*user_guard {
            return Err(StoreError::UnknownUser(user_id));
        }
        let tutor_guard = self.bounded(tutor_liveness.read_owned()).await?;
        if !*tutor_guard {
            return Err(StoreError::UnknownTutor(tutor_id));
        }

        // Tutor scope first: the global acquisition order.
        let tutor_day = self
            .write_scope(ScopeKey::new(Party::Tutor(tutor_id), date))
            .await?;
        let user_day = self
            .write_scope(ScopeKey::new(Party::User(user_id), date))
            .await?;

        Ok(ScopeTxn {
            store: self,
            tutor_id,
            user_id,
            date,
            tutor_day,
            user_day,
            _user: user_guard,
            _tutor: tutor_guard,
            _gate: gate,
        })
    }

    /// Delete a booking owned by `owner`. Absent and foreign bookings both
    /// yield `NotFound`.
    pub async fn delete(&self, id: BookingId, owner: UserId) -> Result<Booking, StoreError> {
        let _gate = self.commit_gate.read().await;

        let booking = self
            .find_by_id(&id)
            .filter(|b| b.user_id == owner)
            .ok_or(StoreError::NotFound(id))?;

        let mut tutor_day = self.write_scope(booking.tutor_scope()).await?;
        let mut user_day = self.write_scope(booking.user_scope()).await?;

        // A concurrent cancel or cascade may have won the race for the locks.
        if !self.bookings.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }

        self.wal_append(&Event::BookingCancelled { id }).await?;
        self.unlink(&booking, &mut tutor_day, &mut user_day);
        debug!("booking {id} cancelled by owner");
        Ok(booking)
    }
}
