//! Booking use cases: validate, check both scopes, commit.
//!
//! A create opens a [`ScopeTxn`](crate::store::ScopeTxn) on the tutor-day and
//! the user-day, runs the overlap check against both while holding them, and
//! commits before releasing. Two creates for the same tutor and date are
//! therefore strictly ordered, and the later one sees the earlier one's row.

mod clock;
pub mod conflict;
mod error;
#[cfg(test)]
mod tests;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ConflictReason, EngineError};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, info, warn};

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::store::ReservationStore;

use conflict::check_scope;

/// How contended mutations are retried before reporting `Transient`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled each time after.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff
            .saturating_mul(factor)
            .min(Duration::from_millis(MAX_BACKOFF_MS))
    }
}

pub struct ReservationEngine {
    store: Arc<ReservationStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl ReservationEngine {
    pub fn new(store: Arc<ReservationStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<ReservationStore> {
        &self.store
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Book `[start, end)` with `tutor_id` on `date` for `user_id`.
    ///
    /// Either the booking is committed and returned, or nothing changes.
    pub async fn create(
        &self,
        tutor_id: TutorId,
        user_id: UserId,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Booking, EngineError> {
        if start >= end {
            return Err(EngineError::Validation(
                "start time must be before end time".into(),
            ));
        }
        let today = self.clock.today();
        if date < today {
            return Err(EngineError::PastDate { date, today });
        }
        let interval = Interval::new(start, end);

        let started = Instant::now();
        let result = self
            .retrying("create", || self.try_create(tutor_id, user_id, date, interval))
            .await;
        match &result {
            Ok(booking) => {
                metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
                info!(
                    "booking {} created: tutor {tutor_id} user {user_id} {date} [{start}, {end}) in {:?}",
                    booking.id,
                    started.elapsed()
                );
            }
            Err(EngineError::Conflict(reason)) => {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL, "reason" => reason.as_str())
                    .increment(1);
                debug!("create rejected ({reason}): tutor {tutor_id} user {user_id} {date}");
            }
            Err(e) => debug!("create failed: {e}"),
        }
        result
    }

    async fn try_create(
        &self,
        tutor_id: TutorId,
        user_id: UserId,
        date: NaiveDate,
        interval: Interval,
    ) -> Result<Booking, EngineError> {
        let txn = self.store.begin(tutor_id, user_id, date).await?;
        check_scope(txn.tutor_day(), &interval, ConflictReason::TutorBusy)?;
        check_scope(txn.user_day(), &interval, ConflictReason::UserBusy)?;
        Ok(txn.commit(interval).await?)
    }

    /// Every booking of `user_id`, by date then start time.
    pub async fn list(&self, user_id: UserId) -> Vec<Booking> {
        self.store.bookings_for_user(user_id).await
    }

    /// Cancel a booking owned by `user_id`. A booking that is absent or
    /// belongs to someone else is reported as `NotFound` either way.
    pub async fn cancel(&self, booking_id: BookingId, user_id: UserId) -> Result<(), EngineError> {
        let booking = self
            .retrying("cancel", || async {
                self.store
                    .delete(booking_id, user_id)
                    .await
                    .map_err(EngineError::from)
            })
            .await?;
        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!("booking {} cancelled by user {user_id}", booking.id);
        Ok(())
    }

    /// Run `op`, retrying with exponential backoff while it reports contention.
    async fn retrying<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match f().await {
                Err(EngineError::Transient { .. }) if attempt < max_attempts => {
                    let delay = self.retry.delay(attempt);
                    metrics::counter!(observability::SCOPE_LOCK_RETRIES_TOTAL, "op" => op)
                        .increment(1);
                    debug!("{op}: scope contended on attempt {attempt}, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(EngineError::Transient { .. }) => {
                    metrics::counter!(observability::TRANSIENT_FAILURES_TOTAL, "op" => op)
                        .increment(1);
                    warn!("{op}: gave up after {attempt} contended attempts");
                    return Err(EngineError::Transient { attempts: attempt });
                }
                other => return other,
            }
        }
    }
}
