use crate::model::*;

use super::{ConflictReason, EngineError};

/// Half-open overlap test: `[10:00, 11:00)` and `[11:00, 12:00)` do not overlap.
pub fn overlaps(a: &Interval, b: &Interval) -> bool {
    a.overlaps(b)
}

/// First booking on `day` that overlaps `interval`, if any.
pub fn first_overlap<'a>(day: &'a DaySchedule, interval: &Interval) -> Option<&'a Booking> {
    day.overlapping(interval).next()
}

pub(crate) fn check_scope(
    day: &DaySchedule,
    interval: &Interval,
    reason: ConflictReason,
) -> Result<(), EngineError> {
    if let Some(existing) = first_overlap(day, interval) {
        tracing::debug!(
            "{reason}: [{}, {}) overlaps booking {}",
            interval.start,
            interval.end,
            existing.id
        );
        return Err(EngineError::Conflict(reason));
    }
    Ok(())
}
