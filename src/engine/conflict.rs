use crate::model::*;

use super::ReservationError;

/// Fail with the first existing timeslot that overlaps `span`.
/// A slot ending exactly at `span.start` (or starting at `span.end`) is fine.
pub(crate) fn check_no_overlap(service: &Service, span: &Span) -> Result<(), ReservationError> {
    match service.overlapping(span).next() {
        Some(existing) => Err(ReservationError::TimeSlotAlreadyBooked(existing.id)),
        None => Ok(()),
    }
}
