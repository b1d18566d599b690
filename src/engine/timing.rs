use crate::limits::*;
use crate::model::*;

use super::error::TimingViolation;

/// The caller's end time, or `start + min_duration`.
pub(crate) fn effective_end(terms: &ServiceTerms, request: &ReservationRequest) -> Ms {
    request
        .end_time
        .unwrap_or_else(|| {
            request
                .start_time
                .saturating_add(i64::from(terms.min_duration) * MINUTE_MS)
        })
}

/// Run the timing checks in order: range, window, duration. The first
/// failing check decides the violation. Returns the validated interval.
pub(crate) fn validate_timing(
    terms: &ServiceTerms,
    event_date: Ms,
    start: Ms,
    end: Ms,
) -> Result<Span, TimingViolation> {
    check_range(start, end)?;
    check_window(terms, event_date, start)?;
    if end < start {
        return Err(TimingViolation::InvertedInterval { start, end });
    }
    let span = Span::new(start, end);
    check_duration(terms, &span)?;
    Ok(span)
}

fn check_range(start: Ms, end: Ms) -> Result<(), TimingViolation> {
    let valid = MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS;
    if !valid.contains(&start) || !valid.contains(&end) {
        return Err(TimingViolation::OutOfRange);
    }
    Ok(())
}

/// Start must fall in `[event_date - reservation_deadline, event_date]`.
fn check_window(terms: &ServiceTerms, event_date: Ms, start: Ms) -> Result<(), TimingViolation> {
    let deadline = event_date - i64::from(terms.reservation_deadline) * MINUTE_MS;
    if start > event_date {
        return Err(TimingViolation::AfterEventDate { start, event_date });
    }
    if start < deadline {
        return Err(TimingViolation::BeforeReservationDeadline { start, deadline });
    }
    Ok(())
}

/// Both bounds inclusive; `max_duration == 0` means unbounded.
fn check_duration(terms: &ServiceTerms, span: &Span) -> Result<(), TimingViolation> {
    let minutes = span.duration_minutes();
    if minutes < i64::from(terms.min_duration) {
        return Err(TimingViolation::TooShort {
            minutes,
            min: terms.min_duration,
        });
    }
    if terms.max_duration > 0 && minutes > i64::from(terms.max_duration) {
        return Err(TimingViolation::TooLong {
            minutes,
            max: terms.max_duration,
        });
    }
    Ok(())
}
