use std::time::Duration;

use ulid::Ulid;

use crate::mail::MailError;
use crate::model::{EventId, Ms, ServiceId, UserId};
use crate::store::StoreError;

/// Stable classification of a failed reservation, for the boundary layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ServiceNotFound,
    EventNotFound,
    TimingConstraintViolation,
    TimeSlotAlreadyBooked,
    UserNotFound,
    Timeout,
    NotificationFailed,
    StoreError,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::ServiceNotFound => "SERVICE_NOT_FOUND",
            ErrorKind::EventNotFound => "EVENT_NOT_FOUND",
            ErrorKind::TimingConstraintViolation => "TIMING_CONSTRAINT_VIOLATION",
            ErrorKind::TimeSlotAlreadyBooked => "TIME_SLOT_ALREADY_BOOKED",
            ErrorKind::UserNotFound => "USER_NOT_FOUND",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::NotificationFailed => "NOTIFICATION_FAILED",
            ErrorKind::StoreError => "STORE_ERROR",
        }
    }

    /// Business-rule rejections, as opposed to infrastructure faults.
    pub fn is_rejection(self) -> bool {
        matches!(
            self,
            ErrorKind::ServiceNotFound
                | ErrorKind::EventNotFound
                | ErrorKind::TimingConstraintViolation
                | ErrorKind::TimeSlotAlreadyBooked
                | ErrorKind::UserNotFound
        )
    }
}

/// Who could not be resolved when addressing notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Organizer(UserId),
    Provider(UserId),
    /// The provider owning this service.
    ProviderOf(ServiceId),
}

/// Why a requested interval breaks a service's timing constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimingViolation {
    OutOfRange,
    InvertedInterval { start: Ms, end: Ms },
    AfterEventDate { start: Ms, event_date: Ms },
    BeforeReservationDeadline { start: Ms, deadline: Ms },
    TooShort { minutes: i64, min: u32 },
    TooLong { minutes: i64, max: u32 },
}

impl std::fmt::Display for TimingViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimingViolation::OutOfRange => write!(f, "timestamp out of range"),
            TimingViolation::InvertedInterval { start, end } => {
                write!(f, "end {end} is before start {start}")
            }
            TimingViolation::AfterEventDate { start, event_date } => {
                write!(f, "start {start} is after the event date {event_date}")
            }
            TimingViolation::BeforeReservationDeadline { start, deadline } => {
                write!(f, "start {start} is before the reservation window opens at {deadline}")
            }
            TimingViolation::TooShort { minutes, min } => {
                write!(f, "duration {minutes}min is shorter than the minimum {min}min")
            }
            TimingViolation::TooLong { minutes, max } => {
                write!(f, "duration {minutes}min is longer than the maximum {max}min")
            }
        }
    }
}

impl std::error::Error for TimingViolation {}

#[derive(Debug)]
pub enum ReservationError {
    ServiceNotFound(ServiceId),
    EventNotFound(EventId),
    TimingConstraintViolation(TimingViolation),
    TimeSlotAlreadyBooked(Ulid),
    UserNotFound(Party),
    Timeout(Duration),
    /// Mail delivery failed and the reservation was rolled back.
    NotificationFailed(MailError),
    Store(StoreError),
}

impl ReservationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReservationError::ServiceNotFound(_) => ErrorKind::ServiceNotFound,
            ReservationError::EventNotFound(_) => ErrorKind::EventNotFound,
            ReservationError::TimingConstraintViolation(_) => ErrorKind::TimingConstraintViolation,
            ReservationError::TimeSlotAlreadyBooked(_) => ErrorKind::TimeSlotAlreadyBooked,
            ReservationError::UserNotFound(_) => ErrorKind::UserNotFound,
            ReservationError::Timeout(_) => ErrorKind::Timeout,
            ReservationError::NotificationFailed(_) => ErrorKind::NotificationFailed,
            ReservationError::Store(_) => ErrorKind::StoreError,
        }
    }
}

impl std::fmt::Display for ReservationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationError::ServiceNotFound(id) => {
                write!(f, "service not found or unavailable: {id}")
            }
            ReservationError::EventNotFound(id) => write!(f, "event not found: {id}"),
            ReservationError::TimingConstraintViolation(v) => {
                write!(f, "reservation timing is invalid: {v}")
            }
            ReservationError::TimeSlotAlreadyBooked(id) => {
                write!(f, "time slot is not available: overlaps timeslot {id}")
            }
            ReservationError::UserNotFound(Party::Organizer(id)) => {
                write!(f, "organizer not found: {id}")
            }
            ReservationError::UserNotFound(Party::Provider(id)) => {
                write!(f, "provider not found: {id}")
            }
            ReservationError::UserNotFound(Party::ProviderOf(id)) => {
                write!(f, "provider not found for service: {id}")
            }
            ReservationError::Timeout(after) => {
                write!(f, "reservation timed out after {}ms", after.as_millis())
            }
            ReservationError::NotificationFailed(e) => {
                write!(f, "reservation rolled back: {e}")
            }
            ReservationError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for ReservationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReservationError::TimingConstraintViolation(v) => Some(v),
            ReservationError::NotificationFailed(e) => Some(e),
            ReservationError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ReservationError {
    fn from(e: StoreError) -> Self {
        ReservationError::Store(e)
    }
}
