use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

pub type MerchandiseId = i64;
/// Services are merchandise; they share the id space.
pub type ServiceId = MerchandiseId;
pub type EventId = i64;
pub type UserId = i64;
pub type CategoryId = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Whole minutes, truncated toward zero.
    pub fn duration_minutes(&self) -> i64 {
        self.duration_ms() / MINUTE_MS
    }

    /// Touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A committed booking of a service for an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeslot {
    pub id: Ulid,
    pub span: Span,
    pub service_id: ServiceId,
    /// Reporting reference only; the event does not own the slot.
    pub event_id: EventId,
}

/// Fields shared by every kind of merchandise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchandiseInfo {
    pub id: MerchandiseId,
    pub title: String,
    pub category_id: CategoryId,
    pub provider_id: UserId,
    pub available: bool,
    pub visible: bool,
    pub deleted: bool,
}

impl MerchandiseInfo {
    pub fn is_available(&self) -> bool {
        self.available && self.visible && !self.deleted
    }
}

/// Booking constraints of a service, all in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTerms {
    pub min_duration: u32,
    /// 0 = unbounded.
    pub max_duration: u32,
    /// Minutes before the event date from which reservations are accepted.
    pub reservation_deadline: u32,
    pub cancellation_deadline: u32,
}

impl ServiceTerms {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_duration > 0 && self.min_duration > self.max_duration {
            return Err("min_duration exceeds max_duration");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub info: MerchandiseInfo,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub info: MerchandiseInfo,
    pub terms: ServiceTerms,
    /// Sorted by `span.start`.
    pub timeslots: Vec<Timeslot>,
}

impl Service {
    pub fn new(info: MerchandiseInfo, terms: ServiceTerms) -> Self {
        Self {
            info,
            terms,
            timeslots: Vec::new(),
        }
    }

    pub fn id(&self) -> ServiceId {
        self.info.id
    }

    /// Insert timeslot maintaining sort order by span.start.
    pub fn insert_timeslot(&mut self, slot: Timeslot) {
        let pos = self
            .timeslots
            .binary_search_by_key(&slot.span.start, |t| t.span.start)
            .unwrap_or_else(|e| e);
        self.timeslots.insert(pos, slot);
    }

    pub fn remove_timeslot(&mut self, id: Ulid) -> Option<Timeslot> {
        let pos = self.timeslots.iter().position(|t| t.id == id)?;
        Some(self.timeslots.remove(pos))
    }

    /// Return only timeslots whose span overlaps the query window.
    /// Uses binary search to skip slots starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Timeslot> {
        let right_bound = self
            .timeslots
            .partition_point(|t| t.span.start < query.end);
        self.timeslots[..right_bound]
            .iter()
            .filter(move |t| t.span.end > query.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetItem {
    pub id: Ulid,
    pub category_id: CategoryId,
    /// `None` = an unfilled line for this category.
    pub merchandise_id: Option<MerchandiseId>,
    pub max_amount: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub items: Vec<BudgetItem>,
}

/// How a reservation touched an event's budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BudgetChange {
    Filled {
        item_id: Ulid,
        merchandise_id: MerchandiseId,
    },
    Created(BudgetItem),
}

impl Budget {
    pub fn first_unfilled(&self, category_id: CategoryId) -> Option<&BudgetItem> {
        self.items
            .iter()
            .find(|item| item.category_id == category_id && item.merchandise_id.is_none())
    }

    pub fn apply(&mut self, change: &BudgetChange) {
        match change {
            BudgetChange::Filled {
                item_id,
                merchandise_id,
            } => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == *item_id) {
                    item.merchandise_id = Some(*merchandise_id);
                }
            }
            BudgetChange::Created(item) => self.items.push(item.clone()),
        }
    }

    /// Undo a previously applied change. A filled item is only cleared if it
    /// still references the same merchandise.
    pub fn revert(&mut self, change: &BudgetChange) {
        match change {
            BudgetChange::Filled {
                item_id,
                merchandise_id,
            } => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == *item_id)
                    && item.merchandise_id == Some(*merchandise_id)
                {
                    item.merchandise_id = None;
                }
            }
            BudgetChange::Created(created) => self.items.retain(|i| i.id != created.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// The instant the event takes place.
    pub date: Ms,
    pub budget: Budget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Organizer,
    Provider,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub role: Role,
}

// ── Boundary types ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub event_id: EventId,
    pub organizer_id: UserId,
    pub start_time: Ms,
    #[serde(default)]
    pub end_time: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationResponse {
    pub service_id: ServiceId,
    pub event_id: EventId,
    pub provider_id: UserId,
    pub start_time: Ms,
    pub end_time: Option<Ms>,
    pub provider_email: String,
}

/// Broadcast to listeners of a service after a reservation commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationNotice {
    pub timeslot_id: Ulid,
    pub service_id: ServiceId,
    pub event_id: EventId,
    pub start: Ms,
    pub end: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub timeslot_id: Ulid,
    pub service_id: ServiceId,
    pub service_title: String,
    pub start: Ms,
    pub end: Ms,
}

/// The change records — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    UserSaved(User),
    ProductSaved(Product),
    ServiceSaved {
        info: MerchandiseInfo,
        terms: ServiceTerms,
    },
    /// Full service snapshot, timeslots included. Written by compaction.
    ServiceRestored(Service),
    EventSaved(Event),
    ReservationCommitted {
        timeslot: Timeslot,
        budget: BudgetChange,
    },
    ReservationReverted {
        timeslot_id: Ulid,
        service_id: ServiceId,
        event_id: EventId,
        budget: BudgetChange,
    },
}
