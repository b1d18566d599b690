use tokio::sync::{OwnedRwLockWriteGuard, RwLockReadGuard};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Store, StoreError, apply_reservation};

/// What a committed reservation changed. Enough to revert it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub timeslot: Timeslot,
    pub budget: BudgetChange,
}

/// One reservation's transaction over a locked service and event.
///
/// Writes are staged and only reach the WAL and the shared state on
/// [`commit`](UnitOfWork::commit). Dropping the unit of work rolls back:
/// nothing staged is applied, and both locks are released.
pub struct UnitOfWork<'s> {
    store: &'s Store,
    _gate: RwLockReadGuard<'s, ()>,
    service: OwnedRwLockWriteGuard<Service>,
    event: OwnedRwLockWriteGuard<Event>,
    timeslot: Option<Timeslot>,
    budget: Option<BudgetChange>,
}

impl Store {
    /// Enter the commit gate. Take it before any service or event lock.
    pub async fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    /// Start a unit of work over guards obtained after [`Store::enter`].
    pub fn begin<'s>(
        &'s self,
        gate: RwLockReadGuard<'s, ()>,
        service: OwnedRwLockWriteGuard<Service>,
        event: OwnedRwLockWriteGuard<Event>,
    ) -> UnitOfWork<'s> {
        UnitOfWork {
            store: self,
            _gate: gate,
            service,
            event,
            timeslot: None,
            budget: None,
        }
    }

    /// Undo a committed reservation with a compensating WAL record.
    pub async fn revert(&self, committed: &Committed) -> Result<(), StoreError> {
        let service_id = committed.timeslot.service_id;
        let event_id = committed.timeslot.event_id;
        let _gate = self.enter().await;
        let mut service = self
            .shared_service(service_id)
            .ok_or(StoreError::NotFound("service", service_id))?
            .write_owned()
            .await;
        let mut event = self
            .lock_event(event_id)
            .await
            .ok_or(StoreError::NotFound("event", event_id))?;

        let change = Change::ReservationReverted {
            timeslot_id: committed.timeslot.id,
            service_id,
            event_id,
            budget: committed.budget.clone(),
        };
        self.wal_append(&change).await?;
        apply_reservation(&mut service, &mut event, &change);
        Ok(())
    }
}

impl UnitOfWork<'_> {
    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn save_timeslot(&mut self, timeslot: Timeslot) -> Result<(), StoreError> {
        if timeslot.service_id != self.service.id() || timeslot.event_id != self.event.id {
            return Err(StoreError::Invalid("timeslot does not belong to this unit of work"));
        }
        if self.service.timeslots.len() >= MAX_TIMESLOTS_PER_SERVICE {
            return Err(StoreError::LimitExceeded("too many timeslots on service"));
        }
        self.timeslot = Some(timeslot);
        Ok(())
    }

    /// Stage a brand-new budget item for the event.
    pub fn save_budget_item(&mut self, item: BudgetItem) -> Result<(), StoreError> {
        if self.event.budget.items.len() >= MAX_BUDGET_ITEMS_PER_EVENT {
            return Err(StoreError::LimitExceeded("too many budget items on event"));
        }
        self.budget = Some(BudgetChange::Created(item));
        Ok(())
    }

    /// Stage filling an existing budget item with merchandise.
    pub fn save_budget(&mut self, item_id: Ulid, merchandise_id: MerchandiseId) -> Result<(), StoreError> {
        if !self.event.budget.items.iter().any(|i| i.id == item_id) {
            return Err(StoreError::Invalid("budget item not in event budget"));
        }
        self.budget = Some(BudgetChange::Filled {
            item_id,
            merchandise_id,
        });
        Ok(())
    }

    /// Persist the staged timeslot and budget change as one WAL record, then
    /// apply both to the service and event. On error nothing is applied.
    pub async fn commit(mut self) -> Result<Committed, StoreError> {
        let (Some(timeslot), Some(budget)) = (self.timeslot.take(), self.budget.take()) else {
            return Err(StoreError::Invalid("unit of work has nothing staged"));
        };
        let committed = Committed {
            timeslot: timeslot.clone(),
            budget: budget.clone(),
        };
        let change = Change::ReservationCommitted { timeslot, budget };
        self.store.wal_append(&change).await?;
        apply_reservation(&mut self.service, &mut self.event, &change);
        Ok(committed)
    }
}
