use ulid::Ulid;

use crate::model::*;
use crate::store::{StoreError, UnitOfWork};

/// Decide how a reservation of `service` lands in `budget`: fill the first
/// unfilled item of the service's category, else add a new item with a
/// placeholder `max_amount` of 0.
pub fn plan_budget_change(budget: &Budget, service: &Service) -> BudgetChange {
    match budget.first_unfilled(service.info.category_id) {
        Some(item) => BudgetChange::Filled {
            item_id: item.id,
            merchandise_id: service.id(),
        },
        None => BudgetChange::Created(BudgetItem {
            id: Ulid::new(),
            category_id: service.info.category_id,
            merchandise_id: Some(service.id()),
            max_amount: 0,
        }),
    }
}

/// Stage the budget change on the unit of work.
pub(crate) fn reconcile(uow: &mut UnitOfWork<'_>) -> Result<(), StoreError> {
    match plan_budget_change(&uow.event().budget, uow.service()) {
        BudgetChange::Filled {
            item_id,
            merchandise_id,
        } => uow.save_budget(item_id, merchandise_id),
        BudgetChange::Created(item) => uow.save_budget_item(item),
    }
}
