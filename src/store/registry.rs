use std::sync::Arc;

use tokio::sync::RwLock;

use crate::limits::*;
use crate::model::*;

use super::{Store, StoreError};

/// Catalog upserts. Enough to seed the stores the reservation engine reads.
impl Store {
    pub async fn put_user(&self, user: User) -> Result<(), StoreError> {
        if user.email.is_empty() || user.email.len() > MAX_EMAIL_LEN {
            return Err(StoreError::Invalid("email must be 1..=320 bytes"));
        }
        let _gate = self.enter().await;
        let change = Change::UserSaved(user.clone());
        self.wal_append(&change).await?;
        self.users.insert(user.id, user);
        Ok(())
    }

    /// Create a service or update its listing. Existing timeslots are kept.
    pub async fn put_service(&self, info: MerchandiseInfo, terms: ServiceTerms) -> Result<(), StoreError> {
        validate_info(&info)?;
        terms.validate().map_err(StoreError::Invalid)?;

        let _gate = self.enter().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.is_product(info.id) {
            return Err(StoreError::Invalid("id already belongs to a product"));
        }
        let change = Change::ServiceSaved {
            info: info.clone(),
            terms,
        };
        match self.shared_service(info.id) {
            Some(shared) => {
                let mut guard = shared.write().await;
                self.wal_append(&change).await?;
                self.merchandise_owner.insert(info.id, info.provider_id);
                guard.info = info;
                guard.terms = terms;
            }
            None => {
                self.wal_append(&change).await?;
                self.insert_service(Service::new(info, terms));
            }
        }
        Ok(())
    }

    pub async fn put_product(&self, product: Product) -> Result<(), StoreError> {
        validate_info(&product.info)?;
        let _gate = self.enter().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.shared_service(product.info.id).is_some() {
            return Err(StoreError::Invalid("id already belongs to a service"));
        }
        self.wal_append(&Change::ProductSaved(product.clone())).await?;
        self.insert_product(product);
        Ok(())
    }

    /// Create an event or replace its date and budget.
    pub async fn put_event(&self, event: Event) -> Result<(), StoreError> {
        if event.budget.items.len() > MAX_BUDGET_ITEMS_PER_EVENT {
            return Err(StoreError::LimitExceeded("too many budget items on event"));
        }
        if event.date < MIN_VALID_TIMESTAMP_MS || event.date > MAX_VALID_TIMESTAMP_MS {
            return Err(StoreError::LimitExceeded("timestamp out of range"));
        }

        let _gate = self.enter().await;
        let change = Change::EventSaved(event.clone());
        match self.shared_event(event.id) {
            Some(shared) => {
                let mut guard = shared.write().await;
                self.wal_append(&change).await?;
                *guard = event;
            }
            None => {
                self.wal_append(&change).await?;
                self.events.insert(event.id, Arc::new(RwLock::new(event)));
            }
        }
        Ok(())
    }
}

fn validate_info(info: &MerchandiseInfo) -> Result<(), StoreError> {
    if info.title.len() > MAX_TITLE_LEN {
        return Err(StoreError::LimitExceeded("title too long"));
    }
    Ok(())
}
