use tokio::sync::oneshot;

use crate::model::*;

use super::{Merchandise, Store, StoreError, WalCommand};

impl Store {
    /// Rewrite the WAL with only the changes needed to recreate the current state.
    ///
    /// Holds the commit gate exclusively, so no writer is between its WAL
    /// append and its in-memory apply while the snapshot is taken.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _gate = self.commit_gate.write().await;

        let mut changes = Vec::new();
        for entry in self.users.iter() {
            changes.push(Change::UserSaved(entry.value().clone()));
        }

        let merchandise: Vec<Merchandise> =
            self.merchandise.iter().map(|e| e.value().clone()).collect();
        for item in merchandise {
            match item {
                Merchandise::Product(product) => {
                    changes.push(Change::ProductSaved((*product).clone()));
                }
                Merchandise::Service(shared) => {
                    let guard = shared.read().await;
                    changes.push(Change::ServiceRestored((*guard).clone()));
                }
            }
        }

        let events: Vec<_> = self.events.iter().map(|e| e.value().clone()).collect();
        for shared in events {
            let guard = shared.read().await;
            changes.push(Change::EventSaved((*guard).clone()));
        }

        let count = changes.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { changes, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))?;
        tracing::info!("compacted WAL to {count} changes");
        Ok(())
    }
}
