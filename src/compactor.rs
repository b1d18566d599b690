use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::store::Store;

/// Background task that compacts the WAL once enough changes accumulate.
pub async fn run_compactor(store: Arc<Store>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// Returns true if a compaction ran and succeeded.
pub async fn compact_if_due(store: &Store, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("compactor skip: {appends} appends since last compaction");
        return false;
    }
    match store.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}
