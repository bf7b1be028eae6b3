use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::store::DurableStore;

/// Check every `period` whether the log has grown past `threshold` appends
/// since the last compaction, and compact it if so.
pub async fn run_compactor(store: Arc<DurableStore>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// Returns true when a compaction ran and succeeded.
pub async fn compact_if_due(store: &DurableStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        debug!("compactor: {appends} appends, threshold {threshold}");
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!("compacted log after {appends} appends");
            true
        }
        Err(e) => {
            error!("compaction failed: {e}");
            false
        }
    }
}
