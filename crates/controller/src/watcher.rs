//! Feeds the work queue from store change events plus a periodic re-list.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

use courier_engine::{ResourceStore, StoreError, StoreEvent};

use crate::queue::WorkQueue;

/// Enqueue every request that still needs work.
pub async fn resync(store: &dyn ResourceStore, queue: &WorkQueue) -> Result<usize, StoreError> {
    let mut enqueued = 0;
    for request in store.list().await? {
        if !request.status.phase.is_terminal() {
            queue.add(request.key());
            enqueued += 1;
        }
    }
    Ok(enqueued)
}

/// Run until `shutdown` flips or the store's event stream closes.
pub async fn run_watcher(
    store: Arc<dyn ResourceStore>,
    queue: Arc<WorkQueue>,
    resync_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut events = store.watch();
    let mut ticker = tokio::time::interval(resync_interval);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(StoreEvent::Applied(key)) => queue.add(key),
                Ok(StoreEvent::Deleted(key)) => {
                    tracing::debug!(key = %key, "Request removed");
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Change stream lagged, resyncing");
                    if let Err(e) = resync(store.as_ref(), &queue).await {
                        tracing::warn!(error = %e, "Resync failed");
                    }
                }
                Err(RecvError::Closed) => {
                    tracing::warn!("Change stream closed");
                    return;
                }
            },
            _ = ticker.tick() => {
                match resync(store.as_ref(), &queue).await {
                    Ok(enqueued) => tracing::debug!(enqueued, "Resync complete"),
                    Err(e) => tracing::warn!(error = %e, "Resync failed"),
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("Watcher stopping");
                return;
            }
        }
    }
}
