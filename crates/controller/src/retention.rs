//! Retention sweeper — deletes terminal requests once their retention period is over.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use courier_common::types::NotificationRequest;
use courier_engine::clock::Clock;
use courier_engine::{ResourceStore, StoreError};

pub struct RetentionSweeper {
    store: Arc<dyn ResourceStore>,
    clock: Arc<dyn Clock>,
}

/// When a terminal request becomes eligible for deletion.
pub fn expires_at(request: &NotificationRequest) -> Option<DateTime<Utc>> {
    if !request.status.phase.is_terminal() {
        return None;
    }
    let completed = request.status.completion_time?;
    Some(completed + chrono::Duration::days(i64::from(request.spec.retention_days)))
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn ResourceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Delete every expired request. Returns how many were removed.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut removed = 0;

        for request in self.store.list().await? {
            let Some(expiry) = expires_at(&request) else {
                continue;
            };
            if expiry > now {
                continue;
            }
            let key = request.key();
            if self.store.delete(&key).await? {
                tracing::info!(
                    namespace = %key.namespace,
                    name = %key.name,
                    phase = %request.status.phase,
                    retention_days = request.spec.retention_days,
                    "Expired request deleted"
                );
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::warn!(error = %e, "Retention sweep failed");
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }
}
