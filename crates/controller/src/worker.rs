//! Reconciliation worker pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use courier_engine::{ReconcileAction, StatusReconciler};

use crate::queue::WorkQueue;

/// Requeue delay after a failed pass.
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

pub struct Controller {
    reconciler: Arc<StatusReconciler>,
    queue: Arc<WorkQueue>,
    workers: usize,
}

impl Controller {
    pub fn new(reconciler: Arc<StatusReconciler>, queue: Arc<WorkQueue>, workers: usize) -> Self {
        Self {
            reconciler,
            queue,
            workers: workers.max(1),
        }
    }

    /// Start the workers. They exit once the queue is shut down, after finishing
    /// the pass they are in.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        tracing::info!(workers = self.workers, "Starting reconciliation workers");
        (0..self.workers)
            .map(|id| {
                let reconciler = self.reconciler.clone();
                let queue = self.queue.clone();
                tokio::spawn(async move {
                    while let Some(key) = queue.get().await {
                        match reconciler.reconcile(&key).await {
                            Ok(ReconcileAction::Done) | Ok(ReconcileAction::Abandoned) => {}
                            Ok(ReconcileAction::RequeueAfter(delay)) => {
                                queue.add_after(key.clone(), delay);
                            }
                            Err(e) => {
                                tracing::error!(
                                    worker = id,
                                    namespace = %key.namespace,
                                    name = %key.name,
                                    error = %e,
                                    "Reconcile failed"
                                );
                                queue.add_after(key.clone(), ERROR_REQUEUE);
                            }
                        }
                        queue.done(&key);
                    }
                    tracing::debug!(worker = id, "Worker stopped");
                })
            })
            .collect()
    }
}
