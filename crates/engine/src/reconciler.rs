//! Status reconciler — one pass of the control loop for one request.
//!
//! A pass reads the request fresh, runs at most one delivery round and persists the
//! outcome with a version-checked write. Only the write is retried on conflict: the
//! round's attempts are re-applied to a fresh snapshot, never re-sent. A round whose
//! write gives up is kept and persisted by the next pass before anything new is sent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use courier_common::config::AppConfig;
use courier_common::types::{DeliveryAttempt, DeliveryStatus, ObjectKey, Phase, RetryPolicy};

use crate::dispatcher::RoundClassification;
use crate::lease::{LeaseError, LeaseToken, RequestLease};
use crate::lifecycle::{LifecycleGuard, Liveness};
use crate::orchestrator::{ApplyOutcome, RetryOrchestrator};
use crate::store::{ResourceStore, StoreError};

/// What the caller should do with the key after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Terminal, or nothing left to do.
    Done,
    RequeueAfter(Duration),
    /// The request was deleted mid-flight; nothing was written.
    Abandoned,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("lease error: {0}")]
    Lease(#[from] LeaseError),

    #[error("gave up persisting status for {key} after {attempts} attempts")]
    PersistRetriesExhausted { key: ObjectKey, attempts: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    /// Bound on version-checked write attempts per pass.
    pub status_update_retries: u32,
    pub lease_ttl: Duration,
    /// Requeue delay when another replica holds the lease.
    pub lease_busy_requeue: Duration,
    /// Pause after a non-conflict store error inside the persistence loop.
    pub persist_retry_delay: Duration,
}

impl ReconcilerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            status_update_retries: config.status_update_retries,
            lease_ttl: Duration::from_secs(config.lease_ttl_secs),
            ..Self::default()
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            status_update_retries: 5,
            lease_ttl: Duration::from_secs(120),
            lease_busy_requeue: Duration::from_secs(5),
            persist_retry_delay: Duration::from_millis(200),
        }
    }
}

pub struct StatusReconciler {
    store: Arc<dyn ResourceStore>,
    lease: Arc<dyn RequestLease>,
    guard: LifecycleGuard,
    orchestrator: RetryOrchestrator,
    config: ReconcilerConfig,
    /// Rounds that were sent but never written, by request.
    unpersisted: Mutex<HashMap<ObjectKey, Vec<DeliveryAttempt>>>,
}

impl StatusReconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        lease: Arc<dyn RequestLease>,
        orchestrator: RetryOrchestrator,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            guard: LifecycleGuard::new(store.clone(), lease.clone()),
            store,
            lease,
            orchestrator,
            config,
            unpersisted: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Run one pass for `key` under its lease.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileAction, ReconcileError> {
        let Some(token) = self.lease.acquire(key, self.config.lease_ttl).await? else {
            return Ok(ReconcileAction::RequeueAfter(self.config.lease_busy_requeue));
        };

        let result = self.reconcile_leased(key, &token).await;

        // Abandoned passes already gave the lease back.
        if !matches!(result, Ok(ReconcileAction::Abandoned)) {
            if let Err(e) = self.lease.release(key, &token).await {
                tracing::warn!(key = %key, error = %e, "Failed to release lease");
            }
        }
        result
    }

    /// Whether a sent round for `key` is still waiting to be written.
    pub fn has_unpersisted_round(&self, key: &ObjectKey) -> bool {
        self.unpersisted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    fn take_unpersisted(&self, key: &ObjectKey) -> Option<Vec<DeliveryAttempt>> {
        self.unpersisted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }

    fn keep_unpersisted(&self, key: &ObjectKey, round: &[DeliveryAttempt]) {
        self.unpersisted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), round.to_vec());
    }

    async fn reconcile_leased(
        &self,
        key: &ObjectKey,
        token: &LeaseToken,
    ) -> Result<ReconcileAction, ReconcileError> {
        let request = match self.guard.check(key).await? {
            Liveness::Live(request) => *request,
            Liveness::Gone => {
                self.take_unpersisted(key);
                tracing::debug!(key = %key, "Request no longer exists");
                return Ok(ReconcileAction::Done);
            }
            Liveness::Deleting => {
                self.take_unpersisted(key);
                self.guard.abandon(key, token, "round-entry").await;
                return Ok(ReconcileAction::Abandoned);
            }
        };

        let policy = self.orchestrator.resolve_policy(&request.spec);

        // A previous pass already sent this round; write it before planning anything new.
        if let Some(round) = self.take_unpersisted(key) {
            tracing::info!(
                namespace = %key.namespace,
                name = %key.name,
                attempts = round.len(),
                "Persisting previously sent round"
            );
            return self.persist_round(key, token, &round, &policy).await;
        }

        let status = &request.status;
        if status.phase.is_terminal() {
            return Ok(ReconcileAction::Done);
        }
        if status.phase == Phase::Retrying {
            if let Some(wait) = self.wait_remaining(status) {
                return Ok(ReconcileAction::RequeueAfter(wait));
            }
        }

        let request = if status.phase == Phase::Pending {
            let claimed = self.orchestrator.begin(&request);
            match self
                .store
                .update_status(key, &claimed, request.metadata.resource_version)
                .await
            {
                Ok(updated) => {
                    tracing::info!(
                        namespace = %key.namespace,
                        name = %key.name,
                        max_attempts = policy.max_attempts,
                        "Processing started"
                    );
                    updated
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(key = %key, "Lost claim race, requeueing");
                    return Ok(ReconcileAction::RequeueAfter(Duration::ZERO));
                }
                Err(StoreError::NotFound(_)) => {
                    self.guard.abandon(key, token, "claim").await;
                    return Ok(ReconcileAction::Abandoned);
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            request
        };

        let plan = self.orchestrator.plan_round(&request, &policy);
        let round = if plan.is_empty() {
            Vec::new()
        } else {
            tracing::info!(
                namespace = %key.namespace,
                name = %key.name,
                targets = plan.len(),
                attempt = plan.iter().map(|p| p.attempt).max().unwrap_or(1),
                "Dispatching delivery round"
            );
            let report = self.orchestrator.dispatch(&request, &plan).await;
            match report.classification {
                RoundClassification::AllSucceeded => tracing::info!(
                    namespace = %key.namespace,
                    name = %key.name,
                    sends = report.attempts.len(),
                    "Round delivered to every target"
                ),
                classification => tracing::warn!(
                    namespace = %key.namespace,
                    name = %key.name,
                    sends = report.attempts.len(),
                    classification = ?classification,
                    "Round had undelivered targets"
                ),
            }
            report.attempts
        };

        self.persist_round(key, token, &round, &policy).await
    }

    /// Write `round` with a bounded number of version-checked attempts.
    ///
    /// If every attempt fails the round is kept for the next pass.
    async fn persist_round(
        &self,
        key: &ObjectKey,
        token: &LeaseToken,
        round: &[DeliveryAttempt],
        policy: &RetryPolicy,
    ) -> Result<ReconcileAction, ReconcileError> {
        let attempts = self.config.status_update_retries.max(1);

        for attempt in 1..=attempts {
            let current = match self.guard.check(key).await {
                Ok(Liveness::Live(request)) => *request,
                Ok(Liveness::Deleting | Liveness::Gone) => {
                    self.guard.abandon(key, token, "persist").await;
                    return Ok(ReconcileAction::Abandoned);
                }
                Err(e) => {
                    tracing::warn!(key = %key, attempt, error = %e, "Status re-read failed");
                    tokio::time::sleep(self.config.persist_retry_delay).await;
                    continue;
                }
            };

            let status = match self.orchestrator.apply_round(&current, round, policy) {
                ApplyOutcome::Updated(status) => status,
                ApplyOutcome::AlreadyFinal | ApplyOutcome::AlreadyRecorded => {
                    tracing::debug!(key = %key, "Round already recorded by another pass");
                    return Ok(self.action_for(&current.status));
                }
            };

            match self
                .store
                .update_status(key, &status, current.metadata.resource_version)
                .await
            {
                Ok(updated) => {
                    tracing::info!(
                        namespace = %key.namespace,
                        name = %key.name,
                        phase = %updated.status.phase,
                        total_attempts = updated.status.total_attempts,
                        successful = updated.status.successful_deliveries,
                        failed = updated.status.failed_deliveries,
                        "Status updated"
                    );
                    return Ok(self.action_for(&updated.status));
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(key = %key, attempt, "Version conflict, re-reading");
                }
                Err(StoreError::NotFound(_)) => {
                    self.guard.abandon(key, token, "persist").await;
                    return Ok(ReconcileAction::Abandoned);
                }
                Err(e) => {
                    tracing::warn!(key = %key, attempt, error = %e, "Status write failed");
                    tokio::time::sleep(self.config.persist_retry_delay).await;
                }
            }
        }

        if !round.is_empty() {
            self.keep_unpersisted(key, round);
        }
        tracing::error!(key = %key, attempts, "Status persistence retries exhausted");
        Err(ReconcileError::PersistRetriesExhausted {
            key: key.clone(),
            attempts,
        })
    }

    fn action_for(&self, status: &DeliveryStatus) -> ReconcileAction {
        if status.phase.is_terminal() {
            return ReconcileAction::Done;
        }
        match status.phase {
            Phase::Retrying => {
                ReconcileAction::RequeueAfter(self.wait_remaining(status).unwrap_or(Duration::ZERO))
            }
            _ => ReconcileAction::RequeueAfter(Duration::ZERO),
        }
    }

    /// Time left until `nextAttemptAt`, or `None` if the round is due.
    fn wait_remaining(&self, status: &DeliveryStatus) -> Option<Duration> {
        let next = status.next_attempt_at?;
        (next - self.orchestrator.now())
            .to_std()
            .ok()
            .filter(|d| !d.is_zero())
    }
}
