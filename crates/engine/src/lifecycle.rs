//! Resource lifecycle guard.
//!
//! Deletion is the only cancellation signal. The guard is consulted before a round
//! and before every status write; once the object is gone or marked for deletion the
//! pass is abandoned without writing and the request's lease is let go.

use std::sync::Arc;

use courier_common::types::{NotificationRequest, ObjectKey};

use crate::lease::{LeaseToken, RequestLease};
use crate::store::{ResourceStore, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum Liveness {
    Live(Box<NotificationRequest>),
    /// Still stored but carries a `deletionTimestamp`.
    Deleting,
    Gone,
}

pub struct LifecycleGuard {
    store: Arc<dyn ResourceStore>,
    lease: Arc<dyn RequestLease>,
}

impl LifecycleGuard {
    pub fn new(store: Arc<dyn ResourceStore>, lease: Arc<dyn RequestLease>) -> Self {
        Self { store, lease }
    }

    /// Fresh read of `key`.
    pub async fn check(&self, key: &ObjectKey) -> Result<Liveness, StoreError> {
        Ok(match self.store.get(key).await? {
            None => Liveness::Gone,
            Some(request) if request.is_being_deleted() => Liveness::Deleting,
            Some(request) => Liveness::Live(Box::new(request)),
        })
    }

    /// Drop in-flight work for `key` and give back the lease held under `token`.
    /// Never fails.
    pub async fn abandon(&self, key: &ObjectKey, token: &LeaseToken, stage: &str) {
        tracing::info!(
            namespace = %key.namespace,
            name = %key.name,
            stage,
            "Request deleted, abandoning in-flight work"
        );
        if let Err(e) = self.lease.release(key, token).await {
            tracing::warn!(key = %key, error = %e, "Failed to release lease");
        }
    }
}
