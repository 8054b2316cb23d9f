//! Resource store contract for notification requests.
//!
//! The store is a Kubernetes-API-like object store: strongly consistent reads,
//! change notification, and conditional status writes guarded by a version token.
//! The spec of a stored request can never be rewritten; the contract simply has
//! no operation for it.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use courier_common::error::AppError;
use courier_common::types::{DeliveryStatus, NotificationRequest, ObjectKey};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Capacity of the change-notification broadcast channel.
pub(crate) const WATCH_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The supplied version token is stale: someone else wrote first.
    #[error("conflict: {key} was modified concurrently (expected version {expected})")]
    Conflict { key: ObjectKey, expected: u64 },

    #[error("{0} not found")]
    NotFound(ObjectKey),

    #[error("{0} already exists")]
    AlreadyExists(ObjectKey),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => {
                AppError::NotFound(format!("Notification request {key} not found"))
            }
            StoreError::AlreadyExists(key) => {
                AppError::Conflict(format!("Notification request {key} already exists"))
            }
            StoreError::Conflict { .. } => AppError::Conflict(err.to_string()),
            StoreError::Database(e) => AppError::Database(e),
            other => AppError::Store(other.to_string()),
        }
    }
}

/// Change notification emitted by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Created or updated (including being marked for deletion).
    Applied(ObjectKey),
    Deleted(ObjectKey),
}

impl StoreEvent {
    pub fn key(&self) -> &ObjectKey {
        match self {
            StoreEvent::Applied(key) | StoreEvent::Deleted(key) => key,
        }
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Strongly consistent read.
    async fn get(&self, key: &ObjectKey) -> Result<Option<NotificationRequest>, StoreError>;

    async fn list(&self) -> Result<Vec<NotificationRequest>, StoreError>;

    /// Subscribe to change notifications.
    fn watch(&self) -> broadcast::Receiver<StoreEvent>;

    /// Insert a new request. The store assigns the initial version token.
    async fn create(&self, request: NotificationRequest) -> Result<NotificationRequest, StoreError>;

    /// Replace the status if `resource_version` is still current.
    ///
    /// Fails with [`StoreError::Conflict`] when stale and [`StoreError::NotFound`]
    /// when the object no longer exists.
    async fn update_status(
        &self,
        key: &ObjectKey,
        status: &DeliveryStatus,
        resource_version: u64,
    ) -> Result<NotificationRequest, StoreError>;

    /// Remove the object. Returns whether it existed.
    async fn delete(&self, key: &ObjectKey) -> Result<bool, StoreError>;

    /// Set `deletionTimestamp` without removing the object.
    async fn mark_for_deletion(&self, key: &ObjectKey) -> Result<NotificationRequest, StoreError>;
}
