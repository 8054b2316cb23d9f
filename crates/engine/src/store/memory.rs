//! In-memory resource store for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};

use courier_common::types::{DeliveryStatus, NotificationRequest, ObjectKey};

use super::{ResourceStore, StoreError, StoreEvent, WATCH_CAPACITY};

/// Hash-map backed store with a single global version counter.
pub struct InMemoryStore {
    objects: RwLock<HashMap<ObjectKey, NotificationRequest>>,
    /// Last issued version token; guarded by the `objects` write lock.
    version: RwLock<u64>,
    events: broadcast::Sender<StoreEvent>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: RwLock::new(HashMap::new()),
            version: RwLock::new(0),
            events,
        }
    }

    async fn next_version(&self) -> u64 {
        let mut version = self.version.write().await;
        *version += 1;
        *version
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<NotificationRequest>, StoreError> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<NotificationRequest>, StoreError> {
        let mut all: Vec<NotificationRequest> =
            self.objects.read().await.values().cloned().collect();
        all.sort_by(|a, b| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
                .then_with(|| a.key().cmp(&b.key()))
        });
        Ok(all)
    }

    fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    async fn create(&self, mut request: NotificationRequest) -> Result<NotificationRequest, StoreError> {
        let key = request.key();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }

        request.metadata.resource_version = self.next_version().await;
        objects.insert(key.clone(), request.clone());
        drop(objects);

        self.notify(StoreEvent::Applied(key));
        Ok(request)
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        status: &DeliveryStatus,
        resource_version: u64,
    ) -> Result<NotificationRequest, StoreError> {
        let mut objects = self.objects.write().await;
        let Some(current) = objects.get_mut(key) else {
            return Err(StoreError::NotFound(key.clone()));
        };
        if current.metadata.resource_version != resource_version {
            return Err(StoreError::Conflict {
                key: key.clone(),
                expected: resource_version,
            });
        }

        current.status = status.clone();
        current.metadata.resource_version = self.next_version().await;
        let updated = current.clone();
        drop(objects);

        self.notify(StoreEvent::Applied(key.clone()));
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        let removed = self.objects.write().await.remove(key).is_some();
        if removed {
            self.notify(StoreEvent::Deleted(key.clone()));
        }
        Ok(removed)
    }

    async fn mark_for_deletion(&self, key: &ObjectKey) -> Result<NotificationRequest, StoreError> {
        let mut objects = self.objects.write().await;
        let Some(current) = objects.get_mut(key) else {
            return Err(StoreError::NotFound(key.clone()));
        };
        if current.metadata.deletion_timestamp.is_none() {
            current.metadata.deletion_timestamp = Some(Utc::now());
            current.metadata.resource_version = self.next_version().await;
        }
        let updated = current.clone();
        drop(objects);

        self.notify(StoreEvent::Applied(key.clone()));
        Ok(updated)
    }
}
