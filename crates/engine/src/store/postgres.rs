//! PostgreSQL-backed resource store.
//!
//! Each row carries its own `resource_version`, bumped on every write. Status writes
//! are a single conditional `UPDATE ... WHERE resource_version = $n`, so a stale
//! writer matches zero rows. Change notification rides on `LISTEN/NOTIFY`; the
//! trigger in the migrations publishes `applied:<ns>/<name>` or `deleted:<ns>/<name>`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use courier_common::types::{
    DeliveryStatus, NotificationRequest, NotificationRequestSpec, ObjectKey, ObjectMeta,
};

use super::{ResourceStore, StoreError, StoreEvent, WATCH_CAPACITY};

/// Postgres channel the notify trigger publishes on.
pub const NOTIFY_CHANNEL: &str = "notification_requests";

const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, sqlx::FromRow)]
struct RequestRow {
    namespace: String,
    name: String,
    uid: Uuid,
    generation: i64,
    resource_version: i64,
    labels: Json<BTreeMap<String, String>>,
    spec: Json<NotificationRequestSpec>,
    status: Json<DeliveryStatus>,
    creation_timestamp: DateTime<Utc>,
    deletion_timestamp: Option<DateTime<Utc>>,
}

impl From<RequestRow> for NotificationRequest {
    fn from(row: RequestRow) -> Self {
        NotificationRequest {
            metadata: ObjectMeta {
                namespace: row.namespace,
                name: row.name,
                uid: row.uid,
                generation: row.generation,
                resource_version: row.resource_version.max(0) as u64,
                creation_timestamp: row.creation_timestamp,
                deletion_timestamp: row.deletion_timestamp,
                labels: row.labels.0,
            },
            spec: row.spec.0,
            status: row.status.0,
        }
    }
}

pub struct PgStore {
    pool: PgPool,
    events: broadcast::Sender<StoreEvent>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self { pool, events }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Forward `NOTIFY` payloads to watchers until the task is aborted.
    ///
    /// A dropped listener connection is re-established after a short delay; events
    /// missed in between are covered by the controller's periodic resync.
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let pool = self.pool.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            loop {
                let mut listener = match PgListener::connect_with(&pool).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to connect change listener");
                        tokio::time::sleep(LISTENER_RETRY_DELAY).await;
                        continue;
                    }
                };
                if let Err(e) = listener.listen(NOTIFY_CHANNEL).await {
                    tracing::warn!(error = %e, channel = NOTIFY_CHANNEL, "LISTEN failed");
                    tokio::time::sleep(LISTENER_RETRY_DELAY).await;
                    continue;
                }
                tracing::info!(channel = NOTIFY_CHANNEL, "Change listener connected");

                loop {
                    match listener.recv().await {
                        Ok(notification) => match parse_event(notification.payload()) {
                            Some(event) => {
                                let _ = events.send(event);
                            }
                            None => {
                                tracing::warn!(
                                    payload = notification.payload(),
                                    "Ignoring malformed change notification"
                                );
                            }
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "Change listener error, reconnecting");
                            break;
                        }
                    }
                }

                tokio::time::sleep(LISTENER_RETRY_DELAY).await;
            }
        })
    }

    async fn exists(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM notification_requests WHERE namespace = $1 AND name = $2)",
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

/// Parse a `<op>:<namespace>/<name>` notify payload.
pub fn parse_event(payload: &str) -> Option<StoreEvent> {
    let (op, object) = payload.split_once(':')?;
    let (namespace, name) = object.split_once('/')?;
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    let key = ObjectKey::new(namespace, name);
    match op {
        "applied" => Some(StoreEvent::Applied(key)),
        "deleted" => Some(StoreEvent::Deleted(key)),
        _ => None,
    }
}

fn version_param(resource_version: u64) -> Result<i64, StoreError> {
    i64::try_from(resource_version)
        .map_err(|_| StoreError::Unavailable(format!("version {resource_version} out of range")))
}

#[async_trait]
impl ResourceStore for PgStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<NotificationRequest>, StoreError> {
        let row: Option<RequestRow> = sqlx::query_as(
            "SELECT * FROM notification_requests WHERE namespace = $1 AND name = $2",
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list(&self) -> Result<Vec<NotificationRequest>, StoreError> {
        let rows: Vec<RequestRow> = sqlx::query_as(
            "SELECT * FROM notification_requests ORDER BY creation_timestamp, namespace, name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    async fn create(&self, request: NotificationRequest) -> Result<NotificationRequest, StoreError> {
        let key = request.key();
        let row: Option<RequestRow> = sqlx::query_as(
            r#"
            INSERT INTO notification_requests
                (namespace, name, uid, generation, resource_version, labels, spec, status, creation_timestamp)
            VALUES ($1, $2, $3, $4, 1, $5, $6, $7, $8)
            ON CONFLICT (namespace, name) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(request.metadata.uid)
        .bind(request.metadata.generation)
        .bind(Json(&request.metadata.labels))
        .bind(Json(&request.spec))
        .bind(Json(&request.status))
        .bind(request.metadata.creation_timestamp)
        .fetch_optional(&self.pool)
        .await?;

        let created: NotificationRequest = row.ok_or(StoreError::AlreadyExists(key))?.into();

        tracing::debug!(key = %created.key(), "Notification request stored");
        Ok(created)
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        status: &DeliveryStatus,
        resource_version: u64,
    ) -> Result<NotificationRequest, StoreError> {
        let row: Option<RequestRow> = sqlx::query_as(
            r#"
            UPDATE notification_requests
            SET status = $3, resource_version = resource_version + 1
            WHERE namespace = $1 AND name = $2 AND resource_version = $4
            RETURNING *
            "#,
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(Json(status))
        .bind(version_param(resource_version)?)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None if self.exists(key).await? => Err(StoreError::Conflict {
                key: key.clone(),
                expected: resource_version,
            }),
            None => Err(StoreError::NotFound(key.clone())),
        }
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM notification_requests WHERE namespace = $1 AND name = $2")
                .bind(&key.namespace)
                .bind(&key.name)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_for_deletion(&self, key: &ObjectKey) -> Result<NotificationRequest, StoreError> {
        let row: Option<RequestRow> = sqlx::query_as(
            r#"
            UPDATE notification_requests
            SET deletion_timestamp = COALESCE(deletion_timestamp, NOW()),
                resource_version = CASE
                    WHEN deletion_timestamp IS NULL THEN resource_version + 1
                    ELSE resource_version
                END
            WHERE namespace = $1 AND name = $2
            RETURNING *
            "#,
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into)
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }
}
