//! Notification request routes.
//!
//! Creating a request is the only way to submit work; deleting it is the only way
//! to cancel. The spec is never updated through the API.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use courier_common::error::AppError;
use courier_common::types::{NotificationRequest, NotificationRequestSpec, ObjectKey, Phase};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/notifications",
            get(list_notifications).post(create_notification),
        )
        .route(
            "/api/notifications/{namespace}/{name}",
            get(get_notification).delete(delete_notification),
        )
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationParams {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub spec: NotificationRequestSpec,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub namespace: Option<String>,
    pub phase: Option<String>,
}

/// Kubernetes-style object name check (RFC 1123 subdomain, at most `max` chars).
fn validate_name(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let alnum_edges = value.starts_with(|c: char| c.is_ascii_alphanumeric())
        && value.ends_with(|c: char| c.is_ascii_alphanumeric());

    if value.is_empty() || value.len() > max || !valid_chars || !alnum_edges {
        return Err(AppError::Validation(format!(
            "{field} '{value}' must be 1-{max} lowercase alphanumerics, '-' or '.', \
             starting and ending with an alphanumeric"
        )));
    }
    Ok(())
}

/// POST /api/notifications — Submit a new notification request.
async fn create_notification(
    State(state): State<AppState>,
    Json(params): Json<CreateNotificationParams>,
) -> Result<(StatusCode, Json<NotificationRequest>), AppError> {
    validate_name("namespace", &params.namespace, 63)?;
    validate_name("name", &params.name, 253)?;
    params.spec.validate()?;

    let key = ObjectKey::new(params.namespace, params.name);
    let request = NotificationRequest::new(key, params.spec, params.labels, Utc::now());
    let created = state.store.create(request).await?;

    tracing::info!(
        namespace = %created.metadata.namespace,
        name = %created.metadata.name,
        uid = %created.metadata.uid,
        channels = created.spec.channels.len(),
        priority = %created.spec.priority,
        "Notification request created"
    );

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/notifications — List requests, optionally filtered by namespace and phase.
async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<NotificationRequest>>, AppError> {
    let phase: Option<Phase> = params.phase.as_deref().map(str::parse).transpose()?;

    let requests = state
        .store
        .list()
        .await?
        .into_iter()
        .filter(|r| {
            params
                .namespace
                .as_deref()
                .is_none_or(|ns| r.metadata.namespace == ns)
        })
        .filter(|r| phase.is_none_or(|p| r.status.phase == p))
        .collect();

    Ok(Json(requests))
}

/// GET /api/notifications/{namespace}/{name} — Fetch one request with its status.
async fn get_notification(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<NotificationRequest>, AppError> {
    let key = ObjectKey::new(namespace, name);
    let request = state
        .store
        .get(&key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Notification request {key} not found")))?;

    Ok(Json(request))
}

/// DELETE /api/notifications/{namespace}/{name} — Cancel and remove a request.
///
/// The request is marked for deletion first so an in-flight pass observes the
/// cancellation, then removed.
async fn delete_notification(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let key = ObjectKey::new(namespace, name);
    let marked = state.store.mark_for_deletion(&key).await?;
    let deleted = state.store.delete(&key).await?;

    tracing::info!(
        namespace = %key.namespace,
        name = %key.name,
        phase = %marked.status.phase,
        "Notification request deleted"
    );

    Ok(Json(serde_json::json!({
        "deleted": deleted,
        "phase": marked.status.phase,
    })))
}
