//! Liveness and store readiness.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use courier_common::types::ObjectKey;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Reports `503` when the resource store cannot serve a read.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let probe = ObjectKey::new("courier-system", "health-probe");
    let (code, store) = match state.store.get(&probe).await {
        Ok(_) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "Store health probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };

    (
        code,
        Json(json!({
            "status": if code.is_success() { "ok" } else { "degraded" },
            "service": "courier-api",
            "store": store,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}
