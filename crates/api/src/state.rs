//! Shared application state for the Axum API server.

use std::sync::Arc;

use courier_common::config::AppConfig;
use courier_engine::ResourceStore;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ResourceStore>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn ResourceStore>, config: AppConfig) -> Self {
        Self { store, config }
    }
}
