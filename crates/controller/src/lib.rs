pub mod queue;
pub mod retention;
pub mod watcher;
pub mod worker;

use std::sync::Arc;

use courier_common::config::AppConfig;
use courier_engine::backoff::BackoffPolicy;
use courier_engine::clock::Clock;
use courier_engine::dispatcher::{DeliveryDispatcher, DispatcherConfig};
use courier_engine::lease::RequestLease;
use courier_engine::orchestrator::RetryOrchestrator;
use courier_engine::reconciler::ReconcilerConfig;
use courier_engine::{ResourceStore, StatusReconciler};
use courier_notifier::ChannelRegistry;

/// Wire the engine together from configuration.
pub fn build_reconciler(
    config: &AppConfig,
    store: Arc<dyn ResourceStore>,
    lease: Arc<dyn RequestLease>,
    registry: ChannelRegistry,
    clock: Arc<dyn Clock>,
) -> StatusReconciler {
    let dispatcher = DeliveryDispatcher::new(
        registry,
        DispatcherConfig::from_app_config(config),
        clock.clone(),
    );
    let orchestrator = RetryOrchestrator::new(
        dispatcher,
        BackoffPolicy::new(),
        config.default_retry_policy,
        clock,
    );
    StatusReconciler::new(store, lease, orchestrator, ReconcilerConfig::from_app_config(config))
}
