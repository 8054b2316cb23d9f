//! Reconciliation and delivery engine for notification requests.
//!
//! Control flow is leaf-first: [`reconciler::StatusReconciler`] drives
//! [`orchestrator::RetryOrchestrator`], which runs rounds through
//! [`dispatcher::DeliveryDispatcher`] and schedules retries with
//! [`backoff::BackoffPolicy`].

pub mod backoff;
pub mod clock;
pub mod dispatcher;
pub mod lease;
pub mod lifecycle;
pub mod orchestrator;
pub mod reconciler;
pub mod store;

pub use reconciler::{ReconcileAction, ReconcileError, StatusReconciler};
pub use store::{ResourceStore, StoreError, StoreEvent};
