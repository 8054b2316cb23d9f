//! Retry orchestrator — the delivery state machine.
//!
//! `Pending -> Sending -> {Sent | PartiallySent | Failed}`, with `Retrying` re-entered
//! after every round that leaves a retryable target with attempts to spare.
//!
//! The orchestrator never writes to the store. [`RetryOrchestrator::apply_round`]
//! folds a finished round into a status snapshot and can be re-run against a fresh
//! snapshot after a version conflict without sending anything twice.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use courier_common::types::{
    DeliveryAttempt, DeliveryOutcome, DeliveryStatus, NotificationRequest, NotificationRequestSpec,
    Phase, RetryPolicy,
};
use courier_notifier::DeliveryMessage;

use crate::backoff::BackoffPolicy;
use crate::clock::Clock;
use crate::dispatcher::{DeliveryDispatcher, DeliveryTarget, PlannedAttempt, RoundReport, resolve_targets};

pub const REASON_PROCESSING_STARTED: &str = "ProcessingStarted";
pub const REASON_RETRY_SCHEDULED: &str = "RetryScheduled";
pub const REASON_ALL_SUCCEEDED: &str = "AllDeliveriesSucceeded";
pub const REASON_PARTIAL_FAILURE: &str = "PartialDeliveryFailure";
pub const REASON_ALL_FAILED: &str = "AllDeliveriesFailed";
pub const REASON_NO_TARGETS: &str = "NoDeliveryTargets";

/// Result of folding a round into a status snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// New status to persist.
    Updated(DeliveryStatus),
    /// The snapshot is already terminal; leave it alone.
    AlreadyFinal,
    /// Every attempt of the round is already recorded in the snapshot.
    AlreadyRecorded,
}

pub struct RetryOrchestrator {
    dispatcher: DeliveryDispatcher,
    backoff: BackoffPolicy,
    default_policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl RetryOrchestrator {
    pub fn new(
        dispatcher: DeliveryDispatcher,
        backoff: BackoffPolicy,
        default_policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dispatcher,
            backoff,
            default_policy,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Request override if present, else the controller default, clamped to bounds.
    pub fn resolve_policy(&self, spec: &NotificationRequestSpec) -> RetryPolicy {
        spec.retry_policy.unwrap_or(self.default_policy).clamped()
    }

    /// Status for the `Pending -> Sending` claim.
    pub fn begin(&self, request: &NotificationRequest) -> DeliveryStatus {
        let now = self.clock.now();
        let targets = resolve_targets(&request.spec).len();

        let mut status = request.status.clone();
        status.phase = Phase::Sending;
        status
            .queued_at
            .get_or_insert(request.metadata.creation_timestamp);
        status.processing_started_at = Some(now);
        status.next_attempt_at = None;
        status.observed_generation = request.metadata.generation;
        status.reason = Some(REASON_PROCESSING_STARTED.to_string());
        status.message = Some(format!("Delivering to {targets} target(s)"));
        status
    }

    /// Targets that still need a send, with their next attempt numbers.
    ///
    /// Skips targets that already succeeded, whose last outcome was `invalid`, or
    /// that used up `max_attempts`.
    pub fn plan_round(&self, request: &NotificationRequest, policy: &RetryPolicy) -> Vec<PlannedAttempt> {
        let status = &request.status;
        resolve_targets(&request.spec)
            .into_iter()
            .filter_map(|target| {
                let address = target.address.as_deref();
                if status.has_succeeded(target.channel, address) {
                    return None;
                }
                let made = status.attempts_for(target.channel, address);
                if made >= policy.max_attempts {
                    return None;
                }
                match status.last_attempt_for(target.channel, address) {
                    Some(last) if !last.status.is_retryable() => None,
                    _ => Some(PlannedAttempt {
                        target,
                        attempt: made + 1,
                    }),
                }
            })
            .collect()
    }

    pub async fn dispatch(&self, request: &NotificationRequest, plan: &[PlannedAttempt]) -> RoundReport {
        let message = DeliveryMessage::from_request(request);
        self.dispatcher.dispatch(&message, plan).await
    }

    /// Fold `round` into `request.status` and decide the next phase.
    ///
    /// Attempts whose `(channel, target, attempt)` is already present are dropped, so
    /// applying the same round to a snapshot that already contains it is a no-op.
    pub fn apply_round(
        &self,
        request: &NotificationRequest,
        round: &[DeliveryAttempt],
        policy: &RetryPolicy,
    ) -> ApplyOutcome {
        let previous = request.status.phase;
        if previous.is_terminal() {
            return ApplyOutcome::AlreadyFinal;
        }

        let mut status = request.status.clone();
        let fresh: Vec<&DeliveryAttempt> = round
            .iter()
            .filter(|a| {
                !status.delivery_attempts.iter().any(|existing| {
                    existing.is_for(a.channel, a.target.as_deref()) && existing.attempt == a.attempt
                })
            })
            .collect();
        if !round.is_empty() && fresh.is_empty() {
            return ApplyOutcome::AlreadyRecorded;
        }

        let mut floor = status.delivery_attempts.last().map(|a| a.timestamp);
        for attempt in fresh {
            let mut attempt = attempt.clone();
            if let Some(floor) = floor {
                attempt.timestamp = attempt.timestamp.max(floor);
            }
            floor = Some(attempt.timestamp);
            status.delivery_attempts.push(attempt);
        }
        status.recount();

        let now = floor.map_or(self.clock.now(), |f| f.max(self.clock.now()));
        let targets = resolve_targets(&request.spec);
        self.decide(&mut status, &targets, policy, now);
        status.observed_generation = request.metadata.generation;

        debug_assert!(
            previous.can_transition_to(status.phase),
            "phase regression {previous} -> {}",
            status.phase
        );
        ApplyOutcome::Updated(status)
    }

    fn decide(
        &self,
        status: &mut DeliveryStatus,
        targets: &[DeliveryTarget],
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) {
        if targets.is_empty() {
            finish(status, Phase::Failed, REASON_NO_TARGETS, "Request resolved to no delivery targets".to_string(), now);
            return;
        }

        let mut succeeded = 0usize;
        let mut retry_attempt: Option<u32> = None;
        for target in targets {
            let address = target.address.as_deref();
            if status.has_succeeded(target.channel, address) {
                succeeded += 1;
                continue;
            }
            let made = status.attempts_for(target.channel, address);
            let retryable = status
                .last_attempt_for(target.channel, address)
                .is_none_or(|last| last.status.is_retryable());
            if retryable && made < policy.max_attempts {
                retry_attempt = Some(retry_attempt.map_or(made, |a| a.max(made)));
            }
        }

        let total = targets.len();
        if succeeded == total {
            finish(
                status,
                Phase::Sent,
                REASON_ALL_SUCCEEDED,
                format!("Delivered to all {total} target(s)"),
                now,
            );
            return;
        }

        if let Some(attempt) = retry_attempt {
            let delay = self.backoff.next_delay(attempt, policy);
            let next = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
            let pending = total - succeeded - self.exhausted(status, targets, policy);
            status.phase = Phase::Retrying;
            status.next_attempt_at = Some(next);
            status.reason = Some(REASON_RETRY_SCHEDULED.to_string());
            status.message = Some(format!(
                "{pending} of {total} target(s) pending, next round in {}s",
                delay.as_secs()
            ));
            return;
        }

        if succeeded > 0 {
            finish(
                status,
                Phase::PartiallySent,
                REASON_PARTIAL_FAILURE,
                format!("Delivered to {succeeded} of {total} target(s)"),
                now,
            );
        } else {
            finish(
                status,
                Phase::Failed,
                REASON_ALL_FAILED,
                format!("Delivery failed for all {total} target(s)"),
                now,
            );
        }
    }

    /// Unsucceeded targets that will not be retried.
    fn exhausted(&self, status: &DeliveryStatus, targets: &[DeliveryTarget], policy: &RetryPolicy) -> usize {
        targets
            .iter()
            .filter(|t| {
                let address = t.address.as_deref();
                if status.has_succeeded(t.channel, address) {
                    return false;
                }
                let made = status.attempts_for(t.channel, address);
                let last = status.last_attempt_for(t.channel, address);
                made >= policy.max_attempts
                    || last.is_some_and(|a| a.status == DeliveryOutcome::Invalid)
            })
            .count()
    }
}

fn finish(status: &mut DeliveryStatus, phase: Phase, reason: &str, message: String, now: DateTime<Utc>) {
    status.phase = phase;
    status.completion_time = Some(now);
    status.next_attempt_at = None;
    status.reason = Some(reason.to_string());
    status.message = Some(message);
}
