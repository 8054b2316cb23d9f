//! Delivery dispatcher — runs one round of sends and classifies the result.
//!
//! Targets are resolved from the spec as `(channel, address?)` pairs. A round sends
//! to a planned subset of them through the [`ChannelRegistry`], at most
//! `max_concurrency` at a time, each send bounded by the per-channel timeout and the
//! whole round bounded by the per-round deadline.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::stream::{self, StreamExt};

use courier_common::config::AppConfig;
use courier_common::types::{
    Channel, DeliveryAttempt, DeliveryOutcome, NotificationRequestSpec,
};
use courier_notifier::{ChannelAdapter, ChannelRegistry, DeliveryMessage, SendResult};

use crate::clock::Clock;

/// A resolved `(channel, address?)` pair. `None` means the adapter's default destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTarget {
    pub channel: Channel,
    pub address: Option<String>,
}

impl DeliveryTarget {
    pub fn new(channel: Channel, address: Option<String>) -> Self {
        Self { channel, address }
    }
}

impl std::fmt::Display for DeliveryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.address {
            Some(address) => write!(f, "{}:{}", self.channel, address),
            None => write!(f, "{}", self.channel),
        }
    }
}

/// Expand a spec into its delivery targets.
///
/// One target per distinct recipient address on each requested channel; a channel
/// with no addressed recipient gets a single default target.
pub fn resolve_targets(spec: &NotificationRequestSpec) -> Vec<DeliveryTarget> {
    let mut targets = Vec::new();
    for channel in spec.unique_channels() {
        let mut addresses: Vec<&str> = Vec::new();
        for recipient in &spec.recipients {
            if let Some(address) = recipient.address_for(channel) {
                if !addresses.contains(&address) {
                    addresses.push(address);
                }
            }
        }

        if addresses.is_empty() {
            targets.push(DeliveryTarget::new(channel, None));
        } else {
            targets.extend(
                addresses
                    .into_iter()
                    .map(|a| DeliveryTarget::new(channel, Some(a.to_string()))),
            );
        }
    }
    targets
}

/// One send scheduled for this round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAttempt {
    pub target: DeliveryTarget,
    /// 1-based attempt number for this target.
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundClassification {
    AllSucceeded,
    /// Some sends succeeded and some did not.
    Partial,
    /// Nothing in the round succeeded.
    AllFailed,
}

impl RoundClassification {
    pub fn classify(attempts: &[DeliveryAttempt]) -> Self {
        let succeeded = attempts
            .iter()
            .filter(|a| a.status == DeliveryOutcome::Success)
            .count();
        if succeeded == 0 {
            RoundClassification::AllFailed
        } else if succeeded == attempts.len() {
            RoundClassification::AllSucceeded
        } else {
            RoundClassification::Partial
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoundReport {
    /// Attempt records in completion order.
    pub attempts: Vec<DeliveryAttempt>,
    pub classification: RoundClassification,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub channel_timeout: Duration,
    pub round_timeout: Duration,
    pub max_concurrency: usize,
}

impl DispatcherConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            channel_timeout: Duration::from_secs(config.channel_timeout_secs),
            round_timeout: Duration::from_secs(config.round_timeout_secs),
            max_concurrency: config.dispatch_concurrency,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            channel_timeout: Duration::from_secs(10),
            round_timeout: Duration::from_secs(60),
            max_concurrency: 8,
        }
    }
}

pub struct DeliveryDispatcher {
    registry: ChannelRegistry,
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
}

impl DeliveryDispatcher {
    pub fn new(registry: ChannelRegistry, config: DispatcherConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            config,
            clock,
        }
    }

    /// Send every planned attempt and collect the classified records.
    ///
    /// Sends still running when the round deadline passes are dropped and
    /// recorded as `timeout`.
    pub async fn dispatch(&self, message: &DeliveryMessage, plan: &[PlannedAttempt]) -> RoundReport {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.round_timeout;
        let mut finished: Vec<bool> = vec![false; plan.len()];
        let mut attempts: Vec<DeliveryAttempt> = Vec::with_capacity(plan.len());

        // Each send owns its inputs so the round future stays `Send`.
        let shared = Arc::new(message.clone());
        let pending: Vec<_> = plan
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, planned)| {
                let adapter = self.registry.get(planned.target.channel);
                let message = Arc::clone(&shared);
                let timeout = self.config.channel_timeout;
                async move {
                    let result = send_one(adapter, &planned.target, &message, timeout).await;
                    (index, planned, result)
                }
            })
            .collect();

        let sends = stream::iter(pending).buffer_unordered(self.config.max_concurrency.max(1));
        let mut sends = std::pin::pin!(sends);

        let collect = async {
            while let Some((index, planned, result)) = sends.next().await {
                finished[index] = true;
                attempts.push(self.record(&planned, result));
            }
        };
        let timed_out = tokio::time::timeout_at(deadline, collect).await.is_err();
        if timed_out {
            tracing::warn!(
                namespace = %message.namespace,
                name = %message.name,
                unfinished = finished.iter().filter(|f| !**f).count(),
                round_timeout_secs = self.config.round_timeout.as_secs(),
                "Delivery round deadline reached"
            );
        }

        for (planned, _) in plan.iter().zip(&finished).filter(|(_, done)| !**done) {
            let result = SendResult::timeout("round deadline exceeded", started.elapsed());
            attempts.push(self.record(planned, result));
        }

        let classification = RoundClassification::classify(&attempts);
        tracing::debug!(
            namespace = %message.namespace,
            name = %message.name,
            sends = attempts.len(),
            classification = ?classification,
            "Delivery round complete"
        );

        RoundReport {
            attempts,
            classification,
        }
    }

    fn record(&self, planned: &PlannedAttempt, result: SendResult) -> DeliveryAttempt {
        let target = &planned.target;
        match result.outcome {
            DeliveryOutcome::Success => tracing::info!(
                destination = %target,
                attempt = planned.attempt,
                duration_ms = result.duration.as_millis() as u64,
                "Delivered"
            ),
            outcome => tracing::warn!(
                destination = %target,
                attempt = planned.attempt,
                outcome = %outcome,
                error = result.error.as_deref().unwrap_or(""),
                "Delivery attempt failed"
            ),
        }

        DeliveryAttempt {
            channel: target.channel,
            target: target.address.clone(),
            attempt: planned.attempt,
            timestamp: self.clock.now(),
            status: result.outcome,
            error: result.error,
            duration_seconds: result.duration.as_secs_f64(),
        }
    }
}

/// One bounded send. Panics and timeouts become classified results.
async fn send_one(
    adapter: Option<Arc<dyn ChannelAdapter>>,
    target: &DeliveryTarget,
    message: &DeliveryMessage,
    timeout: Duration,
) -> SendResult {
    let Some(adapter) = adapter else {
        return SendResult::invalid(
            format!("no adapter registered for channel {}", target.channel),
            Duration::ZERO,
        );
    };

    let started = Instant::now();
    let send = AssertUnwindSafe(adapter.send(target.address.as_deref(), message, timeout))
        .catch_unwind();

    match tokio::time::timeout(timeout, send).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => {
            tracing::error!(destination = %target, "Channel adapter panicked");
            SendResult::failed("adapter panicked", started.elapsed())
        }
        Err(_) => SendResult::timeout(
            format!("no response within {}s", timeout.as_secs_f64()),
            started.elapsed(),
        ),
    }
}
