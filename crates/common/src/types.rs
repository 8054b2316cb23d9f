use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Namespaced name identifying a notification request in the resource store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kind of notification carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationType {
    Escalation,
    Simple,
    StatusUpdate,
    Approval,
    ManualReview,
    Completion,
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationType::Escalation => write!(f, "escalation"),
            NotificationType::Simple => write!(f, "simple"),
            NotificationType::StatusUpdate => write!(f, "status-update"),
            NotificationType::Approval => write!(f, "approval"),
            NotificationType::ManualReview => write!(f, "manual-review"),
            NotificationType::Completion => write!(f, "completion"),
        }
    }
}

/// Notification priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Delivery channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Slack,
    Teams,
    Sms,
    Webhook,
    Console,
    File,
    Log,
}

impl Channel {
    pub const ALL: [Channel; 8] = [
        Channel::Email,
        Channel::Slack,
        Channel::Teams,
        Channel::Sms,
        Channel::Webhook,
        Channel::Console,
        Channel::File,
        Channel::Log,
    ];
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::Slack => write!(f, "slack"),
            Channel::Teams => write!(f, "teams"),
            Channel::Sms => write!(f, "sms"),
            Channel::Webhook => write!(f, "webhook"),
            Channel::Console => write!(f, "console"),
            Channel::File => write!(f, "file"),
            Channel::Log => write!(f, "log"),
        }
    }
}

/// A notification recipient. Names at most one channel-specific address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teams: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Recipient {
    /// The address this recipient carries for `channel`, if any.
    pub fn address_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => self.email.as_deref(),
            Channel::Slack => self.slack.as_deref(),
            Channel::Teams => self.teams.as_deref(),
            Channel::Sms => self.phone.as_deref(),
            Channel::Webhook => self.webhook_url.as_deref(),
            Channel::Console | Channel::File | Channel::Log => None,
        }
    }

    fn address_count(&self) -> usize {
        [
            &self.email,
            &self.slack,
            &self.teams,
            &self.phone,
            &self.webhook_url,
        ]
        .iter()
        .filter(|a| a.is_some())
        .count()
    }
}

/// External action link attached to a notification (runbook, dashboard, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLink {
    pub service: String,
    pub url: String,
    #[serde(default)]
    pub label: String,
}

impl ActionLink {
    /// The label to show, falling back to the service name.
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.service
        } else {
            &self.label
        }
    }
}

/// Retry configuration resolved once per request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_seconds")]
    pub initial_backoff_seconds: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff_seconds() -> u64 {
    30
}
fn default_backoff_multiplier() -> u32 {
    2
}
fn default_max_backoff_seconds() -> u64 {
    480
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_seconds: default_initial_backoff_seconds(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_seconds: default_max_backoff_seconds(),
        }
    }
}

impl RetryPolicy {
    pub const MAX_ATTEMPTS_RANGE: (u32, u32) = (1, 10);
    pub const INITIAL_BACKOFF_RANGE: (u64, u64) = (1, 300);
    pub const MULTIPLIER_RANGE: (u32, u32) = (1, 10);
    pub const MAX_BACKOFF_RANGE: (u64, u64) = (60, 3600);

    /// Reject values outside the documented bounds.
    pub fn validate(&self) -> Result<(), AppError> {
        fn check<T: PartialOrd + std::fmt::Display>(
            field: &str,
            value: T,
            (min, max): (T, T),
        ) -> Result<(), AppError> {
            if value < min || value > max {
                return Err(AppError::Validation(format!(
                    "retryPolicy.{field} must be between {min} and {max}, got {value}"
                )));
            }
            Ok(())
        }

        check("maxAttempts", self.max_attempts, Self::MAX_ATTEMPTS_RANGE)?;
        check(
            "initialBackoffSeconds",
            self.initial_backoff_seconds,
            Self::INITIAL_BACKOFF_RANGE,
        )?;
        check(
            "backoffMultiplier",
            self.backoff_multiplier,
            Self::MULTIPLIER_RANGE,
        )?;
        check(
            "maxBackoffSeconds",
            self.max_backoff_seconds,
            Self::MAX_BACKOFF_RANGE,
        )?;
        Ok(())
    }

    /// Force every field into its bounds.
    pub fn clamped(self) -> Self {
        Self {
            max_attempts: self
                .max_attempts
                .clamp(Self::MAX_ATTEMPTS_RANGE.0, Self::MAX_ATTEMPTS_RANGE.1),
            initial_backoff_seconds: self
                .initial_backoff_seconds
                .clamp(Self::INITIAL_BACKOFF_RANGE.0, Self::INITIAL_BACKOFF_RANGE.1),
            backoff_multiplier: self
                .backoff_multiplier
                .clamp(Self::MULTIPLIER_RANGE.0, Self::MULTIPLIER_RANGE.1),
            max_backoff_seconds: self
                .max_backoff_seconds
                .clamp(Self::MAX_BACKOFF_RANGE.0, Self::MAX_BACKOFF_RANGE.1),
        }
    }
}

fn default_retention_days() -> u32 {
    7
}

/// Immutable specification of a notification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequestSpec {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub priority: Priority,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
    pub subject: String,
    pub body: String,
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub action_links: Vec<ActionLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl NotificationRequestSpec {
    /// Validate the spec before it is admitted to the store.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.subject.trim().is_empty() {
            return Err(AppError::Validation("subject must not be empty".to_string()));
        }
        if self.body.trim().is_empty() {
            return Err(AppError::Validation("body must not be empty".to_string()));
        }
        if self.channels.is_empty() {
            return Err(AppError::Validation(
                "at least one delivery channel is required".to_string(),
            ));
        }
        for (i, recipient) in self.recipients.iter().enumerate() {
            if recipient.address_count() > 1 {
                return Err(AppError::Validation(format!(
                    "recipients[{i}] must name at most one address"
                )));
            }
        }
        if !(1..=365).contains(&self.retention_days) {
            return Err(AppError::Validation(format!(
                "retentionDays must be between 1 and 365, got {}",
                self.retention_days
            )));
        }
        if let Some(policy) = &self.retry_policy {
            policy.validate()?;
        }
        Ok(())
    }

    /// Requested channels with duplicates removed, in request order.
    pub fn unique_channels(&self) -> Vec<Channel> {
        let mut seen = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            if !seen.contains(channel) {
                seen.push(*channel);
            }
        }
        seen
    }
}

/// Coarse lifecycle state of a request's delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Pending,
    Sending,
    Retrying,
    Sent,
    PartiallySent,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Sent | Phase::PartiallySent | Phase::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Phase::Pending => 0,
            Phase::Sending | Phase::Retrying => 1,
            Phase::Sent | Phase::PartiallySent | Phase::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the phase moving forward.
    ///
    /// `Sending -> Retrying` and `Retrying -> Retrying` are the only same-rank moves.
    pub fn can_transition_to(&self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Phase::Sending, Phase::Retrying) | (Phase::Retrying, Phase::Retrying) => true,
            (current, next) => next.rank() > current.rank(),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Pending => write!(f, "Pending"),
            Phase::Sending => write!(f, "Sending"),
            Phase::Retrying => write!(f, "Retrying"),
            Phase::Sent => write!(f, "Sent"),
            Phase::PartiallySent => write!(f, "PartiallySent"),
            Phase::Failed => write!(f, "Failed"),
        }
    }
}

impl std::str::FromStr for Phase {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Phase::Pending),
            "Sending" => Ok(Phase::Sending),
            "Retrying" => Ok(Phase::Retrying),
            "Sent" => Ok(Phase::Sent),
            "PartiallySent" => Ok(Phase::PartiallySent),
            "Failed" => Ok(Phase::Failed),
            other => Err(AppError::Validation(format!("Invalid phase '{other}'"))),
        }
    }
}

/// Classified outcome of a single send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Success,
    Failed,
    Timeout,
    Invalid,
}

impl DeliveryOutcome {
    /// `failed` and `timeout` may succeed on a later round; `invalid` never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryOutcome::Failed | DeliveryOutcome::Timeout)
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryOutcome::Success => write!(f, "success"),
            DeliveryOutcome::Failed => write!(f, "failed"),
            DeliveryOutcome::Timeout => write!(f, "timeout"),
            DeliveryOutcome::Invalid => write!(f, "invalid"),
        }
    }
}

/// One recorded send to one target. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub status: DeliveryOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_seconds: f64,
}

impl DeliveryAttempt {
    /// True if this attempt was made against `(channel, target)`.
    pub fn is_for(&self, channel: Channel, target: Option<&str>) -> bool {
        self.channel == channel && self.target.as_deref() == target
    }
}

/// Controller-owned delivery status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub delivery_attempts: Vec<DeliveryAttempt>,
    #[serde(default)]
    pub total_attempts: u32,
    #[serde(default)]
    pub successful_deliveries: u32,
    #[serde(default)]
    pub failed_deliveries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DeliveryStatus {
    /// Recompute the aggregate counters from the attempt list.
    pub fn recount(&mut self) {
        let successful = self
            .delivery_attempts
            .iter()
            .filter(|a| a.status == DeliveryOutcome::Success)
            .count() as u32;
        self.total_attempts = self.delivery_attempts.len() as u32;
        self.successful_deliveries = successful;
        self.failed_deliveries = self.total_attempts - successful;
    }

    /// Number of attempts already recorded for `(channel, target)`.
    pub fn attempts_for(&self, channel: Channel, target: Option<&str>) -> u32 {
        self.delivery_attempts
            .iter()
            .filter(|a| a.is_for(channel, target))
            .count() as u32
    }

    /// Latest recorded attempt for `(channel, target)`.
    pub fn last_attempt_for(&self, channel: Channel, target: Option<&str>) -> Option<&DeliveryAttempt> {
        self.delivery_attempts
            .iter()
            .rev()
            .find(|a| a.is_for(channel, target))
    }

    /// Whether any attempt for `(channel, target)` succeeded.
    pub fn has_succeeded(&self, channel: Channel, target: Option<&str>) -> bool {
        self.delivery_attempts
            .iter()
            .any(|a| a.is_for(channel, target) && a.status == DeliveryOutcome::Success)
    }
}

/// Object metadata, modelled after Kubernetes `ObjectMeta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    pub uid: Uuid,
    pub generation: i64,
    /// Version token bumped by the store on every write.
    pub resource_version: u64,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A notification request resource: metadata, immutable spec, controller-owned status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub metadata: ObjectMeta,
    pub spec: NotificationRequestSpec,
    #[serde(default)]
    pub status: DeliveryStatus,
}

impl NotificationRequest {
    /// Build a fresh, not-yet-stored request. The store assigns the version token.
    pub fn new(
        key: ObjectKey,
        spec: NotificationRequestSpec,
        labels: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            metadata: ObjectMeta {
                namespace: key.namespace,
                name: key.name,
                uid: Uuid::new_v4(),
                generation: 1,
                resource_version: 0,
                creation_timestamp: now,
                deletion_timestamp: None,
                labels,
            },
            spec,
            status: DeliveryStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
