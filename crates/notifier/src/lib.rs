//! Channel adapters — one adapter per delivery channel kind.
//!
//! An adapter performs exactly one external call per `send` and reports a
//! classified [`SendResult`]. Adapters never retry; attempt accounting lives in
//! the engine's orchestrator.

pub mod chat;
pub mod console;
pub mod email;
pub mod file;
pub mod http;
pub mod logging;
pub mod sms;
pub mod webhook;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use courier_common::config::AppConfig;
use courier_common::types::{
    ActionLink, Channel, DeliveryOutcome, NotificationRequest, NotificationType, ObjectKey,
    Priority,
};

/// Message content handed to every adapter, derived from a request's spec.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryMessage {
    pub namespace: String,
    pub name: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub priority: Priority,
    pub subject: String,
    pub body: String,
    pub action_links: Vec<ActionLink>,
    pub metadata: BTreeMap<String, String>,
}

impl DeliveryMessage {
    pub fn from_request(request: &NotificationRequest) -> Self {
        let spec = &request.spec;
        Self {
            namespace: request.metadata.namespace.clone(),
            name: request.metadata.name.clone(),
            notification_type: spec.notification_type,
            priority: spec.priority,
            subject: spec.subject.clone(),
            body: spec.body.clone(),
            action_links: spec.action_links.clone(),
            metadata: spec.metadata.clone(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// Plain-text rendering shared by text-only channels (console, SMS, email body).
    pub fn render_text(&self) -> String {
        let mut text = format!(
            "[{}] {}\n\n{}",
            self.priority.to_string().to_uppercase(),
            self.subject,
            self.body
        );
        for link in &self.action_links {
            text.push_str(&format!("\n- {}: {}", link.display_label(), link.url));
        }
        text
    }
}

/// Classified result of a single send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendResult {
    pub outcome: DeliveryOutcome,
    pub error: Option<String>,
    pub duration: Duration,
}

impl SendResult {
    pub fn success(duration: Duration) -> Self {
        Self {
            outcome: DeliveryOutcome::Success,
            error: None,
            duration,
        }
    }

    pub fn failed(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            outcome: DeliveryOutcome::Failed,
            error: Some(error.into()),
            duration,
        }
    }

    pub fn timeout(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            outcome: DeliveryOutcome::Timeout,
            error: Some(error.into()),
            duration,
        }
    }

    pub fn invalid(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            outcome: DeliveryOutcome::Invalid,
            error: Some(error.into()),
            duration,
        }
    }
}

/// Trait that every channel transport implements.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The channel this adapter delivers on.
    fn channel(&self) -> Channel;

    /// Send `message` to `address` (or the adapter's configured default when
    /// `None`). Must not retry and must not panic; every failure is classified.
    async fn send(
        &self,
        address: Option<&str>,
        message: &DeliveryMessage,
        timeout: Duration,
    ) -> SendResult;
}

/// Lookup table from channel kind to adapter.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with every reference adapter, sharing one pooled HTTP client.
    pub fn from_config(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let client = http::build_client()?;

        let registry = Self::new()
            .with(chat::ChatWebhookAdapter::slack(
                client.clone(),
                config.slack_webhook_url.clone(),
            ))
            .with(chat::ChatWebhookAdapter::teams(
                client.clone(),
                config.teams_webhook_url.clone(),
            ))
            .with(webhook::WebhookAdapter::new(
                client.clone(),
                config.default_webhook_url.clone(),
            ))
            .with(email::ResendEmailAdapter::new(
                client.clone(),
                config.resend_api_key.clone(),
                config.email_from.clone(),
            ))
            .with(sms::SmsGatewayAdapter::new(
                client,
                config.sms_gateway_url.clone(),
                config.sms_gateway_token.clone(),
            ))
            .with(console::ConsoleAdapter::new())
            .with(file::FileAdapter::new(&config.file_output_dir))
            .with(logging::LogAdapter::new());

        tracing::info!(channels = registry.adapters.len(), "Channel registry built");
        Ok(registry)
    }

    /// Register an adapter, replacing any previous adapter for the same channel.
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.channel(), adapter);
    }

    /// Builder-style `register`.
    pub fn with(mut self, adapter: impl ChannelAdapter + 'static) -> Self {
        self.register(Arc::new(adapter));
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel).cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.adapters.keys().copied().collect();
        channels.sort();
        channels
    }
}
