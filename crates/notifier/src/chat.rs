//! Chat channels (Slack, Microsoft Teams) delivered through incoming webhooks.
//!
//! A recipient's `slack` / `teams` address is the incoming-webhook URL to post to;
//! without one the adapter falls back to the configured default webhook.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use courier_common::types::{Channel, Priority};

use crate::http::{parse_endpoint, post_json};
use crate::{ChannelAdapter, DeliveryMessage, SendResult};

/// Incoming-webhook adapter for chat platforms.
pub struct ChatWebhookAdapter {
    channel: Channel,
    client: Client,
    default_url: Option<String>,
}

impl ChatWebhookAdapter {
    pub fn slack(client: Client, default_url: Option<String>) -> Self {
        Self {
            channel: Channel::Slack,
            client,
            default_url,
        }
    }

    pub fn teams(client: Client, default_url: Option<String>) -> Self {
        Self {
            channel: Channel::Teams,
            client,
            default_url,
        }
    }

    /// Build the platform-specific JSON payload.
    pub fn payload(&self, message: &DeliveryMessage) -> Value {
        match self.channel {
            Channel::Teams => teams_payload(message),
            _ => slack_payload(message),
        }
    }
}

fn priority_marker(priority: Priority) -> &'static str {
    match priority {
        Priority::Critical => ":rotating_light:",
        Priority::High => ":warning:",
        Priority::Medium => ":information_source:",
        Priority::Low => ":memo:",
    }
}

fn theme_color(priority: Priority) -> &'static str {
    match priority {
        Priority::Critical => "D32F2F",
        Priority::High => "F57C00",
        Priority::Medium => "1976D2",
        Priority::Low => "757575",
    }
}

fn slack_payload(message: &DeliveryMessage) -> Value {
    let mut text = format!(
        "{} *{}*\n{}",
        priority_marker(message.priority),
        message.subject,
        message.body
    );
    for link in &message.action_links {
        text.push_str(&format!("\n<{}|{}>", link.url, link.display_label()));
    }

    json!({
        "text": text,
        "mrkdwn": true,
    })
}

fn teams_payload(message: &DeliveryMessage) -> Value {
    let actions: Vec<Value> = message
        .action_links
        .iter()
        .map(|link| {
            json!({
                "@type": "OpenUri",
                "name": link.display_label(),
                "targets": [{ "os": "default", "uri": link.url }],
            })
        })
        .collect();

    json!({
        "@type": "MessageCard",
        "@context": "https://schema.org/extensions",
        "summary": message.subject,
        "themeColor": theme_color(message.priority),
        "title": format!("[{}] {}", message.priority.to_string().to_uppercase(), message.subject),
        "text": message.body,
        "potentialAction": actions,
    })
}

#[async_trait]
impl ChannelAdapter for ChatWebhookAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        address: Option<&str>,
        message: &DeliveryMessage,
        timeout: Duration,
    ) -> SendResult {
        let started = Instant::now();

        let Some(address) = address.or(self.default_url.as_deref()) else {
            return SendResult::invalid(
                format!("no {} webhook URL configured", self.channel),
                started.elapsed(),
            );
        };

        let url = match parse_endpoint(address) {
            Ok(url) => url,
            Err(e) => return SendResult::invalid(e, started.elapsed()),
        };

        let payload = self.payload(message);
        post_json(&self.client, url, None, &payload, timeout).await
    }
}
