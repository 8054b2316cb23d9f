//! Email channel via the Resend HTTP API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use courier_common::types::Channel;

use crate::http::{parse_endpoint, post_json};
use crate::{ChannelAdapter, DeliveryMessage, SendResult};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

pub struct ResendEmailAdapter {
    client: Client,
    api_key: Option<String>,
    from: Option<String>,
    endpoint: String,
}

impl ResendEmailAdapter {
    pub fn new(client: Client, api_key: Option<String>, from: Option<String>) -> Self {
        Self {
            client,
            api_key,
            from,
            endpoint: RESEND_ENDPOINT.to_string(),
        }
    }

    /// Point the adapter at a different API endpoint (self-hosted relay, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Cheap shape check: one `@`, non-empty local part, dotted domain, no whitespace.
pub fn is_valid_email(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !address.chars().any(char::is_whitespace)
}

#[async_trait]
impl ChannelAdapter for ResendEmailAdapter {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        address: Option<&str>,
        message: &DeliveryMessage,
        timeout: Duration,
    ) -> SendResult {
        let started = Instant::now();

        let Some(address) = address else {
            return SendResult::invalid("email recipient address is required", started.elapsed());
        };
        if !is_valid_email(address) {
            return SendResult::invalid(
                format!("malformed email address '{address}'"),
                started.elapsed(),
            );
        }
        let (Some(api_key), Some(from)) = (self.api_key.as_deref(), self.from.as_deref()) else {
            return SendResult::invalid(
                "email delivery is not configured (RESEND_API_KEY / EMAIL_FROM)",
                started.elapsed(),
            );
        };
        let url = match parse_endpoint(&self.endpoint) {
            Ok(url) => url,
            Err(e) => return SendResult::invalid(e, started.elapsed()),
        };

        let payload = json!({
            "from": from,
            "to": [address],
            "subject": format!("[{}] {}", message.priority.to_string().to_uppercase(), message.subject),
            "text": message.render_text(),
        });

        post_json(&self.client, url, Some(api_key), &payload, timeout).await
    }
}
