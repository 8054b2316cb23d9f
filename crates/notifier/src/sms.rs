//! SMS channel through a generic HTTP gateway.
//!
//! The gateway receives `{"to": "+15551234567", "message": "..."}` and is expected
//! to answer 2xx on acceptance.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use courier_common::types::Channel;

use crate::http::{parse_endpoint, post_json};
use crate::{ChannelAdapter, DeliveryMessage, SendResult};

pub struct SmsGatewayAdapter {
    client: Client,
    gateway_url: Option<String>,
    token: Option<String>,
}

impl SmsGatewayAdapter {
    pub fn new(client: Client, gateway_url: Option<String>, token: Option<String>) -> Self {
        Self {
            client,
            gateway_url,
            token,
        }
    }
}

/// E.164: a leading `+` followed by 8 to 15 digits.
pub fn is_e164(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
}

#[async_trait]
impl ChannelAdapter for SmsGatewayAdapter {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(
        &self,
        address: Option<&str>,
        message: &DeliveryMessage,
        timeout: Duration,
    ) -> SendResult {
        let started = Instant::now();

        let Some(phone) = address else {
            return SendResult::invalid("sms recipient phone number is required", started.elapsed());
        };
        if !is_e164(phone) {
            return SendResult::invalid(
                format!("phone number '{phone}' is not in E.164 format"),
                started.elapsed(),
            );
        }
        let Some(gateway) = self.gateway_url.as_deref() else {
            return SendResult::invalid("no SMS gateway configured", started.elapsed());
        };
        let url = match parse_endpoint(gateway) {
            Ok(url) => url,
            Err(e) => return SendResult::invalid(e, started.elapsed()),
        };

        let text = format!(
            "[{}] {}: {}",
            message.priority.to_string().to_uppercase(),
            message.subject,
            message.body
        );
        let payload = json!({ "to": phone, "message": text });

        post_json(&self.client, url, self.token.as_deref(), &payload, timeout).await
    }
}
