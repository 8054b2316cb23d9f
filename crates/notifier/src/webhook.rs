//! Generic webhook channel: POSTs the full message as JSON.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;

use courier_common::types::Channel;

use crate::http::{parse_endpoint, post_json};
use crate::{ChannelAdapter, DeliveryMessage, SendResult};

pub struct WebhookAdapter {
    client: Client,
    default_url: Option<String>,
}

impl WebhookAdapter {
    pub fn new(client: Client, default_url: Option<String>) -> Self {
        Self {
            client,
            default_url,
        }
    }
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    fn channel(&self) -> Channel {
        Channel::Webhook
    }

    async fn send(
        &self,
        address: Option<&str>,
        message: &DeliveryMessage,
        timeout: Duration,
    ) -> SendResult {
        let started = Instant::now();

        let Some(address) = address.or(self.default_url.as_deref()) else {
            return SendResult::invalid("no webhook URL configured", started.elapsed());
        };

        match parse_endpoint(address) {
            Ok(url) => post_json(&self.client, url, None, message, timeout).await,
            Err(e) => SendResult::invalid(e, started.elapsed()),
        }
    }
}
