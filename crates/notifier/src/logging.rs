//! Structured-log channel: emits the notification as a `tracing` event.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use courier_common::types::Channel;

use crate::{ChannelAdapter, DeliveryMessage, SendResult};

#[derive(Default)]
pub struct LogAdapter;

impl LogAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelAdapter for LogAdapter {
    fn channel(&self) -> Channel {
        Channel::Log
    }

    async fn send(
        &self,
        _address: Option<&str>,
        message: &DeliveryMessage,
        _timeout: Duration,
    ) -> SendResult {
        let started = Instant::now();
        let links: Vec<&str> = message.action_links.iter().map(|l| l.url.as_str()).collect();

        tracing::info!(
            target: "courier::notification",
            namespace = %message.namespace,
            name = %message.name,
            notification_type = %message.notification_type,
            priority = %message.priority,
            subject = %message.subject,
            body = %message.body,
            links = ?links,
            metadata = ?message.metadata,
            "Notification"
        );

        SendResult::success(started.elapsed())
    }
}
