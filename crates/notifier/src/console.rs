//! Console channel: prints the rendered message to stdout.

use std::io::Write;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use courier_common::types::Channel;

use crate::{ChannelAdapter, DeliveryMessage, SendResult};

#[derive(Default)]
pub struct ConsoleAdapter;

impl ConsoleAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelAdapter for ConsoleAdapter {
    fn channel(&self) -> Channel {
        Channel::Console
    }

    async fn send(
        &self,
        _address: Option<&str>,
        message: &DeliveryMessage,
        _timeout: Duration,
    ) -> SendResult {
        let started = Instant::now();
        let rendered = format!(
            "=== notification {}/{} ===\n{}\n",
            message.namespace,
            message.name,
            message.render_text()
        );

        let mut stdout = std::io::stdout().lock();
        match stdout
            .write_all(rendered.as_bytes())
            .and_then(|_| stdout.flush())
        {
            Ok(()) => SendResult::success(started.elapsed()),
            Err(e) => SendResult::failed(format!("stdout write failed: {e}"), started.elapsed()),
        }
    }
}
