//! File channel: appends one JSON line per delivered message.
//!
//! Each request gets its own `<namespace>_<name>.jsonl` file under the output
//! directory. Useful for audits and for tests that need a durable side effect.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::io::AsyncWriteExt;

use courier_common::types::Channel;

use crate::{ChannelAdapter, DeliveryMessage, SendResult};

pub struct FileAdapter {
    dir: PathBuf,
}

impl FileAdapter {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Output path for a request's messages.
    pub fn path_for(&self, message: &DeliveryMessage) -> PathBuf {
        let sanitize = |s: &str| -> String {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
                .collect()
        };
        self.dir.join(format!(
            "{}_{}.jsonl",
            sanitize(&message.namespace),
            sanitize(&message.name)
        ))
    }

    async fn append(&self, message: &DeliveryMessage) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut line = serde_json::to_vec(&json!({
            "deliveredAt": Utc::now(),
            "message": message,
        }))?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(message))
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

#[async_trait]
impl ChannelAdapter for FileAdapter {
    fn channel(&self) -> Channel {
        Channel::File
    }

    async fn send(
        &self,
        _address: Option<&str>,
        message: &DeliveryMessage,
        timeout: Duration,
    ) -> SendResult {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.append(message)).await {
            Ok(Ok(())) => SendResult::success(started.elapsed()),
            Ok(Err(e)) => SendResult::failed(
                format!("write to {} failed: {e}", self.dir.display()),
                started.elapsed(),
            ),
            Err(_) => SendResult::timeout("file write timed out", started.elapsed()),
        }
    }
}
