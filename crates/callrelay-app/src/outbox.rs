//! File-backed transport.
//!
//! Every accepted notification is written to `<data_dir>/outbox/` as one
//! file, headed by the subject and the recipients it is addressed to. An
//! external mailer or gateway picks the files up from there.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use callrelay_core::config::ChannelsConfig;
use callrelay_engine::{Transport, TransportError};

/// Subject used for the plain-text channel.
pub const PLAIN_TEXT_SUBJECT: &str = "Re: New text message from";

pub struct OutboxTransport {
    dir: PathBuf,
    channels: ChannelsConfig,
    seq: AtomicU64,
}

impl OutboxTransport {
    pub fn new(dir: impl Into<PathBuf>, channels: ChannelsConfig) -> Self {
        Self {
            dir: dir.into(),
            channels,
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write(
        &self,
        channel: &str,
        ext: &str,
        recipients: &str,
        subject: &str,
        body: &str,
    ) -> Result<PathBuf, TransportError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{}-{:04}-{}.{}",
            Utc::now().format("%Y%m%dT%H%M%S%.3f"),
            seq,
            channel,
            ext
        );
        let path = self.dir.join(name);
        let content = format!("To: {}\nSubject: {}\n\n{}\n", recipients, subject, body);
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }
}

#[async_trait]
impl Transport for OutboxTransport {
    async fn deliver_message(&self, subject: &str, body: &str) -> Result<bool, TransportError> {
        let Some(recipients) = self.channels.email_target() else {
            debug!("Email channel disabled; nothing written");
            return Ok(true);
        };
        if body.is_empty() {
            return Ok(true);
        }
        let path = self.write("mail", "html", recipients, subject, body).await?;
        info!(path = %path.display(), "Notification written to outbox");
        Ok(true)
    }

    async fn deliver_plain_text(&self, body: &str) -> Result<bool, TransportError> {
        let Some(recipients) = self.channels.plain_text_target() else {
            return Ok(true);
        };
        if body.is_empty() {
            return Ok(true);
        }
        let path = self
            .write("text", "txt", recipients, PLAIN_TEXT_SUBJECT, body)
            .await?;
        info!(path = %path.display(), "Plain-text notification written to outbox");
        Ok(true)
    }

    fn name(&self) -> &str {
        "outbox"
    }
}
