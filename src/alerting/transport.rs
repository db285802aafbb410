//! Delivery of rendered messages
//!
//! Email and SMS channels only render text. Getting it to a mail server or an
//! SMS gateway is the job of a [`MessageTransport`]. The bundled
//! [`OutboxTransport`] appends each message as one JSON line to a spool file
//! that an external relay drains.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::DispatchError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn deliver(&self, message: &OutgoingMessage) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone)]
pub struct OutboxTransport {
    path: PathBuf,
}

impl OutboxTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        OutboxTransport { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MessageTransport for OutboxTransport {
    async fn deliver(&self, message: &OutgoingMessage) -> Result<(), DispatchError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_vec(message)
            .map_err(|e| DispatchError::Delivery(e.to_string()))?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        tracing::debug!(outbox = %self.path.display(), to = %message.to, "Message spooled");
        Ok(())
    }
}
