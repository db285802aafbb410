use async_trait::async_trait;
use chrono::Utc;
use std::fmt::Write;
use std::sync::Arc;

use super::channel::{ChannelKind, NotificationChannel};
use super::transport::{MessageTransport, OutboxTransport, OutgoingMessage};
use crate::config::EmailConfig;
use crate::error::DispatchError;
use crate::vitals::AnomalyEvent;

pub struct EmailChannel {
    enabled: bool,
    recipient: String,
    from_address: String,
    transport: Arc<dyn MessageTransport>,
}

impl EmailChannel {
    pub fn new(config: &EmailConfig, transport: Arc<dyn MessageTransport>) -> Self {
        EmailChannel {
            enabled: config.enabled,
            recipient: config.recipient.clone(),
            from_address: config.from_address.clone(),
            transport,
        }
    }

    /// Channel spooling to the configured outbox file
    pub fn from_config(config: &EmailConfig) -> Self {
        Self::new(config, Arc::new(OutboxTransport::new(&config.outbox)))
    }

    pub fn subject(event: &AnomalyEvent) -> String {
        format!(
            "Vital Alert: {} - {}",
            event.severity.as_str().to_uppercase(),
            event.vital
        )
    }

    pub fn body(event: &AnomalyEvent) -> String {
        let mut body = String::new();
        let _ = writeln!(body, "Severity: {}", event.severity.as_str().to_uppercase());
        let _ = writeln!(body, "Vital: {}", event.vital);
        let _ = writeln!(body, "Time: {}", event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(body, "Message: {}", event.message);
        if let Some(value) = event.observed_value {
            let _ = writeln!(body, "Value: {}", value);
        }
        if let Some(threshold) = event.threshold {
            let _ = writeln!(body, "Threshold: {}", threshold);
        }
        body
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, event: &AnomalyEvent) -> Result<(), DispatchError> {
        if !self.enabled {
            return Err(DispatchError::Disabled("email"));
        }
        if self.recipient.is_empty() {
            return Err(DispatchError::NotConfigured("email"));
        }

        let message = OutgoingMessage {
            to: self.recipient.clone(),
            from: Some(self.from_address.clone()),
            subject: Some(Self::subject(event)),
            body: Self::body(event),
            created_at: Utc::now(),
        };
        self.transport.deliver(&message).await?;

        tracing::info!(to = %self.recipient, vital = %event.vital, "Email alert spooled");
        Ok(())
    }
}
