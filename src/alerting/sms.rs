use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use super::channel::{ChannelKind, NotificationChannel};
use super::transport::{MessageTransport, OutboxTransport, OutgoingMessage};
use crate::config::SmsConfig;
use crate::error::DispatchError;
use crate::vitals::AnomalyEvent;

pub const SMS_MAX_CHARS: usize = 160;

pub struct SmsChannel {
    enabled: bool,
    to_number: String,
    transport: Arc<dyn MessageTransport>,
}

impl SmsChannel {
    pub fn new(config: &SmsConfig, transport: Arc<dyn MessageTransport>) -> Self {
        SmsChannel {
            enabled: config.enabled,
            to_number: config.to_number.clone(),
            transport,
        }
    }

    pub fn from_config(config: &SmsConfig) -> Self {
        Self::new(config, Arc::new(OutboxTransport::new(&config.outbox)))
    }

    pub fn render(event: &AnomalyEvent) -> String {
        let mut text = format!("{}: {}", event.severity.as_str().to_uppercase(), event.message);
        if let Some(value) = event.observed_value {
            text.push_str(&format!(" (value: {})", value));
        }
        text.chars().take(SMS_MAX_CHARS).collect()
    }
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(&self, event: &AnomalyEvent) -> Result<(), DispatchError> {
        if !self.enabled {
            return Err(DispatchError::Disabled("sms"));
        }
        if self.to_number.is_empty() {
            return Err(DispatchError::NotConfigured("sms"));
        }

        let message = OutgoingMessage {
            to: self.to_number.clone(),
            from: None,
            subject: None,
            body: Self::render(event),
            created_at: Utc::now(),
        };
        self.transport.deliver(&message).await?;

        tracing::info!(to = %self.to_number, vital = %event.vital, "SMS alert spooled");
        Ok(())
    }
}
