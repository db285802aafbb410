use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use crate::error::DispatchError;
use crate::vitals::{AnomalyEvent, Severity};

/// The notification channels an event can be routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Sms,
    Local,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::Local => "local",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channels attempted for an event of the given severity, in order
pub fn routing(severity: Severity) -> &'static [ChannelKind] {
    match severity {
        Severity::Critical => &[ChannelKind::Email, ChannelKind::Sms, ChannelKind::Local],
        Severity::Warning => &[ChannelKind::Email, ChannelKind::Local],
        Severity::Info => &[ChannelKind::Local],
    }
}

/// A single delivery path for anomaly events.
///
/// `send` returning `Ok` means the event was delivered.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(&self, event: &AnomalyEvent) -> Result<(), DispatchError>;

    /// Release any held resources
    async fn close(&self) {}
}
