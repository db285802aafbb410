//! Severity-based dispatch of anomaly events to notification channels.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use super::channel::{routing, ChannelKind, NotificationChannel};
use super::email::EmailChannel;
use super::local::{Indicator, LocalChannel};
use super::sms::SmsChannel;
use crate::config::AlertsConfig;
use crate::vitals::AnomalyEvent;

pub const HISTORY_CAPACITY: usize = 1000;

/// Delivery result per attempted channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DispatchOutcome(BTreeMap<ChannelKind, bool>);

impl DispatchOutcome {
    pub fn delivered(&self, kind: ChannelKind) -> Option<bool> {
        self.0.get(&kind).copied()
    }

    pub fn any_delivered(&self) -> bool {
        self.0.values().any(|delivered| *delivered)
    }

    pub fn attempted(&self) -> Vec<ChannelKind> {
        self.0.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelKind, bool)> + '_ {
        self.0.iter().map(|(kind, delivered)| (*kind, *delivered))
    }

    fn record(&mut self, kind: ChannelKind, delivered: bool) {
        self.0.insert(kind, delivered);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub event: AnomalyEvent,
    pub outcome: DispatchOutcome,
    pub dispatched_at: DateTime<Utc>,
}

/// Bounded log of past dispatches, oldest evicted first
#[derive(Debug)]
pub struct AlertHistory {
    records: VecDeque<DispatchRecord>,
    capacity: usize,
}

impl AlertHistory {
    pub fn new(capacity: usize) -> Self {
        AlertHistory {
            records: VecDeque::with_capacity(capacity.min(HISTORY_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, record: DispatchRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Up to `count` records, newest first
    pub fn recent(&self, count: usize) -> Vec<DispatchRecord> {
        self.records.iter().rev().take(count).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Routes events to the channels their severity calls for
pub struct AlertDispatcher {
    channels: BTreeMap<ChannelKind, Box<dyn NotificationChannel>>,
    history: RwLock<AlertHistory>,
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertDispatcher {
    /// Dispatcher with no channels registered
    pub fn new() -> Self {
        Self::with_history_capacity(HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(capacity: usize) -> Self {
        AlertDispatcher {
            channels: BTreeMap::new(),
            history: RwLock::new(AlertHistory::new(capacity)),
        }
    }

    /// Dispatcher with the email, SMS and local channels built from configuration
    pub fn from_config(config: &AlertsConfig, indicator: Arc<dyn Indicator>) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Box::new(EmailChannel::from_config(&config.email)));
        dispatcher.register(Box::new(SmsChannel::from_config(&config.sms)));
        dispatcher.register(Box::new(LocalChannel::new(&config.local, indicator)));
        tracing::info!(
            email = config.email.enabled,
            sms = config.sms.enabled,
            led = config.local.led_enabled,
            buzzer = config.local.buzzer_enabled,
            "Alert channels configured"
        );
        dispatcher
    }

    /// Register a channel, replacing any existing channel of the same kind
    pub fn register(&mut self, channel: Box<dyn NotificationChannel>) {
        self.channels.insert(channel.kind(), channel);
    }

    /// Attempt every channel routed for the event's severity. Never fails;
    /// per-channel results end up in the returned outcome.
    pub async fn dispatch(&self, event: &AnomalyEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        tracing::warn!(
            vital = %event.vital,
            severity = ?event.severity,
            message = %event.message,
            "Dispatching alert"
        );

        for &kind in routing(event.severity) {
            let delivered = match self.channels.get(&kind) {
                Some(channel) => match channel.send(event).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(channel = %kind, error = %e, "Channel failed to deliver alert");
                        false
                    }
                },
                None => {
                    tracing::debug!(channel = %kind, "No channel registered");
                    false
                }
            };
            outcome.record(kind, delivered);
        }

        if !outcome.any_delivered() {
            tracing::warn!(vital = %event.vital, severity = ?event.severity, "Alert was not delivered on any channel");
        }

        self.history.write().push(DispatchRecord {
            event: event.clone(),
            outcome: outcome.clone(),
            dispatched_at: Utc::now(),
        });

        outcome
    }

    /// The `count` most recent dispatches, newest first
    pub fn history(&self, count: usize) -> Vec<DispatchRecord> {
        self.history.read().recent(count)
    }

    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    pub fn clear_history(&self) {
        self.history.write().clear();
    }

    pub async fn close(&self) {
        for channel in self.channels.values() {
            channel.close().await;
        }
        tracing::info!("Alert channels closed");
    }
}
