use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::vitals::{AnomalyEvent, Severity, Vital};

pub type CooldownKey = (Vital, Severity);

/// Default interval between two events with the same key
pub const DEFAULT_COOLDOWN_SECS: i64 = 300;

/// Drops events whose (vital, severity) key fired within the cooldown window
#[derive(Debug, Clone)]
pub struct CooldownGate {
    window: Duration,
    last_emitted: HashMap<CooldownKey, DateTime<Utc>>,
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_COOLDOWN_SECS))
    }
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        CooldownGate {
            window,
            last_emitted: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn filter(&mut self, events: Vec<AnomalyEvent>) -> Vec<AnomalyEvent> {
        self.filter_at(events, Utc::now())
    }

    /// Keep events whose key is outside its cooldown, stamping survivors
    /// with `now`. Suppressed events leave the stored timestamp untouched.
    pub fn filter_at(&mut self, events: Vec<AnomalyEvent>, now: DateTime<Utc>) -> Vec<AnomalyEvent> {
        events
            .into_iter()
            .filter(|event| {
                let key = event.key();
                if let Some(prior) = self.last_emitted.get(&key) {
                    if now - *prior < self.window {
                        let (vital, severity) = key;
                        tracing::debug!(%vital, %severity, "Alert cooldown active");
                        return false;
                    }
                }
                self.last_emitted.insert(key, now);
                true
            })
            .collect()
    }

    /// Snapshot of every key's last emission, for read-only consumers
    pub fn entries(&self) -> Vec<(CooldownKey, DateTime<Utc>)> {
        let mut entries: Vec<_> = self.last_emitted.iter().map(|(k, t)| (*k, *t)).collect();
        entries.sort_by_key(|(key, _)| *key);
        entries
    }

    pub fn reset(&mut self) {
        self.last_emitted.clear();
    }
}
