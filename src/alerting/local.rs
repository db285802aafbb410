//! Bedside indicator: a colour LED plus a buzzer

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::channel::{ChannelKind, NotificationChannel};
use crate::config::LocalConfig;
use crate::error::DispatchError;
use crate::vitals::{AnomalyEvent, Severity};

const LONG_BEEP: Duration = Duration::from_millis(500);
const SHORT_BEEP: Duration = Duration::from_millis(200);
const INFO_BEEP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorColor {
    Off,
    Red,
    Yellow,
    Blue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeepPattern {
    pub count: u8,
    pub duration: Duration,
}

/// Indicator colour and buzzer pattern for a severity
pub fn signal_for(severity: Severity) -> (IndicatorColor, BeepPattern) {
    match severity {
        Severity::Critical => (IndicatorColor::Red, BeepPattern { count: 3, duration: LONG_BEEP }),
        Severity::Warning => (IndicatorColor::Yellow, BeepPattern { count: 2, duration: SHORT_BEEP }),
        Severity::Info => (IndicatorColor::Blue, BeepPattern { count: 1, duration: INFO_BEEP }),
    }
}

/// Hardware seam for the LED and buzzer
#[async_trait]
pub trait Indicator: Send + Sync {
    async fn set_color(&self, color: IndicatorColor) -> Result<(), DispatchError>;

    async fn beep(&self, pattern: BeepPattern) -> Result<(), DispatchError>;
}

#[derive(Debug)]
struct IndicatorState {
    color: IndicatorColor,
    beeps: Vec<BeepPattern>,
}

/// Indicator without hardware. It remembers what it was asked to show.
#[derive(Debug)]
pub struct SimulatedIndicator {
    state: Mutex<IndicatorState>,
}

impl Default for SimulatedIndicator {
    fn default() -> Self {
        SimulatedIndicator {
            state: Mutex::new(IndicatorState {
                color: IndicatorColor::Off,
                beeps: Vec::new(),
            }),
        }
    }
}

impl SimulatedIndicator {
    pub fn color(&self) -> IndicatorColor {
        self.state.lock().color
    }

    pub fn beeps(&self) -> Vec<BeepPattern> {
        self.state.lock().beeps.clone()
    }
}

#[async_trait]
impl Indicator for SimulatedIndicator {
    async fn set_color(&self, color: IndicatorColor) -> Result<(), DispatchError> {
        self.state.lock().color = color;
        tracing::debug!(?color, "Indicator colour set");
        Ok(())
    }

    async fn beep(&self, pattern: BeepPattern) -> Result<(), DispatchError> {
        self.state.lock().beeps.push(pattern);
        tracing::debug!(count = pattern.count, duration_ms = pattern.duration.as_millis() as u64, "Buzzer");
        Ok(())
    }
}

pub struct LocalChannel {
    led_enabled: bool,
    buzzer_enabled: bool,
    indicator: Arc<dyn Indicator>,
}

impl LocalChannel {
    pub fn new(config: &LocalConfig, indicator: Arc<dyn Indicator>) -> Self {
        LocalChannel {
            led_enabled: config.led_enabled,
            buzzer_enabled: config.buzzer_enabled,
            indicator,
        }
    }
}

#[async_trait]
impl NotificationChannel for LocalChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Local
    }

    async fn send(&self, event: &AnomalyEvent) -> Result<(), DispatchError> {
        if !self.led_enabled && !self.buzzer_enabled {
            return Err(DispatchError::Disabled("local"));
        }

        let (color, pattern) = signal_for(event.severity);
        if self.led_enabled {
            self.indicator.set_color(color).await?;
        }
        if self.buzzer_enabled {
            self.indicator.beep(pattern).await?;
        }
        Ok(())
    }

    async fn close(&self) {
        if self.led_enabled {
            if let Err(e) = self.indicator.set_color(IndicatorColor::Off).await {
                tracing::warn!(error = %e, "Failed to switch indicator off");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vitals::Vital;
    use chrono::Utc;

    fn event(severity: Severity) -> AnomalyEvent {
        AnomalyEvent::new(Vital::Temperature, severity, "Fever detected: 38.9°C", Utc::now())
    }

    #[tokio::test]
    async fn test_signals_by_severity_and_close() {
        let indicator = Arc::new(SimulatedIndicator::default());
        let channel = LocalChannel::new(&LocalConfig::default(), indicator.clone());

        channel.send(&event(Severity::Critical)).await.unwrap();
        assert_eq!(indicator.color(), IndicatorColor::Red);
        channel.send(&event(Severity::Info)).await.unwrap();
        assert_eq!(indicator.color(), IndicatorColor::Blue);

        let beeps = indicator.beeps();
        assert_eq!(beeps[0], BeepPattern { count: 3, duration: Duration::from_millis(500) });
        assert_eq!(beeps[1], BeepPattern { count: 1, duration: Duration::from_millis(100) });

        channel.close().await;
        assert_eq!(indicator.color(), IndicatorColor::Off);
    }

    #[tokio::test]
    async fn test_led_only() {
        let indicator = Arc::new(SimulatedIndicator::default());
        let config = LocalConfig { led_enabled: true, buzzer_enabled: false };
        let channel = LocalChannel::new(&config, indicator.clone());

        channel.send(&event(Severity::Warning)).await.unwrap();
        assert_eq!(indicator.color(), IndicatorColor::Yellow);
        assert!(indicator.beeps().is_empty());
    }

    #[tokio::test]
    async fn test_fully_disabled() {
        let indicator = Arc::new(SimulatedIndicator::default());
        let config = LocalConfig { led_enabled: false, buzzer_enabled: false };
        let channel = LocalChannel::new(&config, indicator.clone());

        assert!(matches!(channel.send(&event(Severity::Info)).await, Err(DispatchError::Disabled(_))));
        assert_eq!(indicator.color(), IndicatorColor::Off);
    }
}
