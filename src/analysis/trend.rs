use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::window::{RollingWindow, WINDOW_CAPACITY};
use crate::vitals::{AnomalyEvent, Severity, Vital};

/// Samples in each of the two compared sub-windows
pub const SUB_WINDOW: usize = 5;

/// Samples required before a vital is considered for trend events
pub const MIN_TREND_SAMPLES: usize = 2 * SUB_WINDOW;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Rising,
    Falling,
}

/// Shift between the older and recent sub-window means that raises an event
#[derive(Debug, Clone, Copy)]
struct TrendRule {
    direction: Direction,
    margin: f64,
    severity: Severity,
}

fn rule_for(vital: Vital) -> Option<TrendRule> {
    match vital {
        Vital::HeartRate => Some(TrendRule {
            direction: Direction::Rising,
            margin: 20.0,
            severity: Severity::Warning,
        }),
        Vital::Spo2 => Some(TrendRule {
            direction: Direction::Falling,
            margin: 3.0,
            severity: Severity::Warning,
        }),
        Vital::Temperature => Some(TrendRule {
            direction: Direction::Rising,
            margin: 0.5,
            severity: Severity::Info,
        }),
        _ => None,
    }
}

/// Summary of one vital's rolling window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStatistics {
    pub current: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Rate-of-change detector over one rolling window per primary vital
#[derive(Debug, Clone)]
pub struct TrendDetector {
    windows: BTreeMap<Vital, RollingWindow>,
}

impl Default for TrendDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl TrendDetector {
    pub fn new() -> Self {
        Self::with_capacity(WINDOW_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let windows = Vital::PRIMARY
            .into_iter()
            .map(|vital| (vital, RollingWindow::new(capacity)))
            .collect();
        TrendDetector { windows }
    }

    /// Append a value to the vital's window. Non-primary vitals are ignored.
    pub fn ingest(&mut self, vital: Vital, value: f64) {
        if let Some(window) = self.windows.get_mut(&vital) {
            window.push(value);
        }
    }

    pub fn window(&self, vital: Vital) -> Option<&RollingWindow> {
        self.windows.get(&vital)
    }

    pub fn latest(&self, vital: Vital) -> Option<f64> {
        self.windows.get(&vital).and_then(RollingWindow::latest)
    }

    /// Compare the last five samples of each vital against the five before
    /// them. At most one event per vital.
    pub fn detect(&self) -> Vec<AnomalyEvent> {
        self.detect_at(Utc::now())
    }

    pub fn detect_at(&self, now: DateTime<Utc>) -> Vec<AnomalyEvent> {
        self.windows
            .iter()
            .filter_map(|(vital, window)| Self::detect_vital(*vital, window, now))
            .collect()
    }

    fn detect_vital(vital: Vital, window: &RollingWindow, now: DateTime<Utc>) -> Option<AnomalyEvent> {
        if window.len() < MIN_TREND_SAMPLES {
            return None;
        }
        let rule = rule_for(vital)?;
        let recent = window.tail_mean(SUB_WINDOW, 0)?;
        let older = window.tail_mean(SUB_WINDOW, SUB_WINDOW)?;

        let fired = match rule.direction {
            Direction::Rising => recent > older + rule.margin,
            Direction::Falling => recent < older - rule.margin,
        };
        if !fired {
            return None;
        }

        let message = match vital {
            Vital::HeartRate => format!(
                "Rapid heart rate increase detected: {:.0} → {:.0} bpm",
                older, recent
            ),
            Vital::Spo2 => format!(
                "Declining blood oxygen trend detected: {:.0}% → {:.0}%",
                older, recent
            ),
            _ => format!(
                "Rising temperature trend detected: {:.1}°C → {:.1}°C",
                older, recent
            ),
        };

        let trend_vital = vital.trend()?;
        Some(
            AnomalyEvent::new(trend_vital, rule.severity, message, now)
                .with_value(recent - older)
                .with_threshold(Some(rule.margin)),
        )
    }

    pub fn statistics(&self) -> BTreeMap<Vital, WindowStatistics> {
        self.windows
            .iter()
            .filter_map(|(vital, window)| {
                let current = window.latest()?;
                let count = window.len();
                let (min, max, sum) = window.iter().fold(
                    (f64::INFINITY, f64::NEG_INFINITY, 0.0),
                    |(min, max, sum), &v| (min.min(v), max.max(v), sum + v),
                );
                Some((
                    *vital,
                    WindowStatistics {
                        current,
                        average: sum / count as f64,
                        min,
                        max,
                        count,
                    },
                ))
            })
            .collect()
    }

    pub fn reset(&mut self) {
        for window in self.windows.values_mut() {
            window.clear();
        }
        tracing::info!("Trend history reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(detector: &mut TrendDetector, vital: Vital, values: &[f64]) {
        for v in values {
            detector.ingest(vital, *v);
        }
    }

    #[test]
    fn test_nine_samples_never_fire() {
        let mut detector = TrendDetector::new();
        feed(&mut detector, Vital::HeartRate, &[40.0, 40.0, 40.0, 40.0, 200.0, 200.0, 200.0, 200.0, 200.0]);
        feed(&mut detector, Vital::Spo2, &[100.0, 100.0, 100.0, 100.0, 50.0, 50.0, 50.0, 50.0, 50.0]);
        assert!(detector.detect().is_empty());
    }

    #[test]
    fn test_heart_rate_rise() {
        let mut detector = TrendDetector::new();
        feed(&mut detector, Vital::HeartRate, &[70.0; 5]);
        feed(&mut detector, Vital::HeartRate, &[95.0; 5]);
        let events = detector.detect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].vital, Vital::HeartRateTrend);
        assert_eq!(events[0].severity, Severity::Warning);
        assert_eq!(events[0].observed_value, Some(25.0));
        assert!(events[0].message.contains("70 → 95"));
    }

    #[test]
    fn test_heart_rate_rise_of_exactly_margin_is_quiet() {
        let mut detector = TrendDetector::new();
        feed(&mut detector, Vital::HeartRate, &[70.0; 5]);
        feed(&mut detector, Vital::HeartRate, &[90.0; 5]);
        assert!(detector.detect().is_empty());
    }

    #[test]
    fn test_spo2_decline() {
        let mut detector = TrendDetector::new();
        feed(&mut detector, Vital::Spo2, &[98.0; 5]);
        feed(&mut detector, Vital::Spo2, &[94.0; 5]);
        let events = detector.detect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].vital, Vital::Spo2Trend);
        assert_eq!(events[0].severity, Severity::Warning);
    }

    #[test]
    fn test_temperature_rise_is_info() {
        let mut detector = TrendDetector::new();
        feed(&mut detector, Vital::Temperature, &[36.5; 5]);
        feed(&mut detector, Vital::Temperature, &[37.2; 5]);
        let events = detector.detect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].vital, Vital::TemperatureTrend);
        assert_eq!(events[0].severity, Severity::Info);
    }

    #[test]
    fn test_only_last_ten_samples_matter() {
        let mut detector = TrendDetector::new();
        feed(&mut detector, Vital::HeartRate, &[40.0; 20]);
        feed(&mut detector, Vital::HeartRate, &[80.0; 10]);
        assert!(detector.detect().is_empty());
    }

    #[test]
    fn test_falling_heart_rate_is_not_a_trend() {
        let mut detector = TrendDetector::new();
        feed(&mut detector, Vital::HeartRate, &[120.0; 5]);
        feed(&mut detector, Vital::HeartRate, &[70.0; 5]);
        assert!(detector.detect().is_empty());
    }

    #[test]
    fn test_statistics_and_reset() {
        let mut detector = TrendDetector::new();
        feed(&mut detector, Vital::HeartRate, &[70.0, 80.0, 90.0]);
        let stats = detector.statistics();
        let hr = &stats[&Vital::HeartRate];
        assert_eq!(hr.current, 90.0);
        assert_eq!(hr.average, 80.0);
        assert_eq!(hr.min, 70.0);
        assert_eq!(hr.max, 90.0);
        assert_eq!(hr.count, 3);
        assert!(!stats.contains_key(&Vital::Spo2));

        detector.reset();
        assert!(detector.statistics().is_empty());
        assert_eq!(detector.latest(Vital::HeartRate), None);
    }

    #[test]
    fn test_ignores_non_primary_vitals() {
        let mut detector = TrendDetector::new();
        detector.ingest(Vital::SystemError, 1.0);
        assert!(detector.window(Vital::SystemError).is_none());
    }
}
