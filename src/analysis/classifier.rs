use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ClassificationError;
use crate::vitals::{AnomalyEvent, Reading, Severity, Vital};

/// Fever readings at or above this many degrees Celsius are critical even
/// when they only crossed the warning `max`.
pub const FEVER_CRITICAL_CELSIUS: f64 = 38.5;

/// Static bounds for one vital. An absent bound disables its rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalThresholds {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub critical_min: Option<f64>,
    pub critical_max: Option<f64>,
}

/// Per-vital bounds. When deserialized, a bound left out of the document
/// keeps that vital's default and an explicit `null` disables it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ThresholdOverrides")]
pub struct Thresholds {
    pub heart_rate: VitalThresholds,
    pub spo2: VitalThresholds,
    pub temperature: VitalThresholds, // Celsius
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            heart_rate: VitalThresholds {
                min: Some(60.0),
                max: Some(100.0),
                critical_min: Some(40.0),
                critical_max: Some(150.0),
            },
            spo2: VitalThresholds {
                min: Some(95.0),
                max: None,
                critical_min: Some(90.0),
                critical_max: None,
            },
            temperature: VitalThresholds {
                min: Some(36.1),
                max: Some(37.8),
                critical_min: Some(35.0),
                critical_max: Some(39.0),
            },
        }
    }
}

/// A bound that was either left out, set to `null`, or set to a value
type Override = Option<Option<f64>>;

fn present<'de, D>(deserializer: D) -> Result<Override, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BoundOverrides {
    #[serde(deserialize_with = "present")]
    min: Override,
    #[serde(deserialize_with = "present")]
    max: Override,
    #[serde(deserialize_with = "present")]
    critical_min: Override,
    #[serde(deserialize_with = "present")]
    critical_max: Override,
}

impl BoundOverrides {
    fn over(self, base: VitalThresholds) -> VitalThresholds {
        VitalThresholds {
            min: self.min.unwrap_or(base.min),
            max: self.max.unwrap_or(base.max),
            critical_min: self.critical_min.unwrap_or(base.critical_min),
            critical_max: self.critical_max.unwrap_or(base.critical_max),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ThresholdOverrides {
    heart_rate: BoundOverrides,
    spo2: BoundOverrides,
    temperature: BoundOverrides,
}

impl From<ThresholdOverrides> for Thresholds {
    fn from(overrides: ThresholdOverrides) -> Self {
        let base = Thresholds::default();
        Thresholds {
            heart_rate: overrides.heart_rate.over(base.heart_rate),
            spo2: overrides.spo2.over(base.spo2),
            temperature: overrides.temperature.over(base.temperature),
        }
    }
}

impl Thresholds {
    pub fn for_vital(&self, vital: Vital) -> VitalThresholds {
        match vital {
            Vital::HeartRate => self.heart_rate,
            Vital::Spo2 => self.spo2,
            Vital::Temperature => self.temperature,
            _ => VitalThresholds::default(),
        }
    }
}

/// Which bound a value crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Breach {
    CriticalLow,
    CriticalHigh,
    Low,
    High,
}

impl VitalThresholds {
    /// First matching rule in precedence order
    /// `critical_min -> critical_max -> min -> max`. Comparisons are strict.
    fn breach(&self, value: f64) -> Option<(Breach, f64)> {
        let below = |bound: Option<f64>| bound.filter(|b| value < *b);
        let above = |bound: Option<f64>| bound.filter(|b| value > *b);

        below(self.critical_min)
            .map(|b| (Breach::CriticalLow, b))
            .or_else(|| above(self.critical_max).map(|b| (Breach::CriticalHigh, b)))
            .or_else(|| below(self.min).map(|b| (Breach::Low, b)))
            .or_else(|| above(self.max).map(|b| (Breach::High, b)))
    }
}

/// Classifies single readings against static per-vital bounds
#[derive(Debug, Clone, Default)]
pub struct ThresholdClassifier {
    thresholds: Thresholds,
}

impl ThresholdClassifier {
    pub fn new(thresholds: Thresholds) -> Self {
        ThresholdClassifier { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Produce at most one event per vital present in the reading
    pub fn classify(&self, reading: &Reading) -> Result<Vec<AnomalyEvent>, ClassificationError> {
        let mut events = Vec::new();

        if let Some(hr) = reading.heart_rate {
            events.extend(self.classify_heart_rate(hr as f64, reading));
        }
        if let Some(spo2) = reading.spo2 {
            events.extend(self.classify_spo2(spo2 as f64, reading));
        }
        if let Some(celsius) = reading.temperature_celsius() {
            if !celsius.is_finite() {
                return Err(ClassificationError::NonFinite {
                    vital: Vital::Temperature,
                });
            }
            events.extend(self.classify_temperature(celsius, reading));
        }

        Ok(events)
    }

    fn classify_heart_rate(&self, hr: f64, reading: &Reading) -> Option<AnomalyEvent> {
        let (breach, bound) = self.thresholds.heart_rate.breach(hr)?;
        let (severity, message) = match breach {
            Breach::CriticalLow => (
                Severity::Critical,
                format!("Critical bradycardia detected: {} bpm (extremely low heart rate)", hr),
            ),
            Breach::CriticalHigh => (
                Severity::Critical,
                format!("Critical tachycardia detected: {} bpm (extremely high heart rate)", hr),
            ),
            Breach::Low => (
                Severity::Warning,
                format!("Bradycardia detected: {} bpm (low heart rate)", hr),
            ),
            Breach::High => (
                Severity::Warning,
                format!("Tachycardia detected: {} bpm (high heart rate)", hr),
            ),
        };
        Some(
            AnomalyEvent::new(Vital::HeartRate, severity, message, reading.timestamp)
                .with_value(hr)
                .with_threshold(Some(bound)),
        )
    }

    fn classify_spo2(&self, spo2: f64, reading: &Reading) -> Option<AnomalyEvent> {
        let (breach, bound) = self.thresholds.spo2.breach(spo2)?;
        let (severity, message) = match breach {
            Breach::CriticalLow => (
                Severity::Critical,
                format!("Critical hypoxemia detected: {}% (dangerously low blood oxygen)", spo2),
            ),
            Breach::Low => (Severity::Warning, format!("Low blood oxygen detected: {}%", spo2)),
            Breach::CriticalHigh => (
                Severity::Critical,
                format!("Blood oxygen reading above critical bound: {}%", spo2),
            ),
            Breach::High => (
                Severity::Warning,
                format!("Blood oxygen reading above expected range: {}%", spo2),
            ),
        };
        Some(
            AnomalyEvent::new(Vital::Spo2, severity, message, reading.timestamp)
                .with_value(spo2)
                .with_threshold(Some(bound)),
        )
    }

    fn classify_temperature(&self, celsius: f64, reading: &Reading) -> Option<AnomalyEvent> {
        let (breach, bound) = self.thresholds.temperature.breach(celsius)?;
        let (severity, message) = match breach {
            Breach::CriticalLow => (
                Severity::Critical,
                format!(
                    "Critical hypothermia detected: {:.1}°C (dangerously low temperature)",
                    celsius
                ),
            ),
            Breach::CriticalHigh => (
                Severity::Critical,
                format!(
                    "Critical hyperthermia detected: {:.1}°C (dangerously high temperature)",
                    celsius
                ),
            ),
            Breach::Low => (
                Severity::Warning,
                format!("Low body temperature detected: {:.1}°C", celsius),
            ),
            Breach::High => {
                let severity = if celsius < FEVER_CRITICAL_CELSIUS {
                    Severity::Warning
                } else {
                    Severity::Critical
                };
                (severity, format!("Fever detected: {:.1}°C", celsius))
            }
        };
        Some(
            AnomalyEvent::new(Vital::Temperature, severity, message, reading.timestamp)
                .with_value(celsius)
                .with_threshold(Some(bound)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vitals::TemperatureUnit;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn reading() -> Reading {
        Reading::new(Utc::now())
    }

    fn classify(r: &Reading) -> Vec<AnomalyEvent> {
        ThresholdClassifier::default().classify(r).unwrap()
    }

    #[test]
    fn test_bradycardia_scenario() {
        let r = reading()
            .with_heart_rate(45)
            .with_spo2(98)
            .with_temperature(36.8, TemperatureUnit::C);
        let events = classify(&r);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].vital, Vital::HeartRate);
        assert_eq!(events[0].severity, Severity::Warning);
        assert!(events[0].message.contains("Bradycardia"));
        assert_eq!(events[0].threshold, Some(60.0));
        assert_eq!(events[0].observed_value, Some(45.0));
    }

    #[test]
    fn test_spo2_critical_scenario() {
        let events = classify(&reading().with_spo2(88));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].vital, Vital::Spo2);
        assert_eq!(events[0].severity, Severity::Critical);
        assert_eq!(events[0].threshold, Some(90.0));
    }

    #[test]
    fn test_in_range_and_boundaries_are_quiet() {
        for hr in [60, 75, 100] {
            assert!(classify(&reading().with_heart_rate(hr)).is_empty(), "hr {}", hr);
        }
        for spo2 in [95, 100] {
            assert!(classify(&reading().with_spo2(spo2)).is_empty(), "spo2 {}", spo2);
        }
        for temp in [36.1, 37.0, 37.8] {
            let r = reading().with_temperature(temp, TemperatureUnit::C);
            assert!(classify(&r).is_empty(), "temp {}", temp);
        }
    }

    #[test]
    fn test_critical_wins_over_warning() {
        for hr in [10, 39] {
            let events = classify(&reading().with_heart_rate(hr));
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].severity, Severity::Critical);
            assert!(events[0].message.contains("Critical bradycardia"));
        }
        let events = classify(&reading().with_heart_rate(151));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Critical);
        assert!(events[0].message.contains("tachycardia"));
    }

    #[test]
    fn test_exact_critical_bound_falls_through_to_warning() {
        let events = classify(&reading().with_heart_rate(40));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warning);
        assert_eq!(events[0].threshold, Some(60.0));
    }

    #[test]
    fn test_fever_escalation() {
        let warn = classify(&reading().with_temperature(38.0, TemperatureUnit::C));
        assert_eq!(warn[0].severity, Severity::Warning);
        assert_eq!(warn[0].threshold, Some(37.8));

        let crit = classify(&reading().with_temperature(38.7, TemperatureUnit::C));
        assert_eq!(crit.len(), 1);
        assert_eq!(crit[0].severity, Severity::Critical);
        assert!(crit[0].message.starts_with("Fever"));
        // reached through the warning branch, so the warning bound is reported
        assert_eq!(crit[0].threshold, Some(37.8));

        let hyper = classify(&reading().with_temperature(39.5, TemperatureUnit::C));
        assert!(hyper[0].message.contains("hyperthermia"));
        assert_eq!(hyper[0].threshold, Some(39.0));
    }

    #[test]
    fn test_fahrenheit_is_converted_before_comparison() {
        // 101.84F == 38.8C: below critical_max, but a critical fever
        let events = classify(&reading().with_temperature(101.84, TemperatureUnit::F));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Critical);
        assert!(events[0].message.contains("Fever detected: 38.8°C"));

        assert!(classify(&reading().with_temperature(98.6, TemperatureUnit::F)).is_empty());
    }

    #[test]
    fn test_hypothermia() {
        let events = classify(&reading().with_temperature(34.2, TemperatureUnit::C));
        assert_eq!(events[0].severity, Severity::Critical);
        let events = classify(&reading().with_temperature(35.5, TemperatureUnit::C));
        assert_eq!(events[0].severity, Severity::Warning);
    }

    #[test]
    fn test_multiple_vitals_each_classified() {
        let r = reading()
            .with_heart_rate(45)
            .with_spo2(92)
            .with_temperature(38.5, TemperatureUnit::C);
        let events = classify(&r);
        let summary: Vec<(Vital, Severity)> = events.iter().map(|e| e.key()).collect();
        assert_eq!(
            summary,
            vec![
                (Vital::HeartRate, Severity::Warning),
                (Vital::Spo2, Severity::Warning),
                (Vital::Temperature, Severity::Critical),
            ]
        );
    }

    #[test]
    fn test_missing_bounds_disable_rules() {
        let classifier = ThresholdClassifier::new(Thresholds {
            heart_rate: VitalThresholds::default(),
            ..Thresholds::default()
        });
        assert!(classifier.classify(&reading().with_heart_rate(5)).unwrap().is_empty());
    }

    #[test]
    fn test_non_finite_temperature_is_an_error() {
        let r = reading().with_temperature(f64::NAN, TemperatureUnit::C);
        let err = ThresholdClassifier::default().classify(&r).unwrap_err();
        assert!(matches!(err, ClassificationError::NonFinite { vital: Vital::Temperature }));
    }
}
