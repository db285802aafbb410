//! Vital-sign data model
//!
//! This module contains the reading and anomaly types that flow through the
//! monitoring pipeline.

pub mod event;

pub use event::{AnomalyEvent, Severity, Vital};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit a temperature value was measured in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemperatureUnit {
    #[default]
    C,
    F,
}

impl TemperatureUnit {
    /// Convert a value in this unit to degrees Celsius
    pub fn to_celsius(self, value: f64) -> f64 {
        match self {
            TemperatureUnit::C => value,
            TemperatureUnit::F => (value - 32.0) * 5.0 / 9.0,
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemperatureUnit::C => write!(f, "C"),
            TemperatureUnit::F => write!(f, "F"),
        }
    }
}

/// One acquisition sample
///
/// Any vital may be missing. A reading with no vitals at all never reaches
/// the classifier; the monitor treats it as an acquisition failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub heart_rate: Option<i64>,  // beats per minute
    pub spo2: Option<i64>,        // oxygen saturation in percent
    pub temperature: Option<f64>, // in `temperature_unit`
    #[serde(default)]
    pub temperature_unit: TemperatureUnit,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Reading {
            heart_rate: None,
            spo2: None,
            temperature: None,
            temperature_unit: TemperatureUnit::C,
            timestamp,
        }
    }

    pub fn with_heart_rate(mut self, bpm: i64) -> Self {
        self.heart_rate = Some(bpm);
        self
    }

    pub fn with_spo2(mut self, percent: i64) -> Self {
        self.spo2 = Some(percent);
        self
    }

    pub fn with_temperature(mut self, value: f64, unit: TemperatureUnit) -> Self {
        self.temperature = Some(value);
        self.temperature_unit = unit;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.heart_rate.is_none() && self.spo2.is_none() && self.temperature.is_none()
    }

    /// Temperature normalised to Celsius, leaving the stored unit untouched
    pub fn temperature_celsius(&self) -> Option<f64> {
        self.temperature
            .map(|value| self.temperature_unit.to_celsius(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fahrenheit_conversion() {
        let reading = Reading::new(Utc::now()).with_temperature(98.6, TemperatureUnit::F);
        let celsius = reading.temperature_celsius().unwrap();
        assert!((celsius - 37.0).abs() < 1e-9);
        assert_eq!(reading.temperature_unit, TemperatureUnit::F);
        assert_eq!(reading.temperature, Some(98.6));
    }

    #[test]
    fn test_empty_reading() {
        let reading = Reading::new(Utc::now());
        assert!(reading.is_empty());
        assert!(!reading.with_spo2(97).is_empty());
    }

    #[test]
    fn test_unit_defaults_to_celsius_when_absent() {
        let json = r#"{"heart_rate":72,"spo2":null,"temperature":36.6,"timestamp":"2024-01-01T00:00:00Z"}"#;
        let reading: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.temperature_unit, TemperatureUnit::C);
        assert_eq!(reading.heart_rate, Some(72));
    }
}
