use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which quantity (or derived signal) an anomaly is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vital {
    HeartRate,
    Spo2,
    Temperature,
    HeartRateTrend,
    Spo2Trend,
    TemperatureTrend,
    SystemError,
}

impl Vital {
    /// The three directly measured vitals, in classification order
    pub const PRIMARY: [Vital; 3] = [Vital::HeartRate, Vital::Spo2, Vital::Temperature];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vital::HeartRate => "heart_rate",
            Vital::Spo2 => "spo2",
            Vital::Temperature => "temperature",
            Vital::HeartRateTrend => "heart_rate_trend",
            Vital::Spo2Trend => "spo2_trend",
            Vital::TemperatureTrend => "temperature_trend",
            Vital::SystemError => "system_error",
        }
    }

    /// Trend signal derived from a primary vital
    pub fn trend(&self) -> Option<Vital> {
        match self {
            Vital::HeartRate => Some(Vital::HeartRateTrend),
            Vital::Spo2 => Some(Vital::Spo2Trend),
            Vital::Temperature => Some(Vital::TemperatureTrend),
            _ => None,
        }
    }
}

impl fmt::Display for Vital {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered anomaly tier: `Info < Warning < Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// An anomaly candidate produced by the classifier, the trend detector or
/// the monitor itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub vital: Vital,
    pub severity: Severity,
    pub message: String,
    pub observed_value: Option<f64>,
    pub threshold: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl AnomalyEvent {
    pub fn new(
        vital: Vital,
        severity: Severity,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        AnomalyEvent {
            vital,
            severity,
            message: message.into(),
            observed_value: None,
            threshold: None,
            timestamp,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.observed_value = Some(value);
        self
    }

    pub fn with_threshold(mut self, threshold: Option<f64>) -> Self {
        self.threshold = threshold;
        self
    }

    /// Key used for cooldown bookkeeping
    pub fn key(&self) -> (Vital, Severity) {
        (self.vital, self.severity)
    }
}
