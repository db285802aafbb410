//! vitalwatch: continuous vital-sign monitoring and alerting
//!
//! vitalwatch samples heart rate, SpO2 and body temperature, classifies each
//! sample against static and trend thresholds, and routes the resulting
//! anomalies to severity-tiered notification channels with cooldown-based
//! deduplication.

pub mod acquisition;
pub mod alerting;
pub mod analysis;
pub mod api;
pub mod config;
pub mod error;
pub mod monitor;
pub mod storage;
pub mod vitals;

pub use error::{Result, VitalError};
pub use monitor::{MonitorHandle, MonitorLoop, MonitorState, TickReport};
pub use vitals::{AnomalyEvent, Reading, Severity, TemperatureUnit, Vital};
