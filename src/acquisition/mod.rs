//! Vital-sign acquisition
//!
//! The monitor only needs "give me one reading or tell me you can't". How
//! the values were produced is decided once at startup by picking an
//! [`AcquisitionMode`].

mod replay;
mod simulated;

pub use replay::ReplaySource;
pub use simulated::SimulatedSource;

use crate::config::{SensorConfig, SensorMode};
use crate::error::AcquisitionError;
use crate::vitals::{Reading, Vital};
use async_trait::async_trait;
use std::fmt;

/// How readings are obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    Simulated,
    Replay,
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionMode::Simulated => write!(f, "simulated"),
            AcquisitionMode::Replay => write!(f, "replay"),
        }
    }
}

/// Source of vital-sign readings.
///
/// `read` makes exactly one bounded attempt. Retrying is the caller's
/// business (the monitor counts failures instead).
#[async_trait]
pub trait VitalSource: Send {
    async fn read(&mut self) -> Result<Reading, AcquisitionError>;

    fn mode(&self) -> AcquisitionMode;

    /// Release any underlying resources. Called once on shutdown.
    async fn release(&mut self) {}
}

/// Resolve the configured acquisition mode into a source
pub fn open_source(config: &SensorConfig) -> Result<Box<dyn VitalSource>, AcquisitionError> {
    let source: Box<dyn VitalSource> = match config.mode {
        SensorMode::Simulated => Box::new(SimulatedSource::new()),
        SensorMode::Replay => {
            let path = config.replay_path.as_ref().ok_or_else(|| {
                AcquisitionError::Unavailable("replay mode needs sensors.replay_path".to_string())
            })?;
            Box::new(ReplaySource::open(path, config.loop_playback)?)
        }
    };
    tracing::info!(mode = %source.mode(), "Vital source ready");
    Ok(source)
}

/// Physically plausible ranges. Values outside them point to a bad probe
/// contact rather than a patient state.
const PLAUSIBLE_HEART_RATE: (f64, f64) = (30.0, 250.0);
const PLAUSIBLE_SPO2: (f64, f64) = (70.0, 100.0);
const PLAUSIBLE_TEMPERATURE_C: (f64, f64) = (30.0, 42.0);

/// Reject empty or physically implausible readings
pub fn check_plausible(reading: &Reading) -> Result<(), AcquisitionError> {
    if reading.is_empty() {
        return Err(AcquisitionError::EmptyReading);
    }

    let checks = [
        (Vital::HeartRate, reading.heart_rate.map(|v| v as f64), PLAUSIBLE_HEART_RATE),
        (Vital::Spo2, reading.spo2.map(|v| v as f64), PLAUSIBLE_SPO2),
        (Vital::Temperature, reading.temperature_celsius(), PLAUSIBLE_TEMPERATURE_C),
    ];
    for (vital, value, (low, high)) in checks {
        if let Some(value) = value {
            if !(low..=high).contains(&value) {
                return Err(AcquisitionError::Implausible { vital, value });
            }
        }
    }
    Ok(())
}
