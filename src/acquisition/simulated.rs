use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;

use super::{AcquisitionMode, VitalSource};
use crate::error::AcquisitionError;
use crate::vitals::{Reading, TemperatureUnit};

/// Produces healthy-looking readings jittered around fixed baselines
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    base_heart_rate: i64,
    base_spo2: i64,
    base_temperature: f64,
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSource {
    pub fn new() -> Self {
        SimulatedSource {
            base_heart_rate: 75,
            base_spo2: 97,
            base_temperature: 36.8,
        }
    }

    pub fn with_baseline(heart_rate: i64, spo2: i64, temperature: f64) -> Self {
        SimulatedSource {
            base_heart_rate: heart_rate,
            base_spo2: spo2,
            base_temperature: temperature,
        }
    }

    fn sample(&self) -> Reading {
        let mut rng = rand::thread_rng();
        let heart_rate = self.base_heart_rate + rng.gen_range(-5..=5);
        let spo2 = (self.base_spo2 + rng.gen_range(-2..=2)).min(100);
        let temperature = self.base_temperature + rng.gen_range(-0.3..=0.3);

        Reading::new(Utc::now())
            .with_heart_rate(heart_rate)
            .with_spo2(spo2)
            .with_temperature((temperature * 10.0).round() / 10.0, TemperatureUnit::C)
    }
}

#[async_trait]
impl VitalSource for SimulatedSource {
    async fn read(&mut self) -> Result<Reading, AcquisitionError> {
        Ok(self.sample())
    }

    fn mode(&self) -> AcquisitionMode {
        AcquisitionMode::Simulated
    }
}
