//! YAML configuration
//!
//! Every section carries serde defaults, so a partial (or empty) file is a
//! valid configuration.

use crate::analysis::Thresholds;
use crate::vitals::Vital;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub thresholds: Thresholds,
    pub monitor: MonitorConfig,
    pub sensors: SensorConfig,
    pub alerts: AlertsConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: f64,
    pub cooldown_secs: u64,
    pub max_consecutive_failures: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            interval_secs: 1.0,
            cooldown_secs: 300,
            max_consecutive_failures: 5,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorMode {
    #[default]
    Simulated,
    Replay,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub mode: SensorMode,
    pub replay_path: Option<PathBuf>,
    pub loop_playback: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub email: EmailConfig,
    pub sms: SmsConfig,
    pub local: LocalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub recipient: String,
    pub from_address: String,
    pub outbox: PathBuf,
}

impl Default for EmailConfig {
    fn default() -> Self {
        EmailConfig {
            enabled: false,
            recipient: String::new(),
            from_address: "vitalwatch@localhost".to_string(),
            outbox: PathBuf::from("./data/outbox/email.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    pub enabled: bool,
    pub to_number: String,
    pub outbox: PathBuf,
}

impl Default for SmsConfig {
    fn default() -> Self {
        SmsConfig {
            enabled: false,
            to_number: String::new(),
            outbox: PathBuf::from("./data/outbox/sms.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub led_enabled: bool,
    pub buzzer_enabled: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        LocalConfig {
            led_enabled: true,
            buzzer_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            path: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

impl Config {
    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        for vital in Vital::PRIMARY {
            let bounds = self.thresholds.for_vital(vital);
            let ordered: Vec<f64> = [bounds.critical_min, bounds.min, bounds.max, bounds.critical_max]
                .into_iter()
                .flatten()
                .collect();
            if ordered.windows(2).any(|pair| pair[0] > pair[1]) {
                return Err(ConfigError::Invalid(format!(
                    "{} thresholds must satisfy critical_min <= min <= max <= critical_max",
                    vital
                )));
            }
        }

        if !(self.monitor.interval_secs > 0.0) || !self.monitor.interval_secs.is_finite() {
            return Err(ConfigError::Invalid("monitor.interval_secs must be positive".to_string()));
        }
        if self.monitor.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid(
                "monitor.max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if self.sensors.mode == SensorMode::Replay && self.sensors.replay_path.is_none() {
            return Err(ConfigError::Invalid("sensors.replay_path is required in replay mode".to_string()));
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    // An empty document deserializes to unit, not to an empty mapping
    let config: Config = if content.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(content)?
    };
    config.validate()?;
    Ok(config)
}
