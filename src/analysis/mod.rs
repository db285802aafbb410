//! Vital-sign analysis
//!
//! The decision logic of the monitor:
//! - Rolling per-vital history
//! - Static threshold classification
//! - Trend detection over the rolling history
//! - Cooldown-based deduplication

pub mod classifier;
pub mod cooldown;
pub mod trend;
pub mod window;

pub use classifier::{ThresholdClassifier, Thresholds, VitalThresholds, FEVER_CRITICAL_CELSIUS};
pub use cooldown::{CooldownGate, CooldownKey};
pub use trend::{TrendDetector, WindowStatistics};
pub use window::{RollingWindow, WINDOW_CAPACITY};
