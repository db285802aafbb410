use crate::config::ConfigError;
use crate::storage::StorageError;
use crate::vitals::Vital;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, VitalError>;

/// No reading could be obtained for this tick
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("sensor returned no vitals")]
    EmptyReading,

    #[error("implausible {vital} reading: {value}")]
    Implausible { vital: Vital, value: f64 },

    #[error("malformed reading: {0}")]
    Malformed(String),

    #[error("replay source exhausted")]
    Exhausted,

    #[error("sensor unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The reading could not be classified
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("non-finite {vital} value")]
    NonFinite { vital: Vital },
}

/// A single channel failed to deliver an event
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("channel {0} is disabled")]
    Disabled(&'static str),

    #[error("channel {0} is not configured")]
    NotConfigured(&'static str),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unified error type for vitalwatch operations
#[derive(Debug, thiserror::Error)]
pub enum VitalError {
    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
