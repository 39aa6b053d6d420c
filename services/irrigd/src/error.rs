//! Error handling for the irrigation daemon
//!
//! Sensor and bus failures are contained at the driver boundary and never
//! reach this type from the acquisition loop. `IrrigError` is what the
//! command boundary and bootstrap return.

use irrigation_protocols::dido::GpioError;
use irrigation_protocols::modbus::ModbusError;
use serde::Serialize;
use thiserror::Error;

/// Why a command was refused without side effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Reservoir feature is switched off
    FeatureDisabled,
    /// High-level switch already asserted
    AlreadyFull,
    /// Level switches could not be read
    LevelSensorUnavailable,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::FeatureDisabled => "feature_disabled",
            RejectReason::AlreadyFull => "already_full",
            RejectReason::LevelSensorUnavailable => "level_sensor_unavailable",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Sampled value too close to zero for a stable factor
    #[error("Raw value {raw} too small to calibrate (minimum magnitude {minimum})")]
    RawValueTooSmall { raw: f32, minimum: f32 },

    #[error("Invalid reference value {0}")]
    InvalidReference(f32),

    #[error("Calibration sample failed: {0}")]
    Sample(#[from] ModbusError),
}

/// Irrigation daemon error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IrrigError {
    /// Configuration-related errors (load, validation, invalid settings)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Command refused because a precondition is unmet
    #[error("Command rejected: {0}")]
    Rejected(RejectReason),

    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// Field-bus failure surfaced to a caller (diagnostics, probe)
    #[error("Field bus error: {0}")]
    Bus(#[from] ModbusError),

    #[error("Sensor error: {0}")]
    SensorError(String),

    #[error("GPIO error: {0}")]
    Gpio(#[from] GpioError),

    /// Settings persistence errors
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type alias for the irrigation daemon
pub type Result<T> = std::result::Result<T, IrrigError>;

impl IrrigError {
    pub fn config(msg: impl Into<String>) -> Self {
        IrrigError::ConfigError(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        IrrigError::StorageError(msg.into())
    }

    pub fn sensor(msg: impl Into<String>) -> Self {
        IrrigError::SensorError(msg.into())
    }

    /// Short machine-readable category for the operator surface
    pub fn kind(&self) -> &'static str {
        match self {
            IrrigError::ConfigError(_) => "invalid_config",
            IrrigError::Rejected(_) => "rejected",
            IrrigError::Calibration(_) => "calibration",
            IrrigError::Bus(_) => "bus",
            IrrigError::SensorError(_) => "sensor",
            IrrigError::Gpio(_) => "gpio",
            IrrigError::StorageError(_) => "storage",
            IrrigError::IoError(_) => "io",
        }
    }
}

impl From<std::io::Error> for IrrigError {
    fn from(err: std::io::Error) -> Self {
        IrrigError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for IrrigError {
    fn from(err: serde_json::Error) -> Self {
        IrrigError::StorageError(format!("Serialization: {}", err))
    }
}

impl From<common::ConfigLoadError> for IrrigError {
    fn from(err: common::ConfigLoadError) -> Self {
        IrrigError::ConfigError(err.to_string())
    }
}
