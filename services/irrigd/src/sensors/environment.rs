//! Environmental (air) sensor abstraction

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Air temperature, relative humidity and barometric pressure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalReading {
    /// °C
    pub temperature: f32,
    /// %RH
    pub humidity: f32,
    /// hPa
    pub pressure: f32,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    #[error("Sensor unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected chip id 0x{actual:02X} (expected 0x{expected:02X})")]
    WrongChipId { expected: u8, actual: u8 },

    #[error("Sensor bus error: {0}")]
    Bus(String),

    #[error("Measurement skipped by sensor")]
    MeasurementSkipped,
}

/// Driver contract for the environmental sensor
#[async_trait]
pub trait EnvironmentalSensor: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<(), SensorError>;

    async fn read(&self) -> Result<EnvironmentalReading, SensorError>;
}

/// Placeholder when no environmental sensor is fitted or supported
#[derive(Debug, Clone)]
pub struct UnavailableEnvironmentalSensor {
    reason: String,
}

impl UnavailableEnvironmentalSensor {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl EnvironmentalSensor for UnavailableEnvironmentalSensor {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn initialize(&self) -> Result<(), SensorError> {
        Err(SensorError::Unavailable(self.reason.clone()))
    }

    async fn read(&self) -> Result<EnvironmentalReading, SensorError> {
        Err(SensorError::Unavailable(self.reason.clone()))
    }
}

/// Fixed reading, used by `--simulate`
#[derive(Debug, Clone)]
pub struct StaticEnvironmentalSensor {
    reading: EnvironmentalReading,
}

impl StaticEnvironmentalSensor {
    pub fn new(reading: EnvironmentalReading) -> Self {
        Self { reading }
    }
}

#[async_trait]
impl EnvironmentalSensor for StaticEnvironmentalSensor {
    fn name(&self) -> &str {
        "static"
    }

    async fn initialize(&self) -> Result<(), SensorError> {
        Ok(())
    }

    async fn read(&self) -> Result<EnvironmentalReading, SensorError> {
        Ok(self.reading)
    }
}
