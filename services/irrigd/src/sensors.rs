//! Sensor drivers
//!
//! - `soil`: Modbus RTU soil probe (sole owner of the field bus)
//! - `environment`: air sensor contract and placeholder drivers
//! - `bme280`: BME280 over a register bus

pub mod bme280;
pub mod environment;
pub mod soil;

pub use bme280::{Bme280, Bme280Calibration, RegisterBus};
pub use environment::{
    EnvironmentalReading, EnvironmentalSensor, SensorError, StaticEnvironmentalSensor,
    UnavailableEnvironmentalSensor,
};
pub use soil::{
    CalibrationFactors, CalibrationTarget, SoilParameter, SoilReadError, SoilReading,
    SoilSensorDriver, ValidRange,
};
