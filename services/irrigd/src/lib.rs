//! Irrigation Controller Library (irrigd)
//!
//! Autonomous control for a small irrigation rig: a plant-watering pump
//! driven by soil moisture, and a reservoir refill pump driven by two float
//! switches.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │  Soil sensor    │───►│   Acquisition   │───►│ SensorSnapshot  │
//! │  (Modbus RTU)   │    │   task          │    │ (watch channel) │
//! │  BME280 (I2C)   │    └─────────────────┘    └─────────────────┘
//! └─────────────────┘                                    │
//!                                                        ▼
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │  Float switches │───►│   Reservoir     │    │   Watering      │
//! │  (GPIO)         │    │   manager       │    │   controller    │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!                                 │                      │
//!                                 ▼                      ▼
//!                        ┌─────────────────┐    ┌─────────────────┐
//!                        │ Reservoir pump  │    │  Plant pump     │
//!                        └─────────────────┘    └─────────────────┘
//! ```
//!
//! Sensor I/O runs in the background; the control tick only reads the
//! latest snapshot and the float switches, so a slow field bus never delays
//! a pump stop.

pub mod acquisition;
pub mod clock;
pub mod config;
pub mod error;
pub mod pump;
pub mod reservoir;
pub mod runtime;
pub mod sensors;
pub mod service;
pub mod store;
pub mod watering;

pub use acquisition::{SensorAcquisitionTask, SensorSnapshot, SnapshotReceiver};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::AppConfig;
pub use error::{IrrigError, Result};
pub use pump::PumpActuator;
pub use reservoir::{LevelSensors, ReservoirManager};
pub use runtime::{Controller, Hardware};
pub use service::{Command, CommandResponse, IrrigationService, SystemStatus};
pub use store::{ConfigStore, JsonFileStore, MemoryStore};
pub use watering::{WateringConfig, WateringController};
