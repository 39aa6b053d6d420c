//! 8-in-1 soil sensor on the RS-485 field bus
//!
//! Register map (holding registers, contiguous from 0):
//!
//! | Reg | Quantity    | Encoding            |
//! |-----|-------------|---------------------|
//! | 0   | moisture    | u16, 0.1 %          |
//! | 1   | temperature | i16, 0.1 °C         |
//! | 2   | pH          | u16, 0.1            |
//! | 3   | EC          | u16, µS/cm          |
//! | 4   | nitrogen    | u16, mg/kg          |
//! | 5   | phosphorus  | u16, mg/kg          |
//! | 6   | potassium   | u16, mg/kg          |
//! | 7   | humidity    | u16, 0.1 %          |
//!
//! The driver is the single owner of the bus. Every request, including the
//! diagnostic write, goes through one async mutex around the client.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use irrigation_protocols::modbus::{
    ModbusError, ModbusRtuClient, ModbusStatistics, ModbusStatsSnapshot,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CalibrationError, IrrigError, Result};
use crate::store::{load_or, ConfigStore};

const REGISTER_BLOCK_LEN: u16 = 8;
const REG_MOISTURE: u16 = 0;
const REG_PH: u16 = 2;
const REG_EC: u16 = 3;

/// Smallest raw magnitude a calibration factor may be derived from
pub const MIN_STABLE_RAW: f32 = 0.5;

/// One decoded and calibrated soil read
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoilReading {
    /// Volumetric water content (%)
    pub moisture: f32,
    /// °C
    pub temperature: f32,
    /// %
    pub humidity: f32,
    pub ph: f32,
    /// µS/cm
    pub ec: f32,
    /// mg/kg
    pub nitrogen: f32,
    pub phosphorus: f32,
    pub potassium: f32,
}

impl SoilReading {
    pub fn get(&self, parameter: SoilParameter) -> f32 {
        match parameter {
            SoilParameter::Moisture => self.moisture,
            SoilParameter::Temperature => self.temperature,
            SoilParameter::Humidity => self.humidity,
            SoilParameter::Ph => self.ph,
            SoilParameter::Ec => self.ec,
            SoilParameter::Nitrogen => self.nitrogen,
            SoilParameter::Phosphorus => self.phosphorus,
            SoilParameter::Potassium => self.potassium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoilParameter {
    Moisture,
    Temperature,
    Humidity,
    Ph,
    Ec,
    Nitrogen,
    Phosphorus,
    Potassium,
}

impl SoilParameter {
    pub const ALL: [SoilParameter; 8] = [
        SoilParameter::Moisture,
        SoilParameter::Temperature,
        SoilParameter::Humidity,
        SoilParameter::Ph,
        SoilParameter::Ec,
        SoilParameter::Nitrogen,
        SoilParameter::Phosphorus,
        SoilParameter::Potassium,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SoilParameter::Moisture => "moisture",
            SoilParameter::Temperature => "temperature",
            SoilParameter::Humidity => "humidity",
            SoilParameter::Ph => "ph",
            SoilParameter::Ec => "ec",
            SoilParameter::Nitrogen => "nitrogen",
            SoilParameter::Phosphorus => "phosphorus",
            SoilParameter::Potassium => "potassium",
        }
    }
}

impl std::fmt::Display for SoilParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SoilParameter {
    type Err = IrrigError;

    fn from_str(s: &str) -> Result<Self> {
        SoilParameter::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| IrrigError::config(format!("Unknown soil parameter: {}", s)))
    }
}

/// Parameters that accept a calibration factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationTarget {
    Moisture,
    Ph,
    Ec,
}

impl CalibrationTarget {
    fn register(&self) -> u16 {
        match self {
            CalibrationTarget::Moisture => REG_MOISTURE,
            CalibrationTarget::Ph => REG_PH,
            CalibrationTarget::Ec => REG_EC,
        }
    }

    /// Decoded value before the calibration multiply
    fn decode_raw(&self, register: u16) -> f32 {
        match self {
            CalibrationTarget::Moisture | CalibrationTarget::Ph => f32::from(register) / 10.0,
            CalibrationTarget::Ec => f32::from(register),
        }
    }

    /// ConfigStore key of the persisted factor
    pub fn store_key(&self) -> &'static str {
        match self {
            CalibrationTarget::Moisture => "calibration.moisture",
            CalibrationTarget::Ph => "calibration.ph",
            CalibrationTarget::Ec => "calibration.ec",
        }
    }
}

/// Multiplicative corrections applied after decoding
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFactors {
    pub moisture: f32,
    pub ph: f32,
    pub ec: f32,
}

impl Default for CalibrationFactors {
    fn default() -> Self {
        Self {
            moisture: 1.0,
            ph: 1.0,
            ec: 1.0,
        }
    }
}

impl CalibrationFactors {
    pub fn load(store: &dyn ConfigStore) -> Self {
        Self {
            moisture: load_or(store, CalibrationTarget::Moisture.store_key(), 1.0),
            ph: load_or(store, CalibrationTarget::Ph.store_key(), 1.0),
            ec: load_or(store, CalibrationTarget::Ec.store_key(), 1.0),
        }
    }

    fn slot(&mut self, target: CalibrationTarget) -> &mut f32 {
        match target {
            CalibrationTarget::Moisture => &mut self.moisture,
            CalibrationTarget::Ph => &mut self.ph,
            CalibrationTarget::Ec => &mut self.ec,
        }
    }
}

/// Inclusive plausibility bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidRange {
    pub min: f32,
    pub max: f32,
}

impl ValidRange {
    pub fn new(min: f32, max: f32) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(IrrigError::config(format!(
                "Invalid range [{}, {}]: min must be below max",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Per-parameter ranges; parameters without an entry are unconstrained
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRanges(BTreeMap<SoilParameter, ValidRange>);

impl Default for ValidRanges {
    fn default() -> Self {
        let mut ranges = BTreeMap::new();
        ranges.insert(SoilParameter::Moisture, ValidRange { min: 0.0, max: 100.0 });
        ranges.insert(SoilParameter::Temperature, ValidRange { min: -40.0, max: 80.0 });
        ranges.insert(SoilParameter::Ph, ValidRange { min: 3.0, max: 9.0 });
        ranges.insert(SoilParameter::Humidity, ValidRange { min: 0.0, max: 100.0 });
        Self(ranges)
    }
}

impl ValidRanges {
    pub fn get(&self, parameter: SoilParameter) -> Option<ValidRange> {
        self.0.get(&parameter).copied()
    }

    pub fn set(&mut self, parameter: SoilParameter, range: ValidRange) {
        self.0.insert(parameter, range);
    }

    /// First configured parameter whose value is out of range
    fn first_violation(&self, reading: &SoilReading) -> Option<(SoilParameter, f32, ValidRange)> {
        self.0.iter().find_map(|(parameter, range)| {
            let value = reading.get(*parameter);
            (!range.contains(value)).then_some((*parameter, value, *range))
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SoilReadError {
    #[error("Soil sensor bus error: {0}")]
    Bus(#[from] ModbusError),

    #[error("Soil {parameter} = {value} outside [{}, {}]", .range.min, .range.max)]
    OutOfRange {
        parameter: SoilParameter,
        value: f32,
        range: ValidRange,
    },
}

/// Decode the register block before calibration and range checks
fn decode(registers: &[u16], factors: &CalibrationFactors) -> SoilReading {
    let reg = |i: usize| f32::from(registers[i]);
    SoilReading {
        moisture: reg(0) / 10.0 * factors.moisture,
        temperature: f32::from(registers[1] as i16) / 10.0,
        ph: reg(2) / 10.0 * factors.ph,
        ec: reg(3) * factors.ec,
        nitrogen: reg(4),
        phosphorus: reg(5),
        potassium: reg(6),
        humidity: reg(7) / 10.0,
    }
}

/// Soil sensor driver
pub struct SoilSensorDriver {
    bus: Mutex<ModbusRtuClient>,
    stats: Arc<ModbusStatistics>,
    address: u8,
    initialized: AtomicBool,
    factors: RwLock<CalibrationFactors>,
    ranges: RwLock<ValidRanges>,
    last: RwLock<Option<SoilReading>>,
    store: Arc<dyn ConfigStore>,
}

impl std::fmt::Debug for SoilSensorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoilSensorDriver")
            .field("address", &self.address)
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .field("factors", &*self.factors.read())
            .finish()
    }
}

impl SoilSensorDriver {
    /// Take ownership of the bus client; calibration factors come from `store`
    pub fn new(client: ModbusRtuClient, address: u8, store: Arc<dyn ConfigStore>) -> Self {
        let factors = CalibrationFactors::load(store.as_ref());
        info!(
            address,
            moisture = factors.moisture,
            ph = factors.ph,
            ec = factors.ec,
            "Soil sensor driver created"
        );
        Self {
            stats: client.statistics(),
            bus: Mutex::new(client),
            address,
            initialized: AtomicBool::new(false),
            factors: RwLock::new(factors),
            ranges: RwLock::new(ValidRanges::default()),
            last: RwLock::new(None),
            store,
        }
    }

    /// Probe register 0 once
    pub async fn initialize(&self) -> bool {
        match self.probe().await {
            Ok(()) => {
                info!(address = self.address, "Soil sensor responding");
                true
            },
            Err(e) => {
                warn!(address = self.address, "Soil sensor not responding: {}", e);
                false
            },
        }
    }

    /// Re-probe the sensor
    pub async fn is_available(&self) -> bool {
        self.probe().await.is_ok()
    }

    async fn probe(&self) -> std::result::Result<(), ModbusError> {
        let result = self
            .bus
            .lock()
            .await
            .read_holding_registers(self.address, REG_MOISTURE, 1)
            .await;
        self.initialized.store(result.is_ok(), Ordering::Relaxed);
        result.map(|_| ())
    }

    /// Bulk-read and decode all fields.
    ///
    /// The stored reading only changes when every configured field is in
    /// range, so getters keep returning the last valid values after a failure.
    pub async fn read(&self) -> std::result::Result<SoilReading, SoilReadError> {
        if !self.initialized.load(Ordering::Relaxed) {
            self.probe().await?;
        }

        let registers = self
            .bus
            .lock()
            .await
            .read_holding_registers(self.address, 0, REGISTER_BLOCK_LEN)
            .await?;

        let factors = *self.factors.read();
        let reading = decode(&registers, &factors);

        if let Some((parameter, value, range)) = self.ranges.read().first_violation(&reading) {
            warn!(
                parameter = parameter.as_str(),
                value,
                min = range.min,
                max = range.max,
                "Soil read rejected: value out of range"
            );
            return Err(SoilReadError::OutOfRange {
                parameter,
                value,
                range,
            });
        }

        debug!(
            moisture = reading.moisture,
            temperature = reading.temperature,
            ph = reading.ph,
            ec = reading.ec,
            "Soil read"
        );
        *self.last.write() = Some(reading);
        Ok(reading)
    }

    pub fn last_reading(&self) -> Option<SoilReading> {
        *self.last.read()
    }

    fn last_field(&self, parameter: SoilParameter) -> Option<f32> {
        self.last.read().map(|r| r.get(parameter))
    }

    pub fn moisture(&self) -> Option<f32> {
        self.last_field(SoilParameter::Moisture)
    }

    pub fn temperature(&self) -> Option<f32> {
        self.last_field(SoilParameter::Temperature)
    }

    pub fn humidity(&self) -> Option<f32> {
        self.last_field(SoilParameter::Humidity)
    }

    pub fn ph(&self) -> Option<f32> {
        self.last_field(SoilParameter::Ph)
    }

    pub fn ec(&self) -> Option<f32> {
        self.last_field(SoilParameter::Ec)
    }

    pub fn nitrogen(&self) -> Option<f32> {
        self.last_field(SoilParameter::Nitrogen)
    }

    pub fn phosphorus(&self) -> Option<f32> {
        self.last_field(SoilParameter::Phosphorus)
    }

    pub fn potassium(&self) -> Option<f32> {
        self.last_field(SoilParameter::Potassium)
    }

    /// Solve `factor = reference / raw` from one live sample and persist it
    pub async fn calibrate(&self, target: CalibrationTarget, reference: f32) -> Result<f32> {
        if !reference.is_finite() || reference <= 0.0 {
            return Err(CalibrationError::InvalidReference(reference).into());
        }

        let sample = self
            .bus
            .lock()
            .await
            .read_holding_registers(self.address, target.register(), 1)
            .await
            .map_err(CalibrationError::from)?;

        let raw = target.decode_raw(sample[0]);
        if raw.abs() < MIN_STABLE_RAW {
            warn!(?target, raw, "Calibration rejected: raw value too small");
            return Err(CalibrationError::RawValueTooSmall {
                raw,
                minimum: MIN_STABLE_RAW,
            }
            .into());
        }

        let factor = reference / raw;
        self.store.set(target.store_key(), &factor.to_string())?;
        *self.factors.write().slot(target) = factor;
        info!(?target, raw, reference, factor, "Calibration factor updated");
        Ok(factor)
    }

    pub fn calibration_factors(&self) -> CalibrationFactors {
        *self.factors.read()
    }

    pub fn set_valid_range(&self, parameter: SoilParameter, min: f32, max: f32) -> Result<()> {
        let range = ValidRange::new(min, max)?;
        self.ranges.write().set(parameter, range);
        info!(parameter = parameter.as_str(), min, max, "Valid range updated");
        Ok(())
    }

    pub fn valid_range(&self, parameter: SoilParameter) -> Option<ValidRange> {
        self.ranges.read().get(parameter)
    }

    /// `true` when `value` passes the configured range (or none is set)
    pub fn is_within_valid_range(&self, parameter: SoilParameter, value: f32) -> bool {
        self.ranges
            .read()
            .get(parameter)
            .map_or(true, |range| range.contains(value))
    }

    /// Diagnostic FC06 write through the bus mutex
    pub async fn write_register(
        &self,
        register: u16,
        value: u16,
    ) -> std::result::Result<(), ModbusError> {
        self.bus
            .lock()
            .await
            .write_single_register(self.address, register, value)
            .await
    }

    /// Bus counters, readable without the bus lock
    pub fn statistics(&self) -> ModbusStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn address(&self) -> u8 {
        self.address
    }
}
