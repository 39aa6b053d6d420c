//! Daemon configuration
//!
//! Loaded once at startup from compiled defaults, `config/irrigd.yaml` and
//! `IRRIGD_*` environment variables. Runtime-tunable watering settings are not
//! here; they live in the [`ConfigStore`](crate::store::ConfigStore).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::LogSettings;
use irrigation_protocols::modbus::{ModbusClientConfig, SerialSettings, TransportTimingProfile};
use serde::{Deserialize, Serialize};

use crate::error::{IrrigError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config/irrigd.yaml";
pub const ENV_PREFIX: &str = "IRRIGD_";

// ============================================================================
// Application configuration
// ============================================================================

/// Application configuration root structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub hardware: HardwareConfig,

    /// Direction-control settle delays and inter-byte gap
    #[serde(default)]
    pub timing: TransportTimingProfile,

    /// Response deadline of the field-bus client
    #[serde(default)]
    pub modbus: ModbusClientConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub watering: WateringTuning,

    #[serde(default)]
    pub reservoir: ReservoirTuning,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LogSettings,
}

/// Pin assignments and bus parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// RS-485 serial line
    #[serde(default)]
    pub serial: SerialSettings,

    /// Modbus address of the soil sensor
    #[serde(default = "default_soil_address")]
    pub soil_sensor_address: u8,

    /// DE/RE pin; `None` for transceivers with automatic direction control
    #[serde(default = "default_direction_pin")]
    pub direction_pin: Option<u32>,

    #[serde(default = "default_plant_pump_pin")]
    pub plant_pump_pin: u32,

    #[serde(default = "default_reservoir_pump_pin")]
    pub reservoir_pump_pin: u32,

    #[serde(default = "default_low_level_pin")]
    pub low_level_pin: u32,

    #[serde(default = "default_high_level_pin")]
    pub high_level_pin: u32,

    /// Float switches pull the input to ground when closed
    #[serde(default = "default_true")]
    pub level_sensors_active_low: bool,

    #[serde(default)]
    pub pump_outputs_active_low: bool,

    /// Sysfs GPIO root
    #[serde(default = "default_gpio_base_path")]
    pub gpio_base_path: PathBuf,

    /// I2C bus device of the environmental sensor
    #[serde(default = "default_i2c_bus")]
    pub i2c_bus: PathBuf,

    #[serde(default = "default_bme280_address")]
    pub bme280_address: u8,
}

/// Task cadences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Sensor acquisition period (seconds)
    #[serde(default = "default_acquisition_interval")]
    pub acquisition_interval_secs: u64,

    /// Foreground control tick (milliseconds)
    #[serde(default = "default_control_tick")]
    pub control_tick_ms: u64,

    /// Status log line period (seconds)
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,

    /// Oldest snapshot the watering controller acts on; three acquisition
    /// periods when unset
    #[serde(default)]
    pub max_snapshot_age_secs: Option<u64>,
}

/// Static watering behavior (thresholds are runtime settings)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WateringTuning {
    /// Stop an automatic run early on a fresh reading at or above the high
    /// threshold
    #[serde(default)]
    pub early_stop_on_high: bool,

    /// Ceiling for a manual run started without a duration (seconds)
    #[serde(default = "default_manual_max_runtime")]
    pub manual_max_runtime_secs: u64,
}

/// Reservoir refill behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservoirTuning {
    /// Feature flag at boot; switchable at runtime
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub auto_level_control: bool,

    /// Safety ceiling on continuous pump runtime (seconds)
    #[serde(default = "default_reservoir_ceiling")]
    pub max_runtime_secs: u64,

    /// Cool-down before automatic refill resumes after a safety stop while
    /// the low switch stays asserted; 0 waits for the operator
    #[serde(default = "default_reservoir_retry")]
    pub retry_after_secs: u64,
}

/// Persisted settings location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

// ============================================================================
// Default values
// ============================================================================

fn default_true() -> bool {
    true
}

fn default_soil_address() -> u8 {
    0x01
}

fn default_direction_pin() -> Option<u32> {
    Some(25)
}

fn default_plant_pump_pin() -> u32 {
    26
}

fn default_reservoir_pump_pin() -> u32 {
    27
}

fn default_low_level_pin() -> u32 {
    32
}

fn default_high_level_pin() -> u32 {
    33
}

fn default_gpio_base_path() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

fn default_i2c_bus() -> PathBuf {
    PathBuf::from("/dev/i2c-1")
}

fn default_bme280_address() -> u8 {
    0x77
}

fn default_acquisition_interval() -> u64 {
    60
}

fn default_control_tick() -> u64 {
    250
}

fn default_status_interval() -> u64 {
    5
}

fn default_manual_max_runtime() -> u64 {
    300
}

fn default_reservoir_ceiling() -> u64 {
    300
}

fn default_reservoir_retry() -> u64 {
    3600
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/irrigd-settings.json")
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            soil_sensor_address: default_soil_address(),
            direction_pin: default_direction_pin(),
            plant_pump_pin: default_plant_pump_pin(),
            reservoir_pump_pin: default_reservoir_pump_pin(),
            low_level_pin: default_low_level_pin(),
            high_level_pin: default_high_level_pin(),
            level_sensors_active_low: true,
            pump_outputs_active_low: false,
            gpio_base_path: default_gpio_base_path(),
            i2c_bus: default_i2c_bus(),
            bme280_address: default_bme280_address(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            acquisition_interval_secs: default_acquisition_interval(),
            control_tick_ms: default_control_tick(),
            status_interval_secs: default_status_interval(),
            max_snapshot_age_secs: None,
        }
    }
}

impl Default for WateringTuning {
    fn default() -> Self {
        Self {
            early_stop_on_high: false,
            manual_max_runtime_secs: default_manual_max_runtime(),
        }
    }
}

impl Default for ReservoirTuning {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_level_control: true,
            max_runtime_secs: default_reservoir_ceiling(),
            retry_after_secs: default_reservoir_retry(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

impl AppConfig {
    /// Load from defaults, YAML and environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: AppConfig =
            common::load_layered(path, Path::new(DEFAULT_CONFIG_PATH), ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let schedule = &self.schedule;
        if schedule.acquisition_interval_secs == 0 {
            return Err(IrrigError::config(
                "schedule.acquisition_interval_secs must be greater than 0",
            ));
        }
        if schedule.control_tick_ms == 0 {
            return Err(IrrigError::config(
                "schedule.control_tick_ms must be greater than 0",
            ));
        }
        if schedule.status_interval_secs == 0 {
            return Err(IrrigError::config(
                "schedule.status_interval_secs must be greater than 0",
            ));
        }
        if schedule.max_snapshot_age_secs == Some(0) {
            return Err(IrrigError::config(
                "schedule.max_snapshot_age_secs must be greater than 0",
            ));
        }
        if self.modbus.response_timeout_ms == 0 {
            return Err(IrrigError::config(
                "modbus.response_timeout_ms must be greater than 0",
            ));
        }
        if self.timing.byte_timeout_ms == 0 {
            return Err(IrrigError::config(
                "timing.byte_timeout_ms must be greater than 0",
            ));
        }
        if self.reservoir.max_runtime_secs == 0 {
            return Err(IrrigError::config(
                "reservoir.max_runtime_secs must be greater than 0",
            ));
        }
        if self.watering.manual_max_runtime_secs == 0 {
            return Err(IrrigError::config(
                "watering.manual_max_runtime_secs must be greater than 0",
            ));
        }
        if self.hardware.serial.baud_rate == 0 {
            return Err(IrrigError::config("hardware.serial.baud_rate must be greater than 0"));
        }
        if !(1..=247).contains(&self.hardware.soil_sensor_address) {
            return Err(IrrigError::config(format!(
                "hardware.soil_sensor_address {} outside 1..=247",
                self.hardware.soil_sensor_address
            )));
        }

        self.validate_pins()
    }

    fn validate_pins(&self) -> Result<()> {
        let hw = &self.hardware;
        let mut pins: Vec<(&str, u32)> = vec![
            ("plant_pump_pin", hw.plant_pump_pin),
            ("reservoir_pump_pin", hw.reservoir_pump_pin),
            ("low_level_pin", hw.low_level_pin),
            ("high_level_pin", hw.high_level_pin),
        ];
        if let Some(pin) = hw.direction_pin {
            pins.push(("direction_pin", pin));
        }

        let mut seen: HashMap<u32, &str> = HashMap::new();
        for (name, pin) in pins {
            if let Some(other) = seen.insert(pin, name) {
                return Err(IrrigError::config(format!(
                    "GPIO {} assigned to both hardware.{} and hardware.{}",
                    pin, other, name
                )));
            }
        }
        Ok(())
    }
}

impl ScheduleConfig {
    pub fn acquisition_interval(&self) -> Duration {
        Duration::from_secs(self.acquisition_interval_secs)
    }

    pub fn control_tick(&self) -> Duration {
        Duration::from_millis(self.control_tick_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn max_snapshot_age(&self) -> Duration {
        let secs = self
            .max_snapshot_age_secs
            .unwrap_or(self.acquisition_interval_secs.saturating_mul(3));
        Duration::from_secs(secs)
    }
}

impl WateringTuning {
    pub fn manual_max_runtime(&self) -> Duration {
        Duration::from_secs(self.manual_max_runtime_secs)
    }
}

impl ReservoirTuning {
    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_secs)
    }

    /// `None` when only the operator may clear a safety lockout
    pub fn retry_after(&self) -> Option<Duration> {
        (self.retry_after_secs > 0).then(|| Duration::from_secs(self.retry_after_secs))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_board_wiring() {
        let config = AppConfig::default();
        assert_eq!(config.hardware.serial.baud_rate, 9600);
        assert_eq!(config.hardware.soil_sensor_address, 1);
        assert_eq!(config.hardware.direction_pin, Some(25));
        assert_eq!(config.hardware.plant_pump_pin, 26);
        assert_eq!(config.hardware.reservoir_pump_pin, 27);
        assert_eq!(config.hardware.low_level_pin, 32);
        assert_eq!(config.hardware.high_level_pin, 33);
        assert_eq!(config.hardware.bme280_address, 0x77);
        assert_eq!(config.reservoir.max_runtime(), Duration::from_secs(300));
        assert!(!config.reservoir.enabled);
        assert!(!config.watering.early_stop_on_high);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn snapshot_age_defaults_to_three_periods() {
        let mut schedule = ScheduleConfig::default();
        assert_eq!(schedule.max_snapshot_age(), Duration::from_secs(180));
        schedule.max_snapshot_age_secs = Some(30);
        assert_eq!(schedule.max_snapshot_age(), Duration::from_secs(30));
    }

    #[test]
    fn zero_ceiling_rejected() {
        let mut config = AppConfig::default();
        config.reservoir.max_runtime_secs = 0;
        assert!(matches!(config.validate(), Err(IrrigError::ConfigError(_))));
    }

    #[test]
    fn zero_tick_rejected() {
        let mut config = AppConfig::default();
        config.schedule.control_tick_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_pins_rejected() {
        let mut config = AppConfig::default();
        config.hardware.high_level_pin = config.hardware.plant_pump_pin;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("GPIO 26"));

        let mut config = AppConfig::default();
        config.hardware.direction_pin = Some(32);
        assert!(config.validate().is_err());
        config.hardware.direction_pin = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "hardware:\n  serial:\n    port: /dev/ttyUSB0\n  plant_pump_pin: 5\n\
             schedule:\n  acquisition_interval_secs: 10\n\
             reservoir:\n  enabled: true\n  max_runtime_secs: 120"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.hardware.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.hardware.serial.baud_rate, 9600);
        assert_eq!(config.hardware.plant_pump_pin, 5);
        assert_eq!(config.schedule.acquisition_interval(), Duration::from_secs(10));
        assert_eq!(config.schedule.max_snapshot_age(), Duration::from_secs(30));
        assert!(config.reservoir.enabled);
        assert_eq!(config.reservoir.max_runtime_secs, 120);
        assert_eq!(config.reservoir.retry_after(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/irrigd.yaml"))).unwrap_err();
        assert!(matches!(err, IrrigError::ConfigError(_)));
    }

    #[test]
    fn invalid_yaml_values_fail_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "schedule:\n  status_interval_secs: 0").unwrap();
        assert!(AppConfig::load(Some(file.path())).is_err());
    }
}
