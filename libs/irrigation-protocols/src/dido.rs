//! DI/DO (Digital Input/Output) - Low-level Implementation
//!
//! Provides GPIO-based digital I/O for pump relays, level switches and the
//! RS-485 direction line.
//!
//! # Architecture
//!
//! - `GpioDriver` trait for abstraction
//! - `SysfsGpioDriver` for Linux sysfs GPIO access
//! - `MemoryGpioDriver` for tests and simulated runs
//! - `DigitalInput` / `DigitalOutput` bind one pin with its polarity

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GpioError {
    #[error("GPIO {gpio} read failed: {reason}")]
    Read { gpio: u32, reason: String },

    #[error("GPIO {gpio} write failed: {reason}")]
    Write { gpio: u32, reason: String },

    #[error("GPIO {gpio} setup failed: {reason}")]
    Setup { gpio: u32, reason: String },
}

/// Pin direction as written to the sysfs `direction` file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDirection {
    Input,
    Output,
}

impl PinDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PinDirection::Input => "in",
            PinDirection::Output => "out",
        }
    }
}

/// GPIO driver trait for abstraction
pub trait GpioDriver: Send + Sync {
    /// Read raw pin level
    fn read(&self, gpio_number: u32) -> Result<bool, GpioError>;

    /// Write raw pin level
    fn write(&self, gpio_number: u32, value: bool) -> Result<(), GpioError>;

    /// Export the pin and set its direction
    fn setup(&self, gpio_number: u32, direction: PinDirection) -> Result<(), GpioError>;

    /// Check if driver is available
    fn is_available(&self) -> bool;
}

/// Sysfs GPIO driver for Linux
#[derive(Debug, Clone)]
pub struct SysfsGpioDriver {
    base_path: PathBuf,
}

impl SysfsGpioDriver {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn value_path(&self, gpio_number: u32) -> PathBuf {
        self.base_path
            .join(format!("gpio{}", gpio_number))
            .join("value")
    }
}

impl Default for SysfsGpioDriver {
    fn default() -> Self {
        Self::new("/sys/class/gpio")
    }
}

impl GpioDriver for SysfsGpioDriver {
    fn read(&self, gpio_number: u32) -> Result<bool, GpioError> {
        match std::fs::read_to_string(self.value_path(gpio_number)) {
            Ok(content) => Ok(content.trim() == "1"),
            Err(e) => {
                debug!("Failed to read GPIO {}: {}", gpio_number, e);
                Err(GpioError::Read {
                    gpio: gpio_number,
                    reason: e.to_string(),
                })
            },
        }
    }

    fn write(&self, gpio_number: u32, value: bool) -> Result<(), GpioError> {
        let content = if value { "1" } else { "0" };
        std::fs::write(self.value_path(gpio_number), content).map_err(|e| {
            warn!("Failed to write GPIO {}: {}", gpio_number, e);
            GpioError::Write {
                gpio: gpio_number,
                reason: e.to_string(),
            }
        })
    }

    fn setup(&self, gpio_number: u32, direction: PinDirection) -> Result<(), GpioError> {
        let gpio_path = self.base_path.join(format!("gpio{}", gpio_number));

        if !gpio_path.exists() {
            if let Err(e) = std::fs::write(self.base_path.join("export"), gpio_number.to_string())
            {
                // Ignore "device busy" errors (already exported)
                if !e.to_string().contains("Device or resource busy") {
                    warn!("Failed to export GPIO {}: {}", gpio_number, e);
                }
            }
        }

        std::fs::write(gpio_path.join("direction"), direction.as_str()).map_err(|e| {
            warn!(
                "Failed to set GPIO {} direction to {}: {}",
                gpio_number,
                direction.as_str(),
                e
            );
            GpioError::Setup {
                gpio: gpio_number,
                reason: e.to_string(),
            }
        })
    }

    fn is_available(&self) -> bool {
        Path::new(&self.base_path).exists()
    }
}

/// In-memory GPIO bank
///
/// Inputs are set from the outside with [`MemoryGpioDriver::set_level`];
/// every write is also appended to a history.
#[derive(Debug, Default)]
pub struct MemoryGpioDriver {
    levels: Mutex<HashMap<u32, bool>>,
    directions: Mutex<HashMap<u32, PinDirection>>,
    failing: Mutex<HashMap<u32, bool>>,
    writes: Mutex<Vec<(u32, bool)>>,
}

impl MemoryGpioDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive an input pin (as the outside world would)
    pub fn set_level(&self, gpio_number: u32, value: bool) {
        self.levels.lock().insert(gpio_number, value);
    }

    /// Current raw level, `false` if never touched
    pub fn level(&self, gpio_number: u32) -> bool {
        self.levels
            .lock()
            .get(&gpio_number)
            .copied()
            .unwrap_or(false)
    }

    pub fn direction(&self, gpio_number: u32) -> Option<PinDirection> {
        self.directions.lock().get(&gpio_number).copied()
    }

    /// Make reads and writes of `gpio_number` fail
    pub fn set_failing(&self, gpio_number: u32, failing: bool) {
        self.failing.lock().insert(gpio_number, failing);
    }

    pub fn write_history(&self) -> Vec<(u32, bool)> {
        self.writes.lock().clone()
    }

    fn is_failing(&self, gpio_number: u32) -> bool {
        self.failing
            .lock()
            .get(&gpio_number)
            .copied()
            .unwrap_or(false)
    }
}

impl GpioDriver for MemoryGpioDriver {
    fn read(&self, gpio_number: u32) -> Result<bool, GpioError> {
        if self.is_failing(gpio_number) {
            return Err(GpioError::Read {
                gpio: gpio_number,
                reason: "simulated fault".to_string(),
            });
        }
        Ok(self.level(gpio_number))
    }

    fn write(&self, gpio_number: u32, value: bool) -> Result<(), GpioError> {
        if self.is_failing(gpio_number) {
            return Err(GpioError::Write {
                gpio: gpio_number,
                reason: "simulated fault".to_string(),
            });
        }
        self.levels.lock().insert(gpio_number, value);
        self.writes.lock().push((gpio_number, value));
        Ok(())
    }

    fn setup(&self, gpio_number: u32, direction: PinDirection) -> Result<(), GpioError> {
        self.directions.lock().insert(gpio_number, direction);
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// One input pin with polarity
#[derive(Clone)]
pub struct DigitalInput {
    driver: Arc<dyn GpioDriver>,
    gpio_number: u32,
    active_low: bool,
}

impl DigitalInput {
    pub fn new(
        driver: Arc<dyn GpioDriver>,
        gpio_number: u32,
        active_low: bool,
    ) -> Result<Self, GpioError> {
        driver.setup(gpio_number, PinDirection::Input)?;
        Ok(Self {
            driver,
            gpio_number,
            active_low,
        })
    }

    /// Logical state: `true` when asserted
    pub fn is_asserted(&self) -> Result<bool, GpioError> {
        let raw = self.driver.read(self.gpio_number)?;
        Ok(raw != self.active_low)
    }

    pub fn gpio_number(&self) -> u32 {
        self.gpio_number
    }
}

impl std::fmt::Debug for DigitalInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitalInput")
            .field("gpio", &self.gpio_number)
            .field("active_low", &self.active_low)
            .finish()
    }
}

/// One output pin with polarity
#[derive(Clone)]
pub struct DigitalOutput {
    driver: Arc<dyn GpioDriver>,
    gpio_number: u32,
    active_low: bool,
}

impl DigitalOutput {
    /// Configure the pin as an output and drive it inactive
    pub fn new(
        driver: Arc<dyn GpioDriver>,
        gpio_number: u32,
        active_low: bool,
    ) -> Result<Self, GpioError> {
        driver.setup(gpio_number, PinDirection::Output)?;
        let output = Self {
            driver,
            gpio_number,
            active_low,
        };
        output.set(false)?;
        Ok(output)
    }

    /// Drive the logical state
    pub fn set(&self, active: bool) -> Result<(), GpioError> {
        self.driver.write(self.gpio_number, active != self.active_low)
    }

    pub fn gpio_number(&self) -> u32 {
        self.gpio_number
    }
}

impl std::fmt::Debug for DigitalOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitalOutput")
            .field("gpio", &self.gpio_number)
            .field("active_low", &self.active_low)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_active_low_input_inverts() {
        let mock = Arc::new(MemoryGpioDriver::new());
        let input = DigitalInput::new(mock.clone(), 32, true).unwrap();
        assert_eq!(mock.direction(32), Some(PinDirection::Input));

        // Pulled up, switch open
        mock.set_level(32, true);
        assert!(!input.is_asserted().unwrap());

        // Switch closes to ground
        mock.set_level(32, false);
        assert!(input.is_asserted().unwrap());
    }

    #[test]
    fn test_output_starts_inactive() {
        let mock = Arc::new(MemoryGpioDriver::new());
        let output = DigitalOutput::new(mock.clone(), 26, false).unwrap();
        assert_eq!(mock.write_history(), vec![(26, false)]);

        output.set(true).unwrap();
        assert!(mock.level(26));
    }

    #[test]
    fn test_active_low_output() {
        let mock = Arc::new(MemoryGpioDriver::new());
        let output = DigitalOutput::new(mock.clone(), 27, true).unwrap();
        assert!(mock.level(27));
        output.set(true).unwrap();
        assert!(!mock.level(27));
    }

    #[test]
    fn test_failing_pin_reports_error() {
        let mock = Arc::new(MemoryGpioDriver::new());
        let input = DigitalInput::new(mock.clone(), 33, false).unwrap();
        mock.set_failing(33, true);
        assert!(matches!(
            input.is_asserted(),
            Err(GpioError::Read { gpio: 33, .. })
        ));
    }

    #[test]
    fn test_sysfs_driver_against_temp_tree() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        std::fs::write(base.join("export"), "").unwrap();
        std::fs::create_dir_all(base.join("gpio26")).unwrap();
        std::fs::write(base.join("gpio26/value"), "0").unwrap();

        let driver = SysfsGpioDriver::new(base);
        assert!(driver.is_available());
        driver.setup(26, PinDirection::Output).unwrap();
        assert_eq!(
            std::fs::read_to_string(base.join("gpio26/direction")).unwrap(),
            "out"
        );

        driver.write(26, true).unwrap();
        assert!(driver.read(26).unwrap());
        assert!(driver.read(99).is_err());
    }
}
