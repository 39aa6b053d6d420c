//! Bosch BME280 temperature/humidity/pressure sensor
//!
//! Register access goes through [`RegisterBus`] so the compensation and the
//! init sequence can be exercised without an I2C adapter. Bus calls are
//! blocking and run on the blocking pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::environment::{EnvironmentalReading, EnvironmentalSensor, SensorError};

pub const CHIP_ID: u8 = 0x60;

const REG_CHIP_ID: u8 = 0xD0;
const REG_CALIB_TP: u8 = 0x88;
const CALIB_TP_LEN: usize = 26;
const REG_CALIB_H: u8 = 0xE1;
const CALIB_H_LEN: usize = 7;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_CONFIG: u8 = 0xF5;
const REG_DATA: u8 = 0xF7;
const DATA_LEN: usize = 8;

/// Humidity oversampling x1
const CTRL_HUM_VALUE: u8 = 0x01;
/// Temperature x2, pressure x16, normal mode
const CTRL_MEAS_VALUE: u8 = 0x57;
/// Standby 500 ms, IIR filter x16
const CONFIG_VALUE: u8 = 0x90;

const SKIPPED_TP: i32 = 0x80000;
const SKIPPED_H: i32 = 0x8000;

/// Byte-register access to one device
pub trait RegisterBus: Send {
    fn read_registers(&mut self, start: u8, buf: &mut [u8]) -> Result<(), SensorError>;

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError>;
}

/// Factory trimming parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bme280Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p1: u16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
    pub p5: i16,
    pub p6: i16,
    pub p7: i16,
    pub p8: i16,
    pub p9: i16,
    pub h1: u8,
    pub h2: i16,
    pub h3: u8,
    pub h4: i16,
    pub h5: i16,
    pub h6: i8,
}

impl Bme280Calibration {
    /// Parse the 0x88..=0xA1 and 0xE1..=0xE7 blocks
    pub fn parse(tp: &[u8; CALIB_TP_LEN], h: &[u8; CALIB_H_LEN]) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([tp[i], tp[i + 1]]);
        let i16_at = |i: usize| i16::from_le_bytes([tp[i], tp[i + 1]]);

        Self {
            t1: u16_at(0),
            t2: i16_at(2),
            t3: i16_at(4),
            p1: u16_at(6),
            p2: i16_at(8),
            p3: i16_at(10),
            p4: i16_at(12),
            p5: i16_at(14),
            p6: i16_at(16),
            p7: i16_at(18),
            p8: i16_at(20),
            p9: i16_at(22),
            h1: tp[25],
            h2: i16::from_le_bytes([h[0], h[1]]),
            h3: h[2],
            // 12-bit values sharing the nibbles of 0xE5
            h4: (i16::from(h[3] as i8) << 4) | i16::from(h[4] & 0x0F),
            h5: (i16::from(h[5] as i8) << 4) | i16::from(h[4] >> 4),
            h6: h[6] as i8,
        }
    }

    /// Temperature in °C and the shared `t_fine`
    pub fn compensate_temperature(&self, adc_t: i32) -> (f64, f64) {
        let adc = f64::from(adc_t);
        let t1 = f64::from(self.t1);
        let var1 = (adc / 16384.0 - t1 / 1024.0) * f64::from(self.t2);
        let delta = adc / 131072.0 - t1 / 8192.0;
        let var2 = delta * delta * f64::from(self.t3);
        let t_fine = var1 + var2;
        (t_fine / 5120.0, t_fine)
    }

    /// Pressure in Pa
    pub fn compensate_pressure(&self, adc_p: i32, t_fine: f64) -> f64 {
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * f64::from(self.p6) / 32768.0;
        var2 += var1 * f64::from(self.p5) * 2.0;
        var2 = var2 / 4.0 + f64::from(self.p4) * 65536.0;
        var1 = (f64::from(self.p3) * var1 * var1 / 524288.0 + f64::from(self.p2) * var1)
            / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * f64::from(self.p1);
        if var1 == 0.0 {
            return 0.0;
        }
        let mut p = 1048576.0 - f64::from(adc_p);
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        let var1 = f64::from(self.p9) * p * p / 2147483648.0;
        let var2 = p * f64::from(self.p8) / 32768.0;
        p + (var1 + var2 + f64::from(self.p7)) / 16.0
    }

    /// Relative humidity in %, clamped to 0..=100
    pub fn compensate_humidity(&self, adc_h: i32, t_fine: f64) -> f64 {
        let h = t_fine - 76800.0;
        let h = (f64::from(adc_h)
            - (f64::from(self.h4) * 64.0 + f64::from(self.h5) / 16384.0 * h))
            * (f64::from(self.h2) / 65536.0
                * (1.0
                    + f64::from(self.h6) / 67108864.0
                        * h
                        * (1.0 + f64::from(self.h3) / 67108864.0 * h)));
        let h = h * (1.0 - f64::from(self.h1) * h / 524288.0);
        h.clamp(0.0, 100.0)
    }
}

struct Inner {
    bus: Box<dyn RegisterBus>,
    calibration: Option<Bme280Calibration>,
}

impl Inner {
    fn initialize(&mut self) -> Result<Bme280Calibration, SensorError> {
        let mut id = [0u8; 1];
        self.bus.read_registers(REG_CHIP_ID, &mut id)?;
        if id[0] != CHIP_ID {
            return Err(SensorError::WrongChipId {
                expected: CHIP_ID,
                actual: id[0],
            });
        }

        let mut tp = [0u8; CALIB_TP_LEN];
        let mut h = [0u8; CALIB_H_LEN];
        self.bus.read_registers(REG_CALIB_TP, &mut tp)?;
        self.bus.read_registers(REG_CALIB_H, &mut h)?;
        let calibration = Bme280Calibration::parse(&tp, &h);

        // ctrl_hum only takes effect after a ctrl_meas write
        self.bus.write_register(REG_CTRL_HUM, CTRL_HUM_VALUE)?;
        self.bus.write_register(REG_CTRL_MEAS, CTRL_MEAS_VALUE)?;
        self.bus.write_register(REG_CONFIG, CONFIG_VALUE)?;

        self.calibration = Some(calibration);
        Ok(calibration)
    }

    fn read(&mut self) -> Result<EnvironmentalReading, SensorError> {
        let calibration = match self.calibration {
            Some(c) => c,
            None => self.initialize()?,
        };

        let mut raw = [0u8; DATA_LEN];
        self.bus.read_registers(REG_DATA, &mut raw)?;
        let adc_p = (i32::from(raw[0]) << 12) | (i32::from(raw[1]) << 4) | (i32::from(raw[2]) >> 4);
        let adc_t = (i32::from(raw[3]) << 12) | (i32::from(raw[4]) << 4) | (i32::from(raw[5]) >> 4);
        let adc_h = (i32::from(raw[6]) << 8) | i32::from(raw[7]);

        if adc_t == SKIPPED_TP || adc_h == SKIPPED_H {
            return Err(SensorError::MeasurementSkipped);
        }

        let (temperature, t_fine) = calibration.compensate_temperature(adc_t);
        let pressure = calibration.compensate_pressure(adc_p, t_fine);
        let humidity = calibration.compensate_humidity(adc_h, t_fine);

        Ok(EnvironmentalReading {
            temperature: temperature as f32,
            humidity: humidity as f32,
            pressure: (pressure / 100.0) as f32,
        })
    }
}

/// BME280 on a register bus
pub struct Bme280 {
    inner: Arc<Mutex<Inner>>,
    initialized: AtomicBool,
}

impl Bme280 {
    pub fn new(bus: Box<dyn RegisterBus>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                bus,
                calibration: None,
            })),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, SensorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Inner) -> Result<T, SensorError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&mut *inner.lock()))
            .await
            .map_err(|e| SensorError::Bus(format!("I2C worker failed: {}", e)))?
    }
}

#[async_trait]
impl EnvironmentalSensor for Bme280 {
    fn name(&self) -> &str {
        "bme280"
    }

    async fn initialize(&self) -> Result<(), SensorError> {
        match self.blocking(Inner::initialize).await {
            Ok(calibration) => {
                self.initialized.store(true, Ordering::Relaxed);
                info!("BME280 initialized");
                debug!(?calibration, "BME280 calibration");
                Ok(())
            },
            Err(e) => {
                warn!("BME280 init failed: {}", e);
                Err(e)
            },
        }
    }

    async fn read(&self) -> Result<EnvironmentalReading, SensorError> {
        let reading = self.blocking(Inner::read).await?;
        self.initialized.store(true, Ordering::Relaxed);
        Ok(reading)
    }
}

/// Linux i2c-dev backend
#[cfg(all(target_os = "linux", feature = "i2c"))]
pub mod linux {
    use std::path::Path;

    use i2cdev::core::I2CDevice;
    use i2cdev::linux::LinuxI2CDevice;

    use super::RegisterBus;
    use crate::sensors::environment::SensorError;

    pub struct LinuxI2cBus {
        device: LinuxI2CDevice,
    }

    impl LinuxI2cBus {
        pub fn open(path: &Path, address: u8) -> Result<Self, SensorError> {
            let device = LinuxI2CDevice::new(path, u16::from(address)).map_err(|e| {
                SensorError::Unavailable(format!("{}: {}", path.display(), e))
            })?;
            Ok(Self { device })
        }
    }

    impl RegisterBus for LinuxI2cBus {
        fn read_registers(&mut self, start: u8, buf: &mut [u8]) -> Result<(), SensorError> {
            self.device
                .write(&[start])
                .and_then(|_| self.device.read(buf))
                .map_err(|e| SensorError::Bus(e.to_string()))
        }

        fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
            self.device
                .write(&[register, value])
                .map_err(|e| SensorError::Bus(e.to_string()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    /// 256-byte register file
    struct FakeBus {
        regs: Arc<Mutex<[u8; 256]>>,
    }

    impl RegisterBus for FakeBus {
        fn read_registers(&mut self, start: u8, buf: &mut [u8]) -> Result<(), SensorError> {
            let regs = self.regs.lock();
            let start = usize::from(start);
            buf.copy_from_slice(&regs[start..start + buf.len()]);
            Ok(())
        }

        fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
            self.regs.lock()[usize::from(register)] = value;
            Ok(())
        }
    }

    fn reference_calibration() -> Bme280Calibration {
        Bme280Calibration {
            t1: 27504,
            t2: 26435,
            t3: -1000,
            p1: 36477,
            p2: -10685,
            p3: 3024,
            p4: 2855,
            p5: 140,
            p6: -7,
            p7: 15500,
            p8: -14600,
            p9: 6000,
            h1: 75,
            h2: 362,
            h3: 0,
            h4: 313,
            h5: 50,
            h6: 30,
        }
    }

    fn write_le(regs: &mut [u8; 256], at: usize, bytes: [u8; 2]) {
        regs[at] = bytes[0];
        regs[at + 1] = bytes[1];
    }

    fn device_image(adc_t: u32, adc_p: u32, adc_h: u32) -> [u8; 256] {
        let c = reference_calibration();
        let mut regs = [0u8; 256];
        regs[0xD0] = CHIP_ID;
        write_le(&mut regs, 0x88, c.t1.to_le_bytes());
        write_le(&mut regs, 0x8A, c.t2.to_le_bytes());
        write_le(&mut regs, 0x8C, c.t3.to_le_bytes());
        write_le(&mut regs, 0x8E, c.p1.to_le_bytes());
        for (i, p) in [c.p2, c.p3, c.p4, c.p5, c.p6, c.p7, c.p8, c.p9].iter().enumerate() {
            write_le(&mut regs, 0x90 + 2 * i, p.to_le_bytes());
        }
        regs[0xA1] = c.h1;
        write_le(&mut regs, 0xE1, c.h2.to_le_bytes());
        regs[0xE3] = c.h3;
        regs[0xE4] = (c.h4 >> 4) as u8;
        regs[0xE5] = ((c.h5 & 0x0F) << 4) as u8 | (c.h4 & 0x0F) as u8;
        regs[0xE6] = (c.h5 >> 4) as u8;
        regs[0xE7] = c.h6 as u8;

        regs[0xF7] = (adc_p >> 12) as u8;
        regs[0xF8] = (adc_p >> 4) as u8;
        regs[0xF9] = ((adc_p & 0x0F) << 4) as u8;
        regs[0xFA] = (adc_t >> 12) as u8;
        regs[0xFB] = (adc_t >> 4) as u8;
        regs[0xFC] = ((adc_t & 0x0F) << 4) as u8;
        regs[0xFD] = (adc_h >> 8) as u8;
        regs[0xFE] = adc_h as u8;
        regs
    }

    #[test]
    fn bosch_reference_temperature_and_pressure() {
        let c = reference_calibration();
        let (temperature, t_fine) = c.compensate_temperature(519888);
        assert!((temperature - 25.08).abs() < 0.01);
        let pressure = c.compensate_pressure(415148, t_fine);
        assert!((pressure - 100653.27).abs() < 0.5);
        let humidity = c.compensate_humidity(30000, t_fine);
        assert!((humidity - 55.0).abs() < 0.1);
    }

    #[test]
    fn calibration_parses_shared_nibbles() {
        let regs = device_image(0, 0, 0);
        let mut tp = [0u8; CALIB_TP_LEN];
        tp.copy_from_slice(&regs[0x88..0x88 + CALIB_TP_LEN]);
        let mut h = [0u8; CALIB_H_LEN];
        h.copy_from_slice(&regs[0xE1..0xE1 + CALIB_H_LEN]);
        assert_eq!(Bme280Calibration::parse(&tp, &h), reference_calibration());
    }

    #[tokio::test]
    async fn init_configures_and_read_compensates() {
        let regs = Arc::new(Mutex::new(device_image(519888, 415148, 30000)));
        let sensor = Bme280::new(Box::new(FakeBus { regs: regs.clone() }));

        sensor.initialize().await.unwrap();
        assert!(sensor.is_initialized());
        {
            let regs = regs.lock();
            assert_eq!(regs[0xF2], 0x01);
            assert_eq!(regs[0xF4], 0x57);
            assert_eq!(regs[0xF5], 0x90);
        }

        let reading = sensor.read().await.unwrap();
        assert!((reading.temperature - 25.08).abs() < 0.01);
        assert!((reading.pressure - 1006.53).abs() < 0.01);
        assert!((reading.humidity - 55.0).abs() < 0.1);
    }

    #[tokio::test]
    async fn wrong_chip_id_rejected() {
        let mut image = device_image(519888, 415148, 30000);
        image[0xD0] = 0x58; // BMP280
        let sensor = Bme280::new(Box::new(FakeBus {
            regs: Arc::new(Mutex::new(image)),
        }));
        assert_eq!(
            sensor.initialize().await,
            Err(SensorError::WrongChipId {
                expected: 0x60,
                actual: 0x58
            })
        );
        assert!(!sensor.is_initialized());
    }

    #[tokio::test]
    async fn skipped_measurement_is_an_error() {
        let image = device_image(0x80000, 415148, 30000);
        let sensor = Bme280::new(Box::new(FakeBus {
            regs: Arc::new(Mutex::new(image)),
        }));
        assert_eq!(sensor.read().await, Err(SensorError::MeasurementSkipped));
    }
}
