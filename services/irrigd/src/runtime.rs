//! Wiring and task orchestration
//!
//! Builds the hardware layer (real or simulated), composes the controllers
//! into an [`IrrigationService`], and runs the acquisition task, the control
//! tick and the status logger until the cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use irrigation_protocols::dido::{
    DigitalInput, DigitalOutput, GpioDriver, MemoryGpioDriver, SysfsGpioDriver,
};
use irrigation_protocols::modbus::{ModbusRtuClient, SimulatedTransport};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::acquisition::{SensorAcquisitionTask, SensorSnapshot};
use crate::clock::Clock;
use crate::config::{AppConfig, HardwareConfig, ScheduleConfig};
use crate::error::Result;
use crate::pump::PumpActuator;
use crate::reservoir::{LevelSensors, ReservoirDecision, ReservoirManager};
use crate::sensors::{
    EnvironmentalReading, EnvironmentalSensor, SoilSensorDriver, StaticEnvironmentalSensor,
};
use crate::service::{ControlState, IrrigationService};
use crate::store::{ConfigStore, JsonFileStore, MemoryStore};
use crate::watering::{WateringController, WateringDecision};

/// Register image served by the simulated soil sensor
const SIMULATED_SOIL_REGISTERS: [u16; 8] = [420, 215, 68, 850, 32, 18, 45, 510];

/// Device handles the controllers are built on
pub struct Hardware {
    pub gpio: Arc<dyn GpioDriver>,
    pub soil_bus: ModbusRtuClient,
    pub environment: Arc<dyn EnvironmentalSensor>,
    pub store: Arc<dyn ConfigStore>,
}

impl Hardware {
    /// Sysfs GPIO, the RS-485 UART and the I2C environmental sensor.
    ///
    /// A missing field bus or environmental sensor degrades to "unavailable"
    /// readings; GPIO and storage failures are fatal.
    pub fn open(config: &AppConfig) -> Result<Self> {
        let gpio: Arc<dyn GpioDriver> =
            Arc::new(SysfsGpioDriver::new(config.hardware.gpio_base_path.clone()));
        if !gpio.is_available() {
            warn!(
                path = %config.hardware.gpio_base_path.display(),
                "GPIO sysfs not found, pin setup will fail"
            );
        }
        let soil_bus = field_bus(config, &gpio);
        let environment = environmental_sensor(&config.hardware);
        let store: Arc<dyn ConfigStore> = Arc::new(JsonFileStore::open(&config.storage.path)?);
        Ok(Self {
            gpio,
            soil_bus,
            environment,
            store,
        })
    }

    /// In-memory devices with plausible readings; nothing is persisted
    pub fn simulated(config: &AppConfig) -> Self {
        let hw = &config.hardware;
        let gpio = Arc::new(MemoryGpioDriver::new());
        // Reservoir between the marks: neither switch asserted
        gpio.set_level(hw.low_level_pin, hw.level_sensors_active_low);
        gpio.set_level(hw.high_level_pin, hw.level_sensors_active_low);

        let sim = SimulatedTransport::new(config.timing);
        sim.serve_registers(hw.soil_sensor_address, SIMULATED_SOIL_REGISTERS.to_vec());

        info!("Using simulated hardware");
        Self {
            gpio,
            soil_bus: ModbusRtuClient::new(Box::new(sim), config.modbus),
            environment: Arc::new(StaticEnvironmentalSensor::new(EnvironmentalReading {
                temperature: 22.5,
                humidity: 48.0,
                pressure: 1013.2,
            })),
            store: Arc::new(MemoryStore::new()),
        }
    }
}

#[cfg(feature = "serial")]
fn field_bus(config: &AppConfig, gpio: &Arc<dyn GpioDriver>) -> ModbusRtuClient {
    use irrigation_protocols::modbus::serial::{DirectionLine, GpioDirectionLine};
    use irrigation_protocols::modbus::SerialBusTransport;

    let direction = match config.hardware.direction_pin {
        Some(pin) => match GpioDirectionLine::new(Arc::clone(gpio), pin) {
            Ok(line) => Some(Box::new(line) as Box<dyn DirectionLine>),
            Err(e) => {
                warn!(pin, "RS-485 direction pin unavailable: {}", e);
                return ModbusRtuClient::without_transport(config.modbus);
            },
        },
        None => None,
    };

    match SerialBusTransport::open(&config.hardware.serial, config.timing, direction) {
        Ok(transport) => ModbusRtuClient::new(Box::new(transport), config.modbus),
        Err(e) => {
            warn!("Field bus unavailable, soil readings disabled: {}", e);
            ModbusRtuClient::without_transport(config.modbus)
        },
    }
}

#[cfg(not(feature = "serial"))]
fn field_bus(config: &AppConfig, _gpio: &Arc<dyn GpioDriver>) -> ModbusRtuClient {
    warn!("Built without serial support, soil readings disabled");
    ModbusRtuClient::without_transport(config.modbus)
}

#[cfg(all(target_os = "linux", feature = "i2c"))]
fn environmental_sensor(hw: &HardwareConfig) -> Arc<dyn EnvironmentalSensor> {
    use crate::sensors::bme280::linux::LinuxI2cBus;
    use crate::sensors::{Bme280, UnavailableEnvironmentalSensor};

    match LinuxI2cBus::open(&hw.i2c_bus, hw.bme280_address) {
        Ok(bus) => Arc::new(Bme280::new(Box::new(bus))),
        Err(e) => {
            warn!(address = hw.bme280_address, "BME280 unavailable: {}", e);
            Arc::new(UnavailableEnvironmentalSensor::new(e.to_string()))
        },
    }
}

#[cfg(not(all(target_os = "linux", feature = "i2c")))]
fn environmental_sensor(_hw: &HardwareConfig) -> Arc<dyn EnvironmentalSensor> {
    Arc::new(crate::sensors::UnavailableEnvironmentalSensor::new(
        "built without i2c support",
    ))
}

/// Composed controller, ready to run
pub struct Controller {
    service: Arc<IrrigationService>,
    acquisition: SensorAcquisitionTask,
    schedule: ScheduleConfig,
}

impl Controller {
    pub fn build(config: &AppConfig, hardware: Hardware, clock: Arc<dyn Clock>) -> Result<Self> {
        let hw = &config.hardware;
        let Hardware {
            gpio,
            soil_bus,
            environment,
            store,
        } = hardware;

        let plant_pump = PumpActuator::new(
            "plant",
            DigitalOutput::new(Arc::clone(&gpio), hw.plant_pump_pin, hw.pump_outputs_active_low)?,
            Arc::clone(&clock),
        );
        let reservoir_pump = PumpActuator::new(
            "reservoir",
            DigitalOutput::new(
                Arc::clone(&gpio),
                hw.reservoir_pump_pin,
                hw.pump_outputs_active_low,
            )?,
            Arc::clone(&clock),
        );
        let levels = LevelSensors::new(
            DigitalInput::new(Arc::clone(&gpio), hw.low_level_pin, hw.level_sensors_active_low)?,
            DigitalInput::new(Arc::clone(&gpio), hw.high_level_pin, hw.level_sensors_active_low)?,
        );

        let soil = Arc::new(SoilSensorDriver::new(
            soil_bus,
            hw.soil_sensor_address,
            Arc::clone(&store),
        ));
        let (acquisition, snapshots) = SensorAcquisitionTask::new(
            environment,
            Arc::clone(&soil),
            Arc::clone(&clock),
            config.schedule.acquisition_interval(),
        );

        let control = ControlState {
            plant_pump,
            reservoir_pump,
            watering: WateringController::new(
                store,
                &config.watering,
                config.schedule.max_snapshot_age(),
            ),
            reservoir: ReservoirManager::new(levels, &config.reservoir),
        };

        info!(
            plant_pump_pin = hw.plant_pump_pin,
            reservoir_pump_pin = hw.reservoir_pump_pin,
            low_level_pin = hw.low_level_pin,
            high_level_pin = hw.high_level_pin,
            soil_address = hw.soil_sensor_address,
            "Controller assembled"
        );

        Ok(Self {
            service: Arc::new(IrrigationService::new(control, soil, snapshots, clock)),
            acquisition,
            schedule: config.schedule.clone(),
        })
    }

    pub fn service(&self) -> Arc<IrrigationService> {
        Arc::clone(&self.service)
    }

    /// Initialize the sensors and take a single snapshot
    pub async fn probe(&mut self) -> Arc<SensorSnapshot> {
        self.acquisition.initialize().await;
        self.acquisition.run_cycle().await
    }

    /// Run until `token` is cancelled, then stop both pumps
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let Self {
            service,
            acquisition,
            schedule,
        } = self;

        let acquisition_handle = tokio::spawn(acquisition.run(token.clone()));
        let status_handle = tokio::spawn(status_loop(
            Arc::clone(&service),
            schedule.status_interval(),
            token.clone(),
        ));

        info!(
            control_tick_ms = schedule.control_tick_ms,
            acquisition_interval_secs = schedule.acquisition_interval_secs,
            "Controller running"
        );
        control_loop(&service, schedule.control_tick(), &token).await;

        if let Err(e) = acquisition_handle.await {
            error!("Acquisition task failed: {}", e);
        }
        if let Err(e) = status_handle.await {
            error!("Status task failed: {}", e);
        }
        service.shutdown();
        info!("Controller stopped");
        Ok(())
    }
}

/// Foreground loop; never waits on the field bus
async fn control_loop(service: &IrrigationService, period: Duration, token: &CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = service.tick();
                if outcome.watering != WateringDecision::Unchanged
                    || outcome.reservoir != ReservoirDecision::Unchanged
                {
                    debug!(?outcome, "Control tick");
                }
            }
            () = token.cancelled() => break,
        }
    }
}

async fn status_loop(service: Arc<IrrigationService>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => service.log_status(),
            () = token.cancelled() => break,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::service::Command;

    fn controller() -> Controller {
        let config = AppConfig::default();
        let hardware = Hardware::simulated(&config);
        Controller::build(&config, hardware, Arc::new(MonotonicClock::new())).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn probe_reads_simulated_sensors() {
        let mut controller = controller();
        let snapshot = controller.probe().await;
        assert_eq!(snapshot.sequence, 1);
        assert!((snapshot.soil.unwrap().moisture - 42.0).abs() < 1e-4);
        assert!(snapshot.environmental.is_some());

        let status = controller.service().status();
        assert_eq!(status.reservoir.low_level_detected, Some(false));
        assert_eq!(status.reservoir.high_level_detected, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_pumps_on_cancel() {
        let controller = controller();
        let service = controller.service();
        let token = CancellationToken::new();
        let handle = tokio::spawn(controller.run(token.clone()));

        service
            .execute(Command::StartWatering {
                duration_secs: None,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(service.status().watering.pump_running);

        token.cancel();
        handle.await.unwrap().unwrap();
        assert!(!service.status().watering.pump_running);
    }
}
