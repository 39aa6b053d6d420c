//! Application state and the operator command/status surface
//!
//! `IrrigationService` owns both pumps and both controllers behind one
//! mutex. The control tick, operator commands and shutdown all go through it,
//! so each physical pump has exactly one logical owner. Nothing here touches
//! the field bus except the diagnostic commands, which use the soil driver's
//! own bus mutex.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use irrigation_protocols::modbus::ModbusStatsSnapshot;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::acquisition::{SensorSnapshot, SnapshotReceiver};
use crate::clock::Clock;
use crate::error::Result;
use crate::pump::PumpActuator;
use crate::reservoir::{ReservoirDecision, ReservoirManager, ReservoirState};
use crate::sensors::{CalibrationFactors, CalibrationTarget, SoilParameter, SoilSensorDriver};
use crate::watering::{
    WateringConfig, WateringConfigUpdate, WateringController, WateringDecision, WateringStatus,
};

/// Everything the control tick mutates
pub struct ControlState {
    pub plant_pump: PumpActuator,
    pub reservoir_pump: PumpActuator,
    pub watering: WateringController,
    pub reservoir: ReservoirManager,
}

/// Inbound operator command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Manual watering; no duration (or 0) runs until stopped
    StartWatering {
        #[serde(default)]
        duration_secs: Option<u64>,
    },
    StopWatering,
    SetAutoWatering {
        enabled: bool,
    },
    UpdateWateringConfig(WateringConfigUpdate),
    SetReservoirEnabled {
        enabled: bool,
    },
    SetAutoLevelControl {
        enabled: bool,
    },
    /// Manual fill; no duration (or 0) runs until the high level
    FillReservoir {
        #[serde(default)]
        duration_secs: Option<u64>,
    },
    StopReservoir,
    Calibrate {
        target: CalibrationTarget,
        reference: f32,
    },
    SetValidRange {
        parameter: SoilParameter,
        min: f32,
        max: f32,
    },
    WriteRegister {
        register: u16,
        value: u16,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandResponse {
    Ok,
    WateringConfig(WateringConfig),
    CalibrationFactor {
        target: CalibrationTarget,
        factor: f32,
    },
}

/// Outbound status for the operator
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub timestamp: DateTime<Utc>,
    pub snapshot: SensorSnapshot,
    /// `None` before the first acquisition
    pub snapshot_age_secs: Option<u64>,
    pub watering: WateringStatus,
    pub reservoir: ReservoirState,
    pub calibration: CalibrationFactors,
    pub bus: ModbusStatsSnapshot,
}

/// Decisions of one control tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub watering: WateringDecision,
    pub reservoir: ReservoirDecision,
}

pub struct IrrigationService {
    control: Mutex<ControlState>,
    soil: Arc<SoilSensorDriver>,
    snapshots: SnapshotReceiver,
    clock: Arc<dyn Clock>,
}

impl IrrigationService {
    pub fn new(
        control: ControlState,
        soil: Arc<SoilSensorDriver>,
        snapshots: SnapshotReceiver,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            control: Mutex::new(control),
            soil,
            snapshots,
            clock,
        }
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<SensorSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// One foreground cycle: pump expiry first, then both state machines.
    /// Never waits on the field bus.
    pub fn tick(&self) -> TickOutcome {
        let snapshot = self.snapshot();
        let now = self.clock.now();

        let mut guard = self.control.lock();
        let state = &mut *guard;
        state.plant_pump.update();
        state.reservoir_pump.update();

        TickOutcome {
            watering: state
                .watering
                .evaluate(&mut state.plant_pump, &snapshot, now),
            reservoir: state.reservoir.tick(&mut state.reservoir_pump),
        }
    }

    pub async fn execute(&self, command: Command) -> Result<CommandResponse> {
        info!(?command, "Operator command");
        match command {
            Command::StartWatering { duration_secs } => self.with_control(|state, _| {
                state
                    .watering
                    .manual_start(&mut state.plant_pump, duration_secs.map(Duration::from_secs))
            }),
            Command::StopWatering => self.with_control(|state, now| {
                state.watering.manual_stop(&mut state.plant_pump, now)
            }),
            Command::SetAutoWatering { enabled } => {
                self.with_control(|state, _| state.watering.set_enabled(enabled))
            },
            Command::UpdateWateringConfig(update) => {
                let config = self.control.lock().watering.update_config(&update)?;
                Ok(CommandResponse::WateringConfig(config))
            },
            Command::SetReservoirEnabled { enabled } => self.with_control(|state, _| {
                state
                    .reservoir
                    .set_enabled(&mut state.reservoir_pump, enabled)
            }),
            Command::SetAutoLevelControl { enabled } => {
                self.with_control(|state, _| state.reservoir.set_auto_level_control(enabled))
            },
            Command::FillReservoir { duration_secs } => self.with_control(|state, _| {
                state.reservoir.manual_fill(
                    &mut state.reservoir_pump,
                    duration_secs.map(Duration::from_secs),
                )
            }),
            Command::StopReservoir => self.with_control(|state, _| {
                state.reservoir.manual_stop(&mut state.reservoir_pump)
            }),
            Command::Calibrate { target, reference } => {
                let factor = self.soil.calibrate(target, reference).await?;
                Ok(CommandResponse::CalibrationFactor { target, factor })
            },
            Command::SetValidRange {
                parameter,
                min,
                max,
            } => {
                self.soil.set_valid_range(parameter, min, max)?;
                Ok(CommandResponse::Ok)
            },
            Command::WriteRegister { register, value } => {
                self.soil.write_register(register, value).await?;
                Ok(CommandResponse::Ok)
            },
        }
    }

    /// Run a state mutation under the control lock
    fn with_control(
        &self,
        op: impl FnOnce(&mut ControlState, Duration) -> Result<()>,
    ) -> Result<CommandResponse> {
        let now = self.clock.now();
        let mut state = self.control.lock();
        op(&mut state, now)?;
        Ok(CommandResponse::Ok)
    }

    pub fn watering_config(&self) -> WateringConfig {
        self.control.lock().watering.config()
    }

    pub fn status(&self) -> SystemStatus {
        let snapshot = self.snapshot();
        let now = self.clock.now();
        let (watering, reservoir) = {
            let state = self.control.lock();
            (
                state.watering.status(&state.plant_pump, now),
                state.reservoir.state(&state.reservoir_pump),
            )
        };

        SystemStatus {
            timestamp: Utc::now(),
            snapshot_age_secs: (snapshot.sequence > 0)
                .then(|| now.saturating_sub(snapshot.taken_at).as_secs()),
            snapshot: (*snapshot).clone(),
            watering,
            reservoir,
            calibration: self.soil.calibration_factors(),
            bus: self.soil.statistics(),
        }
    }

    /// Periodic one-line summary
    pub fn log_status(&self) {
        let status = self.status();
        let soil = status.snapshot.soil;
        let env = status.snapshot.environmental;
        info!(
            moisture = ?soil.map(|s| s.moisture),
            soil_temperature = ?soil.map(|s| s.temperature),
            air_temperature = ?env.map(|e| e.temperature),
            air_humidity = ?env.map(|e| e.humidity),
            plant_pump = status.watering.pump_running,
            auto_watering = status.watering.automatic_enabled,
            reservoir_pump = status.reservoir.pump_running,
            reservoir_low = ?status.reservoir.low_level_detected,
            reservoir_high = ?status.reservoir.high_level_detected,
            bus_ok = status.bus.success_count,
            bus_err = status.bus.error_count,
            bus_last_error = status.bus.last_error_code,
            "Status"
        );
    }

    /// Stop both pumps
    pub fn shutdown(&self) {
        let now = self.clock.now();
        let mut guard = self.control.lock();
        let state = &mut *guard;
        if let Err(e) = state.watering.manual_stop(&mut state.plant_pump, now) {
            error!("Plant pump stop at shutdown failed: {}", e);
        }
        if let Err(e) = state.reservoir.manual_stop(&mut state.reservoir_pump) {
            error!("Reservoir pump stop at shutdown failed: {}", e);
        }
        info!("Pumps stopped");
    }
}
