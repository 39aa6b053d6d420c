//! Reservoir refill manager
//!
//! Fills the reservoir from the low-level switch up to the high-level switch.
//! Both switches are read from hardware every cycle. Pump runtime is bounded
//! by a fixed safety ceiling so a stuck or disconnected high switch cannot
//! leave the pump running. After a safety stop, automatic refill stays
//! locked out until the low switch releases, the operator intervenes, or the
//! configured cool-down has passed.

use std::time::Duration;

use irrigation_protocols::dido::{DigitalInput, GpioError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ReservoirTuning;
use crate::error::{IrrigError, RejectReason, Result};
use crate::pump::PumpActuator;

/// Low and high float switches
#[derive(Debug, Clone)]
pub struct LevelSensors {
    low: DigitalInput,
    high: DigitalInput,
}

/// Live switch states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelReading {
    /// Water is at or below the low switch
    pub low: bool,
    /// Water reached the high switch
    pub high: bool,
}

impl LevelSensors {
    pub fn new(low: DigitalInput, high: DigitalInput) -> Self {
        Self { low, high }
    }

    pub fn read(&self) -> std::result::Result<LevelReading, GpioError> {
        Ok(LevelReading {
            low: self.low.is_asserted()?,
            high: self.high.is_asserted()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservoirPhase {
    Idle,
    Filling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FillOrigin {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStopReason {
    /// Normal completion
    HighLevel,
    /// Runtime ceiling reached (fail-safe)
    SafetyTimeout,
    Manual,
    FeatureDisabled,
    /// Requested manual duration ran out
    DurationElapsed,
    /// Level switches unreadable while filling
    SensorFault,
}

impl FillStopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillStopReason::HighLevel => "high_level",
            FillStopReason::SafetyTimeout => "safety_timeout",
            FillStopReason::Manual => "manual",
            FillStopReason::FeatureDisabled => "feature_disabled",
            FillStopReason::DurationElapsed => "duration_elapsed",
            FillStopReason::SensorFault => "sensor_fault",
        }
    }
}

/// Outcome of one [`ReservoirManager::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservoirDecision {
    Unchanged,
    Started,
    Stopped(FillStopReason),
    /// Switches unreadable while idle; no fill may start
    SensorUnavailable,
}

/// Projection of live inputs and pump bookkeeping for the operator surface
#[derive(Debug, Clone, Serialize)]
pub struct ReservoirState {
    pub enabled: bool,
    pub auto_level_control_enabled: bool,
    /// `None` when the switch could not be read
    pub low_level_detected: Option<bool>,
    pub high_level_detected: Option<bool>,
    pub pump_running: bool,
    pub phase: ReservoirPhase,
    pub origin: Option<FillOrigin>,
    pub remaining_secs: Option<u64>,
    pub last_stop_reason: Option<FillStopReason>,
    /// Automatic refill blocked after a safety stop
    pub safety_lockout: bool,
    /// Time until the lockout expires on its own; `None` if only the
    /// operator or the low switch can clear it
    pub lockout_remaining_secs: Option<u64>,
}

pub struct ReservoirManager {
    levels: LevelSensors,
    enabled: bool,
    auto_level_control: bool,
    max_runtime: Duration,
    retry_after: Option<Duration>,
    /// Set when the safety ceiling stopped a fill
    lockout_since: Option<Duration>,
    phase: ReservoirPhase,
    origin: Option<FillOrigin>,
    last_stop_reason: Option<FillStopReason>,
    sensor_fault_reported: bool,
}

impl std::fmt::Debug for ReservoirManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservoirManager")
            .field("enabled", &self.enabled)
            .field("auto_level_control", &self.auto_level_control)
            .field("phase", &self.phase)
            .field("max_runtime", &self.max_runtime)
            .field("lockout_since", &self.lockout_since)
            .finish()
    }
}

impl ReservoirManager {
    pub fn new(levels: LevelSensors, tuning: &ReservoirTuning) -> Self {
        info!(
            enabled = tuning.enabled,
            auto_level_control = tuning.auto_level_control,
            max_runtime_secs = tuning.max_runtime_secs,
            retry_after_secs = tuning.retry_after_secs,
            "Reservoir manager ready"
        );
        Self {
            levels,
            enabled: tuning.enabled,
            auto_level_control: tuning.auto_level_control,
            max_runtime: tuning.max_runtime(),
            retry_after: tuning.retry_after(),
            lockout_since: None,
            phase: ReservoirPhase::Idle,
            origin: None,
            last_stop_reason: None,
            sensor_fault_reported: false,
        }
    }

    /// One control cycle; the pump must already have been `update()`d
    pub fn tick(&mut self, pump: &mut PumpActuator) -> ReservoirDecision {
        if !self.enabled {
            if self.phase == ReservoirPhase::Filling || pump.is_running() {
                return self.stop(pump, FillStopReason::FeatureDisabled);
            }
            return ReservoirDecision::Unchanged;
        }

        match self.phase {
            ReservoirPhase::Filling => self.tick_filling(pump),
            ReservoirPhase::Idle => self.tick_idle(pump),
        }
    }

    fn tick_filling(&mut self, pump: &mut PumpActuator) -> ReservoirDecision {
        if !pump.is_running() {
            self.finish(FillStopReason::DurationElapsed);
            return ReservoirDecision::Stopped(FillStopReason::DurationElapsed);
        }

        // Checked before the switches so a sensor problem cannot mask it
        let elapsed = pump.elapsed().unwrap_or_default();
        if elapsed >= self.max_runtime {
            warn!(
                reason = FillStopReason::SafetyTimeout.as_str(),
                elapsed_secs = elapsed.as_secs(),
                max_runtime_secs = self.max_runtime.as_secs(),
                "Reservoir pump exceeded safety ceiling, stopping"
            );
            let decision = self.stop(pump, FillStopReason::SafetyTimeout);
            if decision == ReservoirDecision::Stopped(FillStopReason::SafetyTimeout) {
                self.lockout_since = Some(pump.now());
                warn!(
                    retry_after_secs = ?self.retry_after.map(|d| d.as_secs()),
                    "Automatic refill locked out"
                );
            }
            return decision;
        }

        match self.levels.read() {
            Ok(reading) if reading.high => self.stop(pump, FillStopReason::HighLevel),
            Ok(_) => ReservoirDecision::Unchanged,
            Err(e) => {
                warn!(
                    reason = FillStopReason::SensorFault.as_str(),
                    "Level switches unreadable while filling: {}", e
                );
                self.stop(pump, FillStopReason::SensorFault)
            },
        }
    }

    fn tick_idle(&mut self, pump: &mut PumpActuator) -> ReservoirDecision {
        if !self.auto_level_control {
            return ReservoirDecision::Unchanged;
        }

        let reading = match self.levels.read() {
            Ok(reading) => {
                if std::mem::take(&mut self.sensor_fault_reported) {
                    info!("Level switches readable again");
                }
                reading
            },
            Err(e) => {
                if !self.sensor_fault_reported {
                    warn!("Level switches unreadable, refill blocked: {}", e);
                    self.sensor_fault_reported = true;
                }
                return ReservoirDecision::SensorUnavailable;
            },
        };

        if self.lockout_since.is_some() {
            if !reading.low {
                self.clear_lockout("low level released");
            } else if self.lockout_remaining(pump.now()) == Some(Duration::ZERO) {
                self.clear_lockout("cool-down elapsed");
            } else {
                return ReservoirDecision::Unchanged;
            }
        }

        if !reading.low || reading.high {
            return ReservoirDecision::Unchanged;
        }

        if let Err(e) = pump.start() {
            warn!("Reservoir refill could not start: {}", e);
            return ReservoirDecision::Unchanged;
        }
        self.phase = ReservoirPhase::Filling;
        self.origin = Some(FillOrigin::Automatic);
        info!("Reservoir filling started (low level)");
        ReservoirDecision::Started
    }

    fn clear_lockout(&mut self, cause: &'static str) {
        if self.lockout_since.take().is_some() {
            info!(cause, "Reservoir refill lockout cleared");
        }
    }

    fn lockout_remaining(&self, now: Duration) -> Option<Duration> {
        let since = self.lockout_since?;
        let retry_after = self.retry_after?;
        Some(retry_after.saturating_sub(now.saturating_sub(since)))
    }

    fn stop(&mut self, pump: &mut PumpActuator, reason: FillStopReason) -> ReservoirDecision {
        match pump.stop() {
            Ok(()) => {
                self.finish(reason);
                ReservoirDecision::Stopped(reason)
            },
            Err(e) => {
                // Phase stays Filling so the next tick tries again
                warn!(reason = reason.as_str(), "Reservoir pump stop failed: {}", e);
                ReservoirDecision::Unchanged
            },
        }
    }

    fn finish(&mut self, reason: FillStopReason) {
        if reason != FillStopReason::SafetyTimeout {
            info!(reason = reason.as_str(), origin = ?self.origin, "Reservoir filling stopped");
        }
        self.phase = ReservoirPhase::Idle;
        self.origin = None;
        self.last_stop_reason = Some(reason);
    }

    /// Operator fill. `None` or zero runs until the high level; a duration is
    /// capped at the safety ceiling.
    pub fn manual_fill(
        &mut self,
        pump: &mut PumpActuator,
        duration: Option<Duration>,
    ) -> Result<()> {
        if !self.enabled {
            info!(reason = RejectReason::FeatureDisabled.as_str(), "Manual fill rejected");
            return Err(IrrigError::Rejected(RejectReason::FeatureDisabled));
        }
        let reading = self.levels.read().map_err(|e| {
            warn!("Manual fill rejected, level switches unreadable: {}", e);
            IrrigError::Rejected(RejectReason::LevelSensorUnavailable)
        })?;
        if reading.high {
            info!(reason = RejectReason::AlreadyFull.as_str(), "Manual fill rejected");
            return Err(IrrigError::Rejected(RejectReason::AlreadyFull));
        }

        match duration.filter(|d| !d.is_zero()) {
            Some(requested) => pump.run_for(requested.min(self.max_runtime))?,
            None => pump.start()?,
        }
        self.clear_lockout("manual fill");
        self.phase = ReservoirPhase::Filling;
        self.origin = Some(FillOrigin::Manual);
        info!(
            duration_secs = ?duration.map(|d| d.as_secs()),
            "Reservoir filling started (manual)"
        );
        Ok(())
    }

    pub fn manual_stop(&mut self, pump: &mut PumpActuator) -> Result<()> {
        pump.stop()?;
        if self.phase == ReservoirPhase::Filling {
            self.finish(FillStopReason::Manual);
        }
        Ok(())
    }

    /// Toggle the feature; disabling stops an in-progress fill at once
    pub fn set_enabled(&mut self, pump: &mut PumpActuator, enabled: bool) -> Result<()> {
        if !enabled && (self.phase == ReservoirPhase::Filling || pump.is_running()) {
            pump.stop()?;
            self.finish(FillStopReason::FeatureDisabled);
        }
        self.enabled = enabled;
        self.clear_lockout("feature toggled");
        info!(enabled, "Reservoir feature toggled");
        Ok(())
    }

    /// Auto-level control can only be switched on while the feature is enabled
    pub fn set_auto_level_control(&mut self, enabled: bool) -> Result<()> {
        if enabled && !self.enabled {
            return Err(IrrigError::Rejected(RejectReason::FeatureDisabled));
        }
        self.auto_level_control = enabled;
        debug!(enabled, "Reservoir auto-level control toggled");
        Ok(())
    }

    pub fn phase(&self) -> ReservoirPhase {
        self.phase
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_runtime(&self) -> Duration {
        self.max_runtime
    }

    pub fn state(&self, pump: &PumpActuator) -> ReservoirState {
        let levels = self.levels.read().ok();
        ReservoirState {
            enabled: self.enabled,
            auto_level_control_enabled: self.auto_level_control,
            low_level_detected: levels.map(|l| l.low),
            high_level_detected: levels.map(|l| l.high),
            pump_running: pump.is_running(),
            phase: self.phase,
            origin: self.origin,
            remaining_secs: self.remaining(pump).map(|d| d.as_secs()),
            last_stop_reason: self.last_stop_reason,
            safety_lockout: self.lockout_since.is_some(),
            lockout_remaining_secs: self.lockout_remaining(pump.now()).map(|d| d.as_secs()),
        }
    }

    /// Planned remainder, or time left before the safety ceiling
    fn remaining(&self, pump: &PumpActuator) -> Option<Duration> {
        let elapsed = pump.elapsed()?;
        let ceiling_left = self.max_runtime.saturating_sub(elapsed);
        Some(match pump.remaining() {
            Some(planned) => planned.min(ceiling_left),
            None => ceiling_left,
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use irrigation_protocols::dido::{DigitalOutput, MemoryGpioDriver};
    use std::sync::Arc;
    use tracing_test::traced_test;

    const PUMP: u32 = 27;
    const LOW: u32 = 32;
    const HIGH: u32 = 33;

    struct Rig {
        manager: ReservoirManager,
        pump: PumpActuator,
        gpio: Arc<MemoryGpioDriver>,
        clock: Arc<ManualClock>,
    }

    impl Rig {
        fn new(enabled: bool) -> Self {
            let gpio = Arc::new(MemoryGpioDriver::new());
            let clock = Arc::new(ManualClock::new());
            // Active-low switches: released reads high
            gpio.set_level(LOW, true);
            gpio.set_level(HIGH, true);
            let levels = LevelSensors::new(
                DigitalInput::new(gpio.clone(), LOW, true).unwrap(),
                DigitalInput::new(gpio.clone(), HIGH, true).unwrap(),
            );
            let tuning = ReservoirTuning {
                enabled,
                ..Default::default()
            };
            let output = DigitalOutput::new(gpio.clone(), PUMP, false).unwrap();
            Self {
                manager: ReservoirManager::new(levels, &tuning),
                pump: PumpActuator::new("reservoir", output, clock.clone()),
                gpio,
                clock,
            }
        }

        fn set_low(&self, asserted: bool) {
            self.gpio.set_level(LOW, !asserted);
        }

        fn set_high(&self, asserted: bool) {
            self.gpio.set_level(HIGH, !asserted);
        }

        fn tick(&mut self) -> ReservoirDecision {
            self.pump.update();
            self.manager.tick(&mut self.pump)
        }
    }

    #[test]
    fn fills_from_low_to_high() {
        let mut rig = Rig::new(true);
        assert_eq!(rig.tick(), ReservoirDecision::Unchanged);

        rig.set_low(true);
        assert_eq!(rig.tick(), ReservoirDecision::Started);
        assert!(rig.gpio.level(PUMP));

        rig.clock.advance(Duration::from_secs(30));
        rig.set_low(false);
        assert_eq!(rig.tick(), ReservoirDecision::Unchanged);

        rig.set_high(true);
        assert_eq!(
            rig.tick(),
            ReservoirDecision::Stopped(FillStopReason::HighLevel)
        );
        let state = rig.manager.state(&rig.pump);
        assert!(!state.pump_running);
        assert_eq!(state.phase, ReservoirPhase::Idle);
        assert_eq!(state.high_level_detected, Some(true));
    }

    #[test]
    #[traced_test]
    fn safety_ceiling_stops_runaway_pump() {
        let mut rig = Rig::new(true);
        rig.set_low(true);
        assert_eq!(rig.tick(), ReservoirDecision::Started);

        rig.clock.advance(Duration::from_secs(299));
        assert_eq!(rig.tick(), ReservoirDecision::Unchanged);
        assert_eq!(rig.manager.state(&rig.pump).remaining_secs, Some(1));

        rig.clock.advance(Duration::from_secs(1));
        assert_eq!(
            rig.tick(),
            ReservoirDecision::Stopped(FillStopReason::SafetyTimeout)
        );
        assert!(!rig.pump.is_running());
        assert!(logs_contain("safety_timeout"));
    }

    fn run_into_ceiling(rig: &mut Rig) {
        rig.set_low(true);
        assert_eq!(rig.tick(), ReservoirDecision::Started);
        rig.clock.advance(Duration::from_secs(300));
        assert_eq!(
            rig.tick(),
            ReservoirDecision::Stopped(FillStopReason::SafetyTimeout)
        );
    }

    #[test]
    #[traced_test]
    fn safety_stop_locks_out_refill_until_cool_down() {
        let mut rig = Rig::new(true);
        run_into_ceiling(&mut rig);

        // High switch stuck released, low still asserted
        rig.clock.advance(Duration::from_millis(250));
        assert_eq!(rig.tick(), ReservoirDecision::Unchanged);
        assert!(!rig.gpio.level(PUMP));

        let state = rig.manager.state(&rig.pump);
        assert!(state.safety_lockout);
        assert_eq!(state.lockout_remaining_secs, Some(3599));

        rig.clock.advance(Duration::from_secs(3599));
        assert_eq!(rig.tick(), ReservoirDecision::Unchanged);
        rig.clock.advance(Duration::from_secs(1));
        assert_eq!(rig.tick(), ReservoirDecision::Started);
        assert!(!rig.manager.state(&rig.pump).safety_lockout);
        assert!(logs_contain("cool-down elapsed"));
    }

    #[test]
    fn safety_lockout_without_cool_down_waits_for_operator() {
        let mut rig = Rig::new(true);
        rig.manager.retry_after = None;
        run_into_ceiling(&mut rig);

        rig.clock.advance(Duration::from_secs(24 * 3600));
        assert_eq!(rig.tick(), ReservoirDecision::Unchanged);
        let state = rig.manager.state(&rig.pump);
        assert!(state.safety_lockout);
        assert_eq!(state.lockout_remaining_secs, None);

        rig.manager.set_enabled(&mut rig.pump, true).unwrap();
        assert_eq!(rig.tick(), ReservoirDecision::Started);
    }

    #[test]
    fn safety_lockout_clears_on_low_release_or_manual_fill() {
        let mut rig = Rig::new(true);
        run_into_ceiling(&mut rig);

        rig.set_low(false);
        assert_eq!(rig.tick(), ReservoirDecision::Unchanged);
        assert!(!rig.manager.state(&rig.pump).safety_lockout);
        rig.set_low(true);
        assert_eq!(rig.tick(), ReservoirDecision::Started);

        let mut rig = Rig::new(true);
        run_into_ceiling(&mut rig);
        rig.manager.manual_fill(&mut rig.pump, None).unwrap();
        assert!(!rig.manager.state(&rig.pump).safety_lockout);
        assert!(rig.pump.is_running());
    }

    #[test]
    fn disabled_feature_force_stops() {
        let mut rig = Rig::new(true);
        rig.manager.manual_fill(&mut rig.pump, None).unwrap();
        assert!(rig.pump.is_running());

        rig.manager.set_enabled(&mut rig.pump, false).unwrap();
        assert!(!rig.pump.is_running());
        assert_eq!(
            rig.manager.state(&rig.pump).last_stop_reason,
            Some(FillStopReason::FeatureDisabled)
        );

        // A pump started behind the manager's back is stopped too
        rig.pump.start().unwrap();
        assert_eq!(
            rig.tick(),
            ReservoirDecision::Stopped(FillStopReason::FeatureDisabled)
        );
    }

    #[test]
    fn manual_fill_rejections() {
        let mut rig = Rig::new(false);
        assert_eq!(
            rig.manager.manual_fill(&mut rig.pump, None),
            Err(IrrigError::Rejected(RejectReason::FeatureDisabled))
        );

        rig.manager.set_enabled(&mut rig.pump, true).unwrap();
        rig.set_high(true);
        assert_eq!(
            rig.manager.manual_fill(&mut rig.pump, Some(Duration::from_secs(10))),
            Err(IrrigError::Rejected(RejectReason::AlreadyFull))
        );
        assert!(!rig.pump.is_running());
    }

    #[test]
    fn manual_fill_duration_is_capped_and_expires() {
        let mut rig = Rig::new(true);
        rig.manager
            .manual_fill(&mut rig.pump, Some(Duration::from_secs(900)))
            .unwrap();
        assert_eq!(rig.pump.remaining(), Some(Duration::from_secs(300)));

        let mut rig = Rig::new(true);
        rig.manager
            .manual_fill(&mut rig.pump, Some(Duration::from_secs(10)))
            .unwrap();
        rig.clock.advance(Duration::from_secs(10));
        assert_eq!(
            rig.tick(),
            ReservoirDecision::Stopped(FillStopReason::DurationElapsed)
        );
    }

    #[test]
    #[traced_test]
    fn manual_stop_is_distinct_from_safety_stop() {
        let mut rig = Rig::new(true);
        rig.manager.manual_fill(&mut rig.pump, None).unwrap();
        rig.manager.manual_stop(&mut rig.pump).unwrap();
        assert_eq!(
            rig.manager.state(&rig.pump).last_stop_reason,
            Some(FillStopReason::Manual)
        );
        assert!(logs_contain("Reservoir filling stopped"));
        assert!(!logs_contain("safety_timeout"));
    }

    #[test]
    fn sensor_fault_stops_fill_and_blocks_start() {
        let mut rig = Rig::new(true);
        rig.set_low(true);
        rig.tick();
        rig.gpio.set_failing(HIGH, true);
        assert_eq!(
            rig.tick(),
            ReservoirDecision::Stopped(FillStopReason::SensorFault)
        );
        assert_eq!(rig.tick(), ReservoirDecision::SensorUnavailable);
        assert!(!rig.pump.is_running());

        let state = rig.manager.state(&rig.pump);
        assert_eq!(state.high_level_detected, None);
    }

    #[test]
    fn auto_level_requires_feature() {
        let mut rig = Rig::new(false);
        assert!(rig.manager.set_auto_level_control(true).is_err());
        assert!(rig.manager.set_auto_level_control(false).is_ok());

        let mut rig = Rig::new(true);
        rig.manager.set_auto_level_control(false).unwrap();
        rig.set_low(true);
        assert_eq!(rig.tick(), ReservoirDecision::Unchanged);
        assert!(!rig.pump.is_running());
    }
}
