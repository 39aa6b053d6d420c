//! Moisture-driven watering controller
//!
//! Two states, `Idle` and `Watering`. An automatic run starts when soil
//! moisture drops below the low threshold and the minimum interval since the
//! previous watering has passed; it ends when the plant pump reports not
//! running. Manual commands share the same "last watering" timestamp, so
//! mixing manual and automatic control cannot bypass the interval guard.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::acquisition::SensorSnapshot;
use crate::config::WateringTuning;
use crate::error::{IrrigError, Result};
use crate::pump::PumpActuator;
use crate::store::{load_or, ConfigStore};

pub const KEY_THRESHOLD_LOW: &str = "watering.moisture_threshold_low";
pub const KEY_THRESHOLD_HIGH: &str = "watering.moisture_threshold_high";
pub const KEY_DURATION: &str = "watering.duration_secs";
pub const KEY_MIN_INTERVAL: &str = "watering.min_interval_secs";
pub const KEY_ENABLED: &str = "watering.enabled";

pub const MAX_DURATION_SECS: u64 = 300;

// ============================================================================
// Configuration
// ============================================================================

/// Thresholds and timing of automatic watering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WateringConfig {
    /// Start below this moisture (%)
    pub moisture_threshold_low: f32,
    /// Hysteresis upper bound (%)
    pub moisture_threshold_high: f32,
    pub duration_secs: u64,
    pub min_interval_secs: u64,
}

impl Default for WateringConfig {
    fn default() -> Self {
        Self {
            moisture_threshold_low: 30.0,
            moisture_threshold_high: 55.0,
            duration_secs: 20,
            min_interval_secs: 6 * 3600,
        }
    }
}

impl WateringConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("moisture_threshold_low", self.moisture_threshold_low),
            ("moisture_threshold_high", self.moisture_threshold_high),
        ] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(IrrigError::config(format!(
                    "{} must be within 0..=100, got {}",
                    name, value
                )));
            }
        }
        if self.moisture_threshold_low >= self.moisture_threshold_high {
            return Err(IrrigError::config(format!(
                "moisture_threshold_low ({}) must be below moisture_threshold_high ({})",
                self.moisture_threshold_low, self.moisture_threshold_high
            )));
        }
        if !(1..=MAX_DURATION_SECS).contains(&self.duration_secs) {
            return Err(IrrigError::config(format!(
                "duration_secs must be within 1..={}, got {}",
                MAX_DURATION_SECS, self.duration_secs
            )));
        }
        if self.min_interval_secs == 0 {
            return Err(IrrigError::config("min_interval_secs must be at least 1"));
        }
        Ok(())
    }

    /// Read the persisted settings; an invalid combination falls back to
    /// defaults as a whole
    pub fn load(store: &dyn ConfigStore) -> Self {
        let defaults = Self::default();
        let config = Self {
            moisture_threshold_low: load_or(
                store,
                KEY_THRESHOLD_LOW,
                defaults.moisture_threshold_low,
            ),
            moisture_threshold_high: load_or(
                store,
                KEY_THRESHOLD_HIGH,
                defaults.moisture_threshold_high,
            ),
            duration_secs: load_or(store, KEY_DURATION, defaults.duration_secs),
            min_interval_secs: load_or(store, KEY_MIN_INTERVAL, defaults.min_interval_secs),
        };
        match config.validate() {
            Ok(()) => config,
            Err(e) => {
                warn!("Persisted watering config rejected ({}), using defaults", e);
                defaults
            },
        }
    }

    pub fn save(&self, store: &dyn ConfigStore) -> Result<()> {
        store.set_many(&[
            (KEY_THRESHOLD_LOW, self.moisture_threshold_low.to_string()),
            (KEY_THRESHOLD_HIGH, self.moisture_threshold_high.to_string()),
            (KEY_DURATION, self.duration_secs.to_string()),
            (KEY_MIN_INTERVAL, self.min_interval_secs.to_string()),
        ])
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

/// Partial update from the operator surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WateringConfigUpdate {
    #[serde(default)]
    pub moisture_threshold_low: Option<f32>,
    #[serde(default)]
    pub moisture_threshold_high: Option<f32>,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub min_interval_secs: Option<u64>,
}

impl WateringConfigUpdate {
    /// Merge into a copy of `current` and validate the result
    pub fn apply(&self, current: &WateringConfig) -> Result<WateringConfig> {
        let merged = WateringConfig {
            moisture_threshold_low: self
                .moisture_threshold_low
                .unwrap_or(current.moisture_threshold_low),
            moisture_threshold_high: self
                .moisture_threshold_high
                .unwrap_or(current.moisture_threshold_high),
            duration_secs: self.duration_secs.unwrap_or(current.duration_secs),
            min_interval_secs: self.min_interval_secs.unwrap_or(current.min_interval_secs),
        };
        merged.validate()?;
        Ok(merged)
    }
}

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WateringState {
    Idle,
    Watering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOrigin {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WateringStopReason {
    /// Planned duration ran out
    DurationElapsed,
    /// Operator stop
    Manual,
    /// Fresh reading at or above the high threshold
    HighThreshold,
    /// Indefinite manual run hit the runtime ceiling
    ManualCeiling,
}

impl WateringStopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            WateringStopReason::DurationElapsed => "duration_elapsed",
            WateringStopReason::Manual => "manual",
            WateringStopReason::HighThreshold => "high_threshold",
            WateringStopReason::ManualCeiling => "manual_ceiling",
        }
    }
}

/// Why an evaluation made no start decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    ManualOverride,
    NoSoilReading,
    StaleSnapshot,
    AboveThreshold,
    IntervalNotElapsed,
    ActuatorFault,
}

/// Outcome of one [`WateringController::evaluate`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WateringDecision {
    Unchanged,
    Started,
    Finished(WateringStopReason),
    Skipped(SkipReason),
}

/// Operator view of the controller
#[derive(Debug, Clone, Serialize)]
pub struct WateringStatus {
    pub state: WateringState,
    pub automatic_enabled: bool,
    pub pump_running: bool,
    pub origin: Option<RunOrigin>,
    pub remaining_secs: Option<u64>,
    pub secs_since_last_watering: Option<u64>,
    pub last_stop_reason: Option<WateringStopReason>,
    pub config: WateringConfig,
}

pub struct WateringController {
    config: WateringConfig,
    enabled: bool,
    state: WateringState,
    origin: Option<RunOrigin>,
    /// Snapshot sequence the current automatic run started on
    start_sequence: u64,
    last_watering_ended: Option<Duration>,
    last_stop_reason: Option<WateringStopReason>,
    pending_stop_reason: Option<WateringStopReason>,
    manual_this_cycle: bool,
    early_stop_on_high: bool,
    manual_max_runtime: Duration,
    max_snapshot_age: Duration,
    store: Arc<dyn ConfigStore>,
}

impl std::fmt::Debug for WateringController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WateringController")
            .field("state", &self.state)
            .field("enabled", &self.enabled)
            .field("config", &self.config)
            .finish()
    }
}

impl WateringController {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        tuning: &WateringTuning,
        max_snapshot_age: Duration,
    ) -> Self {
        let config = WateringConfig::load(store.as_ref());
        let enabled = load_or(store.as_ref(), KEY_ENABLED, true);
        info!(
            low = config.moisture_threshold_low,
            high = config.moisture_threshold_high,
            duration_secs = config.duration_secs,
            min_interval_secs = config.min_interval_secs,
            enabled,
            "Watering controller ready"
        );
        Self {
            config,
            enabled,
            state: WateringState::Idle,
            origin: None,
            start_sequence: 0,
            last_watering_ended: None,
            last_stop_reason: None,
            pending_stop_reason: None,
            manual_this_cycle: false,
            early_stop_on_high: tuning.early_stop_on_high,
            manual_max_runtime: tuning.manual_max_runtime(),
            max_snapshot_age,
            store,
        }
    }

    /// One control cycle; the pump must already have been `update()`d
    pub fn evaluate(
        &mut self,
        pump: &mut PumpActuator,
        snapshot: &SensorSnapshot,
        now: Duration,
    ) -> WateringDecision {
        if self.state == WateringState::Watering && !pump.is_running() {
            let reason = self
                .pending_stop_reason
                .take()
                .unwrap_or(WateringStopReason::DurationElapsed);
            self.finish(reason, now);
            return WateringDecision::Finished(reason);
        }

        if std::mem::take(&mut self.manual_this_cycle) {
            return WateringDecision::Skipped(SkipReason::ManualOverride);
        }

        match self.state {
            WateringState::Watering => self.evaluate_running(pump, snapshot, now),
            WateringState::Idle => self.evaluate_idle(pump, snapshot, now),
        }
    }

    fn evaluate_running(
        &mut self,
        pump: &mut PumpActuator,
        snapshot: &SensorSnapshot,
        now: Duration,
    ) -> WateringDecision {
        let indefinite = pump.state().planned_duration.is_none();
        if self.origin == Some(RunOrigin::Manual) && indefinite {
            let elapsed = pump.elapsed().unwrap_or_default();
            if elapsed >= self.manual_max_runtime {
                warn!(
                    reason = WateringStopReason::ManualCeiling.as_str(),
                    elapsed_secs = elapsed.as_secs(),
                    "Manual watering reached runtime ceiling, stopping"
                );
                return self.stop_now(pump, WateringStopReason::ManualCeiling, now);
            }
        }

        if self.early_stop_on_high
            && self.origin == Some(RunOrigin::Automatic)
            && snapshot.sequence > self.start_sequence
            && self.is_fresh(snapshot, now)
        {
            if let Some(soil) = snapshot.soil {
                if soil.moisture >= self.config.moisture_threshold_high {
                    info!(
                        moisture = soil.moisture,
                        high = self.config.moisture_threshold_high,
                        "Moisture reached high threshold, stopping early"
                    );
                    return self.stop_now(pump, WateringStopReason::HighThreshold, now);
                }
            }
        }

        WateringDecision::Unchanged
    }

    fn evaluate_idle(
        &mut self,
        pump: &mut PumpActuator,
        snapshot: &SensorSnapshot,
        now: Duration,
    ) -> WateringDecision {
        if !self.enabled {
            return WateringDecision::Skipped(SkipReason::Disabled);
        }
        let Some(soil) = snapshot.soil else {
            return WateringDecision::Skipped(SkipReason::NoSoilReading);
        };
        if !self.is_fresh(snapshot, now) {
            debug!(sequence = snapshot.sequence, "Snapshot too old, skipping");
            return WateringDecision::Skipped(SkipReason::StaleSnapshot);
        }
        if soil.moisture >= self.config.moisture_threshold_low {
            return WateringDecision::Skipped(SkipReason::AboveThreshold);
        }
        if let Some(since) = self.time_since_last_watering(now) {
            if since < self.config.min_interval() {
                debug!(
                    moisture = soil.moisture,
                    remaining_secs = (self.config.min_interval() - since).as_secs(),
                    "Moisture low but minimum interval not elapsed"
                );
                return WateringDecision::Skipped(SkipReason::IntervalNotElapsed);
            }
        }

        if let Err(e) = pump.run_for(self.config.duration()) {
            warn!("Automatic watering could not start: {}", e);
            return WateringDecision::Skipped(SkipReason::ActuatorFault);
        }
        self.state = WateringState::Watering;
        self.origin = Some(RunOrigin::Automatic);
        self.start_sequence = snapshot.sequence;
        self.pending_stop_reason = None;
        info!(
            moisture = soil.moisture,
            low = self.config.moisture_threshold_low,
            duration_secs = self.config.duration_secs,
            "Watering started (automatic)"
        );
        WateringDecision::Started
    }

    fn is_fresh(&self, snapshot: &SensorSnapshot, now: Duration) -> bool {
        now.saturating_sub(snapshot.taken_at) <= self.max_snapshot_age
    }

    fn stop_now(
        &mut self,
        pump: &mut PumpActuator,
        reason: WateringStopReason,
        now: Duration,
    ) -> WateringDecision {
        match pump.stop() {
            Ok(()) => {
                self.finish(reason, now);
                WateringDecision::Finished(reason)
            },
            Err(e) => {
                // Stay in Watering; the next cycle retries
                warn!("Plant pump stop failed: {}", e);
                self.pending_stop_reason = Some(reason);
                WateringDecision::Unchanged
            },
        }
    }

    fn finish(&mut self, reason: WateringStopReason, now: Duration) {
        info!(
            reason = reason.as_str(),
            origin = ?self.origin,
            "Watering finished"
        );
        self.state = WateringState::Idle;
        self.origin = None;
        self.last_watering_ended = Some(now);
        self.last_stop_reason = Some(reason);
        self.pending_stop_reason = None;
    }

    /// Operator start. `None` or zero runs until stopped (bounded by the
    /// manual runtime ceiling); longer requests are capped at that ceiling.
    pub fn manual_start(
        &mut self,
        pump: &mut PumpActuator,
        duration: Option<Duration>,
    ) -> Result<()> {
        match duration.filter(|d| !d.is_zero()) {
            Some(requested) => {
                let capped = requested.min(self.manual_max_runtime);
                if capped < requested {
                    info!(
                        requested_secs = requested.as_secs(),
                        capped_secs = capped.as_secs(),
                        "Manual watering duration capped"
                    );
                }
                pump.run_for(capped)?;
            },
            None => pump.start()?,
        }
        self.state = WateringState::Watering;
        self.origin = Some(RunOrigin::Manual);
        self.pending_stop_reason = None;
        self.manual_this_cycle = true;
        info!(
            duration_secs = ?duration.map(|d| d.as_secs()),
            "Watering started (manual)"
        );
        Ok(())
    }

    /// Operator stop; a no-op when idle
    pub fn manual_stop(&mut self, pump: &mut PumpActuator, now: Duration) -> Result<()> {
        pump.stop()?;
        self.manual_this_cycle = true;
        if self.state == WateringState::Watering {
            self.finish(WateringStopReason::Manual, now);
        }
        Ok(())
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        self.store.set(KEY_ENABLED, &enabled.to_string())?;
        self.enabled = enabled;
        info!(enabled, "Automatic watering toggled");
        Ok(())
    }

    /// Validate and persist a partial update; on error nothing changes
    pub fn update_config(&mut self, update: &WateringConfigUpdate) -> Result<WateringConfig> {
        let next = update.apply(&self.config)?;
        next.save(self.store.as_ref())?;
        self.config = next;
        info!(
            low = next.moisture_threshold_low,
            high = next.moisture_threshold_high,
            duration_secs = next.duration_secs,
            min_interval_secs = next.min_interval_secs,
            "Watering config updated"
        );
        Ok(next)
    }

    pub fn config(&self) -> WateringConfig {
        self.config
    }

    pub fn state(&self) -> WateringState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn time_since_last_watering(&self, now: Duration) -> Option<Duration> {
        self.last_watering_ended
            .map(|ended| now.saturating_sub(ended))
    }

    pub fn status(&self, pump: &PumpActuator, now: Duration) -> WateringStatus {
        WateringStatus {
            state: self.state,
            automatic_enabled: self.enabled,
            pump_running: pump.is_running(),
            origin: self.origin,
            remaining_secs: pump.remaining().map(|d| d.as_secs()),
            secs_since_last_watering: self.time_since_last_watering(now).map(|d| d.as_secs()),
            last_stop_reason: self.last_stop_reason,
            config: self.config,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::sensors::SoilReading;
    use crate::store::MemoryStore;
    use irrigation_protocols::dido::{DigitalOutput, MemoryGpioDriver};

    struct Rig {
        controller: WateringController,
        pump: PumpActuator,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        sequence: u64,
    }

    fn rig_with(tuning: WateringTuning) -> Rig {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new());
        let gpio = Arc::new(MemoryGpioDriver::new());
        let output = DigitalOutput::new(gpio, 26, false).unwrap();
        Rig {
            controller: WateringController::new(store.clone(), &tuning, Duration::from_secs(180)),
            pump: PumpActuator::new("plant", output, clock.clone()),
            clock,
            store,
            sequence: 0,
        }
    }

    fn rig() -> Rig {
        rig_with(WateringTuning::default())
    }

    fn soil(moisture: f32) -> SoilReading {
        SoilReading {
            moisture,
            temperature: 21.0,
            humidity: 40.0,
            ph: 6.5,
            ec: 800.0,
            nitrogen: 10.0,
            phosphorus: 10.0,
            potassium: 10.0,
        }
    }

    impl Rig {
        fn snapshot(&mut self, moisture: Option<f32>) -> SensorSnapshot {
            self.sequence += 1;
            SensorSnapshot::new(self.sequence, self.clock.now(), None, moisture.map(soil))
        }

        fn tick(&mut self, snapshot: &SensorSnapshot) -> WateringDecision {
            self.pump.update();
            let now = self.clock.now();
            self.controller.evaluate(&mut self.pump, snapshot, now)
        }
    }

    #[test]
    fn low_moisture_starts_timed_run() {
        let mut rig = rig();
        let snap = rig.snapshot(Some(15.0));
        assert_eq!(rig.tick(&snap), WateringDecision::Started);
        assert!(rig.pump.is_running());
        assert_eq!(rig.pump.remaining(), Some(Duration::from_secs(20)));

        rig.clock.advance(Duration::from_secs(20));
        assert_eq!(
            rig.tick(&snap),
            WateringDecision::Finished(WateringStopReason::DurationElapsed)
        );
        assert_eq!(rig.controller.state(), WateringState::Idle);
        assert_eq!(
            rig.controller.time_since_last_watering(rig.clock.now()),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn threshold_is_strict() {
        let mut rig = rig();
        let snap = rig.snapshot(Some(30.0));
        assert_eq!(
            rig.tick(&snap),
            WateringDecision::Skipped(SkipReason::AboveThreshold)
        );
    }

    #[test]
    fn missing_or_stale_soil_skips() {
        let mut rig = rig();
        let snap = rig.snapshot(None);
        assert_eq!(
            rig.tick(&snap),
            WateringDecision::Skipped(SkipReason::NoSoilReading)
        );

        let snap = rig.snapshot(Some(10.0));
        rig.clock.advance(Duration::from_secs(181));
        assert_eq!(
            rig.tick(&snap),
            WateringDecision::Skipped(SkipReason::StaleSnapshot)
        );
        assert!(!rig.pump.is_running());
    }

    #[test]
    fn disabled_controller_does_not_start() {
        let mut rig = rig();
        rig.controller.set_enabled(false).unwrap();
        assert_eq!(rig.store.get(KEY_ENABLED).as_deref(), Some("false"));
        let snap = rig.snapshot(Some(5.0));
        assert_eq!(
            rig.tick(&snap),
            WateringDecision::Skipped(SkipReason::Disabled)
        );
    }

    #[test]
    fn manual_stop_updates_interval_guard() {
        let mut rig = rig();
        rig.controller.manual_start(&mut rig.pump, Some(Duration::from_secs(60))).unwrap();
        let snap = rig.snapshot(Some(5.0));
        // The manual command owns this cycle
        assert_eq!(
            rig.tick(&snap),
            WateringDecision::Skipped(SkipReason::ManualOverride)
        );

        rig.clock.advance(Duration::from_secs(10));
        let now = rig.clock.now();
        rig.controller.manual_stop(&mut rig.pump, now).unwrap();
        assert!(!rig.pump.is_running());

        rig.tick(&snap);
        rig.clock.advance(Duration::from_secs(60));
        let snap = rig.snapshot(Some(5.0));
        assert_eq!(
            rig.tick(&snap),
            WateringDecision::Skipped(SkipReason::IntervalNotElapsed)
        );
    }

    #[test]
    fn indefinite_manual_run_is_bounded() {
        let mut rig = rig_with(WateringTuning {
            early_stop_on_high: false,
            manual_max_runtime_secs: 120,
        });
        rig.controller.manual_start(&mut rig.pump, None).unwrap();
        assert_eq!(rig.pump.state().planned_duration, None);
        let snap = rig.snapshot(Some(50.0));
        rig.tick(&snap);

        rig.clock.advance(Duration::from_secs(119));
        assert_eq!(rig.tick(&snap), WateringDecision::Unchanged);
        rig.clock.advance(Duration::from_secs(1));
        assert_eq!(
            rig.tick(&snap),
            WateringDecision::Finished(WateringStopReason::ManualCeiling)
        );
        assert!(!rig.pump.is_running());
    }

    #[test]
    fn manual_duration_is_capped() {
        let mut rig = rig();
        rig.controller
            .manual_start(&mut rig.pump, Some(Duration::from_secs(3600)))
            .unwrap();
        assert_eq!(rig.pump.remaining(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn early_stop_needs_fresh_high_reading() {
        let mut rig = rig_with(WateringTuning {
            early_stop_on_high: true,
            manual_max_runtime_secs: 300,
        });
        let dry = rig.snapshot(Some(10.0));
        assert_eq!(rig.tick(&dry), WateringDecision::Started);
        assert_eq!(rig.tick(&dry), WateringDecision::Unchanged);

        rig.clock.advance(Duration::from_secs(5));
        let wet = rig.snapshot(Some(60.0));
        assert_eq!(
            rig.tick(&wet),
            WateringDecision::Finished(WateringStopReason::HighThreshold)
        );
    }

    #[test]
    fn early_stop_is_off_by_default() {
        let mut rig = rig();
        let dry = rig.snapshot(Some(10.0));
        rig.tick(&dry);
        let wet = rig.snapshot(Some(90.0));
        assert_eq!(rig.tick(&wet), WateringDecision::Unchanged);
        assert!(rig.pump.is_running());
    }

    #[test]
    fn config_update_validates_and_persists() {
        let mut rig = rig();
        let update = WateringConfigUpdate {
            moisture_threshold_low: Some(25.0),
            duration_secs: Some(45),
            ..Default::default()
        };
        let next = rig.controller.update_config(&update).unwrap();
        assert_eq!(next.moisture_threshold_low, 25.0);
        assert_eq!(next.moisture_threshold_high, 55.0);
        assert_eq!(rig.store.get(KEY_DURATION).as_deref(), Some("45"));

        let bad = WateringConfigUpdate {
            moisture_threshold_low: Some(70.0),
            ..Default::default()
        };
        assert!(matches!(
            rig.controller.update_config(&bad),
            Err(IrrigError::ConfigError(_))
        ));
        assert_eq!(rig.controller.config(), next);
        assert_eq!(rig.store.get(KEY_THRESHOLD_LOW).as_deref(), Some("25"));
    }

    #[test]
    fn config_bounds() {
        let base = WateringConfig::default();
        assert!(base.validate().is_ok());
        for bad in [
            WateringConfig { duration_secs: 0, ..base },
            WateringConfig { duration_secs: 301, ..base },
            WateringConfig { min_interval_secs: 0, ..base },
            WateringConfig { moisture_threshold_high: 120.0, ..base },
            WateringConfig { moisture_threshold_low: -1.0, ..base },
            WateringConfig { moisture_threshold_low: f32::NAN, ..base },
        ] {
            assert!(bad.validate().is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn invalid_persisted_config_falls_back() {
        let store = MemoryStore::with_entries([
            (KEY_THRESHOLD_LOW, "60"),
            (KEY_THRESHOLD_HIGH, "40"),
        ]);
        assert_eq!(WateringConfig::load(&store), WateringConfig::default());

        let store = MemoryStore::with_entries([(KEY_DURATION, "45"), (KEY_ENABLED, "false")]);
        assert_eq!(WateringConfig::load(&store).duration_secs, 45);
    }
}
