//! Pump actuator
//!
//! Drives one relay output and keeps the run bookkeeping. There is no timer
//! task: the owner calls [`PumpActuator::update`] every control tick and the
//! planned duration is enforced there.

use std::sync::Arc;
use std::time::Duration;

use irrigation_protocols::dido::{DigitalOutput, GpioError};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;

/// Run bookkeeping of one pump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PumpRunState {
    pub running: bool,
    /// Clock reading at start
    #[serde(skip)]
    pub started_at: Option<Duration>,
    /// `None` while running means indefinite
    #[serde(skip)]
    pub planned_duration: Option<Duration>,
    /// Set by `run_for`, cleared by `start`
    pub manual: bool,
}

pub struct PumpActuator {
    name: &'static str,
    output: DigitalOutput,
    clock: Arc<dyn Clock>,
    state: PumpRunState,
}

impl std::fmt::Debug for PumpActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PumpActuator")
            .field("name", &self.name)
            .field("output", &self.output)
            .field("state", &self.state)
            .finish()
    }
}

impl PumpActuator {
    pub fn new(name: &'static str, output: DigitalOutput, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            output,
            clock,
            state: PumpRunState::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run until stopped
    pub fn start(&mut self) -> Result<(), GpioError> {
        self.energize(None)?;
        self.state.manual = false;
        info!(pump = self.name, "Pump started");
        Ok(())
    }

    /// Run for `duration`; zero is a stop
    pub fn run_for(&mut self, duration: Duration) -> Result<(), GpioError> {
        if duration.is_zero() {
            return self.stop();
        }
        self.energize(Some(duration))?;
        self.state.manual = true;
        info!(
            pump = self.name,
            duration_secs = duration.as_secs_f64(),
            "Pump started for fixed duration"
        );
        Ok(())
    }

    fn energize(&mut self, planned: Option<Duration>) -> Result<(), GpioError> {
        self.output.set(true).map_err(|e| {
            error!(pump = self.name, "Pump start failed: {}", e);
            e
        })?;
        self.state = PumpRunState {
            running: true,
            started_at: Some(self.clock.now()),
            planned_duration: planned,
            manual: false,
        };
        Ok(())
    }

    /// De-energize; safe to call when already stopped.
    ///
    /// The run state is only cleared once the output write succeeded.
    pub fn stop(&mut self) -> Result<(), GpioError> {
        if let Err(e) = self.output.set(false) {
            error!(pump = self.name, "Pump stop failed: {}", e);
            return Err(e);
        }
        if self.state.running {
            let ran_secs = self.elapsed().unwrap_or_default().as_secs_f64();
            self.state = PumpRunState::default();
            info!(pump = self.name, ran_secs, "Pump stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    /// Enforce the planned duration. Returns `true` when this call stopped
    /// the pump.
    pub fn update(&mut self) -> bool {
        if !self.state.running {
            return false;
        }
        let (Some(planned), Some(elapsed)) = (self.state.planned_duration, self.elapsed()) else {
            return false;
        };
        if elapsed < planned {
            return false;
        }
        debug!(pump = self.name, "Planned duration elapsed");
        match self.stop() {
            Ok(()) => true,
            Err(e) => {
                // Still marked running, so the next tick retries
                warn!(pump = self.name, "Auto-stop failed, retrying next tick: {}", e);
                false
            },
        }
    }

    /// Current reading of the pump's clock
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Time since start while running
    pub fn elapsed(&self) -> Option<Duration> {
        if !self.state.running {
            return None;
        }
        self.state
            .started_at
            .map(|start| self.clock.now().saturating_sub(start))
    }

    /// Time left of a timed run
    pub fn remaining(&self) -> Option<Duration> {
        let planned = self.state.planned_duration?;
        let elapsed = self.elapsed()?;
        Some(planned.saturating_sub(elapsed))
    }

    pub fn state(&self) -> PumpRunState {
        self.state
    }
}

impl Drop for PumpActuator {
    fn drop(&mut self) {
        if self.state.running {
            warn!(pump = self.name, "Pump dropped while running, stopping");
            let _ = self.stop();
        }
    }
}
