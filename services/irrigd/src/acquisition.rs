//! Background sensor acquisition
//!
//! Reads both sensors on its own schedule and publishes a complete
//! [`SensorSnapshot`] through a `watch` channel. The channel holds an
//! `Arc`, so readers swap in a whole snapshot and never see a partial one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::sensors::{EnvironmentalReading, EnvironmentalSensor, SoilReading, SoilSensorDriver};

/// Immutable result of one acquisition cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSnapshot {
    /// Increments per cycle; 0 before the first cycle
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Monotonic clock reading at publication
    #[serde(skip)]
    pub taken_at: Duration,
    /// `None` when the last read failed
    pub environmental: Option<EnvironmentalReading>,
    pub soil: Option<SoilReading>,
}

impl SensorSnapshot {
    pub fn new(
        sequence: u64,
        taken_at: Duration,
        environmental: Option<EnvironmentalReading>,
        soil: Option<SoilReading>,
    ) -> Self {
        Self {
            sequence,
            timestamp: Utc::now(),
            taken_at,
            environmental,
            soil,
        }
    }

    /// Placeholder published before the first cycle completes
    pub fn empty() -> Self {
        Self::new(0, Duration::ZERO, None, None)
    }
}

pub type SnapshotReceiver = watch::Receiver<Arc<SensorSnapshot>>;

pub struct SensorAcquisitionTask {
    environment: Arc<dyn EnvironmentalSensor>,
    soil: Arc<SoilSensorDriver>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    sender: watch::Sender<Arc<SensorSnapshot>>,
    sequence: u64,
}

impl SensorAcquisitionTask {
    pub fn new(
        environment: Arc<dyn EnvironmentalSensor>,
        soil: Arc<SoilSensorDriver>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> (Self, SnapshotReceiver) {
        let (sender, receiver) = watch::channel(Arc::new(SensorSnapshot::empty()));
        (
            Self {
                environment,
                soil,
                clock,
                interval,
                sender,
                sequence: 0,
            },
            receiver,
        )
    }

    /// Extra receiver, e.g. for the status logger
    pub fn subscribe(&self) -> SnapshotReceiver {
        self.sender.subscribe()
    }

    /// Probe both sensors once; failures are logged and retried by `read`
    pub async fn initialize(&self) {
        let (env, soil) = tokio::join!(self.environment.initialize(), self.soil.initialize());
        if let Err(e) = env {
            warn!(
                sensor = self.environment.name(),
                "Environmental sensor init failed: {}", e
            );
        }
        info!(
            environmental = self.environment.name(),
            soil_ready = soil,
            "Sensors initialized"
        );
    }

    /// Read both sensors and publish one snapshot
    pub async fn run_cycle(&mut self) -> Arc<SensorSnapshot> {
        let (env, soil) = tokio::join!(self.environment.read(), self.soil.read());

        let environmental = match env {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!(
                    sensor = self.environment.name(),
                    "Environmental read failed: {}", e
                );
                None
            },
        };
        let soil = match soil {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!("Soil read failed: {}", e);
                None
            },
        };

        self.sequence += 1;
        let snapshot = Arc::new(SensorSnapshot::new(
            self.sequence,
            self.clock.now(),
            environmental,
            soil,
        ));
        self.sender.send_replace(Arc::clone(&snapshot));
        debug!(
            sequence = snapshot.sequence,
            environmental_valid = snapshot.environmental.is_some(),
            soil_valid = snapshot.soil.is_some(),
            "Snapshot published"
        );
        snapshot
    }

    /// Cycle until cancelled. A cycle in progress always completes.
    pub async fn run(mut self, token: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Acquisition task started");
        self.initialize().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                () = token.cancelled() => {
                    info!("Acquisition task stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::sensors::{StaticEnvironmentalSensor, UnavailableEnvironmentalSensor};
    use crate::store::MemoryStore;
    use irrigation_protocols::modbus::{
        ModbusClientConfig, ModbusRtuClient, SimulatedTransport, TransportTimingProfile,
    };

    fn soil_driver() -> (Arc<SoilSensorDriver>, SimulatedTransport) {
        let sim = SimulatedTransport::new(TransportTimingProfile::default());
        sim.serve_registers(0x01, vec![150, 231, 65, 1200, 30, 20, 40, 550]);
        let client = ModbusRtuClient::new(Box::new(sim.clone()), ModbusClientConfig::default());
        let driver = SoilSensorDriver::new(client, 0x01, Arc::new(MemoryStore::new()));
        (Arc::new(driver), sim)
    }

    const MINUTE: Duration = Duration::from_secs(60);

    fn clock() -> Arc<dyn Clock> {
        Arc::new(MonotonicClock::new())
    }

    fn air() -> Arc<dyn EnvironmentalSensor> {
        Arc::new(StaticEnvironmentalSensor::new(EnvironmentalReading {
            temperature: 24.0,
            humidity: 45.0,
            pressure: 1012.0,
        }))
    }

    #[tokio::test]
    async fn cycle_publishes_complete_snapshot() {
        let (soil, _sim) = soil_driver();
        let (mut task, rx) = SensorAcquisitionTask::new(air(), soil, clock(), MINUTE);
        assert_eq!(rx.borrow().sequence, 0);

        let snapshot = task.run_cycle().await;
        assert_eq!(snapshot.sequence, 1);
        assert!(snapshot.environmental.is_some());
        assert!((snapshot.soil.unwrap().moisture - 15.0).abs() < 1e-4);
        assert_eq!(**rx.borrow(), *snapshot);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_branches_are_none_and_task_continues() {
        let (soil, sim) = soil_driver();
        let env: Arc<dyn EnvironmentalSensor> =
            Arc::new(UnavailableEnvironmentalSensor::new("not fitted"));
        let (mut task, rx) = SensorAcquisitionTask::new(env, soil, clock(), MINUTE);

        sim.set_silent(true);
        let first = task.run_cycle().await;
        assert!(first.soil.is_none());
        assert!(first.environmental.is_none());

        sim.set_silent(false);
        let second = task.run_cycle().await;
        assert_eq!(second.sequence, 2);
        assert!(second.soil.is_some());
        assert!(second.environmental.is_none());
        assert_eq!(rx.borrow().sequence, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_follows_interval_and_stops_on_cancel() {
        let (soil, _sim) = soil_driver();
        let (task, mut rx) = SensorAcquisitionTask::new(air(), soil, clock(), MINUTE);
        let token = CancellationToken::new();
        let handle = tokio::spawn(task.run(token.clone()));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().sequence, 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(rx.borrow_and_update().sequence, 2);

        token.cancel();
        handle.await.unwrap();
    }
}
