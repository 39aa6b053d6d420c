//! Simulated field-bus transport
//!
//! Stands in for the RS-485 segment in tests and in `--simulate` runs.
//! Replies come from a scripted queue first, then from an optional
//! register-bank device that answers FC03/FC06 like a real sensor.
//! Clones share state, so a test can keep one handle while the client owns
//! another.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::constants::{FC_READ_HOLDING_REGISTERS, FC_WRITE_SINGLE_REGISTER};
use super::frame::ModbusFrame;
use super::transport::{settle, BusDirection, FieldBusTransport, TransportError};
use super::types::TransportTimingProfile;

/// Holding-register device answering on one address
#[derive(Debug, Clone)]
struct RegisterBank {
    address: u8,
    registers: Vec<u16>,
}

impl RegisterBank {
    fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let frame = ModbusFrame::parse(request).ok()?;
        if frame.address != self.address || frame.payload.len() != 4 {
            return None;
        }
        let first = u16::from_be_bytes([frame.payload[0], frame.payload[1]]) as usize;
        let second = u16::from_be_bytes([frame.payload[2], frame.payload[3]]);

        let reply = match frame.function {
            FC_READ_HOLDING_REGISTERS => {
                let end = first + second as usize;
                match self.registers.get(first..end) {
                    Some(values) => ModbusFrame::read_response(self.address, values),
                    None => ModbusFrame::exception(self.address, frame.function, 0x02),
                }
            },
            FC_WRITE_SINGLE_REGISTER => match self.registers.get_mut(first) {
                Some(slot) => {
                    *slot = second;
                    ModbusFrame::write_single_register(self.address, first as u16, second)
                },
                None => ModbusFrame::exception(self.address, frame.function, 0x02),
            },
            other => ModbusFrame::exception(self.address, other, 0x01),
        };
        Some(reply.to_bytes())
    }
}

#[derive(Debug)]
struct SimState {
    rx: VecDeque<u8>,
    scripted: VecDeque<Vec<u8>>,
    device: Option<RegisterBank>,
    silent: bool,
    direction: BusDirection,
    directions: Vec<BusDirection>,
    settle_delays: Vec<Duration>,
    sent: Vec<Vec<u8>>,
    write_outside_transmit: bool,
}

/// In-memory half-duplex bus
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimState>>,
    timing: TransportTimingProfile,
}

impl SimulatedTransport {
    pub fn new(timing: TransportTimingProfile) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                rx: VecDeque::new(),
                scripted: VecDeque::new(),
                device: None,
                silent: false,
                direction: BusDirection::Receive,
                directions: Vec::new(),
                settle_delays: Vec::new(),
                sent: Vec::new(),
                write_outside_transmit: false,
            })),
            timing,
        }
    }

    /// Attach a register-bank device at `address`
    pub fn serve_registers(&self, address: u8, registers: Vec<u16>) {
        self.state.lock().device = Some(RegisterBank { address, registers });
    }

    /// Change one register of the attached device
    pub fn set_register(&self, index: usize, value: u16) {
        if let Some(device) = self.state.lock().device.as_mut() {
            if let Some(slot) = device.registers.get_mut(index) {
                *slot = value;
            }
        }
    }

    pub fn register(&self, index: usize) -> Option<u16> {
        self.state
            .lock()
            .device
            .as_ref()
            .and_then(|d| d.registers.get(index).copied())
    }

    /// Stop the device from answering (cable pulled)
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Reply to the next request with these exact bytes
    pub fn queue_response(&self, bytes: Vec<u8>) {
        self.state.lock().scripted.push_back(bytes);
    }

    /// Leave bytes in the receive buffer as if from an earlier exchange
    pub fn inject_stale(&self, bytes: &[u8]) {
        self.state.lock().rx.extend(bytes.iter().copied());
    }

    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    pub fn direction_log(&self) -> Vec<BusDirection> {
        self.state.lock().directions.clone()
    }

    pub fn settle_delays(&self) -> Vec<Duration> {
        self.state.lock().settle_delays.clone()
    }

    /// False if any write happened while the bus was released
    pub fn writes_were_in_transmit(&self) -> bool {
        !self.state.lock().write_outside_transmit
    }
}

#[async_trait]
impl FieldBusTransport for SimulatedTransport {
    async fn clear_input(&mut self) -> Result<(), TransportError> {
        self.state.lock().rx.clear();
        Ok(())
    }

    async fn set_direction(&mut self, direction: BusDirection) -> Result<(), TransportError> {
        let delay = match direction {
            BusDirection::Transmit => self.timing.assert_delay(),
            BusDirection::Receive => self.timing.deassert_delay(),
        };
        {
            let mut state = self.state.lock();
            state.direction = direction;
            state.directions.push(direction);
            state.settle_delays.push(delay);
        }
        settle(delay).await;
        Ok(())
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.direction != BusDirection::Transmit {
            state.write_outside_transmit = true;
        }
        state.sent.push(data.to_vec());

        let reply = match state.scripted.pop_front() {
            Some(bytes) => Some(bytes),
            None if state.silent => None,
            None => state.device.as_mut().and_then(|d| d.respond(data)),
        };
        if let Some(bytes) = reply {
            debug!("SIM RX queued: {}B", bytes.len());
            state.rx.extend(bytes);
        }
        Ok(())
    }

    async fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, TransportError> {
        let next = self.state.lock().rx.pop_front();
        match next {
            Some(byte) => Ok(Some(byte)),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(self.state.lock().rx.pop_front())
            },
        }
    }

    fn timing(&self) -> &TransportTimingProfile {
        &self.timing
    }
}
