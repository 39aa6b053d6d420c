//! Modbus RTU master client
//!
//! One request at a time, no retries. Every outcome updates the shared
//! [`ModbusStatistics`], which can be read without holding the client.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::constants::MAX_READ_REGISTERS;
use super::error::ModbusError;
use super::frame::{ModbusFrame, ResponseAssembler, ResponseKind};
use super::transport::{BusDirection, FieldBusTransport};
use super::types::ModbusClientConfig;

/// Success/error counters and the last error code
#[derive(Debug, Default)]
pub struct ModbusStatistics {
    success_count: AtomicU64,
    error_count: AtomicU64,
    last_error: AtomicU32,
}

/// Point-in-time copy of [`ModbusStatistics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModbusStatsSnapshot {
    pub success_count: u64,
    pub error_count: u64,
    /// 0 after a successful request
    pub last_error_code: u32,
}

impl ModbusStatistics {
    fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.last_error.store(0, Ordering::Relaxed);
    }

    fn record_error(&self, err: &ModbusError) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        self.last_error.store(err.code(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ModbusStatsSnapshot {
        ModbusStatsSnapshot {
            success_count: self.success_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_error_code: self.last_error.load(Ordering::Relaxed),
        }
    }
}

/// Modbus RTU master over a half-duplex transport
pub struct ModbusRtuClient {
    transport: Option<Box<dyn FieldBusTransport>>,
    config: ModbusClientConfig,
    stats: Arc<ModbusStatistics>,
}

impl std::fmt::Debug for ModbusRtuClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusRtuClient")
            .field("has_transport", &self.transport.is_some())
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl ModbusRtuClient {
    pub fn new(transport: Box<dyn FieldBusTransport>, config: ModbusClientConfig) -> Self {
        Self {
            transport: Some(transport),
            config,
            stats: Arc::new(ModbusStatistics::default()),
        }
    }

    /// Client with no bus attached; every request fails with `NoTransport`
    pub fn without_transport(config: ModbusClientConfig) -> Self {
        Self {
            transport: None,
            config,
            stats: Arc::new(ModbusStatistics::default()),
        }
    }

    /// Shared handle to the counters
    pub fn statistics(&self) -> Arc<ModbusStatistics> {
        Arc::clone(&self.stats)
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// FC03: read `count` holding registers starting at `start_register`
    pub async fn read_holding_registers(
        &mut self,
        address: u8,
        start_register: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        let result = self.read_inner(address, start_register, count).await;
        self.record("FC03", address, &result);
        result
    }

    /// FC06: write `value` to `register` and check the echoed acknowledgement
    pub async fn write_single_register(
        &mut self,
        address: u8,
        register: u16,
        value: u16,
    ) -> Result<(), ModbusError> {
        let result = self.write_inner(address, register, value).await;
        self.record("FC06", address, &result);
        result
    }

    fn record<T>(&self, function: &str, address: u8, result: &Result<T, ModbusError>) {
        match result {
            Ok(_) => self.stats.record_success(),
            Err(err) => {
                self.stats.record_error(err);
                warn!(
                    function,
                    slave = address,
                    error_code = err.code(),
                    "Modbus request failed: {}",
                    err
                );
            },
        }
    }

    async fn read_inner(
        &mut self,
        address: u8,
        start_register: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(ModbusError::InvalidRegisterCount { count });
        }
        let request = ModbusFrame::read_holding_registers(address, start_register, count);
        let assembler = self
            .exchange(&request, ResponseAssembler::new(address, ResponseKind::ReadHolding { count }))
            .await?;
        assembler.finish_read()
    }

    async fn write_inner(
        &mut self,
        address: u8,
        register: u16,
        value: u16,
    ) -> Result<(), ModbusError> {
        let request = ModbusFrame::write_single_register(address, register, value);
        let assembler = self
            .exchange(
                &request,
                ResponseAssembler::new(address, ResponseKind::WriteEcho { register, value }),
            )
            .await?;
        assembler.finish_write()
    }

    /// Send `request` and collect the reply until complete or timed out
    async fn exchange(
        &mut self,
        request: &ModbusFrame,
        mut assembler: ResponseAssembler,
    ) -> Result<ResponseAssembler, ModbusError> {
        let transport = self.transport.as_mut().ok_or(ModbusError::NoTransport)?;
        let bytes = request.to_bytes();

        debug!(
            "RTU TX: unit_id={}, FC={:02X}, {}B, CRC={:04X}",
            request.address,
            request.function,
            bytes.len(),
            request.crc
        );

        transport.clear_input().await.map_err(transport_err)?;

        transport
            .set_direction(BusDirection::Transmit)
            .await
            .map_err(transport_err)?;
        let written = transport.write_all(&bytes).await;
        // Release the bus even if the write failed
        let released = transport.set_direction(BusDirection::Receive).await;
        written.map_err(transport_err)?;
        released.map_err(transport_err)?;

        let byte_timeout = transport.timing().byte_timeout();
        let deadline = Instant::now() + self.config.response_timeout();

        while !assembler.is_complete() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            // Inter-byte gap only applies once the reply has started
            let wait = if assembler.is_empty() {
                remaining
            } else {
                remaining.min(byte_timeout)
            };
            match transport.read_byte(wait).await.map_err(transport_err)? {
                Some(byte) => assembler.push(byte),
                None if assembler.is_empty() => {},
                None => break,
            }
        }

        debug!("RTU RX: {}B", assembler.received());
        Ok(assembler)
    }
}

fn transport_err(err: super::transport::TransportError) -> ModbusError {
    ModbusError::Transport(err.to_string())
}
