//! Modbus RTU Master
//!
//! Master-side implementation of the subset of Modbus RTU needed to poll a
//! remote sensor over a half-duplex RS-485 segment:
//! - FC03 read holding registers (up to 125 per request)
//! - FC06 write single register
//!
//! # Architecture
//!
//! ```text
//! irrigation-protocols/modbus
//!     ├── ModbusRtuClient (single-shot request/response, statistics)
//!     ├── frame (request building, response validation, CRC16)
//!     ├── FieldBusTransport (direction control + byte timeout I/O)
//!     │     ├── SerialBusTransport (tokio-serial, feature `modbus-rtu`)
//!     │     └── SimulatedTransport (scripted / register-bank device)
//!     └── types (serial settings, timing profile, client config)
//! ```
//!
//! The client holds no retry policy. Callers that want retries issue a new
//! request.

mod constants;
mod crc;

pub mod client;
pub mod error;
pub mod frame;
pub mod mock;
pub mod transport;
pub mod types;

#[cfg(feature = "modbus-rtu")]
pub mod serial;

pub use client::{ModbusRtuClient, ModbusStatistics, ModbusStatsSnapshot};
pub use constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_WRITE_SINGLE_REGISTER, MAX_LEADING_GARBAGE,
    MAX_READ_REGISTERS,
};
pub use crc::crc16;
pub use error::ModbusError;
pub use mock::SimulatedTransport;
pub use transport::{BusDirection, FieldBusTransport, TransportError};
pub use types::{ModbusClientConfig, Parity, SerialSettings, TransportTimingProfile};

#[cfg(feature = "modbus-rtu")]
pub use serial::SerialBusTransport;
