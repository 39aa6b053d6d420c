//! Irrigation Protocol Implementations
//!
//! This library provides the field-bus master and local digital I/O used by
//! the irrigation controller. Protocols are feature-gated for selective
//! compilation.
//!
//! # Features
//!
//! - `modbus` - Modbus RTU master (framing, CRC, client, simulated transport)
//! - `modbus-rtu` - real serial transport over `tokio-serial`
//! - `dido` - DI/DO (GPIO) drivers for pumps and level switches

#[cfg(feature = "dido")]
pub mod dido;

#[cfg(feature = "modbus")]
pub mod modbus;
