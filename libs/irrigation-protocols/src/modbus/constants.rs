//! Modbus RTU protocol constants

/// Function code: read holding registers
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Function code: write single register
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// High bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Protocol ceiling for a single FC03 request
pub const MAX_READ_REGISTERS: u16 = 125;

/// Request frame length for FC03/FC06 (address + function + 4 bytes + CRC)
pub const REQUEST_FRAME_LEN: usize = 8;

/// Exception response length (address + function + code + CRC)
pub const EXCEPTION_FRAME_LEN: usize = 5;

/// Fixed overhead of a read response (address + function + byte count + CRC)
pub const READ_RESPONSE_OVERHEAD: usize = 5;

/// Leading bytes the response parser will skip to find `(address, function)`.
///
/// Workaround for the DE/RE line releasing late on some transceiver boards,
/// which leaves up to a few stray bytes ahead of the real reply. Not a
/// resynchronization mechanism.
pub const MAX_LEADING_GARBAGE: usize = 3;

/// Default response deadline
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;

/// Default inter-byte gap that ends a frame once bytes have started arriving
pub const DEFAULT_BYTE_TIMEOUT_MS: u64 = 50;

/// Default DE assert/de-assert settle time of the SP3485-class transceiver
pub const DEFAULT_SETTLE_DELAY_US: u64 = 50;
