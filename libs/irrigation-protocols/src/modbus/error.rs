//! Modbus master error taxonomy
//!
//! Every failure maps to a stable numeric code exposed through
//! [`ModbusError::code`] and the client statistics.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModbusError {
    // ========================================================================
    // Transport / timing errors
    // ========================================================================
    #[error("No transport configured")]
    NoTransport,

    #[error("Invalid register count {count} (allowed 1..=125)")]
    InvalidRegisterCount { count: u16 },

    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: usize, received: usize },

    #[error("Transport failure: {0}")]
    Transport(String),

    // ========================================================================
    // Protocol errors
    // ========================================================================
    #[error("Wrong device address: expected 0x{expected:02X}, got 0x{actual:02X}")]
    WrongAddress { expected: u8, actual: u8 },

    #[error("Wrong function code: expected 0x{expected:02X}, got 0x{actual:02X}")]
    WrongFunction { expected: u8, actual: u8 },

    #[error("Wrong byte count: expected {expected}, got {actual}")]
    WrongByteCount { expected: u8, actual: u8 },

    #[error("CRC mismatch: calculated 0x{calculated:04X}, received 0x{received:04X}")]
    BadCrc { calculated: u16, received: u16 },

    #[error("Write acknowledgement does not echo the request")]
    EchoMismatch,

    #[error(
        "Device exception 0x{code:02X} ({}) on function 0x{function:02X}",
        describe(.code)
    )]
    Exception { function: u8, code: u8 },
}

impl ModbusError {
    /// Numeric last-error code: 1..=9 for local failures, `100 + N` for
    /// device exception N.
    pub fn code(&self) -> u32 {
        match self {
            ModbusError::NoTransport => 1,
            ModbusError::InvalidRegisterCount { .. } => 2,
            ModbusError::IncompleteResponse { .. } => 3,
            ModbusError::WrongAddress { .. } => 4,
            ModbusError::WrongFunction { .. } => 5,
            ModbusError::WrongByteCount { .. } => 6,
            ModbusError::BadCrc { .. } => 7,
            ModbusError::EchoMismatch => 8,
            ModbusError::Transport(_) => 9,
            ModbusError::Exception { code, .. } => 100 + u32::from(*code),
        }
    }

    /// True for errors reported by the remote device itself
    pub fn is_exception(&self) -> bool {
        matches!(self, ModbusError::Exception { .. })
    }
}

fn describe(code: &u8) -> &'static str {
    exception_description(*code)
}

/// Get exception description
pub fn exception_description(exception_code: u8) -> &'static str {
    match exception_code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ModbusError::NoTransport.code(), 1);
        assert_eq!(ModbusError::InvalidRegisterCount { count: 126 }.code(), 2);
        assert_eq!(
            ModbusError::WrongByteCount {
                expected: 16,
                actual: 14
            }
            .code(),
            6
        );
        assert_eq!(ModbusError::EchoMismatch.code(), 8);
        assert_eq!(
            ModbusError::Exception {
                function: 0x03,
                code: 0x02
            }
            .code(),
            102
        );
    }

    #[test]
    fn exception_message_names_the_code() {
        let err = ModbusError::Exception {
            function: 0x03,
            code: 0x02,
        };
        assert!(err.is_exception());
        assert!(err.to_string().contains("Illegal Data Address"));
    }
}
