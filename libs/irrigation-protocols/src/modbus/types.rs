//! Modbus RTU configuration types
//!
//! Serial line settings, direction-control timing and client deadlines.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::constants::{
    DEFAULT_BYTE_TIMEOUT_MS, DEFAULT_RESPONSE_TIMEOUT_MS, DEFAULT_SETTLE_DELAY_US,
};

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial line settings (default 9600 8N1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyS1`
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

fn default_port() -> String {
    "/dev/ttyS1".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::None,
            stop_bits: default_stop_bits(),
        }
    }
}

impl SerialSettings {
    /// Time to shift one character out at the configured line settings
    pub fn char_time(&self) -> Duration {
        let parity_bits = u32::from(self.parity != Parity::None);
        let bits = 1 + u32::from(self.data_bits) + parity_bits + u32::from(self.stop_bits);
        let baud = self.baud_rate.max(1);
        Duration::from_nanos(u64::from(bits) * 1_000_000_000 / u64::from(baud))
    }
}

/// Direction-control and byte timing of a half-duplex transceiver.
///
/// The settle delays are properties of the level-translating stage on the
/// DE/RE line, not of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportTimingProfile {
    /// Wait after asserting transmit before the first byte
    #[serde(default = "default_settle_us")]
    pub assert_delay_us: u64,
    /// Wait after the last byte is on the wire before releasing the bus
    #[serde(default = "default_settle_us")]
    pub deassert_delay_us: u64,
    /// Inter-byte gap that terminates a frame once reception has started
    #[serde(default = "default_byte_timeout_ms")]
    pub byte_timeout_ms: u64,
}

fn default_settle_us() -> u64 {
    DEFAULT_SETTLE_DELAY_US
}

fn default_byte_timeout_ms() -> u64 {
    DEFAULT_BYTE_TIMEOUT_MS
}

impl Default for TransportTimingProfile {
    fn default() -> Self {
        Self {
            assert_delay_us: DEFAULT_SETTLE_DELAY_US,
            deassert_delay_us: DEFAULT_SETTLE_DELAY_US,
            byte_timeout_ms: DEFAULT_BYTE_TIMEOUT_MS,
        }
    }
}

impl TransportTimingProfile {
    pub fn assert_delay(&self) -> Duration {
        Duration::from_micros(self.assert_delay_us)
    }

    pub fn deassert_delay(&self) -> Duration {
        Duration::from_micros(self.deassert_delay_us)
    }

    pub fn byte_timeout(&self) -> Duration {
        Duration::from_millis(self.byte_timeout_ms)
    }
}

/// Client-level request settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModbusClientConfig {
    /// Deadline for a complete response, measured from the end of transmit
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

fn default_response_timeout_ms() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_MS
}

impl Default for ModbusClientConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
        }
    }
}

impl ModbusClientConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_time_at_9600_8n1() {
        let settings = SerialSettings::default();
        // 10 bits per character at 9600 baud
        assert_eq!(settings.char_time(), Duration::from_nanos(1_041_666));
    }

    #[test]
    fn timing_profile_defaults() {
        let timing = TransportTimingProfile::default();
        assert_eq!(timing.assert_delay(), Duration::from_micros(50));
        assert_eq!(timing.deassert_delay(), Duration::from_micros(50));
        assert_eq!(timing.byte_timeout(), Duration::from_millis(50));
    }
}
