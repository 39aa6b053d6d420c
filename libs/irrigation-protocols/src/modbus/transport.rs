//! Half-duplex field-bus transport abstraction
//!
//! A transport is pure I/O: it knows how to flip the bus direction, push
//! bytes onto the wire and wait for the next byte with a deadline. It has no
//! protocol knowledge.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::types::TransportTimingProfile;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport closed")]
    Closed,

    #[error("Direction control failed: {0}")]
    Direction(String),

    #[error("Failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },
}

/// Bus direction as driven on the DE/RE line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusDirection {
    Transmit,
    Receive,
}

/// Half-duplex serial link with explicit direction control
#[async_trait]
pub trait FieldBusTransport: Send {
    /// Discard anything sitting in the receive buffer
    async fn clear_input(&mut self) -> Result<(), TransportError>;

    /// Drive the direction line, then wait the matching settle delay of the
    /// timing profile before returning.
    async fn set_direction(&mut self, direction: BusDirection) -> Result<(), TransportError>;

    /// Write `data` and return only once the bytes have left the UART
    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Next received byte, or `None` if nothing arrives within `timeout`
    async fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, TransportError>;

    /// Timing profile this transport was built with
    fn timing(&self) -> &TransportTimingProfile;
}

/// Sleep for a direction settle delay.
///
/// Tokio timers have millisecond resolution, so sub-millisecond settle
/// times are spun against the wall clock, yielding to the scheduler between
/// checks so the worker thread stays available.
pub async fn settle(delay: Duration) {
    if delay.is_zero() {
        return;
    }
    if delay < Duration::from_millis(1) {
        let deadline = std::time::Instant::now() + delay;
        while std::time::Instant::now() < deadline {
            tokio::task::yield_now().await;
        }
    } else {
        tokio::time::sleep(delay).await;
    }
}
