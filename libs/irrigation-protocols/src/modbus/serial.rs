//! Serial RS-485 transport over `tokio-serial`
//!
//! The DE/RE line is driven through a [`DirectionLine`]. Adapters with
//! automatic direction control pass `None`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info};

use super::transport::{settle, BusDirection, FieldBusTransport, TransportError};
use super::types::{Parity, SerialSettings, TransportTimingProfile};

/// Output that switches the transceiver between driver and receiver
pub trait DirectionLine: Send + Sync {
    fn set_transmit(&self, transmit: bool) -> Result<(), TransportError>;
}

/// DE/RE pin on a GPIO driver
#[cfg(feature = "dido")]
pub struct GpioDirectionLine {
    driver: std::sync::Arc<dyn crate::dido::GpioDriver>,
    pin: u32,
}

#[cfg(feature = "dido")]
impl GpioDirectionLine {
    /// Configure `pin` as an output and leave the bus released
    pub fn new(
        driver: std::sync::Arc<dyn crate::dido::GpioDriver>,
        pin: u32,
    ) -> Result<Self, TransportError> {
        driver
            .setup(pin, crate::dido::PinDirection::Output)
            .map_err(|e| TransportError::Direction(e.to_string()))?;
        driver
            .write(pin, false)
            .map_err(|e| TransportError::Direction(e.to_string()))?;
        Ok(Self { driver, pin })
    }
}

#[cfg(feature = "dido")]
impl DirectionLine for GpioDirectionLine {
    fn set_transmit(&self, transmit: bool) -> Result<(), TransportError> {
        self.driver
            .write(self.pin, transmit)
            .map_err(|e| TransportError::Direction(e.to_string()))
    }
}

pub struct SerialBusTransport {
    port: SerialStream,
    direction_line: Option<Box<dyn DirectionLine>>,
    timing: TransportTimingProfile,
    char_time: Duration,
}

impl SerialBusTransport {
    /// Open the serial device with the given line settings
    pub fn open(
        settings: &SerialSettings,
        timing: TransportTimingProfile,
        direction_line: Option<Box<dyn DirectionLine>>,
    ) -> Result<Self, TransportError> {
        debug!("RTU: {} @{}baud", settings.port, settings.baud_rate);

        let parity = match settings.parity {
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::None => tokio_serial::Parity::None,
        };

        let data_bits = match settings.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        let stop_bits = match settings.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        match tokio_serial::new(&settings.port, settings.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(timing.byte_timeout())
            .open_native_async()
        {
            Ok(port) => {
                info!("RTU opened: {}", settings.port);
                Ok(Self {
                    port,
                    direction_line,
                    timing,
                    char_time: settings.char_time(),
                })
            },
            Err(e) => {
                error!("RTU err: {} - {}", settings.port, e);
                Err(TransportError::Open {
                    port: settings.port.clone(),
                    reason: e.to_string(),
                })
            },
        }
    }
}

#[async_trait]
impl FieldBusTransport for SerialBusTransport {
    async fn clear_input(&mut self) -> Result<(), TransportError> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| TransportError::Io(e.into()))
    }

    async fn set_direction(&mut self, direction: BusDirection) -> Result<(), TransportError> {
        let (transmit, delay) = match direction {
            BusDirection::Transmit => (true, self.timing.assert_delay()),
            BusDirection::Receive => (false, self.timing.deassert_delay()),
        };
        if let Some(line) = &self.direction_line {
            line.set_transmit(transmit)?;
        }
        settle(delay).await;
        Ok(())
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(data).await.map_err(|e| {
            error!("RTU TX: {}", e);
            TransportError::Io(e)
        })?;
        // flush drains the kernel buffer (tcdrain); the last character may
        // still be in the UART shift register
        self.port.flush().await.map_err(|e| {
            error!("RTU flush: {}", e);
            TransportError::Io(e)
        })?;
        settle(self.char_time).await;
        debug!("RTU TX: {}B", data.len());
        Ok(())
    }

    async fn read_byte(&mut self, wait: Duration) -> Result<Option<u8>, TransportError> {
        match timeout(wait, self.port.read_u8()).await {
            Ok(Ok(byte)) => Ok(Some(byte)),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                error!("RTU closed");
                Err(TransportError::Closed)
            },
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Ok(Err(e)) => {
                error!("RTU RX: {}", e);
                Err(TransportError::Io(e))
            },
            Err(_) => Ok(None),
        }
    }

    fn timing(&self) -> &TransportTimingProfile {
        &self.timing
    }
}
