//! RTU frame building and response validation
//!
//! Wire layout: `[address][function][payload...][crc lo][crc hi]`.
//! A [`ResponseAssembler`] accumulates reply bytes one at a time, tells the
//! receive loop when a frame is complete, and validates it in the order
//! address, function (or exception), byte count / echo, CRC.

use tracing::debug;

use super::constants::{
    EXCEPTION_FLAG, EXCEPTION_FRAME_LEN, FC_READ_HOLDING_REGISTERS, FC_WRITE_SINGLE_REGISTER,
    MAX_LEADING_GARBAGE, READ_RESPONSE_OVERHEAD, REQUEST_FRAME_LEN,
};
use super::crc::crc16;
use super::error::ModbusError;

/// Transient RTU frame (request or response)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusFrame {
    pub address: u8,
    pub function: u8,
    pub payload: Vec<u8>,
    pub crc: u16,
}

impl ModbusFrame {
    /// Build a frame and compute its CRC
    pub fn new(address: u8, function: u8, payload: Vec<u8>) -> Self {
        let mut head = Vec::with_capacity(2 + payload.len());
        head.push(address);
        head.push(function);
        head.extend_from_slice(&payload);
        let crc = crc16(&head);
        Self {
            address,
            function,
            payload,
            crc,
        }
    }

    /// FC03 request
    pub fn read_holding_registers(address: u8, start_register: u16, count: u16) -> Self {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&start_register.to_be_bytes());
        payload.extend_from_slice(&count.to_be_bytes());
        Self::new(address, FC_READ_HOLDING_REGISTERS, payload)
    }

    /// FC06 request; a conforming device echoes it back unchanged
    pub fn write_single_register(address: u8, register: u16, value: u16) -> Self {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&register.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
        Self::new(address, FC_WRITE_SINGLE_REGISTER, payload)
    }

    /// FC03 reply carrying `values`
    pub fn read_response(address: u8, values: &[u16]) -> Self {
        let mut payload = Vec::with_capacity(1 + values.len() * 2);
        payload.push((values.len() * 2) as u8);
        for value in values {
            payload.extend_from_slice(&value.to_be_bytes());
        }
        Self::new(address, FC_READ_HOLDING_REGISTERS, payload)
    }

    /// Exception reply for `function`
    pub fn exception(address: u8, function: u8, code: u8) -> Self {
        Self::new(address, function | EXCEPTION_FLAG, vec![code])
    }

    /// Serialize with the CRC appended low byte first
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.payload.len());
        bytes.push(self.address);
        bytes.push(self.function);
        bytes.extend_from_slice(&self.payload);
        bytes.extend_from_slice(&self.crc.to_le_bytes());
        bytes
    }

    /// Parse a complete frame and verify its CRC
    pub fn parse(data: &[u8]) -> Result<Self, ModbusError> {
        if data.len() < 4 {
            return Err(ModbusError::IncompleteResponse {
                expected: 4,
                received: data.len(),
            });
        }
        check_crc(data)?;
        let body = &data[..data.len() - 2];
        Ok(Self {
            address: body[0],
            function: body[1],
            payload: body[2..].to_vec(),
            crc: u16::from_le_bytes([data[data.len() - 2], data[data.len() - 1]]),
        })
    }

    pub fn is_exception(&self) -> bool {
        self.function & EXCEPTION_FLAG != 0
    }
}

fn check_crc(frame: &[u8]) -> Result<(), ModbusError> {
    let split = frame.len() - 2;
    let received = u16::from_le_bytes([frame[split], frame[split + 1]]);
    let calculated = crc16(&frame[..split]);
    if received != calculated {
        return Err(ModbusError::BadCrc {
            calculated,
            received,
        });
    }
    Ok(())
}

/// What the pending request expects back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    ReadHolding { count: u16 },
    WriteEcho { register: u16, value: u16 },
}

impl ResponseKind {
    fn function(&self) -> u8 {
        match self {
            ResponseKind::ReadHolding { .. } => FC_READ_HOLDING_REGISTERS,
            ResponseKind::WriteEcho { .. } => FC_WRITE_SINGLE_REGISTER,
        }
    }

    /// Length of a well-formed, non-exception reply
    pub fn expected_len(&self) -> usize {
        match self {
            ResponseKind::ReadHolding { count } => READ_RESPONSE_OVERHEAD + *count as usize * 2,
            ResponseKind::WriteEcho { .. } => REQUEST_FRAME_LEN,
        }
    }
}

/// Incremental response buffer for one request
#[derive(Debug)]
pub struct ResponseAssembler {
    address: u8,
    kind: ResponseKind,
    buf: Vec<u8>,
    offset: Option<usize>,
}

impl ResponseAssembler {
    pub fn new(address: u8, kind: ResponseKind) -> Self {
        Self {
            address,
            kind,
            buf: Vec::with_capacity(kind.expected_len() + MAX_LEADING_GARBAGE),
            offset: None,
        }
    }

    pub fn push(&mut self, byte: u8) {
        self.buf.push(byte);
        if self.offset.is_none() {
            self.offset = self.locate();
        }
    }

    pub fn received(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// True once enough bytes are buffered to decide the outcome
    pub fn is_complete(&self) -> bool {
        match (self.offset, self.needed()) {
            (Some(_), Some(needed)) => self.buf.len() >= needed,
            (Some(_), None) => false,
            (None, _) => self.buf.len() >= MAX_LEADING_GARBAGE + 2,
        }
    }

    /// Search the first few positions for the `(address, function)` pair
    fn locate(&self) -> Option<usize> {
        let function = self.kind.function();
        let last_start = self.buf.len().checked_sub(2)?.min(MAX_LEADING_GARBAGE);
        (0..=last_start).find(|&i| {
            self.buf[i] == self.address
                && (self.buf[i + 1] == function || self.buf[i + 1] == function | EXCEPTION_FLAG)
        })
    }

    /// Total buffered length at which the aligned frame is complete
    fn needed(&self) -> Option<usize> {
        let offset = self.offset?;
        let frame = &self.buf[offset..];
        if frame[1] & EXCEPTION_FLAG != 0 {
            return Some(offset + EXCEPTION_FRAME_LEN);
        }
        match self.kind {
            ResponseKind::ReadHolding { .. } => frame
                .get(2)
                .map(|&byte_count| offset + READ_RESPONSE_OVERHEAD + byte_count as usize),
            ResponseKind::WriteEcho { .. } => Some(offset + REQUEST_FRAME_LEN),
        }
    }

    fn incomplete(&self, expected: usize, received: usize) -> ModbusError {
        ModbusError::IncompleteResponse { expected, received }
    }

    /// Aligned frame, with exception replies already turned into errors
    fn aligned(&self) -> Result<&[u8], ModbusError> {
        let function = self.kind.function();
        let expected = self.kind.expected_len();

        let Some(offset) = self.offset else {
            return Err(match (self.buf.first(), self.buf.get(1)) {
                (None, _) => self.incomplete(expected, 0),
                (Some(&actual), _) if actual != self.address => ModbusError::WrongAddress {
                    expected: self.address,
                    actual,
                },
                (Some(_), Some(&actual)) => ModbusError::WrongFunction {
                    expected: function,
                    actual,
                },
                (Some(_), None) => self.incomplete(expected, 1),
            });
        };

        if offset > 0 {
            debug!(
                "RTU RX: skipped {} leading byte(s) before addr={:02X}",
                offset, self.address
            );
        }

        let frame = &self.buf[offset..];
        if frame[1] & EXCEPTION_FLAG != 0 {
            if frame.len() < EXCEPTION_FRAME_LEN {
                return Err(self.incomplete(EXCEPTION_FRAME_LEN, frame.len()));
            }
            let frame = &frame[..EXCEPTION_FRAME_LEN];
            check_crc(frame)?;
            return Err(ModbusError::Exception {
                function,
                code: frame[2],
            });
        }
        Ok(frame)
    }

    /// Validate an FC03 reply and decode its registers
    pub fn finish_read(&self) -> Result<Vec<u16>, ModbusError> {
        let ResponseKind::ReadHolding { count } = self.kind else {
            return Err(ModbusError::WrongFunction {
                expected: FC_WRITE_SINGLE_REGISTER,
                actual: FC_READ_HOLDING_REGISTERS,
            });
        };
        let frame = self.aligned()?;
        let expected_len = self.kind.expected_len();

        let Some(&byte_count) = frame.get(2) else {
            return Err(self.incomplete(expected_len, frame.len()));
        };
        let expected_count = (count * 2) as u8;
        if byte_count != expected_count {
            return Err(ModbusError::WrongByteCount {
                expected: expected_count,
                actual: byte_count,
            });
        }
        if frame.len() < expected_len {
            return Err(self.incomplete(expected_len, frame.len()));
        }

        let frame = &frame[..expected_len];
        check_crc(frame)?;

        Ok(frame[3..3 + byte_count as usize]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Validate an FC06 echo
    pub fn finish_write(&self) -> Result<(), ModbusError> {
        let ResponseKind::WriteEcho { register, value } = self.kind else {
            return Err(ModbusError::WrongFunction {
                expected: FC_READ_HOLDING_REGISTERS,
                actual: FC_WRITE_SINGLE_REGISTER,
            });
        };
        let frame = self.aligned()?;
        if frame.len() < REQUEST_FRAME_LEN {
            return Err(self.incomplete(REQUEST_FRAME_LEN, frame.len()));
        }

        let frame = &frame[..REQUEST_FRAME_LEN];
        let echoed_register = u16::from_be_bytes([frame[2], frame[3]]);
        let echoed_value = u16::from_be_bytes([frame[4], frame[5]]);
        if echoed_register != register || echoed_value != value {
            return Err(ModbusError::EchoMismatch);
        }
        check_crc(frame)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn feed(assembler: &mut ResponseAssembler, bytes: &[u8]) {
        for &b in bytes {
            if assembler.is_complete() {
                break;
            }
            assembler.push(b);
        }
    }

    fn read_assembler(count: u16) -> ResponseAssembler {
        ResponseAssembler::new(0x01, ResponseKind::ReadHolding { count })
    }

    #[test]
    fn test_read_request_layout() {
        let frame = ModbusFrame::read_holding_registers(0x01, 0x0000, 8).to_bytes();
        assert_eq!(frame.len(), 8);
        assert_eq!(&frame[..6], &[0x01, 0x03, 0x00, 0x00, 0x00, 0x08]);
        let crc = crc16(&frame[..6]);
        assert_eq!(&frame[6..], &crc.to_le_bytes());
    }

    #[test]
    fn test_parse_round_trip_and_crc_rejection() {
        let bytes = ModbusFrame::write_single_register(0x11, 0x0001, 0x0003).to_bytes();
        let parsed = ModbusFrame::parse(&bytes).unwrap();
        assert_eq!(parsed.address, 0x11);
        assert_eq!(parsed.function, 0x06);
        assert_eq!(parsed.payload, vec![0x00, 0x01, 0x00, 0x03]);

        let mut corrupted = bytes.clone();
        corrupted[3] ^= 0x01;
        assert!(matches!(
            ModbusFrame::parse(&corrupted),
            Err(ModbusError::BadCrc { .. })
        ));
    }

    #[test]
    fn test_read_response_decodes_registers() {
        let reply = ModbusFrame::read_response(0x01, &[150, 0xFF38]).to_bytes();
        let mut asm = read_assembler(2);
        feed(&mut asm, &reply);
        assert!(asm.is_complete());
        assert_eq!(asm.finish_read().unwrap(), vec![150, 0xFF38]);
    }

    #[test]
    fn test_wrong_address_rejected() {
        let reply = ModbusFrame::read_response(0x02, &[1]).to_bytes();
        let mut asm = read_assembler(1);
        feed(&mut asm, &reply);
        assert!(matches!(
            asm.finish_read(),
            Err(ModbusError::WrongAddress {
                expected: 0x01,
                actual: 0x02
            })
        ));
    }

    #[test]
    fn test_wrong_function_rejected() {
        let reply = ModbusFrame::new(0x01, 0x04, vec![0x02, 0x00, 0x96]).to_bytes();
        let mut asm = read_assembler(1);
        feed(&mut asm, &reply);
        assert!(matches!(
            asm.finish_read(),
            Err(ModbusError::WrongFunction {
                expected: 0x03,
                actual: 0x04
            })
        ));
    }

    #[test]
    fn test_bad_crc_rejected() {
        let mut reply = ModbusFrame::read_response(0x01, &[150]).to_bytes();
        let last = reply.len() - 1;
        reply[last] ^= 0xFF;
        let mut asm = read_assembler(1);
        feed(&mut asm, &reply);
        assert!(matches!(asm.finish_read(), Err(ModbusError::BadCrc { .. })));
    }

    #[test]
    fn test_wrong_byte_count_with_valid_crc() {
        // Seven registers in a frame answering a request for eight
        let reply = ModbusFrame::read_response(0x01, &[1, 2, 3, 4, 5, 6, 7]).to_bytes();
        let mut asm = read_assembler(8);
        feed(&mut asm, &reply);
        assert!(asm.is_complete());
        assert!(matches!(
            asm.finish_read(),
            Err(ModbusError::WrongByteCount {
                expected: 16,
                actual: 14
            })
        ));
    }

    #[test]
    fn test_exception_response() {
        let reply = ModbusFrame::exception(0x01, 0x03, 0x02).to_bytes();
        assert_eq!(reply[1], 0x83);
        let mut asm = read_assembler(8);
        feed(&mut asm, &reply);
        assert!(asm.is_complete());
        let err = asm.finish_read().unwrap_err();
        assert_eq!(
            err,
            ModbusError::Exception {
                function: 0x03,
                code: 0x02
            }
        );
        assert_eq!(err.code(), 102);
    }

    #[test]
    fn test_leading_garbage_up_to_limit_is_tolerated() {
        for garbage in 1..=MAX_LEADING_GARBAGE {
            let mut bytes = vec![0xFF; garbage];
            bytes.extend(ModbusFrame::read_response(0x01, &[150]).to_bytes());
            let mut asm = read_assembler(1);
            feed(&mut asm, &bytes);
            assert_eq!(asm.finish_read().unwrap(), vec![150], "garbage={garbage}");
        }
    }

    #[test]
    fn test_leading_garbage_beyond_limit_is_rejected() {
        let mut bytes = vec![0xFF; MAX_LEADING_GARBAGE + 1];
        bytes.extend(ModbusFrame::read_response(0x01, &[150]).to_bytes());
        let mut asm = read_assembler(1);
        feed(&mut asm, &bytes);
        assert!(asm.is_complete());
        assert!(matches!(
            asm.finish_read(),
            Err(ModbusError::WrongAddress { actual: 0xFF, .. })
        ));
    }

    #[test]
    fn test_truncated_response_is_incomplete() {
        let reply = ModbusFrame::read_response(0x01, &[1, 2]).to_bytes();
        let mut asm = read_assembler(2);
        feed(&mut asm, &reply[..5]);
        assert!(!asm.is_complete());
        assert!(matches!(
            asm.finish_read(),
            Err(ModbusError::IncompleteResponse {
                expected: 9,
                received: 5
            })
        ));

        let empty = read_assembler(2);
        assert!(matches!(
            empty.finish_read(),
            Err(ModbusError::IncompleteResponse { received: 0, .. })
        ));
    }

    #[test]
    fn test_write_echo() {
        let echo = ModbusFrame::write_single_register(0x01, 0x0010, 0x1234).to_bytes();
        let mut asm = ResponseAssembler::new(
            0x01,
            ResponseKind::WriteEcho {
                register: 0x0010,
                value: 0x1234,
            },
        );
        feed(&mut asm, &echo);
        asm.finish_write().unwrap();

        let wrong = ModbusFrame::write_single_register(0x01, 0x0010, 0x1235).to_bytes();
        let mut asm = ResponseAssembler::new(
            0x01,
            ResponseKind::WriteEcho {
                register: 0x0010,
                value: 0x1234,
            },
        );
        feed(&mut asm, &wrong);
        assert_eq!(asm.finish_write(), Err(ModbusError::EchoMismatch));
    }
}
