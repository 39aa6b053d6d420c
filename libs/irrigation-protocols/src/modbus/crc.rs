//! Modbus CRC16 (polynomial 0xA001 reflected, initial value 0xFFFF)

/// Calculate CRC16 checksum (Modbus RTU standard)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_known_frame() {
        // 01 03 00 00 00 01 -> CRC bytes on the wire: 84 0A
        let crc = crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(crc, 0x0A84);
        assert_eq!(crc.to_le_bytes(), [0x84, 0x0A]);
    }

    #[test]
    fn test_crc16_empty_data() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_crc16_is_deterministic() {
        let data = [0x11, 0x06, 0x00, 0x01, 0x00, 0x03];
        assert_eq!(crc16(&data), crc16(&data));
    }

    #[test]
    fn test_crc16_detects_every_single_bit_flip() {
        let data: Vec<u8> = (0u8..32).map(|b| b.wrapping_mul(37).wrapping_add(11)).collect();
        let reference = crc16(&data);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data.clone();
                corrupted[byte] ^= 1 << bit;
                assert_ne!(
                    crc16(&corrupted),
                    reference,
                    "flip of bit {bit} in byte {byte} went undetected"
                );
            }
        }
    }

    #[test]
    fn test_crc16_appended_frame_checks_to_zero() {
        // A frame followed by its little-endian CRC yields residue 0
        let mut frame = vec![0x01, 0x03, 0x02, 0x00, 0x96];
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(crc16(&frame), 0x0000);
    }
}
