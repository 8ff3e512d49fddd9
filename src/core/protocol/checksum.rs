//! Integrity checks
//!
//! The RTU check value (reflected CRC-16, polynomial 0xA001) and the
//! single-byte trailers a declared layout can name.

use serde::{Deserialize, Serialize};

/// Single-byte trailer algorithm of a declared frame layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    /// XOR of all bytes
    Xor,
    /// Sum of all bytes mod 256
    Sum8,
    /// Two's complement of the 8-bit sum
    Lrc,
}

impl ChecksumType {
    /// All algorithms
    pub fn all() -> &'static [ChecksumType] {
        &[Self::Xor, Self::Sum8, Self::Lrc]
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            Self::Xor => "XOR",
            Self::Sum8 => "Sum-8",
            Self::Lrc => "LRC",
        }
    }

    /// Compute the trailer byte over `data`
    pub fn compute(self, data: &[u8]) -> u8 {
        match self {
            Self::Xor => xor8(data),
            Self::Sum8 => sum8(data),
            Self::Lrc => lrc8(data),
        }
    }
}

impl std::str::FromStr for ChecksumType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xor" => Ok(Self::Xor),
            "sum8" | "sum" => Ok(Self::Sum8),
            "lrc" => Ok(Self::Lrc),
            other => Err(format!("unknown checksum '{other}'")),
        }
    }
}

/// XOR of all bytes
pub fn xor8(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &b| acc ^ b)
}

/// 8-bit wrapping sum
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc: u8, &b| acc.wrapping_add(b))
}

/// Longitudinal redundancy check
pub fn lrc8(data: &[u8]) -> u8 {
    sum8(data).wrapping_neg()
}

/// CRC-16/Modbus: register starts at 0xFFFF, reflected polynomial 0xA001.
/// Transmitted low byte first.
pub fn crc16_modbus(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF_u16, |mut crc, &byte| {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
        crc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_modbus_check_vector() {
        assert_eq!(crc16_modbus(b"123456789"), 0x4B37);
        assert_eq!(crc16_modbus(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
        assert_eq!(crc16_modbus(&[]), 0xFFFF);
    }

    #[test]
    fn test_single_bit_flips_change_crc() {
        let data: Vec<u8> = (0u8..32).map(|i| i.wrapping_mul(37)).collect();
        let reference = crc16_modbus(&data);
        assert_eq!(reference, crc16_modbus(&data));

        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut flipped = data.clone();
                flipped[byte] ^= 1 << bit;
                assert_ne!(crc16_modbus(&flipped), reference, "byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn test_trailer_algorithms() {
        assert_eq!(xor8(&[0x01, 0x02, 0x03]), 0x00);
        assert_eq!(sum8(&[0xFF, 0x02]), 0x01);
        assert_eq!(lrc8(&[0x01, 0x02]), 0xFD);
        assert_eq!(ChecksumType::Xor.compute(&[0xAA, 0x0F]), 0xA5);
        assert_eq!("LRC".parse::<ChecksumType>().unwrap(), ChecksumType::Lrc);
    }
}
