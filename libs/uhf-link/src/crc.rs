//! Frame checksums
//!
//! The reader family uses a reflected CRC-16 (poly 0x8408, init 0xFFFF, no
//! final xor). Older firmware speaking the `0xA0` header protocol uses a
//! single-byte two's-complement sum instead.

/// Reflected CRC-16 polynomial
pub const CRC16_POLY: u16 = 0x8408;

/// CRC-16 initial register value
pub const CRC16_INIT: u16 = 0xFFFF;

/// Calculate the reflected CRC-16 over `data`
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Two's complement of the byte sum: `(0 - sum) & 0xFF`
pub fn twos_complement(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}
