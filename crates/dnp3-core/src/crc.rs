//! DNP3 CRC-16 computation.
//!
//! Generator polynomial x^16+x^13+x^12+x^11+x^10+x^8+x^6+x^5+x^2+1 (0x3D65),
//! computed bit-reflected via a 256-entry lookup table with the final value
//! complemented. The CRC is transmitted least-significant byte first.

use alloc::vec::Vec;

use crate::constants::CRC_SIZE;

/// Bit-reflected form of the generator polynomial 0x3D65.
const POLY_REFLECTED: u16 = 0xA6BC;

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u16; 256] = build_table();

/// Compute the DNP3 CRC-16 of `data`.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc = CRC_TABLE[((crc ^ byte as u16) & 0xFF) as usize] ^ (crc >> 8);
    }
    !crc
}

/// Append the CRC of `buf[start..]` to `buf`, little-endian.
pub fn append_crc(buf: &mut Vec<u8>, start: usize) {
    let crc = crc16(&buf[start..]);
    buf.extend_from_slice(&crc.to_le_bytes());
}

/// Verify a buffer whose last two bytes are the little-endian CRC of the rest.
#[must_use]
pub fn check_crc(block: &[u8]) -> bool {
    if block.len() < CRC_SIZE {
        return false;
    }
    let (data, tail) = block.split_at(block.len() - CRC_SIZE);
    crc16(data) == u16::from_le_bytes([tail[0], tail[1]])
}
