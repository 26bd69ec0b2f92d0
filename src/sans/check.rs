//! Checksums and cyclic redundancy checks used by the supported meters.

use crc::{CRC_8_MAXIM_DOW, Crc};

const MAXIM: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);

/// Sum of all bytes, wrapping at 16 bits.
pub fn sum16(r: &[u8]) -> u16 {
    r.iter().fold(0u16, |acc, b| acc.wrapping_add(*b as u16))
}

/// Sum of all bytes, wrapping at 32 bits.
pub fn sum32(r: &[u8]) -> u32 {
    r.iter().fold(0u32, |acc, b| acc.wrapping_add(*b as u32))
}

/// Sum of all bytes modulo 256.
pub fn byte_sum_mod256(r: &[u8]) -> u8 {
    r.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// XOR of every byte, the checksum of SD CodeFree frames.
pub fn xor_fold(r: &[u8]) -> u8 {
    r.iter().fold(0u8, |acc, b| acc ^ b)
}

/// CRC-CCITT variant used by LifeScan packets and registers, seeded with
/// `0xFFFF`.
pub fn crc_ccitt_lifescan(r: &[u8]) -> u16 {
    r.iter().fold(0xFFFF, |crc, byte| crc_ccitt_step(crc, *byte))
}

fn crc_ccitt_step(crc: u16, byte: u8) -> u16 {
    let mut crc = crc.swap_bytes() ^ byte as u16;
    crc ^= (crc & 0xFF) >> 4;
    crc ^= crc << 12;
    crc ^ (crc & 0xFF) << 5
}

/// CRC-8/MAXIM (Dallas 1-Wire), used by GlucoMen areo responses.
pub fn crc8_maxim(r: &[u8]) -> u8 {
    MAXIM.checksum(r)
}
