//! Frame checksums

/// Nibble table for CRC-16/XMODEM (polynomial 0x1021)
const CRC_PI_TABLE: [u16; 16] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50A5, 0x60C6, 0x70E7, 0x8108, 0x9129, 0xA14A,
    0xB16B, 0xC18C, 0xD1AD, 0xE1CE, 0xF1EF,
];

/// Bytes a CRC byte must never take, since they are frame markers
const CRC_PI_RESERVED: [u8; 3] = [0x28, 0x0D, 0x0A];

/// CRC used by the PI-family inverters, returned high byte first
///
/// Computed nibble-wise; any output byte equal to `(`, `\r` or `\n` is
/// bumped by one so it cannot be mistaken for a frame boundary.
pub fn crc_pi(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0;
    for &byte in data {
        for nibble in [byte >> 4, byte & 0x0F] {
            let top = (crc >> 12) as u8;
            crc = (crc << 4) ^ CRC_PI_TABLE[usize::from(top ^ nibble)];
        }
    }

    let [mut high, mut low] = crc.to_be_bytes();
    if CRC_PI_RESERVED.contains(&low) {
        low += 1;
    }
    if CRC_PI_RESERVED.contains(&high) {
        high += 1;
    }
    [high, low]
}

/// Sum of all bytes modulo 256 (JK BMS and DALY)
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}
