//! Integer and BCD conversions over byte slices

use super::ByteOrder;

/// Read an unsigned integer of `bytes.len()` bytes (1..=8)
pub fn read_unsigned(bytes: &[u8], order: ByteOrder) -> u64 {
    debug_assert!(bytes.len() <= 8, "Width out of range: {}", bytes.len());
    let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
    match order {
        ByteOrder::BigEndian => bytes.iter().fold(0, fold),
        ByteOrder::LittleEndian => bytes.iter().rev().fold(0, fold),
    }
}

/// Read a two's complement signed integer of `bytes.len()` bytes (1..=8)
pub fn read_signed(bytes: &[u8], order: ByteOrder) -> i64 {
    let width = bytes.len();
    if width == 0 {
        return 0;
    }
    let raw = read_unsigned(bytes, order);
    let shift = 64 - (width as u32 * 8);
    ((raw << shift) as i64) >> shift
}

/// Decode one packed BCD byte (two digits) into 0..=99
pub fn bcd_byte(byte: u8) -> Option<u8> {
    let high = byte >> 4;
    let low = byte & 0x0F;
    if high > 9 || low > 9 {
        return None;
    }
    Some(high * 10 + low)
}

/// Render seconds as `<d>D<h>H<m>M<s>S`
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3_600;
    let minutes = seconds % 3_600 / 60;
    let secs = seconds % 60;
    format!("{}D{}H{}M{}S", days, hours, minutes, secs)
}
