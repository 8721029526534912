//! Bit-level operations for status flags

/// Extract single bit from u8 value
#[inline]
pub fn extract_bit_u8(value: u8, bit_index: u8) -> bool {
    debug_assert!(bit_index < 8, "Bit index out of range: {}", bit_index);
    (value & (1 << bit_index)) != 0
}

/// Extract bit `bit_index` (LSB-first) from a byte slice
///
/// Bit 0 is the least significant bit of the first byte. Out of range bits
/// return None.
pub fn extract_bit(bytes: &[u8], bit_index: usize) -> Option<bool> {
    let byte = bytes.get(bit_index / 8)?;
    Some(extract_bit_u8(*byte, (bit_index % 8) as u8))
}

/// Read a flag from a `0`/`1` character string such as `00110110`
///
/// Index 0 is the leftmost character. Any other character yields None.
pub fn flag_char(flags: &str, index: usize) -> Option<bool> {
    match flags.as_bytes().get(index)? {
        b'1' => Some(true),
        b'0' => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bit_u8() {
        assert!(extract_bit_u8(0b0000_0001, 0));
        assert!(!extract_bit_u8(0b0000_0001, 1));
        assert!(extract_bit_u8(0b1000_0000, 7));
    }

    #[test]
    fn test_extract_bit_spans_bytes() {
        let bytes = [0x00, 0x02];
        assert_eq!(extract_bit(&bytes, 9), Some(true));
        assert_eq!(extract_bit(&bytes, 8), Some(false));
        assert_eq!(extract_bit(&bytes, 16), None);
    }

    #[test]
    fn test_flag_char() {
        assert_eq!(flag_char("00110110", 2), Some(true));
        assert_eq!(flag_char("00110110", 0), Some(false));
        assert_eq!(flag_char("00110110", 8), None);
        assert_eq!(flag_char("0x", 1), None);
    }
}
