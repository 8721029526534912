//! Byte order of multi-byte integers inside binary responses

/// Byte order for multi-byte fields
///
/// For 16-bit value `0x1234`:
/// - `BigEndian`: [0x12, 0x34]
/// - `LittleEndian`: [0x34, 0x12]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// Most significant byte first (DALY)
    #[default]
    BigEndian,

    /// Least significant byte first (JK BMS)
    LittleEndian,
}
