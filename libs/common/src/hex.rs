//! Hex encoding helpers used when logging raw frames

use std::fmt::Write;

/// Encode bytes as space separated uppercase pairs: "A5 01 90"
pub fn encode_spaced(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            result.push(' ');
        }
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}

/// Render a frame for logs: printable ASCII frames as escaped text, binary frames as hex
pub fn describe_frame(data: &[u8]) -> String {
    let printable = data
        .iter()
        .all(|b| b.is_ascii_graphic() || matches!(b, b' ' | b'\r' | b'\n'));
    if printable && !data.is_empty() {
        data.escape_ascii().to_string()
    } else {
        encode_spaced(data)
    }
}
