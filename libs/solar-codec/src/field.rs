//! Field decoding
//!
//! A `FieldSpec` extracts one typed, unit-labelled value from a response.
//! Binary layouts address fields by byte offset; delimited text layouts by
//! token position. Decoding never fails the whole response: problems come
//! back as `Decoded::Degraded` (value kept, issue recorded) or
//! `Decoded::Missing` (no value).

use std::borrow::Cow;

use chrono::NaiveDate;

use crate::bytes::{
    bcd_byte, extract_bit, flag_char, format_uptime, read_signed, read_unsigned, ByteOrder,
};
use crate::error::FieldError;
use crate::value::ReadingValue;

/// Lookup table for enumerated fields: raw code -> label
pub type EnumOptions = &'static [(&'static str, &'static str)];

/// How the raw bytes or token of a field are interpreted
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Unsigned integer, `width` bytes in binary layouts
    Unsigned { width: usize },
    /// Two's complement integer, `width` bytes in binary layouts
    Signed { width: usize },
    /// Fixed point: `(raw - offset) / scale`
    Scaled {
        width: usize,
        signed: bool,
        scale: f64,
        offset: i64,
    },
    /// Decimal token, or IEEE-754 single in binary layouts
    Float,
    /// Code looked up in a static table
    Enum { options: EnumOptions },
    /// One status bit: bit index in binary layouts, character index in text
    Flag { bit: usize },
    /// Packed BCD `YY MM DD hh mm ss`, or a 12/14 digit token
    BcdTimestamp,
    /// Raw string; binary NULs are dropped, `len == 0` takes the whole token
    Ascii { len: usize },
    /// Lowercase hex rendering of the raw bytes
    Hex { len: usize },
    /// Seconds counter rendered as `<d>D<h>H<m>M<s>S`
    Uptime { len: usize },
}

impl FieldKind {
    /// Bytes consumed at the field's offset in a binary layout
    pub fn binary_width(&self) -> usize {
        match self {
            FieldKind::Unsigned { width }
            | FieldKind::Signed { width }
            | FieldKind::Scaled { width, .. } => *width,
            FieldKind::Float => 4,
            FieldKind::Enum { .. } => 1,
            FieldKind::Flag { bit } => bit / 8 + 1,
            FieldKind::BcdTimestamp => 6,
            FieldKind::Ascii { len } | FieldKind::Hex { len } | FieldKind::Uptime { len } => *len,
        }
    }
}

/// Outcome of decoding one field
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Value(ReadingValue),
    /// A fallback value was produced alongside a field-local issue
    Degraded(ReadingValue, FieldError),
    /// Nothing to report for this field
    Missing(FieldError),
}

/// One entry of a command's response layout
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    /// Byte offset (binary) or token index (delimited text)
    pub at: usize,
    pub kind: FieldKind,
    pub unit: &'static str,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, at: usize, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            at,
            kind,
            unit: "",
        }
    }

    pub fn unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    pub fn unsigned(name: impl Into<String>, at: usize, width: usize) -> Self {
        Self::new(name, at, FieldKind::Unsigned { width })
    }

    pub fn signed(name: impl Into<String>, at: usize, width: usize) -> Self {
        Self::new(name, at, FieldKind::Signed { width })
    }

    pub fn scaled(name: impl Into<String>, at: usize, width: usize, scale: f64) -> Self {
        Self::new(
            name,
            at,
            FieldKind::Scaled {
                width,
                signed: false,
                scale,
                offset: 0,
            },
        )
    }

    /// Subtract `offset` from the raw value before scaling
    pub fn offset(mut self, value: i64) -> Self {
        if let FieldKind::Scaled { offset, .. } = &mut self.kind {
            *offset = value;
        }
        self
    }

    /// Read the raw value of a scaled field as two's complement
    pub fn signed_raw(mut self) -> Self {
        if let FieldKind::Scaled { signed, .. } = &mut self.kind {
            *signed = true;
        }
        self
    }

    pub fn float(name: impl Into<String>, at: usize) -> Self {
        Self::new(name, at, FieldKind::Float)
    }

    /// Whole-token string
    pub fn text(name: impl Into<String>, at: usize) -> Self {
        Self::new(name, at, FieldKind::Ascii { len: 0 })
    }

    pub fn ascii(name: impl Into<String>, at: usize, len: usize) -> Self {
        Self::new(name, at, FieldKind::Ascii { len })
    }

    pub fn hex(name: impl Into<String>, at: usize, len: usize) -> Self {
        Self::new(name, at, FieldKind::Hex { len })
    }

    pub fn enumeration(name: impl Into<String>, at: usize, options: EnumOptions) -> Self {
        Self::new(name, at, FieldKind::Enum { options })
    }

    pub fn flag(name: impl Into<String>, at: usize, bit: usize) -> Self {
        Self::new(name, at, FieldKind::Flag { bit })
    }

    pub fn timestamp(name: impl Into<String>, at: usize) -> Self {
        Self::new(name, at, FieldKind::BcdTimestamp)
    }

    pub fn uptime(name: impl Into<String>, at: usize, len: usize) -> Self {
        Self::new(name, at, FieldKind::Uptime { len })
    }

    fn truncated(&self) -> Decoded {
        Decoded::Missing(FieldError::Truncated {
            field: self.name.clone(),
        })
    }

    fn invalid_number(&self, raw: &str) -> Decoded {
        Decoded::Degraded(
            ReadingValue::from(raw.to_string()),
            FieldError::InvalidNumber {
                field: self.name.clone(),
                raw: raw.to_string(),
            },
        )
    }

    /// Decode from a binary record, offsets relative to the record start
    pub fn decode_binary(&self, record: &[u8], order: ByteOrder) -> Decoded {
        let width = self.kind.binary_width();
        let Some(bytes) = record.get(self.at..self.at + width) else {
            return self.truncated();
        };

        match &self.kind {
            FieldKind::Unsigned { .. } => Decoded::Value(read_unsigned(bytes, order).into()),
            FieldKind::Signed { .. } => Decoded::Value(read_signed(bytes, order).into()),
            FieldKind::Scaled {
                signed,
                scale,
                offset,
                ..
            } => {
                let raw = if *signed {
                    read_signed(bytes, order)
                } else {
                    read_unsigned(bytes, order) as i64
                };
                Decoded::Value(ReadingValue::Float((raw - offset) as f64 / scale))
            },
            FieldKind::Float => {
                let raw = read_unsigned(bytes, order) as u32;
                Decoded::Value(ReadingValue::Float(f64::from(f32::from_bits(raw))))
            },
            FieldKind::Enum { options } => self.lookup(options, &bytes[0].to_string()),
            FieldKind::Flag { bit } => match extract_bit(bytes, *bit) {
                Some(set) => Decoded::Value(set.into()),
                None => self.truncated(),
            },
            FieldKind::BcdTimestamp => {
                let digits: Option<Vec<u32>> =
                    bytes.iter().map(|b| bcd_byte(*b).map(u32::from)).collect();
                let raw = hex_string(bytes);
                match digits {
                    Some(d) => self.timestamp_value(2000 + d[0] as i32, &d[1..], &raw),
                    None => self.malformed_timestamp(&raw),
                }
            },
            FieldKind::Ascii { .. } => {
                let text: Vec<u8> = bytes.iter().copied().filter(|b| *b != 0).collect();
                Decoded::Value(String::from_utf8_lossy(&text).into_owned().into())
            },
            FieldKind::Hex { .. } => Decoded::Value(hex_string(bytes).into()),
            FieldKind::Uptime { .. } => {
                Decoded::Value(format_uptime(read_unsigned(bytes, order)).into())
            },
        }
    }

    /// Decode from a text token; `None` means the response had no such token
    pub fn decode_text(&self, token: Option<&str>) -> Decoded {
        let Some(token) = token else {
            return self.truncated();
        };

        match &self.kind {
            FieldKind::Unsigned { .. } | FieldKind::Signed { .. } => match token.parse::<i64>() {
                Ok(v) => Decoded::Value(v.into()),
                Err(_) => self.invalid_number(token),
            },
            FieldKind::Scaled { scale, offset, .. } => match token.parse::<i64>() {
                Ok(raw) => Decoded::Value(ReadingValue::Float((raw - offset) as f64 / scale)),
                Err(_) => self.invalid_number(token),
            },
            FieldKind::Float => match token.parse::<f64>() {
                Ok(v) => Decoded::Value(v.into()),
                Err(_) => self.invalid_number(token),
            },
            FieldKind::Enum { options } => self.lookup(options, token),
            FieldKind::Flag { bit } => {
                if *bit >= token.len() {
                    return self.truncated();
                }
                match flag_char(token, *bit) {
                    Some(set) => Decoded::Value(set.into()),
                    None => self.invalid_number(token),
                }
            },
            FieldKind::BcdTimestamp => self.decode_timestamp_token(token),
            FieldKind::Ascii { len } => {
                let text: String = if *len == 0 {
                    token.to_string()
                } else {
                    token.chars().take(*len).collect()
                };
                Decoded::Value(text.into())
            },
            FieldKind::Hex { .. } => Decoded::Value(token.to_lowercase().into()),
            FieldKind::Uptime { .. } => match token.parse::<u64>() {
                Ok(secs) => Decoded::Value(format_uptime(secs).into()),
                Err(_) => self.invalid_number(token),
            },
        }
    }

    fn lookup(&self, options: EnumOptions, raw: &str) -> Decoded {
        let exact = options.iter().find(|(code, _)| *code == raw);
        // "1" and "01" name the same code
        let numeric = || {
            let wanted: i64 = raw.parse().ok()?;
            options
                .iter()
                .find(|(code, _)| code.parse::<i64>().ok() == Some(wanted))
        };

        match exact.or_else(numeric) {
            Some((_, label)) => Decoded::Value(ReadingValue::String(Cow::Borrowed(*label))),
            None => Decoded::Degraded(
                ReadingValue::from(format!("Unknown {}", raw)),
                FieldError::UnknownEnumValue {
                    field: self.name.clone(),
                    raw: raw.to_string(),
                },
            ),
        }
    }

    fn decode_timestamp_token(&self, token: &str) -> Decoded {
        if !token.bytes().all(|b| b.is_ascii_digit()) {
            return self.malformed_timestamp(token);
        }
        let (year, rest) = match token.len() {
            14 => (token[..4].parse::<i32>().ok(), &token[4..]),
            12 => (token[..2].parse::<i32>().ok().map(|y| 2000 + y), &token[2..]),
            _ => return self.malformed_timestamp(token),
        };
        let parts: Option<Vec<u32>> = (0..5)
            .map(|i| rest[i * 2..i * 2 + 2].parse::<u32>().ok())
            .collect();
        match (year, parts) {
            (Some(year), Some(parts)) => self.timestamp_value(year, &parts, token),
            _ => self.malformed_timestamp(token),
        }
    }

    /// `parts` is month, day, hour, minute, second
    fn timestamp_value(&self, year: i32, parts: &[u32], raw: &str) -> Decoded {
        let [month, day, hour, minute, second] = parts else {
            return self.malformed_timestamp(raw);
        };
        NaiveDate::from_ymd_opt(year, *month, *day)
            .and_then(|date| date.and_hms_opt(*hour, *minute, *second))
            .map(|ts| Decoded::Value(ts.format("%Y-%m-%d %H:%M:%S").to_string().into()))
            .unwrap_or_else(|| self.malformed_timestamp(raw))
    }

    fn malformed_timestamp(&self, raw: &str) -> Decoded {
        Decoded::Degraded(
            ReadingValue::from(raw.to_string()),
            FieldError::MalformedTimestamp {
                field: self.name.clone(),
                raw: raw.to_string(),
            },
        )
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const MODES: EnumOptions = &[("P", "Power on"), ("S", "Standby"), ("L", "Line")];
    const PRIORITY: EnumOptions = &[
        ("0", "Utility first"),
        ("1", "Solar first"),
        ("2", "SBU first"),
    ];

    #[test]
    fn test_scaled_binary_value_with_unit() {
        // 575 big-endian
        let spec = FieldSpec::scaled("Battery Voltage", 0, 2, 10.0).unit("V");
        let decoded = spec.decode_binary(&[0x02, 0x3F], ByteOrder::BigEndian);
        assert_eq!(decoded, Decoded::Value(ReadingValue::Float(57.5)));
        assert_eq!(spec.unit, "V");
    }

    #[test]
    fn test_scaled_offset() {
        let spec = FieldSpec::scaled("Current", 0, 2, 10.0).offset(30_000).unit("A");
        let decoded = spec.decode_binary(&[0x75, 0x45], ByteOrder::BigEndian);
        assert_eq!(decoded, Decoded::Value(ReadingValue::Float(2.1)));
    }

    #[test]
    fn test_unsigned_and_signed_binary() {
        let record = [0x00, 0xFF, 0xFE];
        assert_eq!(
            FieldSpec::unsigned("u", 1, 2).decode_binary(&record, ByteOrder::BigEndian),
            Decoded::Value(ReadingValue::Integer(0xFFFE))
        );
        assert_eq!(
            FieldSpec::signed("s", 1, 2).decode_binary(&record, ByteOrder::BigEndian),
            Decoded::Value(ReadingValue::Integer(-2))
        );
    }

    #[test]
    fn test_truncated_binary_field() {
        let spec = FieldSpec::unsigned("SOC", 10, 2);
        match spec.decode_binary(&[0u8; 4], ByteOrder::BigEndian) {
            Decoded::Missing(FieldError::Truncated { field }) => assert_eq!(field, "SOC"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_enum_text_known_and_unknown() {
        let spec = FieldSpec::enumeration("Device Mode", 0, MODES);
        assert_eq!(
            spec.decode_text(Some("L")),
            Decoded::Value(ReadingValue::from("Line"))
        );
        match spec.decode_text(Some("Z")) {
            Decoded::Degraded(value, FieldError::UnknownEnumValue { raw, .. }) => {
                assert_eq!(value, ReadingValue::from("Unknown Z".to_string()));
                assert_eq!(raw, "Z");
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_enum_numeric_codes_match_padded_tokens() {
        let spec = FieldSpec::enumeration("Output Source Priority", 0, PRIORITY);
        assert_eq!(
            spec.decode_text(Some("02")),
            Decoded::Value(ReadingValue::from("SBU first"))
        );
        assert_eq!(
            spec.decode_binary(&[0x01], ByteOrder::BigEndian),
            Decoded::Value(ReadingValue::from("Solar first"))
        );
    }

    #[test]
    fn test_flag_text_and_binary() {
        let spec = FieldSpec::flag("Is Load On", 16, 3);
        assert_eq!(
            spec.decode_text(Some("00110110")),
            Decoded::Value(ReadingValue::Bool(true))
        );
        assert!(matches!(spec.decode_text(Some("00")), Decoded::Missing(_)));

        let bit = FieldSpec::flag("Charging", 0, 1);
        assert_eq!(
            bit.decode_binary(&[0b10], ByteOrder::BigEndian),
            Decoded::Value(ReadingValue::Bool(true))
        );
    }

    #[test]
    fn test_bcd_timestamp_binary() {
        let spec = FieldSpec::timestamp("Device Time", 0);
        let bytes = [0x26, 0x03, 0x18, 0x12, 0x34, 0x56];
        let decoded = spec.decode_binary(&bytes, ByteOrder::BigEndian);
        assert_eq!(
            decoded,
            Decoded::Value(ReadingValue::from("2026-03-18 12:34:56".to_string()))
        );
    }

    #[test]
    fn test_bcd_timestamp_out_of_range_month() {
        let spec = FieldSpec::timestamp("Device Time", 0);
        match spec.decode_binary(&[0x26, 0x13, 0x01, 0x00, 0x00, 0x00], ByteOrder::BigEndian) {
            Decoded::Degraded(value, FieldError::MalformedTimestamp { raw, .. }) => {
                assert_eq!(raw, "261301000000");
                assert_eq!(value.as_str(), Some("261301000000"));
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_timestamp_tokens() {
        let spec = FieldSpec::timestamp("Device Time", 0);
        assert_eq!(
            spec.decode_text(Some("20260318123456")),
            Decoded::Value(ReadingValue::from("2026-03-18 12:34:56".to_string()))
        );
        assert!(matches!(
            spec.decode_text(Some("260318123456")),
            Decoded::Value(_)
        ));
        assert!(matches!(
            spec.decode_text(Some("2026031812345x")),
            Decoded::Degraded(_, FieldError::MalformedTimestamp { .. })
        ));
    }

    #[test]
    fn test_ascii_drops_nul_bytes() {
        let spec = FieldSpec::ascii("Device Model", 0, 6);
        assert_eq!(
            spec.decode_binary(b"JK\0\0B\0", ByteOrder::LittleEndian),
            Decoded::Value(ReadingValue::from("JKB".to_string()))
        );
    }

    #[test]
    fn test_invalid_number_keeps_raw_token() {
        let spec = FieldSpec::float("AC Input Voltage", 0).unit("V");
        match spec.decode_text(Some("23O.0")) {
            Decoded::Degraded(value, FieldError::InvalidNumber { .. }) => {
                assert_eq!(value.as_str(), Some("23O.0"));
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_uptime() {
        let spec = FieldSpec::uptime("Time", 0, 3);
        assert_eq!(
            spec.decode_binary(&[0x78, 0x1E, 0x16], ByteOrder::LittleEndian),
            Decoded::Value(ReadingValue::from("16D18H39M52S".to_string()))
        );
    }
}
