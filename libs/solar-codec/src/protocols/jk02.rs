//! JK02: JK BMS notification records over BLE
//!
//! Requests are fixed 20 byte frames carrying a command code. The BMS answers
//! with 300 or 320 byte notification records, little endian, whose fifth
//! byte tells the record type. Offsets below are from the record start.

use crate::bytes::ByteOrder;
use crate::command::{CommandDefinition, CommandTable, ResponseShape};
use crate::error::Result;
use crate::field::FieldSpec;
use crate::protocol::{Framing, ProtocolDefinition, ProtocolId};

const CELL_COUNT: usize = 24;
const RESISTANCE_COUNT: usize = 25;

pub(crate) fn definition() -> Result<ProtocolDefinition> {
    ProtocolDefinition::new(
        ProtocolId::Jk02,
        Framing::NotifyRecord {
            request_header: [0xAA, 0x55, 0x90, 0xEB],
            request_len: 20,
            record_header: [0x55, 0xAA, 0xEB, 0x90],
            record_lengths: &[300, 320],
        },
        ByteOrder::LittleEndian,
        CommandTable::new(vec![get_info(), get_cell_data()])?,
    )
}

fn record_header() -> [FieldSpec; 3] {
    [
        FieldSpec::hex("Header", 0, 4),
        FieldSpec::hex("Record Type", 4, 1),
        FieldSpec::unsigned("Record Counter", 5, 1),
    ]
}

fn get_info() -> CommandDefinition {
    CommandDefinition::query("getInfo", "BLE Device Information inquiry", ResponseShape::Block)
        .code(0x97)
        .record_type(3)
        .fields(record_header())
        .fields([
            FieldSpec::ascii("Device Model", 6, 10),
            FieldSpec::ascii("Hardware Version", 16, 10),
            FieldSpec::ascii("Software Version", 26, 10),
            FieldSpec::uptime("Up Time", 38, 4),
            FieldSpec::unsigned("Power-on Times", 42, 4),
            FieldSpec::ascii("Device Name", 46, 16),
            FieldSpec::ascii("Device Passcode", 62, 10),
            FieldSpec::ascii("Unknown1", 72, 14),
            FieldSpec::ascii("Unknown2", 86, 14),
            FieldSpec::ascii("User Data", 100, 16),
            FieldSpec::ascii("Settings Passcode", 116, 16),
        ])
        .sample(INFO_SAMPLE)
}

fn get_cell_data() -> CommandDefinition {
    let cells = (0..CELL_COUNT).map(|i| {
        FieldSpec::scaled(format!("Voltage Cell{:02}", i + 1), 6 + 2 * i, 2, 1000.0).unit("V")
    });
    let resistances = (0..RESISTANCE_COUNT).map(|i| {
        FieldSpec::scaled(format!("Resistance Cell{:02}", i + 1), 64 + 2 * i, 2, 1000.0)
            .unit("Ohm")
    });

    CommandDefinition::query("getCellData", "BLE Cell Data inquiry", ResponseShape::Block)
        .code(0x96)
        .record_type(2)
        .fields(record_header())
        .fields(cells)
        .fields([
            FieldSpec::scaled("Average Cell Voltage", 58, 2, 1000.0).unit("V"),
            FieldSpec::scaled("Delta Cell Voltage", 60, 2, 1000.0).unit("V"),
            FieldSpec::scaled("Current Balancer", 62, 2, 1000.0),
        ])
        .fields(resistances)
        .fields([
            FieldSpec::scaled("Battery Voltage", 118, 2, 1000.0).unit("V"),
            FieldSpec::scaled("Battery T1", 130, 2, 10.0).signed_raw().unit("°C"),
            FieldSpec::scaled("Battery T2", 132, 2, 10.0).signed_raw().unit("°C"),
            FieldSpec::scaled("MOS Temp", 134, 2, 10.0).signed_raw().unit("°C"),
            FieldSpec::unsigned("Percent Remain", 141, 1).unit("%"),
            FieldSpec::scaled("Capacity Remain", 142, 4, 1000.0).unit("Ah"),
            FieldSpec::scaled("Nominal Capacity", 146, 4, 1000.0).unit("Ah"),
            FieldSpec::unsigned("Cycle Count", 150, 4),
            FieldSpec::scaled("Cycle Capacity", 154, 4, 1000.0).unit("Ah"),
            FieldSpec::uptime("Time", 162, 3),
        ])
        .sample(CELL_DATA_SAMPLE)
}

// Captured records, header stripped; the zero tail and checksum are
// restored by framing.
const INFO_SAMPLE: &[u8] = &[
    0x03, 0xf1, 0x4a, 0x4b, 0x2d, 0x42, 0x32, 0x41, 0x32, 0x34, 0x53, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x33, 0x2e, 0x30, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x33, 0x2e, 0x32, 0x2e, 0x33, 0x00, 0x00, 0x00, 0x08, 0x76,
    0x45, 0x00, 0x04, 0x00, 0x00, 0x00, 0x50, 0x6f, 0x77, 0x65, 0x72, 0x20,
    0x57, 0x61, 0x6c, 0x6c, 0x20, 0x31, 0x00, 0x00, 0x00, 0x00, 0x31, 0x32,
    0x33, 0x34,
];

const CELL_DATA_SAMPLE: &[u8] = &[
    0x02, 0xb5, 0x2e, 0x0d, 0x28, 0x0d, 0xfa, 0x0c, 0x2e, 0x0d, 0x2f, 0x0d,
    0x22, 0x0d, 0x22, 0x0d, 0x13, 0x0d, 0x19, 0x0d, 0x1d, 0x0d, 0x1d, 0x0d,
    0x17, 0x0d, 0x1f, 0x0d, 0x16, 0x0d, 0xfb, 0x0c, 0x1f, 0x0d, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0xff, 0xff, 0x00, 0x00, 0x1c, 0x0d, 0x35, 0x00, 0x04, 0x02,
    0x9b, 0x00, 0xc6, 0x00, 0xa0, 0x00, 0xb3, 0x00, 0xbc, 0x00, 0xcc, 0x00,
    0xbe, 0x00, 0xb1, 0x00, 0xb4, 0x00, 0x2d, 0x01, 0x3d, 0x01, 0xb0, 0x00,
    0xa1, 0x00, 0xab, 0x00, 0xb2, 0x00, 0xad, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xbc, 0xd1, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1e, 0x01, 0x16, 0x01, 0x3c, 0x01,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x63, 0x6b, 0x0c, 0x03, 0x00, 0x40, 0x0d,
    0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0xdc, 0x4d, 0x01, 0x00, 0x64, 0x00,
    0x00, 0x00, 0x78, 0x1e, 0x16, 0x00, 0x01, 0x01, 0x48, 0x0a, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07, 0x01,
    0x01, 0x00, 0x00, 0x00, 0x98, 0x04, 0x00, 0x00, 0x00, 0x00, 0x26, 0x01,
    0x41, 0x40, 0x00, 0x00, 0x00, 0x00, 0x37, 0xfe, 0xff, 0xff, 0x00, 0x00,
    0x00, 0x01,
];

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::value::ReadingValue;

    #[test]
    fn test_request_frames() {
        let jk = definition().unwrap();
        let frame = jk.build_command("getInfo", None).unwrap();
        assert_eq!(frame.len(), 20);
        assert_eq!(&frame.as_bytes()[..5], &[0xAA, 0x55, 0x90, 0xEB, 0x97]);
        assert_eq!(frame.as_bytes()[19], 0x11);

        let frame = jk.build_command("getCellData", None).unwrap();
        assert_eq!(frame.as_bytes()[4], 0x96);
        assert_eq!(frame.as_bytes()[19], 0x10);
    }

    #[test]
    fn test_sample_records_keep_captured_checksum() {
        let jk = definition().unwrap();
        let info = jk.sample_response("getInfo").unwrap().unwrap();
        assert_eq!(info.len(), 300);
        assert_eq!(info[299], 0xC2);
        assert!(jk.is_record_complete(&info));

        let cells = jk.sample_response("getCellData").unwrap().unwrap();
        assert_eq!(cells.len(), 300);
        assert_eq!(cells[299], 0x80);
        assert_eq!(jk.record_type(&cells), Some(2));
    }

    #[test]
    fn test_decode_cell_data() {
        let jk = definition().unwrap();
        let sent = jk.build_command("getCellData", None).unwrap();
        let raw = jk.sample_response("getCellData").unwrap().unwrap();
        let set = jk.decode(&raw, &sent).unwrap();

        assert!(set.issues().is_empty());
        assert_eq!(set.get("Record Counter").unwrap().value, ReadingValue::Integer(181));
        assert_eq!(set.get("Voltage Cell01").unwrap().value, ReadingValue::Float(3.374));
        assert_eq!(set.get("Voltage Cell17").unwrap().value, ReadingValue::Float(0.0));
        assert_eq!(set.get("Delta Cell Voltage").unwrap().value, ReadingValue::Float(0.053));
        assert_eq!(set.get("Battery Voltage").unwrap().value, ReadingValue::Float(53.692));
        assert_eq!(set.get("MOS Temp").unwrap().value, ReadingValue::Float(31.6));
        assert_eq!(set.get("Percent Remain").unwrap().value, ReadingValue::Integer(99));
        assert_eq!(set.get("Nominal Capacity").unwrap().value, ReadingValue::Float(200.0));
        assert_eq!(set.get("Time").unwrap().value.as_str(), Some("16D18H39M52S"));
    }

    #[test]
    fn test_decode_info() {
        let jk = definition().unwrap();
        let sent = jk.build_command("getInfo", None).unwrap();
        let raw = jk.sample_response("getInfo").unwrap().unwrap();
        let set = jk.decode(&raw, &sent).unwrap();

        assert_eq!(set.get("Header").unwrap().value.as_str(), Some("55aaeb90"));
        assert_eq!(set.get("Record Type").unwrap().value.as_str(), Some("03"));
        assert_eq!(set.get("Device Model").unwrap().value.as_str(), Some("JK-B2A24S"));
        assert_eq!(set.get("Software Version").unwrap().value.as_str(), Some("3.2.3"));
        assert_eq!(set.get("Device Name").unwrap().value.as_str(), Some("Power Wall 1"));
        assert_eq!(set.get("Up Time").unwrap().value.as_str(), Some("52D16H30M0S"));
        assert_eq!(set.get("Power-on Times").unwrap().value, ReadingValue::Integer(4));
        assert_eq!(set.get("User Data").unwrap().value.as_str(), Some(""));
    }

    #[test]
    fn test_record_of_other_type_is_rejected() {
        let jk = definition().unwrap();
        let sent = jk.build_command("getInfo", None).unwrap();
        let cells = jk.sample_response("getCellData").unwrap().unwrap();
        assert!(jk.decode(&cells, &sent).is_err());
    }
}
