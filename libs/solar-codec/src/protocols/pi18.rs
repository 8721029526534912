//! PI18: length-prefixed ASCII inverter protocol
//!
//! Queries go out as `^P<len>`, setters as `^S<len>`, where `len` counts the
//! command, CRC and CR. Data responses come back as `^D<len>` with comma
//! separated values; setters answer `^1` or `^0`.

use crate::bytes::ByteOrder;
use crate::command::{CommandDefinition, CommandTable, ResponseShape};
use crate::error::Result;
use crate::field::{EnumOptions, FieldSpec};
use crate::protocol::{Framing, ProtocolDefinition, ProtocolId};

const VALUES: ResponseShape = ResponseShape::Delimited { separator: b',' };

const ACK: EnumOptions = &[("1", "Successful"), ("0", "Failed")];

const WORKING_MODES: EnumOptions = &[
    ("0", "Power on mode"),
    ("1", "Standby mode"),
    ("2", "Bypass mode"),
    ("3", "Battery mode"),
    ("4", "Fault mode"),
    ("5", "Hybrid mode(Line mode, Grid mode)"),
];

const SETTING_STATES: EnumOptions = &[("0", "Nothing changed"), ("1", "Something changed")];

const CHARGER_STATES: EnumOptions = &[
    ("0", "abnormal"),
    ("1", "normal but not charged"),
    ("2", "charging"),
];

const LOAD_CONNECTION: EnumOptions = &[("0", "disconnect"), ("1", "connect")];

const BATTERY_DIRECTIONS: EnumOptions = &[("0", "donothing"), ("1", "charge"), ("2", "discharge")];

const DC_AC_DIRECTIONS: EnumOptions = &[("0", "donothing"), ("1", "AC-DC"), ("2", "DC-AC")];

const LINE_DIRECTIONS: EnumOptions = &[("0", "donothing"), ("1", "input"), ("2", "output")];

pub(crate) fn definition() -> Result<ProtocolDefinition> {
    ProtocolDefinition::new(
        ProtocolId::Pi18,
        Framing::CaretCrc,
        ByteOrder::BigEndian,
        commands()?,
    )
}

fn commands() -> Result<CommandTable> {
    CommandTable::new(vec![
        CommandDefinition::query("PI", "Device Protocol Version inquiry", VALUES)
            .field(FieldSpec::text("Protocol Version", 0))
            .sample(b"18"),
        CommandDefinition::query("ID", "Device Serial Number inquiry", VALUES)
            .field(FieldSpec::text("Serial Number", 0))
            .sample(b"14012345678901234"),
        CommandDefinition::query("T", "Query current time", VALUES)
            .field(FieldSpec::timestamp("Device Time", 0))
            .sample(b"20260318123456"),
        CommandDefinition::query("ET", "Query total generated energy", VALUES)
            .field(FieldSpec::unsigned("Total generated energy", 0, 4).unit("Wh"))
            .sample(b"00012345"),
        CommandDefinition::query("VFW", "Device CPU version inquiry", VALUES)
            .fields([
                FieldSpec::unsigned("Main CPU Version", 0, 2),
                FieldSpec::unsigned("Slave 1 CPU Version", 1, 2),
                FieldSpec::unsigned("Slave 2 CPU Version", 2, 2),
            ])
            .sample(b"05220,00000,00000"),
        CommandDefinition::query("MOD", "Working mode inquiry", VALUES)
            .field(FieldSpec::enumeration("Working mode", 0, WORKING_MODES))
            .sample(b"05"),
        general_status(),
        CommandDefinition::setter("POP", "Set Device Output Source Priority", VALUES)
            .param("[01]")?
            .field(FieldSpec::enumeration("Command execution", 0, ACK))
            .sample(b"1"),
    ])
}

fn tenths(name: &'static str, at: usize, unit: &'static str) -> FieldSpec {
    FieldSpec::scaled(name, at, 2, 10.0).unit(unit)
}

fn general_status() -> CommandDefinition {
    CommandDefinition::query("GS", "General status parameters inquiry", VALUES)
        .fields([
            tenths("Grid voltage", 0, "V"),
            tenths("Grid frequency", 1, "Hz"),
            tenths("AC output voltage", 2, "V"),
            tenths("AC output frequency", 3, "Hz"),
            FieldSpec::unsigned("AC output apparent power", 4, 2).unit("VA"),
            FieldSpec::unsigned("AC output active power", 5, 2).unit("W"),
            FieldSpec::unsigned("Output load percent", 6, 2).unit("%"),
            tenths("Battery voltage", 7, "V"),
            tenths("Battery voltage from SCC", 8, "V"),
            tenths("Battery voltage from SCC2", 9, "V"),
            FieldSpec::unsigned("Battery discharge current", 10, 2).unit("A"),
            FieldSpec::unsigned("Battery charging current", 11, 2).unit("A"),
            FieldSpec::unsigned("Battery capacity", 12, 2).unit("%"),
            FieldSpec::signed("Inverter heat sink temperature", 13, 2).unit("°C"),
            FieldSpec::signed("MPPT1 charger temperature", 14, 2).unit("°C"),
            FieldSpec::signed("MPPT2 charger temperature", 15, 2).unit("°C"),
            FieldSpec::unsigned("PV1 Input power", 16, 2).unit("W"),
            FieldSpec::unsigned("PV2 Input power", 17, 2).unit("W"),
            tenths("PV1 Input voltage", 18, "V"),
            tenths("PV2 Input voltage", 19, "V"),
            FieldSpec::enumeration("Setting value configuration state", 20, SETTING_STATES),
            FieldSpec::enumeration("MPPT1 charger status", 21, CHARGER_STATES),
            FieldSpec::enumeration("MPPT2 charger status", 22, CHARGER_STATES),
            FieldSpec::enumeration("Load connection", 23, LOAD_CONNECTION),
            FieldSpec::enumeration("Battery power direction", 24, BATTERY_DIRECTIONS),
            FieldSpec::enumeration("DC/AC power direction", 25, DC_AC_DIRECTIONS),
            FieldSpec::enumeration("Line power direction", 26, LINE_DIRECTIONS),
            FieldSpec::unsigned("Local parallel ID", 27, 1),
        ])
        .sample(
            b"2232,499,2232,499,0971,0710,019,008,000,000,000,000,000,044,000,000,0520,0000,1941,0000,0,2,0,1,0,2,1,0",
        )
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::value::ReadingValue;

    #[test]
    fn test_request_frames() {
        let pi18 = definition().unwrap();
        let frame = pi18.build_command("PI", None).unwrap();
        assert_eq!(frame.as_bytes(), b"^P005PI\x71\x8b\r");

        let frame = pi18.resolve_command("POP1").unwrap();
        assert_eq!(frame.as_bytes(), b"^S007POP1\x0e\x10\r");
        assert!(pi18.verify_request(frame.as_bytes()));

        assert!(pi18.resolve_command("POP2").is_err());
    }

    #[test]
    fn test_decode_protocol_version() {
        let pi18 = definition().unwrap();
        let sent = pi18.build_command("PI", None).unwrap();
        let raw = pi18.sample_response("PI").unwrap().unwrap();
        assert_eq!(raw.as_ref(), b"^D00518;\x03\r");

        let set = pi18.decode(&raw, &sent).unwrap();
        assert_eq!(set.get("Protocol Version").unwrap().value.as_str(), Some("18"));
    }

    #[test]
    fn test_decode_general_status() {
        let pi18 = definition().unwrap();
        let sent = pi18.build_command("GS", None).unwrap();
        let raw = pi18.sample_response("GS").unwrap().unwrap();
        assert!(raw.starts_with(b"^D106"));

        let set = pi18.decode(&raw, &sent).unwrap();
        assert!(set.issues().is_empty());
        assert_eq!(set.len(), 28);
        assert_eq!(set.get("Grid voltage").unwrap().value, ReadingValue::Float(223.2));
        assert_eq!(set.get("Grid frequency").unwrap().value, ReadingValue::Float(49.9));
        assert_eq!(set.get("PV1 Input voltage").unwrap().value, ReadingValue::Float(194.1));
        assert_eq!(set.get("PV1 Input power").unwrap().value, ReadingValue::Integer(520));
        assert_eq!(
            set.get("MPPT1 charger status").unwrap().value.as_str(),
            Some("charging")
        );
        assert_eq!(set.get("DC/AC power direction").unwrap().value.as_str(), Some("DC-AC"));
    }

    #[test]
    fn test_decode_time_energy_and_mode() {
        let pi18 = definition().unwrap();

        let sent = pi18.build_command("T", None).unwrap();
        let raw = pi18.sample_response("T").unwrap().unwrap();
        let set = pi18.decode(&raw, &sent).unwrap();
        assert_eq!(
            set.get("Device Time").unwrap().value.as_str(),
            Some("2026-03-18 12:34:56")
        );

        let sent = pi18.build_command("ET", None).unwrap();
        let raw = pi18.sample_response("ET").unwrap().unwrap();
        let set = pi18.decode(&raw, &sent).unwrap();
        assert_eq!(set.get("Total generated energy").unwrap().value, ReadingValue::Integer(12345));

        let sent = pi18.build_command("MOD", None).unwrap();
        let raw = pi18.sample_response("MOD").unwrap().unwrap();
        let set = pi18.decode(&raw, &sent).unwrap();
        assert_eq!(
            set.get("Working mode").unwrap().value.as_str(),
            Some("Hybrid mode(Line mode, Grid mode)")
        );
    }

    #[test]
    fn test_setter_acks() {
        let pi18 = definition().unwrap();
        let sent = pi18.resolve_command("POP0").unwrap();

        let ack = pi18.frame_response("POP", b"1").unwrap();
        assert_eq!(ack.as_ref(), b"^1\x0b\xc2\r");
        let set = pi18.decode(&ack, &sent).unwrap();
        assert_eq!(
            set.get("Command execution").unwrap().value.as_str(),
            Some("Successful")
        );

        let nak = pi18.frame_response("POP", b"0").unwrap();
        let set = pi18.decode(&nak, &sent).unwrap();
        assert_eq!(set.get("Command execution").unwrap().value.as_str(), Some("Failed"));
    }
}
