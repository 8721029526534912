//! PI30: ASCII inverter protocol with CRC-PI framing
//!
//! Requests are `<command><param>` CRC `\r`, responses `(` + space separated
//! tokens + CRC `\r`. Setters answer `ACK` or `NAK`.

use crate::bytes::ByteOrder;
use crate::command::{CommandDefinition, CommandTable, ResponseShape};
use crate::error::Result;
use crate::field::{EnumOptions, FieldSpec};
use crate::protocol::{Framing, ProtocolDefinition, ProtocolId};

const TOKENS: ResponseShape = ResponseShape::Delimited { separator: b' ' };

const ACK: EnumOptions = &[("ACK", "Successful"), ("NAK", "Failed")];

const DEVICE_MODES: EnumOptions = &[
    ("P", "Power on"),
    ("S", "Standby"),
    ("L", "Line"),
    ("B", "Battery"),
    ("F", "Fault"),
    ("H", "Power saving"),
];

const BATTERY_TYPES: EnumOptions = &[
    ("0", "AGM"),
    ("1", "Flooded"),
    ("2", "User"),
    ("3", "TBD"),
    ("4", "Pylontech"),
    ("5", "WECO"),
    ("6", "Soltaro"),
    ("7", "LIb-protocol compatible"),
    ("8", "3rd party Lithium"),
];

const INPUT_VOLTAGE_RANGES: EnumOptions = &[("0", "Appliance"), ("1", "UPS")];

const OUTPUT_PRIORITIES: EnumOptions = &[
    ("0", "Utility first"),
    ("1", "Solar first"),
    ("2", "SBU first"),
];

const CHARGER_PRIORITIES: EnumOptions = &[
    ("0", "Utility first"),
    ("1", "Solar first"),
    ("2", "Solar + Utility"),
    ("3", "Only solar charging permitted"),
];

const MACHINE_TYPES: EnumOptions = &[("00", "Grid tie"), ("01", "Off Grid"), ("10", "Hybrid")];

const TOPOLOGIES: EnumOptions = &[("0", "transformerless"), ("1", "transformer")];

const OUTPUT_MODES: EnumOptions = &[
    ("0", "single machine output"),
    ("1", "parallel output"),
    ("2", "Phase 1 of 3 Phase output"),
    ("3", "Phase 2 of 3 Phase output"),
    ("4", "Phase 3 of 3 Phase output"),
    ("5", "Phase 1 of 2 phase output"),
    ("6", "Phase 2 of 2 phase output"),
    ("7", "unknown output"),
];

const PV_OK_CONDITIONS: EnumOptions = &[
    (
        "0",
        "As long as one unit of inverters has connect PV, parallel system will consider PV OK",
    ),
    (
        "1",
        "Only All of inverters have connect PV, parallel system will consider PV OK",
    ),
];

const PV_POWER_BALANCE: EnumOptions = &[
    ("0", "PV input max current will be the max charged current"),
    (
        "1",
        "PV input max power will be the sum of the max charged power and loads power",
    ),
];

const OPERATION_LOGIC: EnumOptions = &[
    ("0", "Automatic mode"),
    ("1", "On-line mode"),
    ("2", "ECO mode"),
];

const DEVICE_STATUS_FLAGS: [&str; 8] = [
    "Is SBU Priority Version Added",
    "Is Configuration Changed",
    "Is SCC Firmware Updated",
    "Is Load On",
    "Is Battery Voltage to Steady While Charging",
    "Is Charging On",
    "Is SCC Charging On",
    "Is AC Charging On",
];

const DEVICE_STATUS2_FLAGS: [&str; 3] = ["Is Charging to Float", "Is Switched On", "Is Reserved"];

/// QPIWS flag positions; blank and reserved positions are not reported
const WARNING_FLAGS: [&str; 32] = [
    "",
    "Inverter fault",
    "Bus over fault",
    "Bus under fault",
    "Bus soft fail fault",
    "Line fail warning",
    "OPV short warning",
    "Inverter voltage too low fault",
    "Inverter voltage too high fault",
    "Over temperature fault",
    "Fan locked fault",
    "Battery voltage to high fault",
    "Battery low alarm warning",
    "Reserved",
    "Battery under shutdown warning",
    "Reserved",
    "Overload fault",
    "EEPROM fault",
    "Inverter over current fault",
    "Inverter soft fail fault",
    "Self test fail fault",
    "OP DC voltage over fault",
    "Bat open fault",
    "Current sensor fail fault",
    "Battery short fault",
    "Power limit warning",
    "PV voltage high warning",
    "MPPT overload fault",
    "MPPT overload warning",
    "Battery too low to charge warning",
    "",
    "",
];

pub(crate) fn definition() -> Result<ProtocolDefinition> {
    ProtocolDefinition::new(
        ProtocolId::Pi30,
        Framing::ParenthesizedCrc,
        ByteOrder::BigEndian,
        commands()?,
    )
}

fn setter(
    name: &'static str,
    description: &'static str,
    pattern: &str,
) -> Result<CommandDefinition> {
    Ok(CommandDefinition::setter(name, description, TOKENS)
        .param(pattern)?
        .field(FieldSpec::enumeration("Command execution", 0, ACK))
        .sample(b"ACK"))
}

fn commands() -> Result<CommandTable> {
    CommandTable::new(vec![
        CommandDefinition::query("QPI", "Protocol ID inquiry", TOKENS)
            .field(FieldSpec::text("Protocol ID", 0))
            .sample(b"PI30"),
        CommandDefinition::query("QID", "Device Serial Number inquiry", TOKENS)
            .field(FieldSpec::text("Serial Number", 0))
            .sample(b"9293333010501"),
        CommandDefinition::query("QVFW", "Main CPU firmware version inquiry", TOKENS)
            .field(FieldSpec::text("Main CPU firmware version", 0))
            .sample(b"VERFW:00072.70"),
        CommandDefinition::query("QMOD", "Device Mode inquiry", TOKENS)
            .field(FieldSpec::enumeration("Device Mode", 0, DEVICE_MODES))
            .sample(b"B"),
        qpigs(),
        qpiri(),
        CommandDefinition::query("QPIWS", "Warning status inquiry", TOKENS)
            .fields(
                WARNING_FLAGS
                    .iter()
                    .enumerate()
                    .filter(|(_, name)| !name.is_empty() && **name != "Reserved")
                    .map(|(bit, name)| FieldSpec::flag(*name, 0, bit)),
            )
            .sample(b"00000100000000001000000000000000"),
        setter("POP", "Set Device Output Source Priority", "0[012]")?,
        setter("PCP", "Set Device Charger Priority", "0[0123]")?,
        setter("PBCV", "Set Battery re-charge voltage", r"\d\d\.\d")?,
        setter("PBT", "Set Battery Type", "0[012]")?,
    ])
}

fn qpigs() -> CommandDefinition {
    CommandDefinition::query("QPIGS", "General Status Parameters inquiry", TOKENS)
        .fields([
            FieldSpec::float("AC Input Voltage", 0).unit("V"),
            FieldSpec::float("AC Input Frequency", 1).unit("Hz"),
            FieldSpec::float("AC Output Voltage", 2).unit("V"),
            FieldSpec::float("AC Output Frequency", 3).unit("Hz"),
            FieldSpec::unsigned("AC Output Apparent Power", 4, 2).unit("VA"),
            FieldSpec::unsigned("AC Output Active Power", 5, 2).unit("W"),
            FieldSpec::unsigned("AC Output Load", 6, 2).unit("%"),
            FieldSpec::unsigned("BUS Voltage", 7, 2).unit("V"),
            FieldSpec::float("Battery Voltage", 8).unit("V"),
            FieldSpec::unsigned("Battery Charging Current", 9, 2).unit("A"),
            FieldSpec::unsigned("Battery Capacity", 10, 2).unit("%"),
            FieldSpec::signed("Inverter Heat Sink Temperature", 11, 2).unit("°C"),
            FieldSpec::float("PV Input Current for Battery", 12).unit("A"),
            FieldSpec::float("PV Input Voltage", 13).unit("V"),
            FieldSpec::float("Battery Voltage from SCC", 14).unit("V"),
            FieldSpec::unsigned("Battery Discharge Current", 15, 2).unit("A"),
        ])
        .fields(
            DEVICE_STATUS_FLAGS
                .iter()
                .enumerate()
                .map(|(bit, name)| FieldSpec::flag(*name, 16, bit)),
        )
        .fields([
            FieldSpec::unsigned("RSV1", 17, 2).unit("A"),
            FieldSpec::unsigned("RSV2", 18, 2).unit("A"),
            FieldSpec::unsigned("PV Input Power", 19, 2).unit("W"),
        ])
        .fields(
            DEVICE_STATUS2_FLAGS
                .iter()
                .enumerate()
                .map(|(bit, name)| FieldSpec::flag(*name, 20, bit)),
        )
        .sample(
            b"000.0 00.0 230.0 49.9 0161 0119 003 460 57.50 012 100 0069 0014 103.8 57.45 00000 00110110 00 00 00856 010",
        )
}

fn qpiri() -> CommandDefinition {
    CommandDefinition::query("QPIRI", "Current Settings inquiry", TOKENS)
        .fields([
            FieldSpec::float("AC Input Voltage", 0).unit("V"),
            FieldSpec::float("AC Input Current", 1).unit("A"),
            FieldSpec::float("AC Output Voltage", 2).unit("V"),
            FieldSpec::float("AC Output Frequency", 3).unit("Hz"),
            FieldSpec::float("AC Output Current", 4).unit("A"),
            FieldSpec::unsigned("AC Output Apparent Power", 5, 2).unit("VA"),
            FieldSpec::unsigned("AC Output Active Power", 6, 2).unit("W"),
            FieldSpec::float("Battery Voltage", 7).unit("V"),
            FieldSpec::float("Battery Recharge Voltage", 8).unit("V"),
            FieldSpec::float("Battery Under Voltage", 9).unit("V"),
            FieldSpec::float("Battery Bulk Charge Voltage", 10).unit("V"),
            FieldSpec::float("Battery Float Charge Voltage", 11).unit("V"),
            FieldSpec::enumeration("Battery Type", 12, BATTERY_TYPES),
            FieldSpec::unsigned("Max AC Charging Current", 13, 2).unit("A"),
            FieldSpec::unsigned("Max Charging Current", 14, 2).unit("A"),
            FieldSpec::enumeration("Input Voltage Range", 15, INPUT_VOLTAGE_RANGES),
            FieldSpec::enumeration("Output Source Priority", 16, OUTPUT_PRIORITIES),
            FieldSpec::enumeration("Charger Source Priority", 17, CHARGER_PRIORITIES),
            FieldSpec::unsigned("Max Parallel Units", 18, 1).unit("units"),
            FieldSpec::enumeration("Machine Type", 19, MACHINE_TYPES),
            FieldSpec::enumeration("Topology", 20, TOPOLOGIES),
            FieldSpec::enumeration("Output Mode", 21, OUTPUT_MODES),
            FieldSpec::float("Battery Redischarge Voltage", 22).unit("V"),
            FieldSpec::enumeration("PV OK Condition", 23, PV_OK_CONDITIONS),
            FieldSpec::enumeration("PV Power Balance", 24, PV_POWER_BALANCE),
            FieldSpec::unsigned("Max charging time for CV stage", 25, 2).unit("min"),
            FieldSpec::enumeration("Operation Logic", 26, OPERATION_LOGIC),
        ])
        .sample(
            b"120.0 25.0 120.0 60.0 25.0 3000 3000 48.0 46.0 44.0 58.4 54.4 2 30 060 1 2 0 9 01 0 6 54.0 0 1 000 0",
        )
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::value::ReadingValue;
    use tracing_test::traced_test;

    #[test]
    fn test_request_frames() {
        let pi30 = definition().unwrap();
        let frame = pi30.build_command("QPIGS", None).unwrap();
        assert_eq!(frame.as_bytes(), b"QPIGS\xb7\xa9\r");

        let frame = pi30.resolve_command("POP01").unwrap();
        assert_eq!(frame.command, "POP");
        assert_eq!(frame.as_bytes(), b"POP01\xd2\x69\r");
    }

    #[test]
    fn test_decode_qpigs_sample() {
        let pi30 = definition().unwrap();
        let sent = pi30.build_command("QPIGS", None).unwrap();
        let raw = pi30.sample_response("QPIGS").unwrap().unwrap();
        // crc of the sample is 0x248c
        assert_eq!(&raw[raw.len() - 3..], b"\x24\x8c\r");

        let set = pi30.decode(&raw, &sent).unwrap();
        assert!(set.issues().is_empty());
        assert_eq!(set.len(), 30);
        let voltage = set.get("AC Output Voltage").unwrap();
        assert_eq!(voltage.value, ReadingValue::Float(230.0));
        assert_eq!(voltage.unit, "V");
        assert_eq!(set.get("Battery Capacity").unwrap().value, ReadingValue::Integer(100));
        assert_eq!(set.get("PV Input Power").unwrap().value, ReadingValue::Integer(856));
        assert_eq!(set.get("Is Load On").unwrap().value, ReadingValue::Bool(true));
        assert_eq!(set.get("Is AC Charging On").unwrap().value, ReadingValue::Bool(false));
        assert_eq!(set.get("Is Switched On").unwrap().value, ReadingValue::Bool(true));
        assert_eq!(set.names().next(), Some("AC Input Voltage"));
    }

    #[test]
    fn test_decode_qpiri_enums() {
        let pi30 = definition().unwrap();
        let sent = pi30.build_command("QPIRI", None).unwrap();
        let raw = pi30.sample_response("QPIRI").unwrap().unwrap();
        let set = pi30.decode(&raw, &sent).unwrap();
        assert!(set.issues().is_empty());
        assert_eq!(set.get("Battery Type").unwrap().value.as_str(), Some("User"));
        assert_eq!(
            set.get("Output Source Priority").unwrap().value.as_str(),
            Some("SBU first")
        );
        assert_eq!(set.get("Machine Type").unwrap().value.as_str(), Some("Off Grid"));
        assert_eq!(
            set.get("Operation Logic").unwrap().value.as_str(),
            Some("Automatic mode")
        );
    }

    #[test]
    fn test_decode_warning_flags() {
        let pi30 = definition().unwrap();
        let sent = pi30.build_command("QPIWS", None).unwrap();
        let raw = pi30.sample_response("QPIWS").unwrap().unwrap();
        let set = pi30.decode(&raw, &sent).unwrap();
        assert_eq!(set.len(), 27);
        assert_eq!(set.get("Line fail warning").unwrap().value, ReadingValue::Bool(true));
        assert_eq!(set.get("EEPROM fault").unwrap().value, ReadingValue::Bool(true));
        assert_eq!(set.get("Inverter fault").unwrap().value, ReadingValue::Bool(false));
        assert!(set.get("Reserved").is_none());
    }

    #[test]
    fn test_setter_ack_and_nak() {
        let pi30 = definition().unwrap();
        let sent = pi30.resolve_command("PBCV48.0").unwrap();
        let ack = pi30.frame_response("PBCV", b"ACK").unwrap();
        assert_eq!(ack.as_ref(), b"(ACK\x39\x20\r");
        let set = pi30.decode(&ack, &sent).unwrap();
        assert_eq!(
            set.get("Command execution").unwrap().value.as_str(),
            Some("Successful")
        );

        let nak = pi30.frame_response("PBCV", b"NAK").unwrap();
        let set = pi30.decode(&nak, &sent).unwrap();
        assert_eq!(set.get("Command execution").unwrap().value.as_str(), Some("Failed"));
    }

    #[test]
    #[traced_test]
    fn test_echo_is_logged() {
        let pi30 = definition().unwrap();
        let sent = pi30.build_command("QMOD", None).unwrap();
        let set = pi30.decode(sent.as_bytes(), &sent).unwrap();
        assert!(set.is_error());
        assert!(logs_contain("device echoed QMOD, command not recognized"));
    }
}
