//! DALY: fixed 13 byte BMS blocks, big endian
//!
//! `A5 <addr> <code> 08` then eight data bytes and an additive checksum.
//! Requests go to address 0x80 with a zeroed data section and a trailing
//! newline; the BMS answers from address 0x01. Offsets count from the block
//! start, so data begins at 4.

use crate::bytes::ByteOrder;
use crate::command::{CommandDefinition, CommandTable, ResponseShape};
use crate::error::Result;
use crate::field::{EnumOptions, FieldSpec};
use crate::protocol::{Framing, ProtocolDefinition, ProtocolId};

const CHARGE_STATES: EnumOptions = &[("0", "stationary"), ("1", "charged"), ("2", "discharged")];

const CONNECTION: EnumOptions = &[("0", "disconnected"), ("1", "connected")];

pub(crate) fn definition() -> Result<ProtocolDefinition> {
    ProtocolDefinition::new(
        ProtocolId::Daly,
        Framing::FixedBlock {
            start: 0xA5,
            address: 0x80,
            data_len: 8,
        },
        ByteOrder::BigEndian,
        commands()?,
    )
}

fn block(name: &'static str, description: &'static str, code: u8) -> CommandDefinition {
    CommandDefinition::query(name, description, ResponseShape::Block).code(code)
}

fn soc() -> FieldSpec {
    FieldSpec::scaled("SOC", 10, 2, 10.0).unit("%")
}

fn commands() -> Result<CommandTable> {
    CommandTable::new(vec![
        block("SOC", "State of Charge", 0x90)
            .fields([
                FieldSpec::scaled("pressure", 4, 2, 10.0).unit("V"),
                FieldSpec::scaled("acquistion", 6, 2, 10.0).unit("V"),
                FieldSpec::scaled("current", 8, 2, 10.0).offset(30_000).unit("A"),
                soc(),
            ])
            .sample(&[0x02, 0x14, 0x00, 0x00, 0x75, 0x45, 0x03, 0x78]),
        block("cellMinMax", "Cell Minimum and Maximum Voltages", 0x91)
            .fields([
                FieldSpec::scaled("Maximum Cell Voltage", 4, 2, 1000.0).unit("V"),
                FieldSpec::unsigned("Maximum Cell Number", 6, 1),
                FieldSpec::scaled("Minimum Cell Voltage", 7, 2, 1000.0).unit("V"),
                FieldSpec::unsigned("Minimum Cell Number", 9, 1),
                soc(),
            ])
            .sample(&[0x0d, 0x00, 0x0f, 0x0c, 0xfe, 0x01, 0x03, 0x78]),
        block("cellTemperatures", "Cell Minimum and Maximum Temperatures", 0x92)
            .fields([
                FieldSpec::scaled("Maximum Cell Temperature", 4, 1, 1.0).offset(40).unit("°C"),
                FieldSpec::unsigned("Maximum Cell Number", 5, 1),
                FieldSpec::scaled("Minimum Cell Temperature", 6, 1, 1.0).offset(40).unit("°C"),
                FieldSpec::unsigned("Minimum Cell Number", 7, 1),
                soc(),
            ])
            .sample(&[0x37, 0x01, 0x37, 0x01, 0xfe, 0x01, 0x03, 0x78]),
        block("mosStatus", "MOS tube status", 0x93)
            .fields([
                FieldSpec::enumeration("Charge Status", 4, CHARGE_STATES),
                FieldSpec::hex("Charging MOS Tube Status", 5, 1),
                FieldSpec::hex("Discharging MOS Tube Status", 6, 1),
                FieldSpec::unsigned("BMS Life", 7, 1).unit("cycles"),
                FieldSpec::hex("Residual Capacity", 8, 4).unit("mAh"),
            ])
            .sample(&[0x02, 0x01, 0x01, 0x78, 0x00, 0x03, 0xcb, 0x40]),
        block("status", "Status Information", 0x94)
            .fields([
                FieldSpec::hex("Battery String", 4, 1),
                FieldSpec::hex("Temperature", 5, 1),
                FieldSpec::enumeration("Charger Status", 6, CONNECTION),
                FieldSpec::enumeration("Load Status", 7, CONNECTION),
                FieldSpec::hex("Flags", 8, 1),
                FieldSpec::unsigned("Charge/Discharge Cycles", 9, 2).unit("cycles"),
                FieldSpec::hex("Reserved", 11, 1),
            ])
            .sample(&[0x10, 0x01, 0x00, 0x00, 0x00, 0x00, 0x03, 0x40]),
    ])
}
