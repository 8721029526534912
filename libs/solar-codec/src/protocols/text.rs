//! TEXT: newline terminated `key=value` responses, no checksum
//!
//! One record is one line; several pairs on a line are separated by `;`.
//! Used by bench fixtures and simple relays that already speak in readings.

use crate::bytes::ByteOrder;
use crate::command::{CommandDefinition, CommandTable, ResponseShape};
use crate::error::Result;
use crate::field::FieldSpec;
use crate::protocol::{Framing, ProtocolDefinition, ProtocolId};

pub(crate) fn definition() -> Result<ProtocolDefinition> {
    let commands = CommandTable::new(vec![
        CommandDefinition::query("PI", "Protocol version", ResponseShape::KeyValue)
            .field(FieldSpec::text("protocol_version", 0))
            .sample(b"protocol_version=17\n"),
        CommandDefinition::query("STATUS", "Status values", ResponseShape::KeyValue)
            .fields([
                FieldSpec::float("battery_voltage", 0).unit("V"),
                FieldSpec::float("battery_current", 1).unit("A"),
                FieldSpec::unsigned("battery_capacity", 2, 2).unit("%"),
                FieldSpec::float("load_power", 3).unit("W"),
            ])
            .sample(b"battery_voltage=52.8;battery_current=-3.5;battery_capacity=87;load_power=412.0\n"),
    ])?;

    ProtocolDefinition::new(ProtocolId::Text, Framing::Lines, ByteOrder::BigEndian, commands)
}
