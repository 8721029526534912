//! Solar device wire codecs
//!
//! Turns named device commands into wire frames and raw device responses
//! into ordered, unit-tagged readings.
//!
//! # Architecture
//!
//! - **Bytes Utilities**: byte order, checksums (CRC-PI, sum-8), bit and BCD helpers
//! - **Field Decoder**: `FieldSpec` / `FieldKind`, pure decode of one value from a payload
//! - **Command Table**: `CommandDefinition` lookups keyed by command name
//! - **Protocol Definitions**: framing, record predicates and decode per protocol variant
//!
//! Supported variants: `PI30`, `PI18` (inverters), `JK02`, `DALY` (battery
//! management systems) and `TEXT` (line oriented key/value devices).

pub mod bytes;
pub mod command;
pub mod error;
pub mod field;
pub mod protocol;
pub mod protocols;
pub mod value;

pub use bytes::ByteOrder;
pub use command::{CommandDefinition, CommandKind, CommandTable, ResponseShape};
pub use error::{CodecError, FieldError, Result};
pub use field::{Decoded, FieldKind, FieldSpec};
pub use protocol::{Frame, Framing, ProtocolDefinition, ProtocolId};
pub use value::{Reading, ReadingSet, ReadingValue, ERROR_READING};
