//! Protocol definitions
//!
//! A `ProtocolDefinition` owns one variant's command table together with its
//! framing: how requests are rendered, where response records start and end,
//! and which checksum guards them. Definitions are immutable and shared
//! behind `Arc` by every port speaking that variant.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::bytes::{crc_pi, sum8, ByteOrder};
use crate::command::{CommandDefinition, CommandKind, CommandTable, ResponseShape};
use crate::error::{CodecError, Result};
use crate::field::Decoded;
use crate::value::{Reading, ReadingSet};

// ============================================================================
// Protocol identity
// ============================================================================

/// Closed set of supported protocol variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolId {
    Pi30,
    Pi18,
    Jk02,
    Daly,
    Text,
}

impl ProtocolId {
    pub const ALL: [ProtocolId; 5] = [
        ProtocolId::Pi30,
        ProtocolId::Pi18,
        ProtocolId::Jk02,
        ProtocolId::Daly,
        ProtocolId::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolId::Pi30 => "PI30",
            ProtocolId::Pi18 => "PI18",
            ProtocolId::Jk02 => "JK02",
            ProtocolId::Daly => "DALY",
            ProtocolId::Text => "TEXT",
        }
    }
}

impl FromStr for ProtocolId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        ProtocolId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| CodecError::UnknownProtocol(s.to_string()))
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Wire framing family of a protocol variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// Requests `<cmd>` CRC `\r`; responses `(` payload CRC `\r`
    ParenthesizedCrc,
    /// Requests `^P`/`^S` + 3 digit length; responses `^D` + length, or `^1`/`^0` acks
    CaretCrc,
    /// Fixed size requests, responses pushed as sum-8 checked records
    NotifyRecord {
        request_header: [u8; 4],
        request_len: usize,
        record_header: [u8; 4],
        record_lengths: &'static [usize],
    },
    /// Fixed size request and response blocks, sum-8 checked
    FixedBlock {
        start: u8,
        address: u8,
        data_len: usize,
    },
    /// `\n` terminated text without checksum
    Lines,
}

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const CRC_TRAILER: usize = 3;

impl Framing {
    /// `start + address + code + length + data + checksum`
    fn block_len(data_len: usize) -> usize {
        data_len + 5
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A complete request frame and the command it carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub bytes: Bytes,
}

impl Frame {
    pub fn new(command: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            command: command.into(),
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.command, self.bytes.escape_ascii())
    }
}

// ============================================================================
// Protocol definition
// ============================================================================

#[derive(Debug)]
pub struct ProtocolDefinition {
    id: ProtocolId,
    framing: Framing,
    byte_order: ByteOrder,
    commands: CommandTable,
}

impl ProtocolDefinition {
    /// Assemble a definition, checking the table fits the framing
    pub fn new(
        id: ProtocolId,
        framing: Framing,
        byte_order: ByteOrder,
        commands: CommandTable,
    ) -> Result<Self> {
        let binary = matches!(
            framing,
            Framing::NotifyRecord { .. } | Framing::FixedBlock { .. }
        );
        for definition in commands.iter() {
            let block = definition.response == ResponseShape::Block;
            if binary && (definition.code.is_none() || !block) {
                return Err(CodecError::definition(format!(
                    "{} {}: binary framing needs a command code and block layout",
                    id, definition.name
                )));
            }
            if !binary && block {
                return Err(CodecError::definition(format!(
                    "{} {}: block layout on a text framing",
                    id, definition.name
                )));
            }
        }
        Ok(Self {
            id,
            framing,
            byte_order,
            commands,
        })
    }

    /// Build the shared definition of a variant
    pub fn load(id: ProtocolId) -> Result<Arc<Self>> {
        crate::protocols::definition(id).map(Arc::new)
    }

    /// Build the shared definition from a configured protocol name
    pub fn by_name(name: &str) -> Result<Arc<Self>> {
        Self::load(name.parse()?)
    }

    pub fn id(&self) -> ProtocolId {
        self.id
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn command(&self, name: &str) -> Result<&CommandDefinition> {
        self.commands.get(name)
    }

    /// Upper bound on a response record, used to cap reassembly buffers
    pub fn max_record_len(&self) -> usize {
        match &self.framing {
            Framing::ParenthesizedCrc | Framing::CaretCrc => 512,
            Framing::NotifyRecord { record_lengths, .. } => {
                record_lengths.iter().copied().max().unwrap_or(0)
            },
            Framing::FixedBlock { data_len, .. } => Framing::block_len(*data_len),
            Framing::Lines => 4096,
        }
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Render the full request frame for `name`, checksum included
    pub fn build_command(&self, name: &str, param: Option<&str>) -> Result<Frame> {
        let definition = self.commands.get(name)?;
        definition.check_param(param)?;
        let param = param.unwrap_or("");

        let bytes = match &self.framing {
            Framing::ParenthesizedCrc => {
                let mut buf = BytesMut::with_capacity(name.len() + param.len() + CRC_TRAILER);
                buf.put_slice(name.as_bytes());
                buf.put_slice(param.as_bytes());
                let crc = crc_pi(&buf);
                buf.put_slice(&crc);
                buf.put_u8(CR);
                buf
            },
            Framing::CaretCrc => {
                let prefix = match definition.kind {
                    CommandKind::Query => "^P",
                    CommandKind::Setter => "^S",
                };
                let body_len = name.len() + param.len() + CRC_TRAILER;
                let mut buf = BytesMut::with_capacity(body_len + 5);
                buf.put_slice(format!("{}{:03}{}{}", prefix, body_len, name, param).as_bytes());
                let crc = crc_pi(&buf);
                buf.put_slice(&crc);
                buf.put_u8(CR);
                buf
            },
            Framing::NotifyRecord {
                request_header,
                request_len,
                ..
            } => {
                let code = required_code(definition)?;
                let mut buf = BytesMut::zeroed(*request_len);
                buf[..4].copy_from_slice(request_header);
                buf[4] = code;
                let last = *request_len - 1;
                buf[last] = sum8(&buf[..last]);
                buf
            },
            Framing::FixedBlock {
                start,
                address,
                data_len,
            } => {
                let code = required_code(definition)?;
                let mut buf = BytesMut::with_capacity(Framing::block_len(*data_len) + 1);
                buf.put_slice(&[*start, *address, code, *data_len as u8]);
                buf.put_bytes(0, *data_len);
                let checksum = sum8(&buf);
                buf.put_u8(checksum);
                buf.put_u8(LF);
                buf
            },
            Framing::Lines => {
                let mut buf = BytesMut::with_capacity(name.len() + param.len() + 1);
                buf.put_slice(name.as_bytes());
                buf.put_slice(param.as_bytes());
                buf.put_u8(LF);
                buf
            },
        };

        let frame = Frame::new(definition.name, bytes.freeze());
        debug!("{} request {}", self.id, frame);
        Ok(frame)
    }

    /// Build from a full command string such as `QPIGS` or `POP01`
    pub fn resolve_command(&self, command: &str) -> Result<Frame> {
        let (definition, param) = self.commands.resolve(command)?;
        self.build_command(definition.name, param)
    }

    /// Check a request frame against this protocol's own checksum rules
    pub fn verify_request(&self, frame: &[u8]) -> bool {
        match &self.framing {
            Framing::ParenthesizedCrc => crc_trailer_ok(frame),
            Framing::CaretCrc => {
                (frame.starts_with(b"^P") || frame.starts_with(b"^S")) && crc_trailer_ok(frame)
            },
            Framing::NotifyRecord {
                request_header,
                request_len,
                ..
            } => {
                frame.len() == *request_len
                    && frame.starts_with(request_header)
                    && sum8_trailer_ok(frame)
            },
            Framing::FixedBlock { start, data_len, .. } => {
                let block = Framing::block_len(*data_len);
                frame.len() == block + 1
                    && frame[0] == *start
                    && frame[block] == LF
                    && sum8_trailer_ok(&frame[..block])
            },
            Framing::Lines => frame.last() == Some(&LF),
        }
    }

    // ------------------------------------------------------------------------
    // Record predicates
    // ------------------------------------------------------------------------

    /// True if `buf` begins like a response record (or is a prefix of its marker)
    pub fn is_record_start(&self, buf: &[u8]) -> bool {
        let Some(&first) = buf.first() else {
            return false;
        };
        match &self.framing {
            Framing::ParenthesizedCrc => first == b'(',
            Framing::CaretCrc => {
                first == b'^' && buf.get(1).map_or(true, |b| matches!(*b, b'D' | b'0' | b'1'))
            },
            Framing::NotifyRecord { record_header, .. } => {
                let n = buf.len().min(record_header.len());
                buf[..n] == record_header[..n]
            },
            Framing::FixedBlock { start, .. } => first == *start,
            Framing::Lines => true,
        }
    }

    /// True once `buf` has reached the end of a record, checksum not considered
    pub fn is_record_terminated(&self, buf: &[u8]) -> bool {
        match &self.framing {
            Framing::ParenthesizedCrc | Framing::CaretCrc => buf.last() == Some(&CR),
            Framing::NotifyRecord { record_lengths, .. } => record_lengths.contains(&buf.len()),
            Framing::FixedBlock { data_len, .. } => buf.len() >= Framing::block_len(*data_len),
            Framing::Lines => buf.last() == Some(&LF),
        }
    }

    /// True if `buf` is one whole record with a valid checksum
    pub fn is_record_complete(&self, buf: &[u8]) -> bool {
        self.is_record_start(buf)
            && self.is_record_terminated(buf)
            && self.check_record(buf).is_ok()
    }

    /// True once a blocking reader has seen enough bytes to stop reading
    ///
    /// A device that does not know a command may echo it back, so a prefix
    /// of the request is only ready once the whole request has arrived.
    pub fn response_ready(&self, buf: &[u8], sent: &Frame) -> bool {
        if !buf.is_empty() && sent.bytes.starts_with(buf) {
            return buf.len() == sent.len();
        }
        self.is_record_terminated(buf)
    }

    /// Record type byte of a notification record
    pub fn record_type(&self, record: &[u8]) -> Option<u8> {
        match &self.framing {
            Framing::NotifyRecord { record_header, .. } => record.get(record_header.len()).copied(),
            _ => None,
        }
    }

    fn check_record(&self, buf: &[u8]) -> Result<()> {
        match &self.framing {
            Framing::ParenthesizedCrc | Framing::CaretCrc => {
                if buf.len() < CRC_TRAILER + 1 {
                    return Err(CodecError::malformed(format!(
                        "{} byte record is too short for a CRC",
                        buf.len()
                    )));
                }
                let split = buf.len() - CRC_TRAILER;
                let expected = crc_pi(&buf[..split]);
                let actual = &buf[split..split + 2];
                if actual != expected {
                    return Err(checksum_error(&expected, actual));
                }
                Ok(())
            },
            Framing::FixedBlock { data_len, .. } if buf.len() != Framing::block_len(*data_len) => {
                Err(CodecError::malformed(format!(
                    "{} expected {} byte block, got {}",
                    self.id,
                    Framing::block_len(*data_len),
                    buf.len()
                )))
            },
            Framing::NotifyRecord { .. } | Framing::FixedBlock { .. } => {
                let Some((&actual, body)) = buf.split_last() else {
                    return Err(CodecError::malformed("empty record"));
                };
                let expected = sum8(body);
                if actual != expected {
                    return Err(checksum_error(&[expected], &[actual]));
                }
                Ok(())
            },
            Framing::Lines => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Decode
    // ------------------------------------------------------------------------

    /// Decode the raw response to `sent` into readings
    ///
    /// An echo of the request decodes to a single `ERROR` reading. Checksum
    /// mismatches on otherwise complete records are recoverable errors.
    pub fn decode(&self, raw: &[u8], sent: &Frame) -> Result<ReadingSet> {
        if raw == sent.as_bytes() {
            warn!("{} device echoed {}, command not recognized", self.id, sent.command);
            return Ok(ReadingSet::echoed(&sent.command));
        }

        let definition = self.commands.get(&sent.command)?;
        let payload = self.payload(raw, definition)?;
        let mut set = ReadingSet::new(definition.name);

        match definition.response {
            ResponseShape::Delimited { separator } => {
                let text = String::from_utf8_lossy(payload);
                let tokens: Vec<&str> = text.split(char::from(separator)).collect();
                for field in &definition.fields {
                    let token = tokens.get(field.at).copied();
                    apply(&mut set, &field.name, field.unit, field.decode_text(token));
                }
            },
            ResponseShape::KeyValue => {
                let text = String::from_utf8_lossy(payload);
                let pairs: Vec<(&str, &str)> = text
                    .split(['\n', ';'])
                    .filter_map(|line| line.split_once('='))
                    .map(|(k, v)| (k.trim(), v.trim()))
                    .collect();
                for field in &definition.fields {
                    let value = pairs
                        .iter()
                        .find(|(k, _)| *k == field.name)
                        .map(|(_, v)| *v);
                    apply(&mut set, &field.name, field.unit, field.decode_text(value));
                }
            },
            ResponseShape::Block => {
                for field in &definition.fields {
                    let decoded = field.decode_binary(payload, self.byte_order);
                    apply(&mut set, &field.name, field.unit, decoded);
                }
            },
        }

        for issue in set.issues() {
            debug!("{} {}: {}", self.id, definition.name, issue);
        }
        Ok(set)
    }

    /// Validate framing and checksum, returning the bytes fields address
    fn payload<'r>(&self, raw: &'r [u8], definition: &CommandDefinition) -> Result<&'r [u8]> {
        if !self.is_record_start(raw) {
            return Err(CodecError::malformed(format!(
                "{} response does not start like a record: {}",
                self.id,
                raw.escape_ascii()
            )));
        }
        if !self.is_record_terminated(raw) {
            return Err(CodecError::malformed(format!(
                "{} response truncated after {} bytes",
                self.id,
                raw.len()
            )));
        }
        self.check_record(raw)?;

        let end = raw.len().saturating_sub(CRC_TRAILER);
        match &self.framing {
            Framing::ParenthesizedCrc => Ok(&raw[1..end]),
            Framing::CaretCrc => match raw[1] {
                b'D' => {
                    let declared = std::str::from_utf8(raw.get(2..5).unwrap_or_default())
                        .ok()
                        .and_then(|s| s.parse::<usize>().ok());
                    if end < 5 || declared != Some(raw.len() - 5) {
                        return Err(CodecError::malformed(format!(
                            "{} declared length {:?} does not match {} byte record",
                            self.id,
                            declared,
                            raw.len()
                        )));
                    }
                    Ok(&raw[5..end])
                },
                _ => Ok(&raw[1..2]),
            },
            Framing::NotifyRecord { .. } => {
                if let Some(expected) = definition.record_type {
                    let actual = self.record_type(raw);
                    if actual != Some(expected) {
                        return Err(CodecError::malformed(format!(
                            "{} record type {:?} is not {} for {}",
                            self.id, actual, expected, definition.name
                        )));
                    }
                }
                Ok(raw)
            },
            Framing::FixedBlock { .. } => {
                if Some(raw[2]) != definition.code {
                    return Err(CodecError::malformed(format!(
                        "{} response code {:02x} does not answer {}",
                        self.id, raw[2], definition.name
                    )));
                }
                Ok(raw)
            },
            Framing::Lines => {
                let trimmed = raw.strip_suffix(b"\n").unwrap_or(raw);
                Ok(trimmed.strip_suffix(b"\r").unwrap_or(trimmed))
            },
        }
    }

    // ------------------------------------------------------------------------
    // Responses (device side)
    // ------------------------------------------------------------------------

    /// Wrap `payload` in the response framing a device would send for `command`
    pub fn frame_response(&self, command: &str, payload: &[u8]) -> Result<Bytes> {
        let definition = self.commands.get(command)?;
        let mut buf = BytesMut::new();
        match &self.framing {
            Framing::ParenthesizedCrc => {
                buf.put_u8(b'(');
                buf.put_slice(payload);
                let crc = crc_pi(&buf);
                buf.put_slice(&crc);
                buf.put_u8(CR);
            },
            Framing::CaretCrc => {
                match (definition.kind, payload) {
                    (CommandKind::Setter, b"1" | b"0") => {
                        buf.put_u8(b'^');
                        buf.put_slice(payload);
                    },
                    _ => {
                        let len = payload.len() + CRC_TRAILER;
                        buf.put_slice(format!("^D{:03}", len).as_bytes());
                        buf.put_slice(payload);
                    },
                }
                let crc = crc_pi(&buf);
                buf.put_slice(&crc);
                buf.put_u8(CR);
            },
            Framing::NotifyRecord {
                record_header,
                record_lengths,
                ..
            } => {
                let needed = record_header.len() + payload.len() + 1;
                let Some(&len) = record_lengths.iter().find(|l| **l >= needed) else {
                    return Err(CodecError::malformed(format!(
                        "{} payload of {} bytes does not fit a record",
                        self.id,
                        payload.len()
                    )));
                };
                buf.put_slice(record_header);
                buf.put_slice(payload);
                buf.resize(len - 1, 0);
                let checksum = sum8(&buf);
                buf.put_u8(checksum);
            },
            Framing::FixedBlock {
                start, data_len, ..
            } => {
                let code = required_code(definition)?;
                buf.put_slice(&[*start, 0x01, code, *data_len as u8]);
                let mut data = payload.to_vec();
                data.resize(*data_len, 0);
                buf.put_slice(&data);
                let checksum = sum8(&buf);
                buf.put_u8(checksum);
            },
            Framing::Lines => {
                buf.put_slice(payload);
                if !payload.ends_with(b"\n") {
                    buf.put_u8(LF);
                }
            },
        }
        Ok(buf.freeze())
    }

    /// Framed sample response of `command`, if the table carries one
    pub fn sample_response(&self, command: &str) -> Result<Option<Bytes>> {
        match self.commands.get(command)?.sample {
            Some(payload) => self.frame_response(command, payload).map(Some),
            None => Ok(None),
        }
    }
}

fn required_code(definition: &CommandDefinition) -> Result<u8> {
    definition
        .code
        .ok_or_else(|| CodecError::definition(format!("{} has no command code", definition.name)))
}

fn crc_trailer_ok(frame: &[u8]) -> bool {
    if frame.len() < CRC_TRAILER + 1 || frame.last() != Some(&CR) {
        return false;
    }
    let split = frame.len() - CRC_TRAILER;
    frame[split..split + 2] == crc_pi(&frame[..split])
}

fn sum8_trailer_ok(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((&last, body)) => last == sum8(body),
        None => false,
    }
}

fn checksum_error(expected: &[u8], actual: &[u8]) -> CodecError {
    let hex = |b: &[u8]| b.iter().map(|x| format!("{:02x}", x)).collect::<String>();
    CodecError::Checksum {
        expected: hex(expected),
        actual: hex(actual),
        recoverable: true,
    }
}

fn apply(set: &mut ReadingSet, name: &str, unit: &'static str, decoded: Decoded) {
    match decoded {
        Decoded::Value(value) => set.insert(name, Reading { value, unit }),
        Decoded::Degraded(value, issue) => {
            set.insert(name, Reading { value, unit });
            set.push_issue(issue);
        },
        Decoded::Missing(issue) => set.push_issue(issue),
    }
}
