//! Command definitions and per-protocol command tables

use indexmap::IndexMap;
use regex::Regex;

use crate::error::{CodecError, Result};
use crate::field::FieldSpec;

/// Whether a command reads state or changes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Query,
    Setter,
}

/// Layout of a response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Tokens separated by one byte, fields addressed by token index
    Delimited { separator: u8 },
    /// `key=value` lines, fields addressed by name
    KeyValue,
    /// Checksum-validated binary record, fields addressed by byte offset
    Block,
}

/// Template and decode recipe for one named device command
#[derive(Debug, Clone)]
pub struct CommandDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: CommandKind,
    /// Binary command code for byte oriented protocols
    pub code: Option<u8>,
    /// Anchored parameter pattern; `None` means the command takes no parameter
    pub param: Option<Regex>,
    /// Record type byte expected in the response (notification transports)
    pub record_type: Option<u8>,
    pub response: ResponseShape,
    pub fields: Vec<FieldSpec>,
    /// Payload a test port answers with
    pub sample: Option<&'static [u8]>,
}

impl CommandDefinition {
    pub fn query(name: &'static str, description: &'static str, response: ResponseShape) -> Self {
        Self {
            name,
            description,
            kind: CommandKind::Query,
            code: None,
            param: None,
            record_type: None,
            response,
            fields: Vec::new(),
            sample: None,
        }
    }

    pub fn setter(name: &'static str, description: &'static str, response: ResponseShape) -> Self {
        Self {
            kind: CommandKind::Setter,
            ..Self::query(name, description, response)
        }
    }

    /// Accept a parameter matching `pattern` (matched against the whole parameter)
    pub fn param(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            CodecError::definition(format!("{}: bad parameter pattern: {}", self.name, e))
        })?;
        self.param = Some(regex);
        Ok(self)
    }

    pub fn code(mut self, code: u8) -> Self {
        self.code = Some(code);
        self
    }

    pub fn record_type(mut self, record_type: u8) -> Self {
        self.record_type = Some(record_type);
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn sample(mut self, payload: &'static [u8]) -> Self {
        self.sample = Some(payload);
        self
    }

    pub fn accepts_param(&self) -> bool {
        self.param.is_some()
    }

    /// Validate a parameter against this definition
    pub fn check_param(&self, param: Option<&str>) -> Result<()> {
        match (&self.param, param) {
            (None, None) => Ok(()),
            (None, Some(p)) if p.is_empty() => Ok(()),
            (None, Some(p)) => Err(CodecError::invalid_parameter(
                self.name,
                format!("takes no parameter, got '{}'", p),
            )),
            (Some(re), Some(p)) if re.is_match(p) => Ok(()),
            (Some(re), Some(p)) => Err(CodecError::invalid_parameter(
                self.name,
                format!("'{}' does not match {}", p, re.as_str()),
            )),
            (Some(re), None) => Err(CodecError::invalid_parameter(
                self.name,
                format!("missing parameter matching {}", re.as_str()),
            )),
        }
    }
}

/// Command definitions of one protocol, keyed by name
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    commands: IndexMap<&'static str, CommandDefinition>,
}

impl CommandTable {
    /// Build a table, rejecting duplicate commands and duplicate field names
    pub fn new(definitions: Vec<CommandDefinition>) -> Result<Self> {
        let mut commands = IndexMap::with_capacity(definitions.len());
        for definition in definitions {
            if definition.fields.is_empty() {
                return Err(CodecError::definition(format!(
                    "{} declares no response fields",
                    definition.name
                )));
            }
            let mut seen = std::collections::HashSet::new();
            for field in &definition.fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(CodecError::definition(format!(
                        "{} declares field '{}' twice",
                        definition.name, field.name
                    )));
                }
            }
            let name = definition.name;
            if commands.insert(name, definition).is_some() {
                return Err(CodecError::definition(format!(
                    "command {} defined twice",
                    name
                )));
            }
        }
        Ok(Self { commands })
    }

    pub fn get(&self, name: &str) -> Result<&CommandDefinition> {
        self.commands
            .get(name)
            .ok_or_else(|| CodecError::UnknownCommand(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandDefinition> {
        self.commands.values()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Split a full command string such as `POP01` into definition and parameter
    ///
    /// Exact names win; otherwise the longest name prefix whose parameter
    /// pattern accepts the remainder is used.
    pub fn resolve<'a>(&self, command: &'a str) -> Result<(&CommandDefinition, Option<&'a str>)> {
        if let Some(definition) = self.commands.get(command) {
            return Ok((definition, None));
        }

        let mut candidates: Vec<&CommandDefinition> = self
            .commands
            .values()
            .filter(|d| d.accepts_param() && command.len() > d.name.len())
            .filter(|d| command.starts_with(d.name))
            .collect();
        candidates.sort_by_key(|d| std::cmp::Reverse(d.name.len()));

        let mut rejection = None;
        for definition in candidates {
            let param = &command[definition.name.len()..];
            match definition.check_param(Some(param)) {
                Ok(()) => return Ok((definition, Some(param))),
                Err(e) if rejection.is_none() => rejection = Some(e),
                Err(_) => {},
            }
        }

        Err(rejection.unwrap_or_else(|| CodecError::UnknownCommand(command.to_string())))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const SPACE: ResponseShape = ResponseShape::Delimited { separator: b' ' };

    fn table() -> CommandTable {
        CommandTable::new(vec![
            CommandDefinition::query("QPI", "Protocol ID", SPACE)
                .field(FieldSpec::text("Protocol ID", 0)),
            CommandDefinition::query("QPIGS", "General status", SPACE)
                .field(FieldSpec::float("AC Input Voltage", 0).unit("V")),
            CommandDefinition::setter("POP", "Output priority", SPACE)
                .param("0[012]")
                .unwrap()
                .field(FieldSpec::text("Command execution", 0)),
            CommandDefinition::setter("PBCV", "Battery recharge voltage", SPACE)
                .param(r"\d\d\.\d")
                .unwrap()
                .field(FieldSpec::text("Command execution", 0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_get_unknown_command() {
        let table = table();
        assert!(table.get("QPIGS").is_ok());
        assert_eq!(
            table.get("QXYZ").unwrap_err(),
            CodecError::UnknownCommand("QXYZ".into())
        );
    }

    #[test]
    fn test_resolve_exact_and_prefixed() {
        let table = table();
        let (def, param) = table.resolve("QPIGS").unwrap();
        assert_eq!((def.name, param), ("QPIGS", None));

        let (def, param) = table.resolve("POP01").unwrap();
        assert_eq!((def.name, param), ("POP", Some("01")));

        let (def, param) = table.resolve("PBCV48.0").unwrap();
        assert_eq!((def.name, param), ("PBCV", Some("48.0")));
    }

    #[test]
    fn test_resolve_rejects_bad_parameter() {
        let table = table();
        assert!(matches!(
            table.resolve("POP07"),
            Err(CodecError::InvalidParameter { .. })
        ));
        assert!(matches!(
            table.resolve("QPIGSX"),
            Err(CodecError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_check_param() {
        let table = table();
        let pop = table.get("POP").unwrap();
        assert!(pop.check_param(Some("02")).is_ok());
        assert!(pop.check_param(Some("020")).is_err());
        assert!(pop.check_param(None).is_err());
        let qpi = table.get("QPI").unwrap();
        assert!(qpi.check_param(None).is_ok());
        assert!(qpi.check_param(Some("1")).is_err());
    }

    #[test]
    fn test_invalid_definitions_are_rejected() {
        let bad_pattern = CommandDefinition::setter("POP", "x", SPACE).param("0[01");
        assert!(matches!(bad_pattern, Err(CodecError::InvalidDefinition(_))));

        let duplicate = CommandTable::new(vec![
            CommandDefinition::query("QPI", "a", SPACE).field(FieldSpec::text("a", 0)),
            CommandDefinition::query("QPI", "b", SPACE).field(FieldSpec::text("b", 0)),
        ]);
        assert!(matches!(duplicate, Err(CodecError::InvalidDefinition(_))));

        let no_fields = CommandTable::new(vec![CommandDefinition::query("QPI", "a", SPACE)]);
        assert!(matches!(no_fields, Err(CodecError::InvalidDefinition(_))));

        let duplicate_field = CommandTable::new(vec![CommandDefinition::query("QPI", "a", SPACE)
            .field(FieldSpec::text("x", 0))
            .field(FieldSpec::text("x", 1))]);
        assert!(matches!(duplicate_field, Err(CodecError::InvalidDefinition(_))));
    }
}
