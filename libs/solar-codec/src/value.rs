//! Decoded reading types
//!
//! A `ReadingSet` is what every command execution produces: either the
//! ordered readings of one response, or a single synthetic `ERROR` reading.

use std::borrow::Cow;
use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::FieldError;

/// Name of the synthetic reading carried by failed executions
pub const ERROR_READING: &str = "ERROR";

// ============================================================================
// Reading Value
// ============================================================================

/// Value of one decoded reading
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ReadingValue {
    String(Cow<'static, str>),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl From<f64> for ReadingValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ReadingValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<u64> for ReadingValue {
    fn from(v: u64) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<u8> for ReadingValue {
    fn from(v: u8) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<&'static str> for ReadingValue {
    fn from(v: &'static str) -> Self {
        Self::String(Cow::Borrowed(v))
    }
}

impl From<String> for ReadingValue {
    fn from(v: String) -> Self {
        Self::String(Cow::Owned(v))
    }
}

impl From<bool> for ReadingValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl ReadingValue {
    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::String(s) => s.parse().ok(),
            Self::Null => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) => Some(f.round() as i64),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::String(s) => s.parse().ok(),
            Self::Null => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Integer(i) => Some(*i != 0),
            Self::Float(f) => Some(*f != 0.0),
            Self::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            },
            Self::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Null => Ok(()),
        }
    }
}

// ============================================================================
// Reading / ReadingSet
// ============================================================================

/// A value with its unit label ("" when unitless)
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Reading {
    pub value: ReadingValue,
    pub unit: &'static str,
}

impl Reading {
    pub fn new(value: impl Into<ReadingValue>, unit: &'static str) -> Self {
        Self {
            value: value.into(),
            unit,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.is_empty() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.unit)
        }
    }
}

/// Ordered readings decoded from one response
///
/// Insertion order follows the command's field order. Field-local problems
/// are kept in `issues` next to the readings that did decode.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReadingSet {
    command: String,
    readings: IndexMap<String, Reading>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    issues: Vec<FieldError>,
}

impl ReadingSet {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            readings: IndexMap::new(),
            issues: Vec::new(),
        }
    }

    /// Single `ERROR` reading carrying a human-readable message
    pub fn error(command: impl Into<String>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        let mut set = Self::new(command);
        set.insert(ERROR_READING, Reading::new(message, ""));
        set
    }

    /// The device answered with our own request, i.e. it did not know the command
    pub fn echoed(command: &str) -> Self {
        Self::error(command, format!("device did not recognize {}", command))
    }

    /// Insert a reading; a repeated name replaces the earlier value in place
    pub fn insert(&mut self, name: impl Into<String>, reading: Reading) {
        self.readings.insert(name.into(), reading);
    }

    pub fn push_issue(&mut self, issue: FieldError) {
        self.issues.push(issue);
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn get(&self, name: &str) -> Option<&Reading> {
        self.readings.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Reading)> {
        self.readings.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.readings.keys().map(String::as_str)
    }

    pub fn issues(&self) -> &[FieldError] {
        &self.issues
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// True for the synthetic single-reading error shape
    pub fn is_error(&self) -> bool {
        self.readings.len() == 1 && self.readings.contains_key(ERROR_READING)
    }

    pub fn error_message(&self) -> Option<&str> {
        if !self.is_error() {
            return None;
        }
        self.readings.get(ERROR_READING)?.value.as_str()
    }
}
