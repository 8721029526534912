//! Reading set outputs
//!
//! Every command execution hands its reading set (or error reading) to the
//! outputs bound to that command, in order.

use std::fmt;
use std::io::Write;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use solar_codec::ReadingSet;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::correlator::{Correlator, DeliveryOutcome};
use crate::error::{MonsrvError, Result};

/// Destination for reading sets
#[async_trait]
pub trait Output: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    async fn emit(&self, readings: &ReadingSet) -> Result<()>;
}

/// Output kinds selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Log,
    Json,
}

// ============================================================================
// Log
// ============================================================================

/// One log line per reading
#[derive(Debug, Default)]
pub struct LogOutput;

#[async_trait]
impl Output for LogOutput {
    fn name(&self) -> &str {
        "log"
    }

    async fn emit(&self, readings: &ReadingSet) -> Result<()> {
        if let Some(message) = readings.error_message() {
            warn!("{}: {}", readings.command(), message);
            return Ok(());
        }
        for (name, reading) in readings.iter() {
            info!("{} {}: {}", readings.command(), name, reading);
        }
        for issue in readings.issues() {
            warn!("{}: {}", readings.command(), issue);
        }
        Ok(())
    }
}

// ============================================================================
// JSON lines
// ============================================================================

#[derive(Serialize)]
struct JsonLine<'a> {
    device: &'a str,
    timestamp: String,
    #[serde(flatten)]
    readings: &'a ReadingSet,
}

/// One JSON document per reading set, newline terminated
pub struct JsonOutput {
    device: String,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonOutput {
    /// Write to standard output
    pub fn stdout(device: impl Into<String>) -> Self {
        Self::with_writer(device, Box::new(std::io::stdout()))
    }

    pub fn with_writer(device: impl Into<String>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            device: device.into(),
            writer: Mutex::new(writer),
        }
    }
}

impl fmt::Debug for JsonOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonOutput")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Output for JsonOutput {
    fn name(&self) -> &str {
        "json"
    }

    async fn emit(&self, readings: &ReadingSet) -> Result<()> {
        let line = JsonLine {
            device: &self.device,
            timestamp: chrono::Utc::now().to_rfc3339(),
            readings,
        };
        let mut text = serde_json::to_string(&line)
            .map_err(|e| MonsrvError::output(format!("Failed to serialize readings: {}", e)))?;
        text.push('\n');

        let mut writer = self.writer.lock();
        writer
            .write_all(text.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| MonsrvError::output(format!("Failed to write readings: {}", e)))
    }
}

// ============================================================================
// In-process hand-off
// ============================================================================

/// Forwards reading sets into an mpsc channel
#[derive(Debug)]
pub struct ChannelOutput {
    tx: mpsc::Sender<ReadingSet>,
}

impl ChannelOutput {
    pub fn new(tx: mpsc::Sender<ReadingSet>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Output for ChannelOutput {
    fn name(&self) -> &str {
        "channel"
    }

    async fn emit(&self, readings: &ReadingSet) -> Result<()> {
        self.tx
            .send(readings.clone())
            .await
            .map_err(|_| MonsrvError::output("Reading channel closed"))
    }
}

/// Delivers reading sets to a correlator, keyed by command name unless a key is fixed
pub struct CorrelatorOutput {
    correlator: Correlator<ReadingSet>,
    key: Option<String>,
}

impl CorrelatorOutput {
    pub fn new(correlator: Correlator<ReadingSet>) -> Self {
        Self {
            correlator,
            key: None,
        }
    }

    pub fn with_key(correlator: Correlator<ReadingSet>, key: impl Into<String>) -> Self {
        Self {
            correlator,
            key: Some(key.into()),
        }
    }
}

impl fmt::Debug for CorrelatorOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelatorOutput")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Output for CorrelatorOutput {
    fn name(&self) -> &str {
        "correlator"
    }

    async fn emit(&self, readings: &ReadingSet) -> Result<()> {
        let key = self.key.as_deref().unwrap_or(readings.command());
        // Nobody waiting is not an error; the correlator counts it
        if let DeliveryOutcome::Delivered(n) = self.correlator.deliver(key, readings.clone()) {
            tracing::debug!("{} handed to {} waiter(s)", key, n);
        }
        Ok(())
    }
}
