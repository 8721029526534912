//! Port Layer Traits
//!
//! A port owns one device link and knows the protocol spoken over it.
//! Implementations provide the raw exchange; `process_command` layers
//! framing, reconnect and decode on top and always yields a reading set.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use solar_codec::{Frame, ProtocolDefinition, ReadingSet};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::{PortError, PortResult};

/// Exchange budget when the configuration does not set one
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PortState {
    Disconnected,
    Connected,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Disconnected => write!(f, "disconnected"),
            PortState::Connected => write!(f, "connected"),
        }
    }
}

/// Port statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct PortStats {
    /// Total bytes written to the device
    pub bytes_sent: u64,
    /// Total bytes read from the device
    pub bytes_received: u64,
    /// Exchanges attempted
    pub exchanges: u64,
    /// Exchanges or decodes that ended in an error reading
    pub failures: u64,
}

impl PortStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
    }
}

/// Port shared between scheduled commands; the mutex serialises exchanges
pub type SharedPort = Arc<Mutex<Box<dyn Port>>>;

/// Wrap a port for sharing
pub fn shared(port: impl Port + 'static) -> SharedPort {
    Arc::new(Mutex::new(Box::new(port)))
}

/// Core port trait
#[async_trait]
pub trait Port: Send + Sync + fmt::Debug {
    /// Human-readable port name, used in logs
    fn name(&self) -> &str;

    /// Link kind identifier ("serial", "stream", "mqtt", "test")
    fn kind(&self) -> &'static str;

    /// Protocol spoken over this port
    fn protocol(&self) -> &Arc<ProtocolDefinition>;

    fn state(&self) -> PortState;

    fn stats(&self) -> &PortStats;

    fn stats_mut(&mut self) -> &mut PortStats;

    /// Open the link; a no-op when already connected
    async fn connect(&mut self) -> PortResult<()>;

    /// Close the link; a no-op when already disconnected
    async fn disconnect(&mut self) -> PortResult<()>;

    /// Write `frame` and return the raw response bytes
    async fn send_and_receive(&mut self, frame: &Frame) -> PortResult<Bytes>;

    /// Upper bound for one `send_and_receive`
    fn exchange_timeout(&self) -> Duration {
        DEFAULT_EXCHANGE_TIMEOUT
    }

    /// `send_and_receive` bounded by `exchange_timeout`, with stats
    async fn exchange(&mut self, frame: &Frame) -> PortResult<Bytes> {
        let limit = self.exchange_timeout();
        self.stats_mut().exchanges += 1;

        let result = match tokio::time::timeout(limit, self.send_and_receive(frame)).await {
            Ok(result) => result,
            Err(_) => Err(PortError::Timeout(format!(
                "{} got no response within {:?}",
                frame.command, limit
            ))),
        };

        if let Err(e) = &result {
            self.stats_mut().failures += 1;
            warn!("{}: exchange {} failed: {}", self.name(), frame.command, e);
        }
        result
    }

    /// Run one command end to end
    ///
    /// `command` may carry its parameter inline (`POP01`) or separately in
    /// `params`. Every failure becomes an error reading for this command.
    async fn process_command(&mut self, command: &str, params: Option<&str>) -> ReadingSet {
        let built = match params {
            Some(param) => self.protocol().build_command(command, Some(param)),
            None => self.protocol().resolve_command(command),
        };
        let frame = match built {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{}: cannot build {}: {}", self.name(), command, e);
                return ReadingSet::error(command, e.to_string());
            },
        };

        if self.state() != PortState::Connected {
            if let Err(e) = self.connect().await {
                error!("{}: connect failed: {}", self.name(), e);
                self.stats_mut().failures += 1;
                return ReadingSet::error(frame.command.as_str(), e.to_string());
            }
        }

        let mut retried = false;
        loop {
            let raw = match self.exchange(&frame).await {
                Ok(raw) => raw,
                Err(e) => {
                    if e.needs_reconnect() {
                        debug!("{}: dropping connection after {}", self.name(), e);
                        if let Err(e) = self.disconnect().await {
                            debug!("{}: disconnect failed: {}", self.name(), e);
                        }
                    }
                    return ReadingSet::error(frame.command.as_str(), e.to_string());
                },
            };

            match self.protocol().decode(&raw, &frame) {
                Ok(set) => return set,
                Err(e) if e.is_recoverable() && !retried => {
                    warn!("{}: {} for {}, retrying once", self.name(), e, frame.command);
                    retried = true;
                },
                Err(e) => {
                    self.stats_mut().failures += 1;
                    warn!("{}: {} decode failed: {}", self.name(), frame.command, e);
                    return ReadingSet::error(frame.command.as_str(), e.to_string());
                },
            }
        }
    }
}
