//! Serial port implementation
//!
//! Request/response exchange over a serial line (USB-serial inverter
//! cables, RS485 adapters). The response is read in chunks until the
//! protocol reports it ready.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use solar_codec::{Frame, ProtocolDefinition};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, warn};

use super::traits::{Port, PortState, PortStats};
use crate::error::{PortError, PortResult};

const READ_CHUNK: usize = 256;

/// Serial line settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialPortConfig {
    /// Device path (e.g., "/dev/ttyUSB0", "COM1")
    pub path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Stop bits (1, 2)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Parity ("None", "Even", "Odd")
    #[serde(default = "default_parity")]
    pub parity: String,
}

fn default_baud_rate() -> u32 {
    2400
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_parity() -> String {
    "None".to_string()
}

impl SerialPortConfig {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: default_parity(),
        }
    }

    pub fn validate(&self) -> PortResult<()> {
        if self.path.is_empty() {
            return Err(PortError::ConfigError(
                "Port path cannot be empty".to_string(),
            ));
        }

        if self.baud_rate == 0 {
            return Err(PortError::ConfigError(
                "Baud rate must be greater than zero".to_string(),
            ));
        }

        if ![5, 6, 7, 8].contains(&self.data_bits) {
            return Err(PortError::ConfigError(
                "Data bits must be 5, 6, 7, or 8".to_string(),
            ));
        }

        if ![1, 2].contains(&self.stop_bits) {
            return Err(PortError::ConfigError(
                "Stop bits must be 1 or 2".to_string(),
            ));
        }

        if !["None", "Even", "Odd"].contains(&self.parity.as_str()) {
            return Err(PortError::ConfigError(
                "Parity must be None, Even, or Odd".to_string(),
            ));
        }

        Ok(())
    }

    fn parse_parity(&self) -> tokio_serial::Parity {
        match self.parity.as_str() {
            "Even" => tokio_serial::Parity::Even,
            "Odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        }
    }

    fn parse_data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    fn parse_stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }

    /// Open the line as an async stream
    pub fn open(&self) -> PortResult<SerialStream> {
        debug!("Opening serial port: {}", self.path);

        let mut stream = tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(self.parse_data_bits())
            .parity(self.parse_parity())
            .stop_bits(self.parse_stop_bits())
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| {
                let error_msg = format!("Failed to open serial port {}: {e}", self.path);
                error!("{error_msg}");
                PortError::ConnectionFailed(error_msg)
            })?;

        #[cfg(unix)]
        stream.set_exclusive(false).map_err(|e| {
            PortError::ConnectionFailed(format!("Failed to set exclusive mode: {e}"))
        })?;

        Ok(stream)
    }
}

/// Request/response port over a serial line
#[derive(Debug)]
pub struct SerialPortLink {
    name: String,
    config: SerialPortConfig,
    protocol: Arc<ProtocolDefinition>,
    stream: Option<SerialStream>,
    stats: PortStats,
    exchange_timeout: Duration,
}

impl SerialPortLink {
    pub fn new(
        name: impl Into<String>,
        config: SerialPortConfig,
        protocol: Arc<ProtocolDefinition>,
        exchange_timeout: Duration,
    ) -> PortResult<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            protocol,
            stream: None,
            stats: PortStats::default(),
            exchange_timeout,
        })
    }
}

#[async_trait]
impl Port for SerialPortLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "serial"
    }

    fn protocol(&self) -> &Arc<ProtocolDefinition> {
        &self.protocol
    }

    fn state(&self) -> PortState {
        if self.stream.is_some() {
            PortState::Connected
        } else {
            PortState::Disconnected
        }
    }

    fn stats(&self) -> &PortStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut PortStats {
        &mut self.stats
    }

    fn exchange_timeout(&self) -> Duration {
        self.exchange_timeout
    }

    async fn connect(&mut self) -> PortResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.stream = Some(self.config.open()?);
        info!(
            "{}: opened serial port {} at {} baud",
            self.name, self.config.path, self.config.baud_rate
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> PortResult<()> {
        // Serial port is closed when dropped
        if self.stream.take().is_some() {
            info!("{}: closed serial port {}", self.name, self.config.path);
        }
        Ok(())
    }

    async fn send_and_receive(&mut self, frame: &Frame) -> PortResult<Bytes> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(PortError::NotConnected(self.config.path.clone()));
        };

        // Leftovers of an exchange that timed out would prefix this response
        if let Err(e) = stream.clear(tokio_serial::ClearBuffer::Input) {
            warn!("{}: failed to clear input buffer: {}", self.name, e);
        }

        stream
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| PortError::SendFailed(format!("Failed to send data: {e}")))?;
        stream
            .flush()
            .await
            .map_err(|e| PortError::SendFailed(format!("Failed to flush: {e}")))?;
        self.stats.record_sent(frame.len());
        debug!(
            hex_data = %common::hex::describe_frame(frame.as_bytes()),
            length = frame.len(),
            direction = "send",
            "[Serial] Raw packet"
        );

        let limit = self.protocol.max_record_len();
        let mut response = BytesMut::with_capacity(limit);
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| PortError::ReceiveFailed(format!("Failed to read: {e}")))?;
            if n == 0 {
                return Err(PortError::ConnectionLost(format!(
                    "{} closed after {} bytes",
                    self.config.path,
                    response.len()
                )));
            }
            response.extend_from_slice(&chunk[..n]);

            if self.protocol.response_ready(&response, frame) || response.len() >= limit {
                break;
            }
        }

        self.stats.record_received(response.len());
        debug!(
            hex_data = %common::hex::describe_frame(&response),
            length = response.len(),
            direction = "recv",
            "[Serial] Raw packet"
        );
        Ok(response.freeze())
    }
}
