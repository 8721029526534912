//! Test port
//!
//! Answers from a queue of canned responses and falls back to the
//! protocol's framed sample response of the command. Used by the `test`
//! port type in configuration and throughout the test suite.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use solar_codec::{Frame, ProtocolDefinition};
use tracing::debug;

use super::traits::{Port, PortState, PortStats};
use crate::error::{PortError, PortResult};

#[derive(Debug, Default)]
struct MockState {
    /// Responses handed out in order before falling back to samples
    responses: VecDeque<Bytes>,
    /// Every frame written to the port
    sent: Vec<Frame>,
    fail_connect: bool,
    fail_exchange: bool,
    connects: u32,
}

/// Test-side control over a `MockPort`, usable after the port is shared
#[derive(Debug, Clone, Default)]
pub struct MockControl {
    state: Arc<Mutex<MockState>>,
}

impl MockControl {
    /// Queue a raw response
    pub fn push_response(&self, response: impl Into<Bytes>) {
        self.state.lock().responses.push_back(response.into());
    }

    /// Frames sent so far
    pub fn sent(&self) -> Vec<Frame> {
        self.state.lock().sent.clone()
    }

    /// Command names sent so far, in order
    pub fn sent_commands(&self) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .map(|frame| frame.command.clone())
            .collect()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    pub fn set_fail_exchange(&self, fail: bool) {
        self.state.lock().fail_exchange = fail;
    }

    /// Successful connects so far
    pub fn connects(&self) -> u32 {
        self.state.lock().connects
    }
}

/// Port answering from canned data
#[derive(Debug)]
pub struct MockPort {
    name: String,
    protocol: Arc<ProtocolDefinition>,
    state: PortState,
    stats: PortStats,
    control: MockControl,
}

impl MockPort {
    pub fn new(name: impl Into<String>, protocol: Arc<ProtocolDefinition>) -> Self {
        Self {
            name: name.into(),
            protocol,
            state: PortState::Disconnected,
            stats: PortStats::default(),
            control: MockControl::default(),
        }
    }

    pub fn control(&self) -> MockControl {
        self.control.clone()
    }
}

#[async_trait]
impl Port for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "test"
    }

    fn protocol(&self) -> &Arc<ProtocolDefinition> {
        &self.protocol
    }

    fn state(&self) -> PortState {
        self.state
    }

    fn stats(&self) -> &PortStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut PortStats {
        &mut self.stats
    }

    async fn connect(&mut self) -> PortResult<()> {
        if self.state == PortState::Connected {
            return Ok(());
        }
        let mut state = self.control.state.lock();
        if state.fail_connect {
            return Err(PortError::ConnectionFailed(format!(
                "{}: simulated connect failure",
                self.name
            )));
        }
        state.connects += 1;
        drop(state);

        self.state = PortState::Connected;
        debug!("{}: test port connected", self.name);
        Ok(())
    }

    async fn disconnect(&mut self) -> PortResult<()> {
        self.state = PortState::Disconnected;
        Ok(())
    }

    async fn send_and_receive(&mut self, frame: &Frame) -> PortResult<Bytes> {
        if self.state != PortState::Connected {
            return Err(PortError::NotConnected(self.name.clone()));
        }

        let queued = {
            let mut state = self.control.state.lock();
            state.sent.push(frame.clone());
            if state.fail_exchange {
                return Err(PortError::ConnectionLost(format!(
                    "{}: simulated link failure",
                    self.name
                )));
            }
            state.responses.pop_front()
        };
        self.stats.record_sent(frame.len());

        let response = match queued {
            Some(response) => response,
            None => self
                .protocol
                .sample_response(&frame.command)?
                .ok_or_else(|| {
                    PortError::ReceiveFailed(format!("no canned response for {}", frame.command))
                })?,
        };
        self.stats.record_received(response.len());
        Ok(response)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use solar_codec::ProtocolId;

    fn pi30_port() -> MockPort {
        MockPort::new("inv1", ProtocolDefinition::load(ProtocolId::Pi30).unwrap())
    }

    #[tokio::test]
    async fn test_process_command_uses_sample() {
        let mut port = pi30_port();
        let control = port.control();

        let set = port.process_command("QMOD", None).await;
        assert!(!set.is_error());
        assert_eq!(set.get("Device Mode").unwrap().value.as_str(), Some("Battery"));
        assert_eq!(port.state(), PortState::Connected);
        assert_eq!(control.sent_commands(), vec!["QMOD"]);
        assert_eq!(port.stats().exchanges, 1);
        assert!(port.stats().bytes_received > 0);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let mut port = pi30_port();
        let control = port.control();
        port.connect().await.unwrap();
        port.connect().await.unwrap();
        assert_eq!(control.connects(), 1);

        port.disconnect().await.unwrap();
        port.disconnect().await.unwrap();
        assert_eq!(port.state(), PortState::Disconnected);
    }

    #[tokio::test]
    async fn test_echo_becomes_error_reading() {
        let mut port = pi30_port();
        let frame = port.protocol().build_command("QPI", None).unwrap();
        port.control().push_response(frame.bytes.clone());

        let set = port.process_command("QPI", None).await;
        assert!(set.is_error());
        assert!(set.error_message().unwrap().contains("QPI"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_error_reading() {
        let mut port = pi30_port();
        port.control().set_fail_connect(true);

        let set = port.process_command("QPI", None).await;
        assert!(set.is_error());
        assert_eq!(port.stats().failures, 1);
        assert_eq!(port.stats().exchanges, 0);
    }

    #[tokio::test]
    async fn test_link_failure_drops_connection() {
        let mut port = pi30_port();
        let control = port.control();
        control.set_fail_exchange(true);

        let set = port.process_command("QPIGS", None).await;
        assert!(set.is_error());
        assert_eq!(port.state(), PortState::Disconnected);

        control.set_fail_exchange(false);
        let set = port.process_command("QPIGS", None).await;
        assert!(!set.is_error());
        assert_eq!(control.connects(), 2);
    }

    #[tokio::test]
    async fn test_checksum_error_retried_once() {
        let mut port = pi30_port();
        let control = port.control();
        control.push_response(Bytes::from_static(b"(B\x00\x00\r"));

        // First answer is line noise, the retry gets the sample
        let set = port.process_command("QMOD", None).await;
        assert!(!set.is_error());
        assert_eq!(control.sent().len(), 2);

        control.push_response(Bytes::from_static(b"(B\x00\x00\r"));
        control.push_response(Bytes::from_static(b"(B\x00\x00\r"));
        let set = port.process_command("QMOD", None).await;
        assert!(set.is_error());
        assert!(set.error_message().unwrap().contains("Checksum"));
    }

    #[tokio::test]
    async fn test_invalid_parameter_never_reaches_device() {
        let mut port = pi30_port();
        let control = port.control();
        let set = port.process_command("POP", Some("09")).await;
        assert!(set.is_error());
        assert!(control.sent().is_empty());

        let set = port.process_command("POP02", None).await;
        assert_eq!(
            set.get("Command execution").unwrap().value.as_str(),
            Some("Successful")
        );
        assert_eq!(control.sent()[0].as_bytes(), b"POP02\xe2\x0b\r");
    }
}
