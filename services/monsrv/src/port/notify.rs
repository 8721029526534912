//! Notification-style ports
//!
//! Devices behind Bluetooth bridges push responses as a stream of small
//! chunks instead of answering a read. A `NotifyLink` moves bytes; the
//! `NotifySink` it feeds reassembles records; `NotifyPort` turns the pair
//! into a request/response `Port`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use solar_codec::{Frame, ProtocolDefinition};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_serial::SerialStream;
use tokio_util::codec::{BytesCodec, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::assembler::{LatestRecord, RecordAssembler};
use super::serial::SerialPortConfig;
use super::traits::{Port, PortState, PortStats};
use crate::error::{PortError, PortResult};

const READER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Sink
// ============================================================================

/// Receiving end of a notification stream
#[derive(Debug)]
pub struct NotifySink {
    assembler: Mutex<RecordAssembler>,
    latest: LatestRecord,
    closed: AtomicBool,
    closed_notify: Notify,
}

impl NotifySink {
    pub fn new(protocol: Arc<ProtocolDefinition>) -> Self {
        Self {
            assembler: Mutex::new(RecordAssembler::new(protocol)),
            latest: LatestRecord::new(),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
        }
    }

    /// Feed one inbound chunk
    pub fn on_notify(&self, chunk: &[u8]) {
        let completed = self.assembler.lock().push(chunk);
        if let Some(record) = completed {
            debug!("Record complete: {} bytes", record.len());
            self.latest.publish(record);
        }
    }

    pub fn latest(&self) -> &LatestRecord {
        &self.latest
    }

    /// The stream ended; no further chunks will arrive until the link reopens
    pub fn on_close(&self) {
        self.closed.store(true, Ordering::Release);
        self.closed_notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolve once the stream has ended
    pub async fn closed(&self) {
        while !self.is_closed() {
            self.closed_notify.notified().await;
        }
    }

    /// Drop partial data and any unread record, and mark the stream open
    pub fn reset(&self) {
        self.assembler.lock().reset();
        self.latest.clear();
        self.closed.store(false, Ordering::Release);
    }
}

// ============================================================================
// Link
// ============================================================================

/// Byte transport that pushes inbound data into a sink
#[async_trait]
pub trait NotifyLink: Send + Sync + fmt::Debug {
    /// Open the link and start pushing inbound chunks into `sink`
    async fn open(&mut self, sink: Arc<NotifySink>) -> PortResult<()>;

    async fn close(&mut self) -> PortResult<()>;

    async fn write(&mut self, data: &[u8]) -> PortResult<()>;
}

/// Serial-backed link, as exposed by Bluetooth-to-serial bridges
#[derive(Debug)]
pub struct SerialNotifyLink {
    config: SerialPortConfig,
    writer: Option<WriteHalf<SerialStream>>,
    reader: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl SerialNotifyLink {
    pub fn new(config: SerialPortConfig) -> PortResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            writer: None,
            reader: None,
            cancel: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl NotifyLink for SerialNotifyLink {
    async fn open(&mut self, sink: Arc<NotifySink>) -> PortResult<()> {
        let stream = self.config.open()?;
        let (read_half, write_half) = tokio::io::split(stream);

        let cancel = CancellationToken::new();
        let reader_cancel = cancel.clone();
        let path = self.config.path.clone();
        let reader = tokio::spawn(async move {
            let mut chunks = FramedRead::new(read_half, BytesCodec::new());
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    next = chunks.next() => match next {
                        Some(Ok(chunk)) => sink.on_notify(&chunk),
                        Some(Err(e)) => {
                            warn!("{}: notification stream failed: {}", path, e);
                            sink.on_close();
                            break;
                        },
                        None => {
                            info!("{}: notification stream closed", path);
                            sink.on_close();
                            break;
                        },
                    },
                }
            }
        });

        self.cancel = cancel;
        self.reader = Some(reader);
        self.writer = Some(write_half);
        info!("Opened notification link on {}", self.config.path);
        Ok(())
    }

    async fn close(&mut self) -> PortResult<()> {
        self.writer = None;
        self.cancel.cancel();
        if let Some(handle) = self.reader.take() {
            match tokio::time::timeout(READER_SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!("{}: reader stopped", self.config.path),
                Ok(Err(e)) => warn!("{}: reader task error: {}", self.config.path, e),
                Err(_) => warn!("{}: reader stop timeout", self.config.path),
            }
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> PortResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(PortError::NotConnected(self.config.path.clone()));
        };
        writer
            .write_all(data)
            .await
            .map_err(|e| PortError::SendFailed(format!("Failed to send data: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| PortError::SendFailed(format!("Failed to flush: {e}")))
    }
}

// ============================================================================
// Port
// ============================================================================

/// Request/response port over a notification link
#[derive(Debug)]
pub struct NotifyPort<L> {
    name: String,
    protocol: Arc<ProtocolDefinition>,
    link: L,
    sink: Arc<NotifySink>,
    state: PortState,
    stats: PortStats,
    exchange_timeout: Duration,
}

impl<L: NotifyLink> NotifyPort<L> {
    pub fn new(
        name: impl Into<String>,
        protocol: Arc<ProtocolDefinition>,
        link: L,
        exchange_timeout: Duration,
    ) -> Self {
        let sink = Arc::new(NotifySink::new(Arc::clone(&protocol)));
        Self {
            name: name.into(),
            protocol,
            link,
            sink,
            state: PortState::Disconnected,
            stats: PortStats::default(),
            exchange_timeout,
        }
    }

    pub fn sink(&self) -> &Arc<NotifySink> {
        &self.sink
    }
}

#[async_trait]
impl<L: NotifyLink + 'static> Port for NotifyPort<L> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "stream"
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

    fn exchange_timeout(&self) -> Duration {
        self.exchange_timeout
    }

    async fn connect(&mut self) -> PortResult<()> {
        if self.state == PortState::Connected {
            return Ok(());
        }
        self.sink.reset();
        self.link.open(Arc::clone(&self.sink)).await?;
        self.state = PortState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> PortResult<()> {
        if self.state == PortState::Disconnected {
            return Ok(());
        }
        self.state = PortState::Disconnected;
        self.link.close().await
    }

    async fn send_and_receive(&mut self, frame: &Frame) -> PortResult<Bytes> {
        if self.state != PortState::Connected {
            return Err(PortError::NotConnected(self.name.clone()));
        }
        if self.sink.is_closed() {
            return Err(PortError::ConnectionLost(format!(
                "{}: notification stream ended",
                self.name
            )));
        }
        let expected = self.protocol.command(&frame.command)?.record_type;

        self.sink.latest().clear();
        self.link.write(frame.as_bytes()).await?;
        self.stats.record_sent(frame.len());

        loop {
            let record = tokio::select! {
                biased;
                record = self.sink.latest().wait() => record,
                _ = self.sink.closed() => {
                    return Err(PortError::ConnectionLost(format!(
                        "{}: notification stream ended while waiting for {}",
                        self.name, frame.command
                    )));
                },
            };
            let actual = self.protocol.record_type(&record);
            if expected.is_none() || actual == expected {
                self.stats.record_received(record.len());
                return Ok(record);
            }
            debug!(
                "{}: skipping record type {:?} while waiting for {:?}",
                self.name, actual, expected
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use solar_codec::ProtocolId;

    /// Link that answers each write by streaming scripted records in 20 byte chunks
    #[derive(Debug, Default)]
    struct ScriptedLink {
        sink: Option<Arc<NotifySink>>,
        script: Vec<Vec<Bytes>>,
        writes: Vec<Vec<u8>>,
        opens: u32,
        /// Writes still to come that end the stream instead of answering
        hangups: usize,
    }

    #[async_trait]
    impl NotifyLink for ScriptedLink {
        async fn open(&mut self, sink: Arc<NotifySink>) -> PortResult<()> {
            self.sink = Some(sink);
            self.opens += 1;
            Ok(())
        }

        async fn close(&mut self) -> PortResult<()> {
            self.sink = None;
            Ok(())
        }

        async fn write(&mut self, data: &[u8]) -> PortResult<()> {
            self.writes.push(data.to_vec());
            let sink = self.sink.clone().unwrap();
            if self.hangups > 0 {
                self.hangups -= 1;
                tokio::spawn(async move { sink.on_close() });
                return Ok(());
            }
            let records = if self.script.is_empty() {
                Vec::new()
            } else {
                self.script.remove(0)
            };
            tokio::spawn(async move {
                for record in records {
                    for chunk in record.chunks(20) {
                        sink.on_notify(chunk);
                        tokio::task::yield_now().await;
                    }
                }
            });
            Ok(())
        }
    }

    fn jk02() -> Arc<ProtocolDefinition> {
        ProtocolDefinition::load(ProtocolId::Jk02).unwrap()
    }

    #[tokio::test]
    async fn test_notify_port_returns_matching_record() {
        let protocol = jk02();
        let info = protocol.sample_response("getInfo").unwrap().unwrap();
        let cells = protocol.sample_response("getCellData").unwrap().unwrap();
        let link = ScriptedLink {
            // Device answers with an info record before the cell data
            script: vec![vec![info, cells.clone()]],
            ..Default::default()
        };
        let mut port = NotifyPort::new("bms", Arc::clone(&protocol), link, Duration::from_secs(2));

        let set = port.process_command("getCellData", None).await;
        assert!(!set.is_error(), "{:?}", set.error_message());
        assert_eq!(set.get("Voltage Cell01").unwrap().value.as_f64(), Some(3.374));
        assert_eq!(port.stats().bytes_received, cells.len() as u64);
        assert_eq!(port.link.writes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_times_out() {
        let link = ScriptedLink::default();
        let mut port = NotifyPort::new("bms", jk02(), link, Duration::from_millis(500));

        let set = port.process_command("getInfo", None).await;
        assert!(set.is_error());
        assert!(set.error_message().unwrap().contains("no response"));
        // Timeouts keep the link open
        assert_eq!(port.state(), PortState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_stream_reconnects_on_next_command() {
        let protocol = jk02();
        let info = protocol.sample_response("getInfo").unwrap().unwrap();
        let link = ScriptedLink {
            script: vec![vec![info]],
            hangups: 1,
            ..Default::default()
        };
        let mut port = NotifyPort::new("bms", protocol, link, Duration::from_secs(30));

        let started = tokio::time::Instant::now();
        let set = port.process_command("getInfo", None).await;
        assert!(set.is_error());
        assert!(set.error_message().unwrap().contains("Connection lost"));
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(port.state(), PortState::Disconnected);

        let set = port.process_command("getInfo", None).await;
        assert!(!set.is_error(), "{:?}", set.error_message());
        assert_eq!(port.link.opens, 2);
        assert!(!port.sink().is_closed());
    }

    #[tokio::test]
    async fn test_closed_sink_fails_fast() {
        let link = ScriptedLink::default();
        let mut port = NotifyPort::new("bms", jk02(), link, Duration::from_secs(5));
        port.connect().await.unwrap();
        port.sink().on_close();

        let frame = port.protocol().build_command("getInfo", None).unwrap();
        let err = port.send_and_receive(&frame).await.unwrap_err();
        assert!(matches!(err, PortError::ConnectionLost(_)));
        assert!(err.needs_reconnect());
        assert!(port.link.writes.is_empty());
    }

    #[test]
    fn test_sink_emits_into_latest() {
        let protocol = jk02();
        let record = protocol.sample_response("getInfo").unwrap().unwrap();
        let sink = NotifySink::new(protocol);
        for chunk in record.chunks(20) {
            sink.on_notify(chunk);
        }
        assert_eq!(sink.latest().take().unwrap(), record);

        sink.on_notify(&record[..20]);
        sink.reset();
        assert!(sink.latest().take().is_none());
    }
}
