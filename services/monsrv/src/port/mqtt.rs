//! MQTT relay port
//!
//! A remote bridge owns the physical link. Request frames are published to
//! `<prefix>/<device>/command`; the bridge publishes the raw response to
//! `<prefix>/<device>/response/<command>`, which reaches the waiting
//! exchange through the injected correlator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use solar_codec::{Frame, ProtocolDefinition};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::traits::{Port, PortState, PortStats};
use crate::config::MqttConfig;
use crate::correlator::Correlator;
use crate::error::{PortError, PortResult};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Topic layout of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTopics {
    pub command: String,
    /// Prefix of the response topics, trailing slash included
    pub response_prefix: String,
}

impl RelayTopics {
    pub fn new(prefix: &str, device: &str) -> Self {
        let base = format!("{}/{}", prefix.trim_end_matches('/'), device);
        Self {
            command: format!("{}/command", base),
            response_prefix: format!("{}/response/", base),
        }
    }

    /// Subscription filter covering every response topic
    pub fn response_filter(&self) -> String {
        format!("{}#", self.response_prefix)
    }

    /// Command name a response topic belongs to
    pub fn command_of<'t>(&self, topic: &'t str) -> Option<&'t str> {
        topic
            .strip_prefix(self.response_prefix.as_str())
            .filter(|command| !command.is_empty() && !command.contains('/'))
    }
}

/// Port relaying exchanges through an MQTT broker
#[derive(Debug)]
pub struct MqttPort {
    name: String,
    protocol: Arc<ProtocolDefinition>,
    config: MqttConfig,
    topics: RelayTopics,
    correlator: Correlator<Bytes>,
    client: Option<AsyncClient>,
    poller: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    stats: PortStats,
    exchange_timeout: Duration,
}

impl MqttPort {
    pub fn new(
        name: impl Into<String>,
        protocol: Arc<ProtocolDefinition>,
        config: MqttConfig,
        correlator: Correlator<Bytes>,
        exchange_timeout: Duration,
    ) -> Self {
        let name = name.into();
        let topics = RelayTopics::new(&config.topic_prefix, &name);
        Self {
            name,
            protocol,
            config,
            topics,
            correlator,
            client: None,
            poller: None,
            cancel: CancellationToken::new(),
            stats: PortStats::default(),
            exchange_timeout,
        }
    }

    pub fn topics(&self) -> &RelayTopics {
        &self.topics
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }
}

#[async_trait]
impl Port for MqttPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "mqtt"
    }

    fn protocol(&self) -> &Arc<ProtocolDefinition> {
        &self.protocol
    }

    fn state(&self) -> PortState {
        if self.client.is_some() {
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
        if self.client.is_some() {
            return Ok(());
        }

        // Random suffix keeps restarts from kicking a lingering session off the broker
        let client_id = format!("{}-{:04x}", self.config.client_id, rand::random::<u16>());
        let mut options = MqttOptions::new(client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(options, 10);

        client
            .subscribe(self.topics.response_filter(), QoS::AtLeastOnce)
            .await
            .map_err(|e| PortError::ConnectionFailed(format!("MQTT subscribe failed: {}", e)))?;

        let cancel = CancellationToken::new();
        let poll_cancel = cancel.clone();
        let topics = self.topics.clone();
        let correlator = self.correlator.clone();
        let poller = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = poll_cancel.cancelled() => break,
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            match topics.command_of(&publish.topic) {
                                Some(command) => {
                                    correlator.deliver(command, publish.payload);
                                },
                                None => debug!("Ignoring publish on {}", publish.topic),
                            }
                        },
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("MQTT session established");
                        },
                        Ok(_) => {},
                        Err(e) => {
                            error!("MQTT event loop error: {}", e);
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        },
                    },
                }
            }
        });

        self.cancel = cancel;
        self.poller = Some(poller);
        self.client = Some(client);
        info!(
            "{}: relaying through MQTT broker {}:{}",
            self.name, self.config.host, self.config.port
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> PortResult<()> {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                debug!("{}: MQTT disconnect failed: {}", self.name, e);
            }
            info!("{}: disconnected from MQTT broker", self.name);
        }
        self.cancel.cancel();
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        Ok(())
    }

    async fn send_and_receive(&mut self, frame: &Frame) -> PortResult<Bytes> {
        let Some(client) = self.client.as_ref() else {
            return Err(PortError::NotConnected(self.name.clone()));
        };

        // Register first so a fast bridge cannot answer into the void
        let handle = self.correlator.register(frame.command.clone());
        client
            .publish(
                self.topics.command.as_str(),
                QoS::AtLeastOnce,
                false,
                frame.bytes.to_vec(),
            )
            .await
            .map_err(|e| PortError::SendFailed(format!("MQTT publish failed: {}", e)))?;
        self.stats.record_sent(frame.len());
        debug!("{}: published {} to {}", self.name, frame.command, self.topics.command);

        let response = self
            .correlator
            .await_result(&handle, self.poll_interval(), self.exchange_timeout, &self.cancel)
            .await?;
        self.stats.record_received(response.len());
        Ok(response)
    }
}
