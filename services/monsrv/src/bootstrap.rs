//! Service bootstrap
//!
//! Turns a validated `Config` into running parts:
//! - the device port
//! - outputs shared across commands
//! - command groups and the scheduler

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use solar_codec::{CommandKind, ProtocolDefinition, ReadingSet};
use tracing::info;

use crate::config::{Config, PortConfig};
use crate::correlator::Correlator;
use crate::error::Result;
use crate::output::{JsonOutput, LogOutput, Output, OutputKind};
use crate::port::{
    shared, MockPort, MqttPort, NotifyPort, SerialNotifyLink, SerialPortLink, SharedPort,
};
use crate::schedule::{CommandGroup, ScheduledCommand, Scheduler};

/// Command-line arguments for monsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "monsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Solar inverter and BMS monitoring service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long, env = "MONSRV_CONFIG", default_value = "config/monsrv.yaml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Run every due group once and exit
    #[arg(long)]
    pub once: bool,

    /// Print the device protocol's commands and exit
    #[arg(long)]
    pub list_commands: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

/// Everything `main` needs to run
pub struct Service {
    pub port: SharedPort,
    pub scheduler: Scheduler,
}

/// Build the device port
///
/// `relay` receives responses for `mqtt` ports and is ignored otherwise.
pub fn build_port(
    config: &Config,
    protocol: Arc<ProtocolDefinition>,
    relay: Correlator<Bytes>,
) -> Result<SharedPort> {
    let device = &config.device;
    let timeout = device.exchange_timeout();

    let port = match &device.port {
        PortConfig::Serial(serial) => shared(SerialPortLink::new(
            &device.name,
            serial.clone(),
            protocol,
            timeout,
        )?),
        PortConfig::Stream(serial) => {
            let link = SerialNotifyLink::new(serial.clone())?;
            shared(NotifyPort::new(&device.name, protocol, link, timeout))
        },
        PortConfig::Mqtt => shared(MqttPort::new(
            &device.name,
            protocol,
            config.mqtt_or_default(),
            relay,
            timeout,
        )),
        PortConfig::Test => shared(MockPort::new(&device.name, protocol)),
    };
    Ok(port)
}

/// Output instances, one per kind, shared by every command
#[derive(Debug)]
pub struct Outputs {
    log: Arc<dyn Output>,
    json: Arc<dyn Output>,
}

impl Outputs {
    pub fn new(device: &str) -> Self {
        Self {
            log: Arc::new(LogOutput),
            json: Arc::new(JsonOutput::stdout(device)),
        }
    }

    pub fn get(&self, kind: OutputKind) -> Arc<dyn Output> {
        match kind {
            OutputKind::Log => Arc::clone(&self.log),
            OutputKind::Json => Arc::clone(&self.json),
        }
    }
}

/// Command groups in configuration order
pub fn build_groups(
    config: &Config,
    port: &SharedPort,
    outputs: &Outputs,
) -> Result<Vec<CommandGroup>> {
    config
        .schedules
        .iter()
        .map(|schedule| {
            let trigger = schedule.trigger.build()?;
            let group = schedule
                .commands
                .iter()
                .fold(CommandGroup::new(&schedule.name, trigger), |group, cfg| {
                    let mut command = ScheduledCommand::new(&cfg.command, Arc::clone(port));
                    command.params = cfg.params.clone();
                    command.outputs =
                        cfg.outputs.iter().map(|kind| outputs.get(*kind)).collect();
                    group.with_command(command)
                });
            info!(
                "Schedule {}: {} command(s), {}",
                group.name,
                group.commands.len(),
                group.trigger
            );
            Ok(group)
        })
        .collect()
}

/// Correlators owned by the composition root
///
/// `relay` pairs MQTT responses with exchanges; `requests` pairs ad-hoc
/// reading sets with the callers of `SchedulerHandle::request`.
#[derive(Debug, Clone, Default)]
pub struct Correlators {
    pub relay: Correlator<Bytes>,
    pub requests: Correlator<ReadingSet>,
}

/// Assemble port and scheduler from configuration
pub fn build_service(config: &Config, once: bool, correlators: &Correlators) -> Result<Service> {
    let protocol = ProtocolDefinition::by_name(&config.device.protocol)?;
    let port = build_port(config, protocol, correlators.relay.clone())?;
    let outputs = Outputs::new(&config.device.name);
    let groups = build_groups(config, &port, &outputs)?;

    let cycle = if once {
        std::time::Duration::ZERO
    } else {
        config.cycle()
    };
    let scheduler = Scheduler::new(groups, cycle, config.pacing())
        .with_correlator(correlators.requests.clone());
    Ok(Service { port, scheduler })
}

/// Human-readable command listing of a protocol
pub fn list_commands(protocol: &ProtocolDefinition) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "{} commands:", protocol.id());
    for definition in protocol.commands().iter() {
        let kind = match definition.kind {
            CommandKind::Query => "query",
            CommandKind::Setter => "setter",
        };
        let _ = writeln!(
            text,
            "  {:<14} {:<6} {}",
            definition.name, kind, definition.description
        );
    }
    text
}
