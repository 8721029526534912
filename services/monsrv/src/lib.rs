//! Solar device monitoring service
//!
//! Polls inverters and battery management systems over serial lines,
//! notification streams or an MQTT relay, decodes their responses with
//! `solar-codec` and hands the readings to outputs.
//!
//! # Architecture
//!
//! - **Ports**: `Port` trait with serial, stream, MQTT and test implementations
//! - **Record assembly**: reassembles chunked notifications, latest record wins
//! - **Scheduler**: trigger-gated command groups run on a paced cycle
//! - **Correlator**: pairs asynchronous results with the request waiting for them

pub mod bootstrap;
pub mod config;
pub mod correlator;
pub mod error;
pub mod output;
pub mod port;
pub mod schedule;

pub use config::Config;
pub use correlator::{Correlator, DeliveryOutcome, RequestHandle};
pub use error::{CorrelationError, MonsrvError, PortError, PortResult, Result};
pub use output::{ChannelOutput, CorrelatorOutput, JsonOutput, LogOutput, Output, OutputKind};
pub use port::{Port, PortState, SharedPort};
pub use schedule::{CommandGroup, ScheduledCommand, Scheduler, SchedulerHandle, Trigger};
