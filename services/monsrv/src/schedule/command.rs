//! Runnable commands and command groups

use std::fmt;
use std::sync::Arc;

use solar_codec::ReadingSet;
use tracing::{debug, warn};

use super::trigger::Trigger;
use crate::output::Output;
use crate::port::SharedPort;

/// A command bound to a port and its outputs
#[derive(Clone)]
pub struct ScheduledCommand {
    /// Command name, optionally with an inline parameter (`POP01`)
    pub command: String,
    /// Parameter passed separately from the name
    pub params: Option<String>,
    pub port: SharedPort,
    pub outputs: Vec<Arc<dyn Output>>,
}

impl ScheduledCommand {
    pub fn new(command: impl Into<String>, port: SharedPort) -> Self {
        Self {
            command: command.into(),
            params: None,
            port,
            outputs: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = Some(params.into());
        self
    }

    pub fn with_output(mut self, output: Arc<dyn Output>) -> Self {
        self.outputs.push(output);
        self
    }

    /// Execute on the port, then emit to every output in order
    ///
    /// Output failures are logged; the reading set is returned regardless.
    pub async fn run(&self) -> ReadingSet {
        let readings = {
            let mut port = self.port.lock().await;
            port.process_command(&self.command, self.params.as_deref())
                .await
        };

        for output in &self.outputs {
            if let Err(e) = output.emit(&readings).await {
                warn!("{} output {} failed: {}", self.command, output.name(), e);
            }
        }
        readings
    }
}

impl fmt::Debug for ScheduledCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledCommand")
            .field("command", &self.command)
            .field("params", &self.params)
            .field(
                "outputs",
                &self.outputs.iter().map(|o| o.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// Commands sharing one trigger, run in declaration order when due
#[derive(Debug)]
pub struct CommandGroup {
    pub name: String,
    pub trigger: Trigger,
    pub commands: Vec<ScheduledCommand>,
}

impl CommandGroup {
    pub fn new(name: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            name: name.into(),
            trigger,
            commands: Vec::new(),
        }
    }

    pub fn with_command(mut self, command: ScheduledCommand) -> Self {
        self.commands.push(command);
        self
    }

    /// Evaluate the trigger and run the group if due; returns the reading sets produced
    pub async fn run_if_due(&mut self) -> Vec<ReadingSet> {
        if !self.trigger.is_due() {
            return Vec::new();
        }
        debug!("Group {} due ({})", self.name, self.trigger);

        let mut results = Vec::with_capacity(self.commands.len());
        for command in &self.commands {
            results.push(command.run().await);
        }
        results
    }
}
