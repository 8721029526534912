//! Scheduler loop
//!
//! One cycle evaluates every group's trigger and runs the due groups in
//! declaration order. Cycles are paced against a deadline that advances by
//! the configured cycle duration, so an overrunning cycle shortens the next
//! wait and an early one lengthens it; the average period stays at the
//! configured duration. A fixed pacing delay always separates two cycles.
//!
//! Ad-hoc commands submitted through the handle run as soon as the loop is
//! between commands: immediately while it is waiting, otherwise at the start
//! of the next cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use solar_codec::ReadingSet;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::{CommandGroup, ScheduledCommand};
use crate::correlator::Correlator;
use crate::error::{MonsrvError, Result};
use crate::output::CorrelatorOutput;

/// Default pause between two cycles
pub const DEFAULT_PACING: Duration = Duration::from_millis(500);

/// Bound on waiting for the loop to finish its current command at stop
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

const REQUEST_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Commands executed
    pub executed: usize,
    /// Commands that produced an error reading
    pub failed: usize,
}

/// Totals over the lifetime of a scheduler loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub cycles: u64,
    pub commands: u64,
    pub adhoc: u64,
}

/// Drives command groups
#[derive(Debug)]
pub struct Scheduler {
    groups: Vec<CommandGroup>,
    cycle: Duration,
    pacing: Duration,
    correlator: Correlator<ReadingSet>,
}

impl Scheduler {
    /// A zero `cycle` makes the loop run a single pass and return
    pub fn new(groups: Vec<CommandGroup>, cycle: Duration, pacing: Duration) -> Self {
        Self {
            groups,
            cycle,
            pacing,
            correlator: Correlator::new(),
        }
    }

    /// Use an externally owned correlator for ad-hoc requests
    pub fn with_correlator(mut self, correlator: Correlator<ReadingSet>) -> Self {
        self.correlator = correlator;
        self
    }

    pub fn groups(&self) -> &[CommandGroup] {
        &self.groups
    }

    /// Groups whose trigger can still become due
    pub fn active_groups(&self) -> usize {
        self.groups
            .iter()
            .filter(|group| !group.trigger.is_exhausted())
            .count()
    }

    /// Evaluate every group once and run the due ones
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        for group in &mut self.groups {
            if group.trigger.is_exhausted() {
                continue;
            }
            for readings in group.run_if_due().await {
                report.executed += 1;
                if readings.is_error() {
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Spawn the loop
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (adhoc_tx, adhoc_rx) = mpsc::unbounded_channel();
        let correlator = self.correlator.clone();

        let task = tokio::spawn(self.run(shutdown_rx, adhoc_rx));

        SchedulerHandle {
            shutdown_tx,
            adhoc_tx,
            correlator,
            cancel: CancellationToken::new(),
            task: Some(task),
            next_request: AtomicU64::new(1),
        }
    }

    async fn run(
        mut self,
        mut shutdown_rx: watch::Receiver<bool>,
        mut adhoc_rx: mpsc::UnboundedReceiver<ScheduledCommand>,
    ) -> SchedulerSummary {
        info!(
            "Scheduler started: {} group(s), {} active, cycle {:?}, pacing {:?}",
            self.groups.len(),
            self.active_groups(),
            self.cycle,
            self.pacing
        );

        let mut summary = SchedulerSummary::default();
        let mut next_due = Instant::now();
        let mut idle_reported = false;

        'cycles: loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let cycle_start = Instant::now();
            while let Ok(command) = adhoc_rx.try_recv() {
                command.run().await;
                summary.adhoc += 1;
            }

            let report = self.run_cycle().await;
            summary.cycles += 1;
            summary.commands += report.executed as u64;
            debug!(
                "Cycle {} ran {} command(s), {} failed, in {:?}",
                summary.cycles,
                report.executed,
                report.failed,
                cycle_start.elapsed()
            );

            if self.cycle.is_zero() {
                info!("Single pass complete");
                break;
            }
            if !idle_reported && self.active_groups() == 0 {
                info!("No group can become due again, serving ad-hoc commands only");
                idle_reported = true;
            }

            next_due += self.cycle;
            let now = Instant::now();
            if now > next_due + self.cycle {
                warn!(
                    "Scheduler is {:?} behind, dropping the backlog",
                    now - next_due
                );
                next_due = now;
            }
            let wake_at = next_due.max(now + self.pacing);

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break 'cycles;
                        }
                    },
                    Some(command) = adhoc_rx.recv() => {
                        command.run().await;
                        summary.adhoc += 1;
                    },
                    _ = tokio::time::sleep_until(wake_at) => break,
                }
            }
        }

        info!(
            "Scheduler stopped after {} cycle(s), {} command(s)",
            summary.cycles, summary.commands
        );
        summary
    }
}

/// Control surface of a running scheduler
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    adhoc_tx: mpsc::UnboundedSender<ScheduledCommand>,
    correlator: Correlator<ReadingSet>,
    cancel: CancellationToken,
    task: Option<JoinHandle<SchedulerSummary>>,
    next_request: AtomicU64,
}

impl SchedulerHandle {
    /// Queue a one-shot command
    pub fn submit(&self, command: ScheduledCommand) -> Result<()> {
        self.adhoc_tx.send(command).map_err(|e| {
            MonsrvError::SchedulerError(format!("Scheduler not running, {} dropped", e.0.command))
        })
    }

    /// Run a one-shot command and wait for its reading set
    pub async fn request(
        &self,
        mut command: ScheduledCommand,
        timeout: Duration,
    ) -> Result<ReadingSet> {
        let key = format!(
            "{}#{}",
            command.command,
            self.next_request.fetch_add(1, Ordering::Relaxed)
        );
        let handle = self.correlator.register(key.clone());
        command.outputs.push(Arc::new(CorrelatorOutput::with_key(
            self.correlator.clone(),
            key,
        )));
        self.submit(command)?;

        let readings = self
            .correlator
            .await_result(&handle, REQUEST_POLL_INTERVAL, timeout, &self.cancel)
            .await?;
        Ok(readings)
    }

    pub fn correlator(&self) -> &Correlator<ReadingSet> {
        &self.correlator
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Signal the loop and wait for it, bounded by `SHUTDOWN_TIMEOUT`
    pub async fn stop(&mut self) -> Option<SchedulerSummary> {
        let _ = self.shutdown_tx.send(true);
        self.cancel.cancel();

        let mut task = self.task.take()?;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
            Ok(Ok(summary)) => Some(summary),
            Ok(Err(e)) => {
                warn!("Scheduler task error: {}", e);
                None
            },
            Err(_) => {
                warn!("Scheduler stop timeout, force stop");
                task.abort();
                None
            },
        }
    }

    /// Wait for the loop to end on its own (single pass)
    pub async fn join(mut self) -> Result<SchedulerSummary> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| MonsrvError::SchedulerError(format!("Scheduler task failed: {}", e))),
            None => Err(MonsrvError::SchedulerError(
                "Scheduler already stopped".to_string(),
            )),
        }
    }
}
