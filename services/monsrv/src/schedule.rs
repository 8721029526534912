//! Command scheduling: triggers, command groups and the scheduler loop

pub mod command;
pub mod scheduler;
pub mod trigger;

pub use command::{CommandGroup, ScheduledCommand};
pub use scheduler::{CycleReport, Scheduler, SchedulerHandle, SchedulerSummary};
pub use trigger::{Trigger, TriggerSpec};
