//! Schedule triggers
//!
//! A trigger is evaluated once per scheduler cycle and answers whether its
//! command group is due. Evaluation mutates the trigger's own state.

use std::fmt;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{MonsrvError, Result};

/// Due/not-due policy of a command group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Due on every `count + 1`th evaluation, starting after `count` skips
    Loop { count: u32, current: u32 },
    /// Due on the first evaluation only
    Once { fired: bool },
    /// Due when `interval` has passed since the last firing; first evaluation is due
    Every {
        interval: Duration,
        last: Option<Instant>,
    },
    /// Due once per day, at the first evaluation at or after `time`
    At {
        time: NaiveTime,
        last_fired: Option<NaiveDate>,
    },
    Disabled,
}

impl Trigger {
    pub fn looping(count: u32) -> Self {
        Trigger::Loop { count, current: 0 }
    }

    pub fn once() -> Self {
        Trigger::Once { fired: false }
    }

    pub fn every(interval: Duration) -> Self {
        Trigger::Every {
            interval,
            last: None,
        }
    }

    /// Daily trigger; created after `time`, it first fires the next day
    pub fn at(time: NaiveTime, created: NaiveDateTime) -> Self {
        let last_fired = (created.time() >= time).then(|| created.date());
        Trigger::At { time, last_fired }
    }

    /// Evaluate against the current clocks
    pub fn is_due(&mut self) -> bool {
        self.is_due_at(Instant::now(), Local::now().naive_local())
    }

    /// Evaluate against explicit monotonic and wall-clock times
    pub fn is_due_at(&mut self, now: Instant, wall: NaiveDateTime) -> bool {
        match self {
            Trigger::Loop { count, current } => {
                if *current < *count {
                    *current += 1;
                    false
                } else {
                    *current = 0;
                    true
                }
            },
            Trigger::Once { fired } => !std::mem::replace(fired, true),
            Trigger::Every { interval, last } => match last {
                Some(previous) if now.duration_since(*previous) < *interval => false,
                _ => {
                    *last = Some(now);
                    true
                },
            },
            Trigger::At { time, last_fired } => {
                let today = wall.date();
                if wall.time() >= *time && *last_fired != Some(today) {
                    *last_fired = Some(today);
                    true
                } else {
                    false
                }
            },
            Trigger::Disabled => false,
        }
    }

    /// True once the trigger can never be due again
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Trigger::Once { fired: true } | Trigger::Disabled)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Loop { count, current } => {
                write!(f, "loops {} ({} to go)", count, count - current)
            },
            Trigger::Once { fired } => write!(f, "once{}", if *fired { " (fired)" } else { "" }),
            Trigger::Every { interval, .. } => write!(f, "every {}s", interval.as_secs()),
            Trigger::At { time, .. } => write!(f, "at {}", time.format("%H:%M")),
            Trigger::Disabled => write!(f, "disabled"),
        }
    }
}

/// Trigger as written in configuration
///
/// ```yaml
/// trigger: { loops: 5 }
/// trigger: { every: 30 }
/// trigger: { at: "06:30" }
/// trigger: once
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSpec {
    Loops(u32),
    Once,
    /// Interval in seconds
    Every(u64),
    /// Local time of day, `HH:MM` or `HH:MM:SS`
    At(String),
    Disabled,
}

impl Default for TriggerSpec {
    fn default() -> Self {
        TriggerSpec::Every(60)
    }
}

impl TriggerSpec {
    pub fn build(&self) -> Result<Trigger> {
        self.build_at(Local::now().naive_local())
    }

    pub fn build_at(&self, now: NaiveDateTime) -> Result<Trigger> {
        Ok(match self {
            TriggerSpec::Loops(count) => Trigger::looping(*count),
            TriggerSpec::Once => Trigger::once(),
            TriggerSpec::Every(secs) => Trigger::every(Duration::from_secs(*secs)),
            TriggerSpec::At(text) => Trigger::at(parse_time_of_day(text)?, now),
            TriggerSpec::Disabled => Trigger::Disabled,
        })
    }
}

fn parse_time_of_day(text: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .map_err(|e| MonsrvError::config(format!("Invalid time of day '{}': {}", text, e)))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn wall(date: (i32, u32, u32), hms: (u32, u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(hms.0, hms.1, hms.2)
            .unwrap()
    }

    #[test]
    fn test_loop_trigger_cycle() {
        let mut trigger = Trigger::looping(2);
        let due: Vec<bool> = (0..7).map(|_| trigger.is_due()).collect();
        assert_eq!(due, vec![false, false, true, false, false, true, false]);
    }

    #[test]
    fn test_loop_zero_is_always_due() {
        let mut trigger = Trigger::looping(0);
        assert!(trigger.is_due());
        assert!(trigger.is_due());
    }

    #[test]
    fn test_once_trigger() {
        let mut trigger = Trigger::once();
        assert!(!trigger.is_exhausted());
        assert!(trigger.is_due());
        for _ in 0..10 {
            assert!(!trigger.is_due());
        }
        assert!(trigger.is_exhausted());
    }

    #[test]
    fn test_every_trigger() {
        let start = Instant::now();
        let noon = wall((2026, 3, 18), (12, 0, 0));
        let mut trigger = Trigger::every(Duration::from_secs(30));

        assert!(trigger.is_due_at(start, noon));
        assert!(!trigger.is_due_at(start + Duration::from_secs(29), noon));
        assert!(trigger.is_due_at(start + Duration::from_secs(30), noon));
        assert!(!trigger.is_due_at(start + Duration::from_secs(45), noon));
    }

    #[test]
    fn test_at_trigger_fires_once_per_day() {
        let now = Instant::now();
        let time = NaiveTime::from_hms_opt(6, 30, 0).unwrap();
        let mut trigger = Trigger::at(time, wall((2026, 3, 18), (5, 0, 0)));

        assert!(!trigger.is_due_at(now, wall((2026, 3, 18), (6, 29, 59))));
        assert!(trigger.is_due_at(now, wall((2026, 3, 18), (6, 31, 0))));
        assert!(!trigger.is_due_at(now, wall((2026, 3, 18), (23, 0, 0))));
        assert!(!trigger.is_due_at(now, wall((2026, 3, 19), (6, 0, 0))));
        assert!(trigger.is_due_at(now, wall((2026, 3, 19), (6, 30, 0))));
    }

    #[test]
    fn test_at_trigger_created_late_waits_for_tomorrow() {
        let now = Instant::now();
        let spec = TriggerSpec::At("06:30".into());
        let mut trigger = spec.build_at(wall((2026, 3, 18), (18, 0, 0))).unwrap();

        assert!(!trigger.is_due_at(now, wall((2026, 3, 18), (18, 0, 1))));
        assert!(trigger.is_due_at(now, wall((2026, 3, 19), (6, 30, 0))));
    }

    #[test]
    fn test_disabled_never_due() {
        let mut trigger = TriggerSpec::Disabled.build().unwrap();
        assert!(!trigger.is_due());
        assert!(trigger.is_exhausted());
    }

    #[test]
    fn test_spec_parsing() {
        let spec: TriggerSpec = serde_json::from_str(r#"{"loops": 5}"#).unwrap();
        assert_eq!(spec, TriggerSpec::Loops(5));
        let spec: TriggerSpec = serde_json::from_str(r#""once""#).unwrap();
        assert_eq!(spec, TriggerSpec::Once);
        let spec: TriggerSpec = serde_json::from_str(r#"{"at": "21:15:30"}"#).unwrap();
        assert_eq!(
            spec.build().unwrap().to_string(),
            "at 21:15"
        );
        assert!(TriggerSpec::At("25:00".into()).build().is_err());
        assert_eq!(TriggerSpec::default(), TriggerSpec::Every(60));
    }

    #[test]
    fn test_display() {
        let mut trigger = Trigger::looping(3);
        trigger.is_due();
        assert_eq!(trigger.to_string(), "loops 3 (2 to go)");
        assert_eq!(Trigger::every(Duration::from_secs(90)).to_string(), "every 90s");
    }
}
