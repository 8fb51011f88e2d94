//! Schedule translator - turns cron schedules into run requests

use crate::core::error::ScheduleError;
use crate::schedule::cron::{truncate_to_minute, CronExpr};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A recurring trigger for one pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub name: String,

    /// Five-field cron expression
    pub cron: String,

    /// Registered pipeline to run
    pub pipeline: String,

    /// Fixed parameters for every run
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,

    /// Firing window, inclusive on both ends
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn new(name: impl Into<String>, cron: impl Into<String>, pipeline: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cron: cron.into(),
            pipeline: pipeline.into(),
            parameters: BTreeMap::new(),
            start_time: None,
            end_time: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_window(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    fn in_window(&self, t: DateTime<Utc>) -> bool {
        self.start_time.map_or(true, |start| t >= start) && self.end_time.map_or(true, |end| t <= end)
    }
}

/// Identifies a registered schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleHandle(u64);

/// A request to run a pipeline, from a schedule or a direct call
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub pipeline: String,
    pub parameters: BTreeMap<String, Value>,

    /// Originating schedule, if any
    pub schedule: Option<String>,

    /// Minute the schedule matched
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl RunRequest {
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            parameters: BTreeMap::new(),
            schedule: None,
            scheduled_for: None,
        }
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }
}

struct Registered {
    schedule: Schedule,
    cron: CronExpr,
    last_fired: Option<DateTime<Utc>>,
}

/// Holds registered schedules and decides which fire at a given instant
#[derive(Default)]
pub struct ScheduleTranslator {
    next_handle: u64,
    schedules: BTreeMap<u64, Registered>,
}

impl ScheduleTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schedule: Schedule) -> Result<ScheduleHandle, ScheduleError> {
        if schedule.cron.trim().is_empty() {
            return Err(ScheduleError::Empty(schedule.name));
        }
        let cron = CronExpr::parse(&schedule.cron)?;

        if self.schedules.values().any(|r| r.schedule.name == schedule.name) {
            return Err(ScheduleError::DuplicateName(schedule.name));
        }
        if let (Some(start), Some(end)) = (schedule.start_time, schedule.end_time) {
            if end < start {
                return Err(ScheduleError::InvalidWindow(schedule.name));
            }
        }

        self.next_handle += 1;
        let handle = self.next_handle;
        info!(
            "Registered schedule {} ({}) for {}",
            schedule.name, cron, schedule.pipeline
        );
        self.schedules.insert(
            handle,
            Registered {
                schedule,
                cron,
                last_fired: None,
            },
        );

        Ok(ScheduleHandle(handle))
    }

    /// Remove a schedule; returns it if it was registered
    pub fn unregister(&mut self, handle: ScheduleHandle) -> Option<Schedule> {
        self.schedules.remove(&handle.0).map(|r| r.schedule)
    }

    pub fn get(&self, handle: ScheduleHandle) -> Option<&Schedule> {
        self.schedules.get(&handle.0).map(|r| &r.schedule)
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    /// Run requests due at `now`, at most one per schedule.
    ///
    /// `now` is truncated to the minute. A schedule fires at most once per
    /// matched minute, and minutes that were never ticked are not caught up.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<RunRequest> {
        let minute = truncate_to_minute(now);
        let mut requests = Vec::new();

        for registered in self.schedules.values_mut() {
            if registered.last_fired.is_some_and(|last| last >= minute) {
                continue;
            }
            if !registered.schedule.in_window(minute) || !registered.cron.matches(minute) {
                continue;
            }

            debug!("Schedule {} fired at {}", registered.schedule.name, minute);
            registered.last_fired = Some(minute);
            requests.push(RunRequest {
                pipeline: registered.schedule.pipeline.clone(),
                parameters: registered.schedule.parameters.clone(),
                schedule: Some(registered.schedule.name.clone()),
                scheduled_for: Some(minute),
            });
        }

        requests
    }

    /// Next time the schedule would fire after `after`, respecting its window
    pub fn next_fire(&self, handle: ScheduleHandle, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let registered = self.schedules.get(&handle.0)?;
        let mut cursor = match registered.schedule.start_time {
            Some(start) if start > after => start - chrono::Duration::minutes(1),
            _ => after,
        };
        let next = loop {
            let next = registered.cron.next_after(cursor)?;
            if registered.schedule.start_time.map_or(true, |s| next >= s) {
                break next;
            }
            cursor = next;
        };
        registered
            .schedule
            .end_time
            .map_or(true, |end| next <= end)
            .then_some(next)
    }
}
