//! Cron schedules that trigger pipeline runs

pub mod cron;
pub mod runner;
pub mod translator;

pub use cron::CronExpr;
pub use runner::ScheduleRunner;
pub use translator::{RunRequest, Schedule, ScheduleHandle, ScheduleTranslator};
