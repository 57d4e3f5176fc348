// Recurring schedules: triggers, the engine that fires them, and the
// per-device schedule manager

pub mod engine;
pub mod manager;
pub mod trigger;

pub use engine::{JobFn, JobOptions, TriggerEngine};
pub use manager::{ScheduleConfig, ScheduleManager, ScheduleSummary};
pub use trigger::{CronTimezone, CronTrigger, IntervalTrigger, Trigger};
