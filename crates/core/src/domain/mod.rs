// Domain Layer - Pure business logic and entities

pub mod backup;
pub mod cron;
pub mod device;
pub mod error;
pub mod schedule;
pub mod task;

// Re-exports
pub use backup::{BackupRecord, BackupStatus};
pub use cron::CronExpression;
pub use device::{ConnectionType, DeviceRecord, DeviceSnapshot};
pub use error::DomainError;
pub use schedule::{Schedule, ScheduleStatus};
pub use task::{Task, TaskId, TaskKind, TaskStatus, CANCELLED_BY_USER};
