// Application Layer - Use Cases and Business Logic

pub mod constants;
pub mod device_cache;
pub mod devices;
pub mod keyed_locks;
pub mod orchestrator;
pub mod records;
pub mod schedule;
pub mod shutdown;

// Re-exports
pub use device_cache::{DeviceCache, DeviceCacheConfig};
pub use devices::DeviceService;
pub use orchestrator::{OrchestratorConfig, TaskOrchestrator};
pub use records::DeviceRecords;
pub use schedule::{CronTimezone, ScheduleConfig, ScheduleManager, ScheduleSummary};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
