// Application constants (No magic values)
use std::time::Duration;

/// Cadence of the task monitoring loop (100ms)
pub const MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Log a heartbeat when a running task reports no progress for this long (10s)
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Capacity of the progress channel between execution unit and monitor
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Default Device Cache refresh interval (30s)
pub const DEFAULT_DEVICE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound of one device enumeration pass, metadata reads included (30s)
pub const DEFAULT_ENUMERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound of a single device tool invocation (10s)
pub const DEFAULT_DEVICE_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default misfire grace window for scheduled fires (1 hour)
pub const DEFAULT_MISFIRE_GRACE: Duration = Duration::from_secs(60 * 60);

/// Upper bound of a single trigger-engine sleep (60s)
/// Waits are re-evaluated against the wall clock after each slice.
pub const MAX_TRIGGER_SLEEP_SLICE: Duration = Duration::from_secs(60);

/// Display name used when a device has no known name
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// Error recorded when an execution unit exits without a result
pub const UNIT_EXITED_WITHOUT_RESULT: &str = "execution unit exited without reporting a result";
