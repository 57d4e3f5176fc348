// devkeep Infrastructure - System Adapters
// Implements: TransferExecutor, DeviceTransport, BackupStorage

pub mod backup_storage;
pub mod device_transport;
pub mod subprocess_executor;

pub use backup_storage::FsBackupStorage;
pub use device_transport::CommandDeviceTransport;
pub use subprocess_executor::{SubprocessTransferExecutor, TransferCommand, DEFAULT_ENV_ALLOWLIST};
