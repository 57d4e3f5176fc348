// Port Layer - Interfaces for external dependencies

pub mod backup_storage;
pub mod device_protocol;
pub mod device_store;
pub mod id_provider; // For deterministic testing
pub mod time_provider;
pub mod transfer_executor;

// Re-exports
pub use backup_storage::BackupStorage;
pub use device_protocol::{DeviceConnection, DeviceInfo, DeviceTransport, ProtocolError, RawDevice};
pub use device_store::DeviceStore;
pub use id_provider::IdProvider;
pub use time_provider::TimeProvider;
pub use transfer_executor::{
    ExecutionError, TransferExecutor, TransferHandle, TransferOutcome, TransferRequest,
};
