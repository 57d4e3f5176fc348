// devkeep Infrastructure - SQLite Adapter
// Implements: DeviceStore

mod connection;
mod device_store;
mod error;
mod migration;

pub use connection::create_pool;
pub use device_store::SqliteDeviceStore;
pub use migration::run_migrations;
