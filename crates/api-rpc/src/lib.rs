//! JSON-RPC API Layer
//!
//! Request-handling surface of the devkeep daemon: devices, backups,
//! schedules and tasks over JSON-RPC 2.0.

pub mod error;
pub mod handler;
pub mod rate_limiter;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use rate_limiter::RateLimiter;
pub use server::{RpcServer, RpcServerConfig};
