//! JSON-RPC Server
//!
//! Serves JSON-RPC 2.0 over HTTP/WebSocket on a localhost TCP port.

use crate::handler::RpcHandler;
use crate::types::{
    BackupRequest, CreateBackupRequest, DeviceRequest, SetScheduleRequest, TaskRequest,
};
use devkeep_core::error::{AppError, Result};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9540;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// Register a method whose params deserialize into `$params`
macro_rules! register_method {
    ($module:expr, $handler:expr, $name:literal, $method:ident, $params:ty) => {{
        let handler = Arc::clone(&$handler);
        $module
            .register_async_method($name, move |params, _, _| {
                let handler = Arc::clone(&handler);
                async move {
                    let req: $params = params.parse()?;
                    handler.$method(req).await
                }
            })
            .map_err(|e| AppError::Internal(e.to_string()))?;
    }};
    ($module:expr, $handler:expr, $name:literal, $method:ident) => {{
        let handler = Arc::clone(&$handler);
        $module
            .register_async_method($name, move |_, _, _| {
                let handler = Arc::clone(&handler);
                async move { handler.$method().await }
            })
            .map_err(|e| AppError::Internal(e.to_string()))?;
    }};
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, handler: RpcHandler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    /// Bind and start serving; port 0 picks a free port.
    ///
    /// Returns the bound address and the handle used to stop the server.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| AppError::Config(format!("Failed to bind RPC server on {}: {}", addr, e)))?;
        let local_addr = server.local_addr()?;

        let module = self.module()?;
        let method_count = module.method_names().count();
        let handle = server.start(module);

        info!(addr = %local_addr, methods = method_count, "JSON-RPC server started");
        Ok((local_addr, handle))
    }

    fn module(&self) -> Result<RpcModule<()>> {
        let mut module = RpcModule::new(());

        register_method!(module, self.handler, "devices.list.v1", list_devices);
        register_method!(module, self.handler, "devices.get.v1", get_device, DeviceRequest);
        register_method!(module, self.handler, "devices.forget.v1", forget_device, DeviceRequest);

        register_method!(module, self.handler, "backups.list.v1", list_backups, DeviceRequest);
        register_method!(module, self.handler, "backups.create.v1", create_backup, CreateBackupRequest);
        register_method!(module, self.handler, "backups.get.v1", get_backup, BackupRequest);
        register_method!(module, self.handler, "backups.restore.v1", restore_backup, BackupRequest);
        register_method!(module, self.handler, "backups.delete.v1", delete_backup, BackupRequest);

        register_method!(module, self.handler, "schedules.get.v1", get_schedule, DeviceRequest);
        register_method!(module, self.handler, "schedules.set.v1", set_schedule, SetScheduleRequest);
        register_method!(module, self.handler, "schedules.remove.v1", remove_schedule, DeviceRequest);
        register_method!(module, self.handler, "schedules.list.v1", list_schedules);

        register_method!(module, self.handler, "tasks.get.v1", get_task, TaskRequest);
        register_method!(module, self.handler, "tasks.list.v1", list_tasks);
        register_method!(module, self.handler, "tasks.cancel.v1", cancel_task, TaskRequest);

        Ok(module)
    }
}
