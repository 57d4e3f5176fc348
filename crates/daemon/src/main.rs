//! devkeep daemon - Main Entry Point
//! Device backups, restores and cron schedules behind a JSON-RPC server

mod config;
mod logging;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use devkeep_api_rpc::{RateLimiter, RpcHandler, RpcServer, RpcServerConfig};
use devkeep_core::application::{
    DeviceCache, DeviceCacheConfig, DeviceRecords, DeviceService, OrchestratorConfig,
    ScheduleConfig, ScheduleManager, TaskOrchestrator,
};
use devkeep_core::port::id_provider::UuidProvider;
use devkeep_core::port::time_provider::SystemTimeProvider;
use devkeep_core::port::TimeProvider;
use devkeep_infra_sqlite::{create_pool, run_migrations, SqliteDeviceStore};
use devkeep_infra_system::{
    CommandDeviceTransport, FsBackupStorage, SubprocessTransferExecutor, TransferCommand,
    DEFAULT_ENV_ALLOWLIST,
};

use crate::config::DaemonConfig;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let config = DaemonConfig::from_env()?;
    let _log_guard = logging::init(config.log_format, config.log_dir.as_deref())?;

    info!(version = devkeep_core::VERSION, "devkeep daemon starting");

    // 2. Database
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::create_dir_all(&config.backup_dir)
        .with_context(|| format!("failed to create {}", config.backup_dir.display()))?;

    info!(db_path = %config.db_path.display(), "Initializing database...");
    let pool = create_pool(&config.database_url())
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    // 3. DI wiring
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let records = DeviceRecords::new(Arc::new(SqliteDeviceStore::new(
        pool.clone(),
        time_provider.clone(),
    )));

    let executor = Arc::new(SubprocessTransferExecutor::new(
        TransferCommand::idevicebackup2(config.transfer_tool.clone()),
        DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
    ));
    let transport = Arc::new(
        CommandDeviceTransport::new(config.device_id_tool.clone(), config.device_info_tool.clone())
            .with_tool_timeout(config.device_tool_timeout),
    );
    let storage = Arc::new(FsBackupStorage::new(config.backup_dir.clone()));

    let orchestrator = TaskOrchestrator::new(
        records.clone(),
        executor,
        storage.clone(),
        time_provider.clone(),
        Arc::new(UuidProvider),
        OrchestratorConfig {
            serialize_device_tasks: config.serialize_device_tasks,
            ..OrchestratorConfig::default()
        },
    );
    let cache = Arc::new(DeviceCache::new(
        transport,
        records.clone(),
        time_provider.clone(),
        DeviceCacheConfig {
            refresh_interval: config.device_refresh_interval,
            enumeration_timeout: config.enumeration_timeout,
        },
    ));
    let schedules = Arc::new(ScheduleManager::new(
        orchestrator.clone(),
        cache.clone(),
        records.clone(),
        time_provider,
        ScheduleConfig {
            misfire_grace: config.misfire_grace,
            timezone: config.cron_timezone,
        },
    ));
    let devices = Arc::new(DeviceService::new(
        cache.clone(),
        schedules.clone(),
        records,
        storage,
    ));

    // 4. Reinstall persisted schedules
    match schedules.load_schedules().await {
        Ok(count) => info!(schedules = count, "Schedules loaded"),
        Err(e) => error!(error = %e, "Failed to load schedules"),
    }

    // 5. JSON-RPC server
    let handler = RpcHandler::new(
        orchestrator,
        devices,
        cache.clone(),
        schedules.clone(),
        RateLimiter::new(config.rate_limit_burst, config.rate_limit_rate),
    );
    let rpc_server = RpcServer::new(
        RpcServerConfig {
            host: config.rpc_host.clone(),
            port: config.rpc_port,
        },
        handler,
    );
    let (addr, rpc_handle) = rpc_server.start().await.context("RPC server start failed")?;

    info!(addr = %addr, backup_dir = %config.backup_dir.display(), "System ready");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 7. Graceful shutdown: triggers first so nothing new starts
    schedules.shutdown().await;
    if let Err(e) = rpc_handle.stop() {
        error!(error = %e, "RPC server already stopped");
    }
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, rpc_handle.stopped())
        .await
        .is_err()
    {
        error!("RPC server did not stop within {:?}", SHUTDOWN_TIMEOUT);
    }
    cache.shutdown().await;
    pool.close().await;

    info!("Shutdown complete.");
    Ok(())
}
