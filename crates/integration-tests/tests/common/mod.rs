//! Shared wiring for the integration tests: SQLite-backed services with
//! mock device transport and transfer executor.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use devkeep_core::application::{
    CronTimezone, DeviceCache, DeviceCacheConfig, DeviceRecords, DeviceService,
    OrchestratorConfig, ScheduleConfig, ScheduleManager, TaskOrchestrator,
};
use devkeep_core::domain::{Task, TaskStatus};
use devkeep_core::port::device_protocol::mocks::MockDeviceTransport;
use devkeep_core::port::id_provider::mocks::SequentialIdProvider;
use devkeep_core::port::time_provider::SystemTimeProvider;
use devkeep_core::port::transfer_executor::mocks::ScriptedTransferExecutor;
use devkeep_core::port::{BackupStorage, TimeProvider, TransferExecutor};
use devkeep_infra_sqlite::{create_pool, run_migrations, SqliteDeviceStore};
use devkeep_infra_system::FsBackupStorage;
use tempfile::TempDir;

pub struct Stack {
    pub orchestrator: TaskOrchestrator,
    pub cache: Arc<DeviceCache>,
    pub schedules: Arc<ScheduleManager>,
    pub devices: Arc<DeviceService>,
    pub records: DeviceRecords,
    pub transport: MockDeviceTransport,
    pub backup_root: TempDir,
}

pub async fn sqlite_records(time_provider: Arc<dyn TimeProvider>) -> DeviceRecords {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    DeviceRecords::new(Arc::new(SqliteDeviceStore::new(pool, time_provider)))
}

/// Services over an in-memory SQLite database and a temporary backup root
pub async fn stack(executor: Arc<dyn TransferExecutor>) -> Stack {
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let records = sqlite_records(time_provider.clone()).await;
    stack_with(executor, records, time_provider)
}

pub fn stack_with(
    executor: Arc<dyn TransferExecutor>,
    records: DeviceRecords,
    time_provider: Arc<dyn TimeProvider>,
) -> Stack {
    let backup_root = TempDir::new().unwrap();
    let storage: Arc<dyn BackupStorage> = Arc::new(FsBackupStorage::new(backup_root.path()));
    let transport = MockDeviceTransport::new();

    let orchestrator = TaskOrchestrator::new(
        records.clone(),
        executor,
        storage.clone(),
        time_provider.clone(),
        Arc::new(SequentialIdProvider::new()),
        OrchestratorConfig {
            poll_interval: Duration::from_millis(10),
            ..OrchestratorConfig::default()
        },
    );
    let cache = Arc::new(DeviceCache::new(
        Arc::new(transport.clone()),
        records.clone(),
        time_provider.clone(),
        DeviceCacheConfig::default(),
    ));
    let schedules = Arc::new(ScheduleManager::new(
        orchestrator.clone(),
        cache.clone(),
        records.clone(),
        time_provider,
        ScheduleConfig {
            timezone: CronTimezone::Utc,
            ..ScheduleConfig::default()
        },
    ));
    let devices = Arc::new(DeviceService::new(
        cache.clone(),
        schedules.clone(),
        records.clone(),
        storage,
    ));

    Stack {
        orchestrator,
        cache,
        schedules,
        devices,
        records,
        transport,
        backup_root,
    }
}

pub fn scripted() -> Arc<ScriptedTransferExecutor> {
    Arc::new(ScriptedTransferExecutor::new())
}

/// Poll until the task reaches a terminal status
pub async fn wait_until_finished(orchestrator: &TaskOrchestrator, task_id: &str) -> Task {
    for _ in 0..500 {
        if let Some(task) = orchestrator.get_task_status(task_id).await {
            if task.status.is_terminal() {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never finished", task_id);
}

pub async fn wait_for_status(orchestrator: &TaskOrchestrator, task_id: &str, status: TaskStatus) -> Task {
    for _ in 0..500 {
        if let Some(task) = orchestrator.get_task_status(task_id).await {
            if task.status == status {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached {:?}", task_id, status);
}
