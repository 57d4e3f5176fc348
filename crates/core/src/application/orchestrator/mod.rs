//! Task Orchestrator - creates, dispatches, monitors and finalizes
//! backup/restore tasks.
//!
//! Each task runs in an isolated execution unit obtained from the
//! `TransferExecutor` port. A monitoring loop (see `monitor`) drains the
//! unit's progress channel on a fixed cadence and records the terminal
//! result in the task registry and the device record.

mod monitor;
mod registry;

pub use registry::TaskRegistry;

use crate::application::constants::{HEARTBEAT_INTERVAL, MONITOR_POLL_INTERVAL};
use crate::application::keyed_locks::KeyedLocks;
use crate::application::records::DeviceRecords;
use crate::domain::{BackupRecord, Task, TaskId, TaskKind};
use crate::error::{AppError, Result};
use crate::port::{BackupStorage, IdProvider, TimeProvider, TransferExecutor, TransferRequest};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Monitoring loop cadence
    pub poll_interval: Duration,
    /// Silence after which a running task logs a heartbeat
    pub heartbeat_interval: Duration,
    /// Run at most one task per device at a time
    pub serialize_device_tasks: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: MONITOR_POLL_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            serialize_device_tasks: true,
        }
    }
}

#[derive(Clone)]
pub struct TaskOrchestrator {
    records: DeviceRecords,
    executor: Arc<dyn TransferExecutor>,
    storage: Arc<dyn BackupStorage>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    registry: TaskRegistry,
    device_locks: KeyedLocks,
    config: OrchestratorConfig,
}

impl TaskOrchestrator {
    pub fn new(
        records: DeviceRecords,
        executor: Arc<dyn TransferExecutor>,
        storage: Arc<dyn BackupStorage>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            records,
            executor,
            storage,
            time_provider,
            id_provider,
            registry: TaskRegistry::new(),
            device_locks: KeyedLocks::new(),
            config,
        }
    }

    /// Create and dispatch a backup task
    ///
    /// # Arguments
    /// * `serial` - Device serial
    /// * `full` - Full backup; an incremental one requires a prior successful full backup
    ///
    /// # Errors
    /// - AppError::Validation if `full` is false and no successful full backup exists
    /// - AppError::Persistence if the device record cannot be read
    pub async fn create_backup_task(&self, serial: &str, full: bool) -> Result<Task> {
        let record = self.records.read(serial).await?;
        if !full && !record.has_full_backup() {
            return Err(AppError::Validation(format!(
                "device {} has no successful full backup; an incremental backup requires one",
                serial
            )));
        }

        let now = self.time_provider.now();
        let task_id = self.id_provider.generate_id();
        let persisted: Vec<String> = record.backups.iter().map(|b| b.id.clone()).collect();
        let task = self
            .registry
            .insert_backup(serial, &persisted, now, |backup_id| {
                Task::new_backup(task_id, serial, backup_id, full, now)
            })
            .await;

        info!(
            task_id = %task.id,
            serial = %serial,
            backup_id = %task.backup_id,
            full = full,
            "Backup task created"
        );

        let destination = self.storage.backup_path(serial, &task.backup_id);
        self.dispatch(
            task.id.clone(),
            TransferRequest {
                kind: TaskKind::Backup,
                serial: serial.to_string(),
                destination,
                full,
            },
        );
        Ok(task)
    }

    /// Create and dispatch a restore task
    ///
    /// The backup's existence is checked by the caller; an unknown ID restores
    /// from the default storage location.
    pub async fn create_restore_task(&self, serial: &str, backup_id: &str) -> Result<Task> {
        let record = self.records.read(serial).await?;
        let source = record
            .find_backup(backup_id)
            .map(|b| b.path.clone())
            .unwrap_or_else(|| self.storage.backup_path(serial, backup_id));

        let task = Task::new_restore(
            self.id_provider.generate_id(),
            serial,
            backup_id,
            self.time_provider.now(),
        );
        self.registry.insert(task.clone()).await;

        info!(
            task_id = %task.id,
            serial = %serial,
            backup_id = %backup_id,
            "Restore task created"
        );

        self.dispatch(
            task.id.clone(),
            TransferRequest {
                kind: TaskKind::Restore,
                serial: serial.to_string(),
                destination: source,
                full: false,
            },
        );
        Ok(task)
    }

    /// Backup with the kind chosen automatically: full when no successful
    /// full backup exists yet, incremental otherwise.
    pub async fn create_backup(&self, serial: &str) -> Result<Task> {
        let full = !self.has_full_backup(serial).await?;
        self.create_backup_task(serial, full).await
    }

    /// Cancel an in-progress task (advisory; the execution unit keeps running)
    ///
    /// Returns false if the task does not exist, is not in progress, or has
    /// already reported its result and is being finalized.
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        let now = self.time_provider.now();
        let cancelled = self.registry.cancel(task_id, now).await;

        if cancelled {
            info!(task_id = %task_id, "Task cancelled by user");
        } else {
            warn!(task_id = %task_id, "Cancel rejected: task missing, not in progress or finalizing");
        }
        cancelled
    }

    pub async fn get_task_status(&self, task_id: &str) -> Option<Task> {
        self.registry.get(task_id).await
    }

    pub async fn get_all_tasks(&self) -> HashMap<TaskId, Task> {
        self.registry.all().await
    }

    pub async fn has_full_backup(&self, serial: &str) -> Result<bool> {
        Ok(self.records.read(serial).await?.has_full_backup())
    }

    /// Backup records in persisted order
    pub async fn list_backups(&self, serial: &str) -> Result<Vec<BackupRecord>> {
        Ok(self.records.read(serial).await?.backups)
    }

    pub async fn get_backup(&self, serial: &str, backup_id: &str) -> Result<Option<BackupRecord>> {
        Ok(self.records.read(serial).await?.find_backup(backup_id).cloned())
    }

    /// Remove a backup's artifact and its record.
    ///
    /// Returns false (logged) when the backup is unknown or removal fails.
    pub async fn delete_backup(&self, serial: &str, backup_id: &str) -> bool {
        let backup = match self.get_backup(serial, backup_id).await {
            Ok(Some(backup)) => backup,
            Ok(None) => {
                warn!(serial = %serial, backup_id = %backup_id, "Backup not found");
                return false;
            }
            Err(e) => {
                error!(serial = %serial, backup_id = %backup_id, error = %e, "Failed to read device record");
                return false;
            }
        };

        if let Err(e) = self.storage.remove(&backup.path).await {
            error!(
                serial = %serial,
                backup_id = %backup_id,
                path = %backup.path.display(),
                error = %e,
                "Failed to remove backup artifact"
            );
            return false;
        }

        let removed = self
            .records
            .update(serial, |record| {
                record
                    .remove_backup(backup_id)
                    .map(|_| ())
                    .ok_or_else(|| AppError::NotFound(format!("backup {}", backup_id)))
            })
            .await;

        match removed {
            Ok(()) => {
                info!(serial = %serial, backup_id = %backup_id, "Backup deleted");
                true
            }
            Err(e) => {
                error!(serial = %serial, backup_id = %backup_id, error = %e, "Failed to delete backup record");
                false
            }
        }
    }

    /// Spawn the monitoring loop for a registered task
    fn dispatch(&self, task_id: TaskId, request: TransferRequest) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.run_task(task_id, request).await;
        });
    }
}
