//! RPC Method Handlers
//!
//! Validates requests against the current device/backup/task state and
//! delegates to the core services.

use crate::error::{throttled, to_rpc_error};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    BackupRequest, CancelTaskResponse, CreateBackupRequest, DeleteBackupResponse, DeviceRequest,
    ForgetDeviceResponse, RemoveScheduleResponse, SetScheduleRequest, TaskRequest,
};
use devkeep_core::application::{DeviceCache, DeviceService, ScheduleManager, ScheduleSummary, TaskOrchestrator};
use devkeep_core::domain::{BackupRecord, BackupStatus, DeviceSnapshot, Schedule, Task, TaskStatus};
use devkeep_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use tracing::info;

type RpcResult<T> = Result<T, ErrorObjectOwned>;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    orchestrator: TaskOrchestrator,
    devices: Arc<DeviceService>,
    cache: Arc<DeviceCache>,
    schedules: Arc<ScheduleManager>,
    rate_limiter: RateLimiter,
}

impl RpcHandler {
    pub fn new(
        orchestrator: TaskOrchestrator,
        devices: Arc<DeviceService>,
        cache: Arc<DeviceCache>,
        schedules: Arc<ScheduleManager>,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            orchestrator,
            devices,
            cache,
            schedules,
            rate_limiter,
        }
    }

    /// devices.list.v1
    pub async fn list_devices(&self) -> RpcResult<Vec<DeviceSnapshot>> {
        Ok(self.devices.list_devices().await)
    }

    /// devices.get.v1
    pub async fn get_device(&self, params: DeviceRequest) -> RpcResult<DeviceSnapshot> {
        self.known_device(&params.serial).await
    }

    /// devices.forget.v1
    pub async fn forget_device(&self, params: DeviceRequest) -> RpcResult<ForgetDeviceResponse> {
        self.throttle()?;
        self.known_device(&params.serial).await?;

        let forgotten = self
            .devices
            .forget_device(&params.serial)
            .await
            .map_err(to_rpc_error)?;
        Ok(ForgetDeviceResponse {
            serial: params.serial,
            forgotten,
        })
    }

    /// backups.list.v1
    pub async fn list_backups(&self, params: DeviceRequest) -> RpcResult<Vec<BackupRecord>> {
        self.known_device(&params.serial).await?;
        self.orchestrator
            .list_backups(&params.serial)
            .await
            .map_err(to_rpc_error)
    }

    /// backups.create.v1
    pub async fn create_backup(&self, params: CreateBackupRequest) -> RpcResult<Task> {
        self.throttle()?;
        self.available_device(&params.serial).await?;

        let task = match params.full {
            Some(full) => self.orchestrator.create_backup_task(&params.serial, full).await,
            None => self.orchestrator.create_backup(&params.serial).await,
        }
        .map_err(to_rpc_error)?;

        info!(serial = %params.serial, task_id = %task.id, "Backup requested over RPC");
        Ok(task)
    }

    /// backups.get.v1
    pub async fn get_backup(&self, params: BackupRequest) -> RpcResult<BackupRecord> {
        self.known_device(&params.serial).await?;
        self.known_backup(&params).await
    }

    /// backups.restore.v1
    pub async fn restore_backup(&self, params: BackupRequest) -> RpcResult<Task> {
        self.throttle()?;
        self.available_device(&params.serial).await?;

        let backup = self.known_backup(&params).await?;
        if backup.status == BackupStatus::Failed {
            return Err(to_rpc_error(AppError::Validation(format!(
                "backup {} failed and cannot be restored",
                backup.id
            ))));
        }

        let task = self
            .orchestrator
            .create_restore_task(&params.serial, &params.backup_id)
            .await
            .map_err(to_rpc_error)?;

        info!(serial = %params.serial, backup_id = %params.backup_id, task_id = %task.id, "Restore requested over RPC");
        Ok(task)
    }

    /// backups.delete.v1
    pub async fn delete_backup(&self, params: BackupRequest) -> RpcResult<DeleteBackupResponse> {
        self.throttle()?;
        self.known_device(&params.serial).await?;
        self.known_backup(&params).await?;

        if !self
            .orchestrator
            .delete_backup(&params.serial, &params.backup_id)
            .await
        {
            return Err(to_rpc_error(AppError::Internal(format!(
                "failed to delete backup {}",
                params.backup_id
            ))));
        }

        Ok(DeleteBackupResponse {
            serial: params.serial,
            backup_id: params.backup_id,
            deleted: true,
        })
    }

    /// schedules.get.v1 - null when the device has never had a schedule
    pub async fn get_schedule(&self, params: DeviceRequest) -> RpcResult<Option<Schedule>> {
        self.known_device(&params.serial).await?;
        self.schedules
            .get_schedule(&params.serial)
            .await
            .map_err(to_rpc_error)
    }

    /// schedules.set.v1
    pub async fn set_schedule(&self, params: SetScheduleRequest) -> RpcResult<Schedule> {
        self.throttle()?;
        self.known_device(&params.serial).await?;
        self.schedules
            .try_set_schedule(&params.serial, &params.cron_expression, params.max_backups)
            .await
            .map_err(to_rpc_error)
    }

    /// schedules.remove.v1
    pub async fn remove_schedule(&self, params: DeviceRequest) -> RpcResult<RemoveScheduleResponse> {
        self.throttle()?;
        validate_serial(&params.serial)?;

        if !self.schedules.remove_schedule(&params.serial).await {
            return Err(to_rpc_error(AppError::NotFound(format!(
                "no active schedule for device {}",
                params.serial
            ))));
        }
        Ok(RemoveScheduleResponse {
            serial: params.serial,
            removed: true,
        })
    }

    /// schedules.list.v1
    pub async fn list_schedules(&self) -> RpcResult<Vec<ScheduleSummary>> {
        self.schedules.get_all_schedules().await.map_err(to_rpc_error)
    }

    /// tasks.get.v1
    pub async fn get_task(&self, params: TaskRequest) -> RpcResult<Task> {
        self.orchestrator
            .get_task_status(&params.task_id)
            .await
            .ok_or_else(|| to_rpc_error(AppError::NotFound(format!("task {}", params.task_id))))
    }

    /// tasks.list.v1 - oldest first
    pub async fn list_tasks(&self) -> RpcResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self.orchestrator.get_all_tasks().await.into_values().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    /// tasks.cancel.v1
    pub async fn cancel_task(&self, params: TaskRequest) -> RpcResult<CancelTaskResponse> {
        self.throttle()?;

        let task = self.get_task(TaskRequest { task_id: params.task_id.clone() }).await?;
        if task.status != TaskStatus::InProgress {
            return Err(to_rpc_error(AppError::InvalidState(format!(
                "task {} is {}, only in-progress tasks can be cancelled",
                task.id, task.status
            ))));
        }

        // Lost a race with completion
        if !self.orchestrator.cancel_task(&params.task_id).await {
            return Err(to_rpc_error(AppError::InvalidState(format!(
                "task {} is no longer in progress",
                params.task_id
            ))));
        }

        Ok(CancelTaskResponse {
            task_id: params.task_id,
            cancelled: true,
        })
    }

    fn throttle(&self) -> RpcResult<()> {
        if self.rate_limiter.try_acquire() {
            Ok(())
        } else {
            Err(throttled())
        }
    }

    async fn known_device(&self, serial: &str) -> RpcResult<DeviceSnapshot> {
        validate_serial(serial)?;
        self.cache
            .get_device_info(serial)
            .await
            .ok_or_else(|| to_rpc_error(AppError::NotFound(format!("device {}", serial))))
    }

    async fn available_device(&self, serial: &str) -> RpcResult<DeviceSnapshot> {
        let device = self.known_device(serial).await?;
        if !device.available {
            return Err(to_rpc_error(AppError::DeviceUnavailable(format!(
                "device {} is not connected",
                serial
            ))));
        }
        Ok(device)
    }

    async fn known_backup(&self, params: &BackupRequest) -> RpcResult<BackupRecord> {
        validate_path_component("backup_id", &params.backup_id)?;
        self.orchestrator
            .get_backup(&params.serial, &params.backup_id)
            .await
            .map_err(to_rpc_error)?
            .ok_or_else(|| {
                to_rpc_error(AppError::NotFound(format!(
                    "backup {} of device {}",
                    params.backup_id, params.serial
                )))
            })
    }
}

fn validate_serial(serial: &str) -> RpcResult<()> {
    validate_path_component("serial", serial)
}

/// Serials and backup IDs name directories under the backup root
fn validate_path_component(field: &str, value: &str) -> RpcResult<()> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(to_rpc_error(AppError::Validation(format!(
            "invalid {}: {:?}",
            field, value
        ))))
    }
}
