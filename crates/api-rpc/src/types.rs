//! RPC Request/Response Types
//!
//! Method parameters use snake_case; results reuse the domain's camelCase
//! serialization where a domain type is returned as-is.

use serde::{Deserialize, Serialize};

/// devices.get.v1, devices.forget.v1, backups.list.v1,
/// schedules.get.v1, schedules.remove.v1
#[derive(Debug, Deserialize)]
pub struct DeviceRequest {
    pub serial: String,
}

/// backups.create.v1 - omitted `full` picks full/incremental automatically
#[derive(Debug, Deserialize)]
pub struct CreateBackupRequest {
    pub serial: String,
    #[serde(default)]
    pub full: Option<bool>,
}

/// backups.get.v1, backups.restore.v1, backups.delete.v1
#[derive(Debug, Deserialize)]
pub struct BackupRequest {
    pub serial: String,
    pub backup_id: String,
}

/// schedules.set.v1
#[derive(Debug, Deserialize)]
pub struct SetScheduleRequest {
    pub serial: String,
    pub cron_expression: String,
    /// 0 keeps every backup
    #[serde(default)]
    pub max_backups: u32,
}

/// tasks.get.v1, tasks.cancel.v1
#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForgetDeviceResponse {
    pub serial: String,
    pub forgotten: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteBackupResponse {
    pub serial: String,
    pub backup_id: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveScheduleResponse {
    pub serial: String,
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelTaskResponse {
    pub task_id: String,
    pub cancelled: bool,
}
