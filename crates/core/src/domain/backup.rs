// Backup Record Domain Model (persisted, append-only except for restore stamps)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Format of timestamp-derived backup IDs
pub const BACKUP_ID_FORMAT: &str = "%Y-%m-%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Success,
    Failed,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub status: BackupStatus,

    /// Serialized only when true
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_full: bool,

    pub path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub task_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_restored_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_restore_task_id: Option<String>,
}

impl BackupRecord {
    /// Record for a backup the execution unit reported as successful
    pub fn succeeded(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        is_full: bool,
        path: impl Into<PathBuf>,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            status: BackupStatus::Success,
            is_full,
            path: path.into(),
            error: None,
            task_id: task_id.into(),
            last_restored_at: None,
            last_restore_task_id: None,
        }
    }

    /// Record for a backup the execution unit reported as failed
    pub fn failed(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        is_full: bool,
        path: impl Into<PathBuf>,
        task_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: BackupStatus::Failed,
            error: Some(error.into()),
            ..Self::succeeded(id, timestamp, is_full, path, task_id)
        }
    }

    /// A successful full backup unlocks incremental backups for its device
    pub fn is_successful_full(&self) -> bool {
        self.is_full && self.status == BackupStatus::Success
    }

    pub fn mark_restored(&mut self, task_id: impl Into<String>, at: DateTime<Utc>) {
        self.last_restored_at = Some(at);
        self.last_restore_task_id = Some(task_id.into());
    }
}

/// Backup ID derived from the creation time, unique among `existing`.
///
/// Two backups started within the same second get `_2`, `_3`, ... suffixes.
pub fn unique_backup_id<'a, I>(now: DateTime<Utc>, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let base = now.format(BACKUP_ID_FORMAT).to_string();
    let taken: Vec<&str> = existing.into_iter().collect();
    if !taken.contains(&base.as_str()) {
        return base;
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !taken.contains(&candidate.as_str()))
        .unwrap_or(base)
}
