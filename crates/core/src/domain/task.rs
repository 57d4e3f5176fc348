// Task Domain Model
//
// A task is the in-memory record of one backup or restore operation.
// State machine: Pending -> InProgress -> {Completed, Failed}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Task ID (UUID v4)
pub type TaskId = String;

/// Error recorded on a task that was cancelled while in progress
pub const CANCELLED_BY_USER: &str = "Task cancelled by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Backup,
    Restore,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Backup => write!(f, "backup"),
            TaskKind::Restore => write!(f, "restore"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and Failed never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Task Entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub device_serial: String,
    pub backup_id: String,

    /// Only present for backups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_full: Option<bool>,

    pub status: TaskStatus,
    pub progress: u8,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Task {
    /// Create a pending backup task
    ///
    /// # Arguments
    ///
    /// * `id` - Unique task ID (injected, not generated)
    /// * `serial` - Device serial
    /// * `backup_id` - Timestamp-derived backup ID
    /// * `full` - Full or incremental backup
    /// * `now` - Creation time (injected, not system time)
    pub fn new_backup(
        id: impl Into<String>,
        serial: impl Into<String>,
        backup_id: impl Into<String>,
        full: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(id, TaskKind::Backup, serial, backup_id, Some(full), now)
    }

    /// Create a pending restore task
    pub fn new_restore(
        id: impl Into<String>,
        serial: impl Into<String>,
        backup_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(id, TaskKind::Restore, serial, backup_id, None, now)
    }

    fn new(
        id: impl Into<String>,
        kind: TaskKind,
        serial: impl Into<String>,
        backup_id: impl Into<String>,
        is_full: Option<bool>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            device_serial: serial.into(),
            backup_id: backup_id.into(),
            is_full,
            status: TaskStatus::Pending,
            progress: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
        }
    }

    pub fn is_full_backup(&self) -> bool {
        self.is_full.unwrap_or(false)
    }

    /// Transition Pending -> InProgress
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Pending, TaskStatus::InProgress)?;
        self.updated_at = now;
        Ok(())
    }

    /// Record a progress report from the execution unit.
    ///
    /// Returns false when the report was ignored: the task is not in
    /// progress, or the value would move progress backwards.
    pub fn record_progress(&mut self, progress: u8, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::InProgress {
            return false;
        }
        let progress = progress.min(100);
        if progress < self.progress {
            return false;
        }
        self.progress = progress;
        self.updated_at = now;
        true
    }

    /// Transition InProgress -> Completed
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::InProgress, TaskStatus::Completed)?;
        self.progress = 100;
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Transition InProgress -> Failed with an error message
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::InProgress, TaskStatus::Failed)?;
        self.error = Some(error.into());
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Cooperative cancellation: only an in-progress task can be cancelled
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.fail(CANCELLED_BY_USER, now)
    }

    fn transition(&mut self, from: TaskStatus, to: TaskStatus) -> Result<()> {
        if self.status != from {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}
