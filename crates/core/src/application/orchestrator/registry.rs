// Task Registry - in-memory task table owned by the orchestrator

use crate::domain::backup::unique_backup_id;
use crate::domain::{Task, TaskId, TaskKind};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Table {
    tasks: HashMap<TaskId, Task>,
    /// Tasks whose execution result is being recorded; no longer cancellable
    finalizing: HashSet<TaskId>,
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    table: Arc<RwLock<Table>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, task: Task) {
        self.table.write().await.tasks.insert(task.id.clone(), task);
    }

    /// Allocate a backup ID unique among persisted and in-flight backups of
    /// `serial`, build the task with it and register it atomically.
    pub async fn insert_backup<F>(
        &self,
        serial: &str,
        persisted_ids: &[String],
        now: DateTime<Utc>,
        build: F,
    ) -> Task
    where
        F: FnOnce(String) -> Task,
    {
        let mut table = self.table.write().await;
        let backup_id = {
            let in_flight = table
                .tasks
                .values()
                .filter(|t| t.kind == TaskKind::Backup && t.device_serial == serial)
                .map(|t| t.backup_id.as_str());
            unique_backup_id(now, persisted_ids.iter().map(String::as_str).chain(in_flight))
        };
        let task = build(backup_id);
        table.tasks.insert(task.id.clone(), task.clone());
        task
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.table.read().await.tasks.get(id).cloned()
    }

    pub async fn all(&self) -> HashMap<TaskId, Task> {
        self.table.read().await.tasks.clone()
    }

    /// Mutate a task in place; None if the task does not exist
    pub async fn update<R, F>(&self, id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut Task) -> R,
    {
        self.table.write().await.tasks.get_mut(id).map(f)
    }

    /// Claim a running task for finalization.
    ///
    /// Returns the task if it exists and is not terminal. From here until
    /// [`TaskRegistry::finish`] the task cannot be cancelled.
    pub async fn begin_finalize(&self, id: &str) -> Option<Task> {
        let mut table = self.table.write().await;
        let task = table.tasks.get(id).filter(|t| !t.status.is_terminal())?.clone();
        table.finalizing.insert(task.id.clone());
        Some(task)
    }

    /// Apply the terminal transition of a claimed task and release the claim
    pub async fn finish<R, F>(&self, id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut Task) -> R,
    {
        let mut table = self.table.write().await;
        table.finalizing.remove(id);
        table.tasks.get_mut(id).map(f)
    }

    /// Cancel a task unless its result is already being recorded
    pub async fn cancel(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut table = self.table.write().await;
        if table.finalizing.contains(id) {
            return false;
        }
        table
            .tasks
            .get_mut(id)
            .is_some_and(|task| task.cancel(now).is_ok())
    }
}
