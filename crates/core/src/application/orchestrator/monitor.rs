// Task monitoring loop - runs one task from dispatch to terminal state

use super::TaskOrchestrator;
use crate::application::constants::UNIT_EXITED_WITHOUT_RESULT;
use crate::domain::{BackupRecord, Task, TaskId, TaskKind};
use crate::error::Result;
use crate::port::{TransferHandle, TransferOutcome, TransferRequest};
use chrono::{DateTime, Utc};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How a task's execution ended
enum RunResult {
    /// The execution unit ran and reported (or failed to report) an outcome
    Finished(TransferOutcome),
    /// The execution unit never started
    NotLaunched(String),
}

impl TaskOrchestrator {
    pub(super) async fn run_task(self, task_id: TaskId, request: TransferRequest) {
        // Held until the execution unit exits, even if the task is cancelled
        let _device_guard = if self.config.serialize_device_tasks {
            Some(self.device_locks.acquire(&request.serial).await)
        } else {
            None
        };

        let now = self.time_provider.now();
        match self.registry.update(&task_id, |task| task.start(now)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(task_id = %task_id, error = %e, "Task could not be started");
                return;
            }
            None => {
                warn!(task_id = %task_id, "Dispatched task is not registered");
                return;
            }
        }

        info!(
            task_id = %task_id,
            serial = %request.serial,
            kind = %request.kind,
            destination = %request.destination.display(),
            "Task dispatched"
        );

        let result = match self.launch(&request).await {
            Ok(handle) => RunResult::Finished(self.monitor(&task_id, handle).await),
            Err(e) => RunResult::NotLaunched(e.to_string()),
        };

        self.finalize(&task_id, &request, result).await;
    }

    async fn launch(&self, request: &TransferRequest) -> Result<TransferHandle> {
        if request.kind == TaskKind::Backup {
            self.storage.prepare(&request.destination).await?;
        }
        Ok(self.executor.spawn(request.clone()).await?)
    }

    /// Poll the execution unit until it reports an outcome or disappears
    async fn monitor(&self, task_id: &str, mut handle: TransferHandle) -> TransferOutcome {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_update = Instant::now();

        if let Some(pid) = handle.pid {
            debug!(task_id = %task_id, pid = pid, "Execution unit started");
        }

        loop {
            ticker.tick().await;

            let mut latest: Option<u8> = None;
            while let Ok(value) = handle.progress.try_recv() {
                latest = Some(latest.map_or(value, |l| l.max(value)));
            }

            if let Some(progress) = latest {
                let now = self.time_provider.now();
                let applied = self
                    .registry
                    .update(task_id, |task| task.record_progress(progress, now))
                    .await
                    .unwrap_or(false);
                if applied {
                    debug!(task_id = %task_id, progress = progress, "Task progress");
                }
                last_update = Instant::now();
            } else if last_update.elapsed() >= self.config.heartbeat_interval {
                info!(
                    task_id = %task_id,
                    silent_secs = last_update.elapsed().as_secs(),
                    "Task still running, no progress reported"
                );
                last_update = Instant::now();
            }

            match handle.outcome.try_recv() {
                Ok(outcome) => return outcome,
                Err(TryRecvError::Empty) => continue,
                Err(TryRecvError::Closed) => {
                    return TransferOutcome::Failed(UNIT_EXITED_WITHOUT_RESULT.to_string())
                }
            }
        }
    }

    async fn finalize(&self, task_id: &str, request: &TransferRequest, result: RunResult) {
        // Claimed atomically with the terminal check so a cancel cannot land
        // between recording the result and the transition
        let Some(task) = self.registry.begin_finalize(task_id).await else {
            warn!(
                task_id = %task_id,
                "Discarding execution result of a task that is already terminal"
            );
            return;
        };

        let now = self.time_provider.now();
        let verdict: std::result::Result<(), String> = match result {
            RunResult::NotLaunched(reason) => Err(reason),
            RunResult::Finished(outcome) => {
                let reported = match &outcome {
                    TransferOutcome::Succeeded => Ok(()),
                    TransferOutcome::Failed(reason) => Err(reason.clone()),
                };
                match self.persist_outcome(&task, request, &outcome, now).await {
                    Ok(()) => reported,
                    Err(e) => {
                        error!(task_id = %task_id, error = %e, "Failed to record task result");
                        Err(format!("failed to record result: {}", e))
                    }
                }
            }
        };

        let transition = self
            .registry
            .finish(task_id, |task| match &verdict {
                Ok(()) => task.complete(now),
                Err(reason) => task.fail(reason.clone(), now),
            })
            .await;

        match (transition, verdict) {
            (Some(Ok(())), Ok(())) => {
                info!(task_id = %task_id, serial = %request.serial, kind = %request.kind, "Task completed");
            }
            (Some(Ok(())), Err(reason)) => {
                error!(task_id = %task_id, serial = %request.serial, kind = %request.kind, error = %reason, "Task failed");
            }
            (Some(Err(e)), _) => {
                warn!(task_id = %task_id, error = %e, "Task became terminal while finalizing");
            }
            (None, _) => {}
        }
    }

    /// Append the backup record, or stamp the restored record
    async fn persist_outcome(
        &self,
        task: &Task,
        request: &TransferRequest,
        outcome: &TransferOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match (task.kind, outcome) {
            (TaskKind::Backup, outcome) => {
                let record = match outcome {
                    TransferOutcome::Succeeded => BackupRecord::succeeded(
                        &task.backup_id,
                        task.created_at,
                        task.is_full_backup(),
                        &request.destination,
                        &task.id,
                    ),
                    TransferOutcome::Failed(reason) => BackupRecord::failed(
                        &task.backup_id,
                        task.created_at,
                        task.is_full_backup(),
                        &request.destination,
                        &task.id,
                        reason,
                    ),
                };
                self.records
                    .update(&task.device_serial, |device| {
                        device.backups.push(record);
                        Ok(())
                    })
                    .await
            }
            (TaskKind::Restore, TransferOutcome::Succeeded) => {
                self.records
                    .update(&task.device_serial, |device| {
                        match device.find_backup_mut(&task.backup_id) {
                            Some(backup) => backup.mark_restored(&task.id, now),
                            None => warn!(
                                task_id = %task.id,
                                backup_id = %task.backup_id,
                                "Restored backup has no record to stamp"
                            ),
                        }
                        Ok(())
                    })
                    .await
            }
            (TaskKind::Restore, TransferOutcome::Failed(_)) => Ok(()),
        }
    }
}
