//! Schedule Manager - per-device cron schedules driving recurring backups
//! with retention cleanup.

use crate::application::constants::{DEFAULT_MISFIRE_GRACE, UNKNOWN_DEVICE_NAME};
use crate::application::device_cache::DeviceCache;
use crate::application::orchestrator::TaskOrchestrator;
use crate::application::records::DeviceRecords;
use crate::application::schedule::engine::{JobFn, JobOptions, TriggerEngine};
use crate::application::schedule::trigger::{CronTimezone, CronTrigger, Trigger};
use crate::domain::{Schedule, ScheduleStatus};
use crate::error::{AppError, Result};
use crate::port::TimeProvider;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub misfire_grace: Duration,
    pub timezone: CronTimezone,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            misfire_grace: DEFAULT_MISFIRE_GRACE,
            timezone: CronTimezone::default(),
        }
    }
}

/// An enabled schedule joined with the device's display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSummary {
    pub serial: String,
    pub device_name: String,
    pub schedule: Schedule,
}

pub struct ScheduleManager {
    engine: TriggerEngine,
    runner: BackupRunner,
    cache: Arc<DeviceCache>,
    records: DeviceRecords,
    time_provider: Arc<dyn TimeProvider>,
    config: ScheduleConfig,
}

impl ScheduleManager {
    pub fn new(
        orchestrator: TaskOrchestrator,
        cache: Arc<DeviceCache>,
        records: DeviceRecords,
        time_provider: Arc<dyn TimeProvider>,
        config: ScheduleConfig,
    ) -> Self {
        let runner = BackupRunner {
            orchestrator,
            cache: Arc::clone(&cache),
            records: records.clone(),
            time_provider: Arc::clone(&time_provider),
        };
        Self {
            engine: TriggerEngine::new(Arc::clone(&time_provider)),
            runner,
            cache,
            records,
            time_provider,
            config,
        }
    }

    /// Install (or replace) the device's schedule and persist it
    ///
    /// # Arguments
    /// * `serial` - Device serial
    /// * `cron_expression` - 5-field crontab expression
    /// * `max_backups` - Retained backups after each run (0 = unlimited)
    ///
    /// # Errors
    /// - AppError::Validation if the expression is invalid
    /// - AppError::Persistence if the schedule cannot be stored (no trigger is installed)
    pub async fn try_set_schedule(
        &self,
        serial: &str,
        cron_expression: &str,
        max_backups: u32,
    ) -> Result<Schedule> {
        let trigger = Arc::new(CronTrigger::parse(cron_expression, self.config.timezone)?);
        let now = self.time_provider.now();
        let next_run = trigger.next_fire_after(now);

        let schedule = self
            .records
            .update(serial, |record| {
                let schedule = Schedule::new(
                    trigger.expression().as_str(),
                    max_backups,
                    now,
                    next_run,
                    record.schedule.as_ref(),
                );
                record.schedule = Some(schedule.clone());
                Ok(schedule)
            })
            .await?;

        self.install(serial, trigger, false).await;
        info!(
            serial = %serial,
            cron = %schedule.cron_expression,
            max_backups = max_backups,
            next_run = ?schedule.next_run,
            "Schedule set"
        );
        Ok(schedule)
    }

    /// Boolean form of `try_set_schedule`; failures are logged
    pub async fn set_schedule(&self, serial: &str, cron_expression: &str, max_backups: u32) -> bool {
        match self.try_set_schedule(serial, cron_expression, max_backups).await {
            Ok(_) => true,
            Err(e) => {
                error!(serial = %serial, cron = %cron_expression, error = %e, "Failed to set schedule");
                false
            }
        }
    }

    /// Cancel the trigger and disable the persisted schedule.
    ///
    /// Repeating the call is a no-op. It returns false when nothing was
    /// active (no schedule, or already disabled) and when the record could
    /// not be updated; callers map the former to "not found".
    pub async fn remove_schedule(&self, serial: &str) -> bool {
        self.engine.cancel(serial).await;

        let now = self.time_provider.now();
        let disabled = self
            .records
            .update(serial, |record| match record.schedule.as_mut() {
                Some(schedule) if schedule.enabled => {
                    schedule.disable(now);
                    Ok(())
                }
                _ => Err(AppError::NotFound(format!("active schedule for {}", serial))),
            })
            .await;

        match disabled {
            Ok(()) => {
                info!(serial = %serial, "Schedule removed");
                true
            }
            Err(AppError::NotFound(_)) => false,
            Err(e) => {
                error!(serial = %serial, error = %e, "Failed to disable schedule");
                false
            }
        }
    }

    pub async fn get_schedule(&self, serial: &str) -> Result<Option<Schedule>> {
        Ok(self.records.read(serial).await?.schedule)
    }

    /// Enabled schedules, ordered by serial; unreadable records are skipped
    pub async fn get_all_schedules(&self) -> Result<Vec<ScheduleSummary>> {
        let mut summaries = Vec::new();
        for serial in self.records.known_serials().await? {
            let record = match self.records.read(&serial).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(serial = %serial, error = %e, "Skipping unreadable device record");
                    continue;
                }
            };
            let Some(schedule) = record.schedule.filter(|s| s.enabled) else {
                continue;
            };
            let device_name = self
                .cache
                .get_device_info(&serial)
                .await
                .map(|d| d.name)
                .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());
            summaries.push(ScheduleSummary {
                serial,
                device_name,
                schedule,
            });
        }
        summaries.sort_by(|a, b| a.serial.cmp(&b.serial));
        Ok(summaries)
    }

    /// Reinstall triggers for every enabled persisted schedule (startup).
    ///
    /// A `nextRun` that passed while the process was down but is still within
    /// the misfire grace window fires once immediately.
    pub async fn load_schedules(&self) -> Result<usize> {
        let now = self.time_provider.now();
        let grace = chrono::Duration::from_std(self.config.misfire_grace)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let mut loaded = 0;

        for serial in self.records.known_serials().await? {
            let record = match self.records.read(&serial).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(serial = %serial, error = %e, "Skipping unreadable device record");
                    continue;
                }
            };
            let Some(schedule) = record.schedule.filter(|s| s.enabled) else {
                continue;
            };
            let trigger = match CronTrigger::parse(&schedule.cron_expression, self.config.timezone) {
                Ok(trigger) => Arc::new(trigger),
                Err(e) => {
                    warn!(serial = %serial, error = %e, "Skipping schedule with invalid cron expression");
                    continue;
                }
            };

            let catch_up = schedule
                .next_run
                .map(|due| due <= now && now - due <= grace)
                .unwrap_or(false);
            let next_run = trigger.next_fire_after(now);

            if let Err(e) = self.set_next_run(&serial, next_run).await {
                warn!(serial = %serial, error = %e, "Failed to persist next run");
            }
            self.install(&serial, trigger, catch_up).await;
            if catch_up {
                info!(serial = %serial, missed = ?schedule.next_run, "Missed fire within grace window, catching up");
            }
            loaded += 1;
        }

        info!(count = loaded, "Schedules loaded");
        Ok(loaded)
    }

    /// Run the scheduled backup for a device now (the recurring job body)
    pub async fn run_scheduled_backup(&self, serial: &str) -> ScheduleStatus {
        let trigger = match self.get_schedule(serial).await {
            Ok(Some(schedule)) => {
                CronTrigger::parse(&schedule.cron_expression, self.config.timezone).ok()
            }
            _ => None,
        };
        self.runner.run(serial, trigger.as_ref()).await
    }

    /// Keep the newest `max_backups` backups, deleting the rest
    pub async fn cleanup_old_backups(&self, serial: &str, max_backups: u32) -> Result<usize> {
        self.runner.cleanup_old_backups(serial, max_backups).await
    }

    pub async fn next_fire_time(&self, serial: &str) -> Option<DateTime<Utc>> {
        self.engine.next_fire_time(serial).await
    }

    /// Stop every trigger
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }

    async fn install(&self, serial: &str, trigger: Arc<CronTrigger>, fire_immediately: bool) {
        let runner = self.runner.clone();
        let job_serial = serial.to_string();
        let job_trigger = Arc::clone(&trigger);
        let job: JobFn = Arc::new(move || {
            let runner = runner.clone();
            let serial = job_serial.clone();
            let trigger = Arc::clone(&job_trigger);
            async move {
                runner.run(&serial, Some(trigger.as_ref())).await;
            }
            .boxed()
        });

        let options = JobOptions {
            misfire_grace: self.config.misfire_grace,
            fire_immediately,
        };
        self.engine.schedule(serial, trigger, options, job).await;
    }

    async fn set_next_run(&self, serial: &str, next_run: Option<DateTime<Utc>>) -> Result<()> {
        self.records
            .update(serial, |record| match record.schedule.as_mut() {
                Some(schedule) => {
                    schedule.next_run = next_run;
                    Ok(())
                }
                None => Err(AppError::NotFound(format!("schedule for {}", serial))),
            })
            .await
    }
}

/// Body of the recurring job
#[derive(Clone)]
struct BackupRunner {
    orchestrator: TaskOrchestrator,
    cache: Arc<DeviceCache>,
    records: DeviceRecords,
    time_provider: Arc<dyn TimeProvider>,
}

impl BackupRunner {
    async fn run(&self, serial: &str, trigger: Option<&CronTrigger>) -> ScheduleStatus {
        let now = self.time_provider.now();
        let next_run = trigger.and_then(|t| t.next_fire_after(now));

        if !self.cache.is_available(serial).await {
            info!(serial = %serial, "Scheduled backup skipped: device unavailable");
            self.update_schedule(serial, |schedule| {
                schedule.record_unavailable(now);
                schedule.next_run = next_run;
            })
            .await;
            return ScheduleStatus::DeviceUnavailable;
        }

        let status = match self.orchestrator.create_backup(serial).await {
            Ok(task) => {
                info!(
                    serial = %serial,
                    task_id = %task.id,
                    full = task.is_full_backup(),
                    "Scheduled backup started"
                );
                ScheduleStatus::Success
            }
            Err(e) => {
                error!(serial = %serial, error = %e, "Scheduled backup failed to start");
                ScheduleStatus::Failed
            }
        };

        let schedule = self
            .update_schedule(serial, |schedule| {
                schedule.record_run(status, now);
                schedule.next_run = next_run;
            })
            .await;

        if let Some(max_backups) = schedule.map(|s| s.max_backups).filter(|max| *max > 0) {
            if let Err(e) = self.cleanup_old_backups(serial, max_backups).await {
                error!(serial = %serial, error = %e, "Retention cleanup failed");
            }
        }
        status
    }

    /// Sort newest first (stable for equal timestamps) and delete beyond `max_backups`
    async fn cleanup_old_backups(&self, serial: &str, max_backups: u32) -> Result<usize> {
        let mut backups = self.orchestrator.list_backups(serial).await?;
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut deleted = 0;
        for backup in backups.iter().skip(max_backups as usize) {
            if self.orchestrator.delete_backup(serial, &backup.id).await {
                info!(serial = %serial, backup_id = %backup.id, "Retention: deleted old backup");
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Update the enabled schedule; None if it is gone or the write failed
    async fn update_schedule<F>(&self, serial: &str, f: F) -> Option<Schedule>
    where
        F: FnOnce(&mut Schedule),
    {
        let updated = self
            .records
            .update(serial, |record| match record.schedule.as_mut() {
                Some(schedule) if schedule.enabled => {
                    f(schedule);
                    Ok(schedule.clone())
                }
                _ => Err(AppError::NotFound(format!("active schedule for {}", serial))),
            })
            .await;

        match updated {
            Ok(schedule) => Some(schedule),
            Err(AppError::NotFound(_)) => None,
            Err(e) => {
                warn!(serial = %serial, error = %e, "Failed to record schedule run");
                None
            }
        }
    }
}
