//! Trigger Engine - runs jobs at the fire times produced by triggers.
//!
//! One tokio task per job. Waits are sliced so a suspended host is noticed
//! within `MAX_TRIGGER_SLEEP_SLICE` of resuming. A fire detected later than
//! the job's misfire grace window is skipped. A job never overlaps itself:
//! the next fire time is computed only after the current run returns.

use crate::application::constants::{DEFAULT_MISFIRE_GRACE, MAX_TRIGGER_SLEEP_SLICE};
use crate::application::schedule::trigger::Trigger;
use crate::application::shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
use crate::port::TimeProvider;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Work performed at each fire
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Maximum lateness at which a fire is still honored
    pub misfire_grace: Duration,
    /// Run once right after installation (startup catch-up)
    pub fire_immediately: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            misfire_grace: DEFAULT_MISFIRE_GRACE,
            fire_immediately: false,
        }
    }
}

struct JobEntry {
    next_fire: watch::Receiver<Option<DateTime<Utc>>>,
    stop: ShutdownSender,
}

pub struct TriggerEngine {
    jobs: Mutex<HashMap<String, JobEntry>>,
    time_provider: Arc<dyn TimeProvider>,
    max_sleep_slice: Duration,
}

impl TriggerEngine {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            time_provider,
            max_sleep_slice: MAX_TRIGGER_SLEEP_SLICE,
        }
    }

    /// Install a job, replacing any job with the same ID.
    ///
    /// Returns the first fire time; None when the trigger never fires (no job
    /// is installed unless `fire_immediately` is set).
    pub async fn schedule(
        &self,
        job_id: &str,
        trigger: Arc<dyn Trigger>,
        options: JobOptions,
        job: JobFn,
    ) -> Option<DateTime<Utc>> {
        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.remove(job_id) {
            previous.stop.shutdown();
            debug!(job_id = %job_id, "Replaced existing job");
        }

        let first_fire = trigger.next_fire_after(self.time_provider.now());
        if first_fire.is_none() && !options.fire_immediately {
            warn!(job_id = %job_id, "Trigger never fires, job not installed");
            return None;
        }

        let (next_tx, next_rx) = watch::channel(first_fire);
        let (stop, token) = shutdown_channel();
        let runner = JobRunner {
            job_id: job_id.to_string(),
            trigger,
            options,
            job,
            time_provider: Arc::clone(&self.time_provider),
            max_sleep_slice: self.max_sleep_slice,
            next_fire: next_tx,
        };
        tokio::spawn(runner.run(first_fire, token));

        jobs.insert(
            job_id.to_string(),
            JobEntry {
                next_fire: next_rx,
                stop,
            },
        );
        info!(job_id = %job_id, next_fire = ?first_fire, "Job scheduled");
        first_fire
    }

    /// Stop a job. A run already in progress finishes.
    pub async fn cancel(&self, job_id: &str) -> bool {
        match self.jobs.lock().await.remove(job_id) {
            Some(entry) => {
                entry.stop.shutdown();
                info!(job_id = %job_id, "Job cancelled");
                true
            }
            None => false,
        }
    }

    pub async fn next_fire_time(&self, job_id: &str) -> Option<DateTime<Utc>> {
        let jobs = self.jobs.lock().await;
        let entry = jobs.get(job_id)?;
        let next = *entry.next_fire.borrow();
        next
    }

    pub async fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every job
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, entry) in jobs.drain() {
            entry.stop.shutdown();
        }
        info!("Trigger engine stopped");
    }
}

struct JobRunner {
    job_id: String,
    trigger: Arc<dyn Trigger>,
    options: JobOptions,
    job: JobFn,
    time_provider: Arc<dyn TimeProvider>,
    max_sleep_slice: Duration,
    next_fire: watch::Sender<Option<DateTime<Utc>>>,
}

impl JobRunner {
    async fn run(self, first_fire: Option<DateTime<Utc>>, mut stop: ShutdownToken) {
        if self.options.fire_immediately && !stop.is_shutdown() {
            info!(job_id = %self.job_id, "Catch-up fire");
            self.fire().await;
        }

        let grace = chrono::Duration::from_std(self.options.misfire_grace)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let mut next = first_fire;

        while let Some(fire_at) = next {
            if stop.is_shutdown() {
                return;
            }
            self.next_fire.send_replace(Some(fire_at));

            loop {
                let now = self.time_provider.now();
                if now >= fire_at {
                    break;
                }
                let remaining = (fire_at - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(self.max_sleep_slice);
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {}
                    _ = stop.wait() => return,
                }
            }

            let lateness = self.time_provider.now() - fire_at;
            if lateness > grace {
                warn!(
                    job_id = %self.job_id,
                    scheduled = %fire_at,
                    late_secs = lateness.num_seconds(),
                    "Misfire outside grace window, skipping"
                );
            } else {
                debug!(job_id = %self.job_id, scheduled = %fire_at, "Firing job");
                self.fire().await;
            }

            next = self.trigger.next_fire_after(self.time_provider.now());
        }

        self.next_fire.send_replace(None);
        info!(job_id = %self.job_id, "Trigger exhausted");
    }

    /// Run the job on its own task so a panic stays contained
    async fn fire(&self) {
        if let Err(e) = tokio::spawn((self.job)()).await {
            error!(job_id = %self.job_id, error = %e, "Scheduled job panicked");
        }
    }
}
