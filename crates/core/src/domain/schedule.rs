// Schedule Domain Model (persisted, one per device)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the last scheduled fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Success,
    Failed,
    DeviceUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub cron_expression: String,
    /// 0 = unlimited retention
    pub max_backups: u32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub next_run: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<ScheduleStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
}

impl Schedule {
    /// New enabled schedule; run history carries over from `previous`
    pub fn new(
        cron_expression: impl Into<String>,
        max_backups: u32,
        now: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
        previous: Option<&Schedule>,
    ) -> Self {
        Self {
            cron_expression: cron_expression.into(),
            max_backups,
            enabled: true,
            created_at: now,
            next_run,
            last_run: previous.and_then(|p| p.last_run),
            last_attempt: previous.and_then(|p| p.last_attempt),
            last_status: previous.and_then(|p| p.last_status),
            removed_at: None,
        }
    }

    /// Disable the schedule. Returns false if it was already disabled.
    pub fn disable(&mut self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        self.enabled = false;
        self.removed_at = Some(now);
        true
    }

    pub fn record_unavailable(&mut self, now: DateTime<Utc>) {
        self.last_attempt = Some(now);
        self.last_status = Some(ScheduleStatus::DeviceUnavailable);
    }

    pub fn record_run(&mut self, status: ScheduleStatus, now: DateTime<Utc>) {
        self.last_run = Some(now);
        self.last_status = Some(status);
    }
}
