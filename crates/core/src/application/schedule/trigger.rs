// Triggers - when a recurring job fires next

use crate::domain::error::Result as DomainResult;
use crate::domain::{CronExpression, DomainError};
use chrono::{DateTime, Local, Utc};
use std::str::FromStr;

/// Source of fire times for the trigger engine
pub trait Trigger: Send + Sync {
    /// First fire time strictly after `after`; None when exhausted
    fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Time zone in which cron expressions are evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CronTimezone {
    #[default]
    Local,
    Utc,
}

impl FromStr for CronTimezone {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(CronTimezone::Local),
            "utc" => Ok(CronTimezone::Utc),
            other => Err(DomainError::ValidationError(format!(
                "unknown cron timezone '{}', expected 'local' or 'utc'",
                other
            ))),
        }
    }
}

/// Fires on every minute matched by a cron expression
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expression: CronExpression,
    timezone: CronTimezone,
}

impl CronTrigger {
    pub fn new(expression: CronExpression, timezone: CronTimezone) -> Self {
        Self {
            expression,
            timezone,
        }
    }

    pub fn parse(expression: &str, timezone: CronTimezone) -> DomainResult<Self> {
        Ok(Self::new(CronExpression::parse(expression)?, timezone))
    }

    pub fn expression(&self) -> &CronExpression {
        &self.expression
    }
}

impl Trigger for CronTrigger {
    fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.timezone {
            CronTimezone::Utc => self.expression.next_after(&after),
            CronTimezone::Local => self
                .expression
                .next_after(&after.with_timezone(&Local))
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// Fires every `period`, aligned to `start`
#[derive(Debug, Clone)]
pub struct IntervalTrigger {
    start: DateTime<Utc>,
    period: chrono::Duration,
}

impl IntervalTrigger {
    pub fn new(start: DateTime<Utc>, period: chrono::Duration) -> DomainResult<Self> {
        if period <= chrono::Duration::zero() {
            return Err(DomainError::ValidationError(
                "interval period must be positive".to_string(),
            ));
        }
        Ok(Self { start, period })
    }
}

impl Trigger for IntervalTrigger {
    fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if after < self.start {
            return Some(self.start);
        }
        let period_ms = self.period.num_milliseconds().max(1);
        let elapsed_ms = (after - self.start).num_milliseconds();
        let periods = elapsed_ms / period_ms + 1;
        self.start
            .checked_add_signed(chrono::Duration::milliseconds(periods.checked_mul(period_ms)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cron_trigger_utc() {
        let trigger = CronTrigger::parse("0 2 * * *", CronTimezone::Utc).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap();
        assert_eq!(
            trigger.next_fire_after(after),
            Some(Utc.with_ymd_and_hms(2024, 3, 2, 2, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_cron_trigger_local_is_strictly_after() {
        let trigger = CronTrigger::parse("*/5 * * * *", CronTimezone::Local).unwrap();
        let after = Utc::now();
        let next = trigger.next_fire_after(after).unwrap();
        assert!(next > after);
        assert!(next - after <= chrono::Duration::minutes(5));
    }

    #[test]
    fn test_interval_trigger() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let trigger = IntervalTrigger::new(start, chrono::Duration::minutes(10)).unwrap();

        let before = start - chrono::Duration::hours(1);
        assert_eq!(trigger.next_fire_after(before), Some(start));
        assert_eq!(
            trigger.next_fire_after(start),
            Some(start + chrono::Duration::minutes(10))
        );
        assert_eq!(
            trigger.next_fire_after(start + chrono::Duration::minutes(25)),
            Some(start + chrono::Duration::minutes(30))
        );
    }

    #[test]
    fn test_interval_rejects_non_positive_period() {
        assert!(IntervalTrigger::new(Utc::now(), chrono::Duration::zero()).is_err());
    }

    #[test]
    fn test_timezone_parse() {
        assert_eq!("UTC".parse::<CronTimezone>().unwrap(), CronTimezone::Utc);
        assert_eq!("local".parse::<CronTimezone>().unwrap(), CronTimezone::Local);
        assert!("mars".parse::<CronTimezone>().is_err());
    }
}
