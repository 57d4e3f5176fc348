//! Cron expression parsing and evaluation.
//!
//! Standard 5-field crontab format: `minute hour day-of-month month day-of-week`.
//! Supported per field: `*`, values, lists (`1,3,5`), ranges (`1-5`), steps
//! (`*/15`, `0-30/10`, `5/20`) and three-letter month/weekday names.
//! Weekday 0 and 7 both mean Sunday. When both day-of-month and day-of-week
//! are restricted a day matches if either matches (classic cron rule).

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike};

use crate::domain::error::{DomainError, Result};

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Upper bound for the next-fire search (covers Feb 29 patterns)
const SEARCH_HORIZON_DAYS: i64 = 366 * 8;

/// Allowed values of one field as a bitset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }
}

struct FieldBounds {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    names_offset: u32,
}

const MINUTE: FieldBounds = FieldBounds { name: "minute", min: 0, max: 59, names: &[], names_offset: 0 };
const HOUR: FieldBounds = FieldBounds { name: "hour", min: 0, max: 23, names: &[], names_offset: 0 };
const DAY: FieldBounds = FieldBounds { name: "day-of-month", min: 1, max: 31, names: &[], names_offset: 0 };
const MONTH: FieldBounds = FieldBounds { name: "month", min: 1, max: 12, names: &MONTH_NAMES, names_offset: 1 };
// 7 is accepted and folded onto 0 (Sunday)
const WEEKDAY: FieldBounds = FieldBounds { name: "day-of-week", min: 0, max: 7, names: &WEEKDAY_NAMES, names_offset: 0 };

/// A parsed cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    minutes: FieldSet,
    hours: FieldSet,
    days: FieldSet,
    months: FieldSet,
    weekdays: FieldSet,
    days_restricted: bool,
    weekdays_restricted: bool,
}

impl CronExpression {
    /// Parse a 5-field crontab expression
    ///
    /// # Examples
    ///
    /// - `0 0 * * *` - Daily at midnight
    /// - `*/5 * * * *` - Every 5 minutes
    /// - `30 2 * * mon-fri` - 02:30 on weekdays
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(invalid(
                expression,
                format!("expected 5 fields, found {}", parts.len()),
            ));
        }

        let field = |raw: &str, bounds: &FieldBounds| {
            parse_field(raw, bounds).map_err(|reason| invalid(expression, reason))
        };

        let mut weekdays = field(parts[4], &WEEKDAY)?;
        if weekdays.contains(7) {
            weekdays = FieldSet((weekdays.0 & !(1 << 7)) | 1);
        }

        Ok(Self {
            source: parts.join(" "),
            minutes: field(parts[0], &MINUTE)?,
            hours: field(parts[1], &HOUR)?,
            days: field(parts[2], &DAY)?,
            months: field(parts[3], &MONTH)?,
            weekdays,
            days_restricted: !parts[2].starts_with('*'),
            weekdays_restricted: !parts[4].starts_with('*'),
        })
    }

    /// Normalized source text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check if the expression matches the given wall-clock minute
    pub fn matches(&self, time: &NaiveDateTime) -> bool {
        self.minutes.contains(time.minute())
            && self.hours.contains(time.hour())
            && self.months.contains(time.month())
            && self.day_matches(time.date())
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days.contains(date.day());
        let dow = self.weekdays.contains(date.weekday().num_days_from_sunday());
        if self.days_restricted && self.weekdays_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First matching minute strictly after `after`, evaluated in `after`'s time zone.
    ///
    /// Local times skipped by a DST jump never fire; repeated local times fire
    /// on their first occurrence after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let start = after.naive_local().with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let horizon = start + Duration::days(SEARCH_HORIZON_DAYS);
        let mut t = start;

        while t <= horizon {
            if !self.months.contains(t.month()) {
                t = first_of_next_month(t.date())?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !self.matches(&t) {
                t += Duration::minutes(1);
                continue;
            }

            match tz.from_local_datetime(&t) {
                LocalResult::Single(dt) if dt > *after => return Some(dt),
                LocalResult::Ambiguous(first, second) => {
                    if first > *after {
                        return Some(first);
                    }
                    if second > *after {
                        return Some(second);
                    }
                }
                _ => {}
            }
            t += Duration::minutes(1);
        }
        None
    }
}

impl std::fmt::Display for CronExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for CronExpression {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn invalid(expression: &str, reason: impl Into<String>) -> DomainError {
    DomainError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

fn parse_field(raw: &str, bounds: &FieldBounds) -> std::result::Result<FieldSet, String> {
    let mut bits = 0u64;
    for part in raw.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}' in {} field", step, bounds.name))?;
                if step == 0 || step > bounds.max {
                    return Err(format!("step in {} field must be 1-{}", bounds.name, bounds.max));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (bounds.min, bounds.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, bounds)?, parse_value(b, bounds)?)
        } else {
            let value = parse_value(range, bounds)?;
            // `5/20` runs from 5 to the end of the field
            (value, if step.is_some() { bounds.max } else { value })
        };

        if start > end {
            return Err(format!("range {}-{} in {} field is reversed", start, end, bounds.name));
        }

        let step = step.unwrap_or(1) as usize;
        for value in (start..=end).step_by(step) {
            bits |= 1 << value;
        }
    }
    Ok(FieldSet(bits))
}

fn parse_value(raw: &str, bounds: &FieldBounds) -> std::result::Result<u32, String> {
    let lower = raw.to_ascii_lowercase();
    let value = match bounds.names.iter().position(|name| *name == lower) {
        Some(index) => index as u32 + bounds.names_offset,
        None => raw
            .parse()
            .map_err(|_| format!("invalid value '{}' in {} field", raw, bounds.name))?,
    };
    if value < bounds.min || value > bounds.max {
        return Err(format!(
            "value {} out of range {}-{} in {} field",
            value, bounds.min, bounds.max, bounds.name
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_parse_invalid() {
        assert!(CronExpression::parse("invalid").is_err());
        assert!(CronExpression::parse("* * *").is_err());
        assert!(CronExpression::parse("60 * * * *").is_err());
        assert!(CronExpression::parse("* 24 * * *").is_err());
        assert!(CronExpression::parse("*/0 * * * *").is_err());
        assert!(CronExpression::parse("5-1 * * * *").is_err());
        assert!(CronExpression::parse("* * 0 * *").is_err());
    }

    #[test]
    fn test_daily_at_two() {
        let expr = CronExpression::parse("0 2 * * *").unwrap();
        let next = expr.next_after(&utc(2024, 3, 1, 1, 15)).unwrap();
        assert_eq!(next, utc(2024, 3, 1, 2, 0));

        let next = expr.next_after(&utc(2024, 3, 1, 2, 0)).unwrap();
        assert_eq!(next, utc(2024, 3, 2, 2, 0), "strictly after");
    }

    #[test]
    fn test_steps_and_ranges() {
        let expr = CronExpression::parse("*/15 9-17 * * *").unwrap();
        assert_eq!(expr.next_after(&utc(2024, 3, 1, 9, 1)), Some(utc(2024, 3, 1, 9, 15)));
        assert_eq!(expr.next_after(&utc(2024, 3, 1, 17, 45)), Some(utc(2024, 3, 2, 9, 0)));

        let expr = CronExpression::parse("0-30/10 0 * * *").unwrap();
        assert_eq!(expr.next_after(&utc(2024, 3, 1, 0, 20)), Some(utc(2024, 3, 1, 0, 30)));
        assert_eq!(expr.next_after(&utc(2024, 3, 1, 0, 30)), Some(utc(2024, 3, 2, 0, 0)));
    }

    #[test]
    fn test_weekday_names_and_sunday_alias() {
        // 2024-03-01 is a Friday
        let expr = CronExpression::parse("30 2 * * mon-fri").unwrap();
        assert_eq!(expr.next_after(&utc(2024, 3, 1, 3, 0)), Some(utc(2024, 3, 4, 2, 30)));

        let sunday_zero = CronExpression::parse("0 0 * * 0").unwrap();
        let sunday_seven = CronExpression::parse("0 0 * * 7").unwrap();
        let from = utc(2024, 3, 1, 0, 0);
        assert_eq!(sunday_zero.next_after(&from), Some(utc(2024, 3, 3, 0, 0)));
        assert_eq!(sunday_seven.next_after(&from), sunday_zero.next_after(&from));
    }

    #[test]
    fn test_day_of_month_or_weekday() {
        // 1st of the month OR any Monday
        let expr = CronExpression::parse("0 0 1 * mon").unwrap();
        assert_eq!(expr.next_after(&utc(2024, 3, 1, 12, 0)), Some(utc(2024, 3, 4, 0, 0)));
        assert_eq!(expr.next_after(&utc(2024, 3, 26, 0, 0)), Some(utc(2024, 4, 1, 0, 0)));
    }

    #[test]
    fn test_leap_day() {
        let expr = CronExpression::parse("0 0 29 feb *").unwrap();
        assert_eq!(expr.next_after(&utc(2024, 3, 1, 0, 0)), Some(utc(2028, 2, 29, 0, 0)));
    }

    #[test]
    fn test_fixed_offset_zone() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let after = tz.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap();
        let expr = CronExpression::parse("0 2 * * *").unwrap();

        let next = expr.next_after(&after).unwrap();
        assert_eq!(next.naive_local().hour(), 2);
        assert_eq!(next.with_timezone(&Utc), utc(2024, 3, 1, 0, 0));
    }

    #[test]
    fn test_matches() {
        let expr = CronExpression::parse("15 10 * * *").unwrap();
        assert!(expr.matches(&utc(2024, 3, 1, 10, 15).naive_utc()));
        assert!(!expr.matches(&utc(2024, 3, 1, 10, 16).naive_utc()));
    }
}
