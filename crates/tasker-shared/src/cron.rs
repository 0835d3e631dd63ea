//! # Cron Expression Parsing & Next-Fire Computation
//!
//! A minimal standard 5-field cron parser (`minute hour day-of-month month
//! day-of-week`). Pure and allocation-light by design — it belongs to the
//! Clock & ID Service, not the dispatcher, and must stay free of I/O.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use std::fmt;

/// A parsed 5-field cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum CronParseError {
    #[error("cron expression must have exactly 5 fields, got {0}")]
    WrongFieldCount(usize),
    #[error("invalid field {field} in cron expression: {value}")]
    InvalidField { field: &'static str, value: String },
}

impl CronSchedule {
    /// Parse a standard 5-field cron expression, e.g. `"0 */4 * * *"`.
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronParseError::WrongFieldCount(fields.len()));
        }

        Ok(Self {
            minutes: parse_field(fields[0], 0, 59, "minute")?,
            hours: parse_field(fields[1], 0, 23, "hour")?,
            days_of_month: parse_field(fields[2], 1, 31, "day_of_month")?,
            months: parse_field(fields[3], 1, 12, "month")?,
            days_of_week: parse_field(fields[4], 0, 6, "day_of_week")?,
        })
    }

    /// Whether this schedule matches the given UTC instant down to the minute.
    #[must_use]
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minutes.contains(&at.minute())
            && self.hours.contains(&at.hour())
            && self.days_of_month.contains(&at.day())
            && self.months.contains(&at.month())
            && self.days_of_week.contains(&(at.weekday().num_days_from_sunday()))
    }

    /// The next fire time strictly after `after`, searching at most two
    /// years forward before giving up (a cron expression that never fires,
    /// e.g. Feb 30, is a configuration bug, not a runtime hang).
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after + Duration::minutes(1);
        let start = Utc
            .with_ymd_and_hms(
                start.year(),
                start.month(),
                start.day(),
                start.hour(),
                start.minute(),
                0,
            )
            .single()?;

        let limit = after + Duration::days(366 * 2);
        let mut candidate = start;
        while candidate <= limit {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }

    /// All fire times in `(since, until]`, used for cron catch-up on restart.
    #[must_use]
    pub fn fires_between(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut out = Vec::new();
        let mut cursor = since;
        while let Some(next) = self.next_after(cursor) {
            if next > until {
                break;
            }
            out.push(next);
            cursor = next;
        }
        out
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {:?} {:?} {:?} {:?}", self.minutes, self.hours, self.days_of_month, self.months, self.days_of_week)
    }
}

fn parse_field(raw: &str, min: u32, max: u32, field: &'static str) -> Result<Vec<u32>, CronParseError> {
    let invalid = |value: &str| CronParseError::InvalidField {
        field,
        value: value.to_string(),
    };

    let mut values = Vec::new();
    for part in raw.split(',') {
        if part == "*" {
            values.extend(min..=max);
            continue;
        }

        if let Some(step_expr) = part.strip_prefix("*/") {
            let step: u32 = step_expr.parse().map_err(|_| invalid(part))?;
            if step == 0 {
                return Err(invalid(part));
            }
            let mut v = min;
            while v <= max {
                values.push(v);
                v += step;
            }
            continue;
        }

        if let Some((lo, hi)) = part.split_once('-') {
            let lo: u32 = lo.parse().map_err(|_| invalid(part))?;
            let hi: u32 = hi.parse().map_err(|_| invalid(part))?;
            if lo > hi || lo < min || hi > max {
                return Err(invalid(part));
            }
            values.extend(lo..=hi);
            continue;
        }

        let v: u32 = part.parse().map_err(|_| invalid(part))?;
        if v < min || v > max {
            return Err(invalid(part));
        }
        values.push(v);
    }

    values.sort_unstable();
    values.dedup();
    if values.is_empty() {
        return Err(invalid(raw));
    }
    Ok(values)
}
