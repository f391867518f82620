//! Cron-like schedule strings.
//!
//! Supported forms:
//! - `@hourly`, `@daily`
//! - `@every <N>s`, `@every <N>m`, `@every <N>h`
//! - `*/N * * * *`: every N minutes
//! - `0 */N * * *`: every N hours
//! - `M H * * *`: daily at H:M UTC
//!
//! Interval schedules are measured from the previous run, not aligned to
//! wall-clock boundaries.

use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Unsupported schedule expression: '{0}'")]
    Unsupported(String),

    #[error("Out-of-range value in schedule '{0}'")]
    OutOfRange(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Interval(Duration),
    DailyAt { hour: u32, minute: u32 },
}

impl Schedule {
    /// Whether a module last run at `last_run` should run again at `now`.
    ///
    /// A module that has never run is always due.
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last_run) = last_run else {
            return true;
        };
        match self {
            Schedule::Interval(every) => now - last_run >= *every,
            Schedule::DailyAt { hour, minute } => match latest_slot(*hour, *minute, now) {
                Some(slot) => last_run < slot,
                None => false,
            },
        }
    }
}

/// Most recent `hour:minute` at or before `now`.
fn latest_slot(hour: u32, minute: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let today = now.date_naive().and_time(time).and_utc();
    if today <= now {
        Some(today)
    } else {
        Some(today - Duration::days(1))
    }
}

fn parse_in_range(raw: &str, range: std::ops::RangeInclusive<i64>, expr: &str) -> Result<i64, ScheduleError> {
    let value: i64 = raw
        .parse()
        .map_err(|_| ScheduleError::Unsupported(expr.to_string()))?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ScheduleError::OutOfRange(expr.to_string()))
    }
}

fn parse_every(body: &str, expr: &str) -> Result<Schedule, ScheduleError> {
    let body = body.trim();
    let Some((unit_at, _)) = body.char_indices().last() else {
        return Err(ScheduleError::Unsupported(expr.to_string()));
    };
    let (amount, unit) = body.split_at(unit_at);
    let amount = parse_in_range(amount, 1..=100_000, expr)?;
    let every = match unit {
        "s" => Duration::seconds(amount),
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        _ => return Err(ScheduleError::Unsupported(expr.to_string())),
    };
    Ok(Schedule::Interval(every))
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let trimmed = expr.trim();
        match trimmed {
            "@hourly" => return Ok(Schedule::Interval(Duration::hours(1))),
            "@daily" => return Ok(Schedule::DailyAt { hour: 0, minute: 0 }),
            _ => {}
        }
        if let Some(body) = trimmed.strip_prefix("@every ") {
            return parse_every(body, expr);
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() != 5 || fields[2..].iter().any(|f| *f != "*") {
            return Err(ScheduleError::Unsupported(expr.to_string()));
        }

        match (fields[0], fields[1]) {
            (minute, "*") if minute.starts_with("*/") => {
                let n = parse_in_range(&minute[2..], 1..=59, expr)?;
                Ok(Schedule::Interval(Duration::minutes(n)))
            }
            ("0", hour) if hour.starts_with("*/") => {
                let n = parse_in_range(&hour[2..], 1..=23, expr)?;
                Ok(Schedule::Interval(Duration::hours(n)))
            }
            (minute, hour) => {
                let minute = parse_in_range(minute, 0..=59, expr)?;
                let hour = parse_in_range(hour, 0..=23, expr)?;
                Ok(Schedule::DailyAt {
                    hour: hour as u32,
                    minute: minute as u32,
                })
            }
        }
    }
}
