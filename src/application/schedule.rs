//! # Recurrence Schedule
//!
//! Cron handling for recurring extractions.
//!
//! The next fire instant is always computed from "now" by the pure
//! [`next_fire_after`] function; no iterator is carried between cycles, so a
//! cycle that overruns its slot simply picks the next slot after it ends.
//!
//! # Cron Expression Format
//!
//! Both the classic 5-field form and the 6/7-field form with seconds are
//! accepted. A 5-field expression runs at second `0`:
//! ```text
//! min  hour  day  month  weekday          ->  "0 */15 * * * *"
//! */15 *     *    *      *
//! ```
//!
//! 5- and 6-field expressions use crontab weekday numbers (`0` or `7` is
//! Sunday, `1` is Monday). The 7-field form with a year is passed to the
//! `cron` crate as is, where `1` is Sunday.

use crate::domain::errors::{ExtractError, Result};
use chrono::{DateTime, Local, TimeZone};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let invalid = |reason: &dyn std::fmt::Display| {
            ExtractError::ConfigError(format!("Invalid cron expression '{}': {}", expression, reason))
        };

        let mut fields: Vec<String> = trimmed.split_whitespace().map(str::to_string).collect();
        if fields.len() == 5 {
            fields.insert(0, "0".to_string());
        }
        if fields.len() == 6 {
            let weekday = crontab_weekdays(&fields[5]).ok_or_else(|| invalid(&"bad day-of-week field"))?;
            fields[5] = weekday;
        }

        let schedule = Schedule::from_str(&fields.join(" ")).map_err(|e| invalid(&e))?;

        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    /// The expression as the user wrote it.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }
}

const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Rewrites a crontab day-of-week field (`0`/`7` = Sunday) as an explicit
/// list in `cron` crate numbering (`1` = Sunday).
fn crontab_weekdays(field: &str) -> Option<String> {
    if field == "*" || field == "?" {
        return Some(field.to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
            None => (item, 1),
        };
        let (start, end) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((from, to)) => (weekday_number(from)?, weekday_number(to)?),
            None if step > 1 => (weekday_number(range)?, 7),
            None => {
                let day = weekday_number(range)?;
                (day, day)
            }
        };
        if start > end {
            return None;
        }
        for day in (start..=end).step_by(step) {
            days[day % 7] = true;
        }
    }

    if days.iter().all(|d| *d) {
        return Some("*".to_string());
    }
    let list: Vec<String> = days
        .iter()
        .enumerate()
        .filter(|(_, set)| **set)
        .map(|(day, _)| (day + 1).to_string())
        .collect();
    (!list.is_empty()).then(|| list.join(","))
}

fn weekday_number(token: &str) -> Option<usize> {
    if let Ok(n) = token.parse::<usize>() {
        return (n <= 7).then_some(n);
    }
    WEEKDAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
}

/// First occurrence strictly after `now`, or `None` if the schedule has none
/// left (e.g. a fixed year in the past).
pub fn next_fire_after<Tz: TimeZone>(schedule: &CronSchedule, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    schedule.schedule.after(now).next()
}

/// Time to wait from `now` until `next`, clamped at zero.
pub fn wait_until<Tz: TimeZone>(next: &DateTime<Tz>, now: &DateTime<Tz>) -> Duration {
    next.clone()
        .signed_duration_since(now.clone())
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Rough, human-friendly rendering of a wait ("3 hours", "a few seconds").
pub fn humanize(wait: Duration) -> String {
    let secs = wait.as_secs();
    let (value, unit) = match secs {
        0..=44 => return "a few seconds".to_string(),
        45..=89 => return "a minute".to_string(),
        90..=2_699 => ((secs + 30) / 60, "minutes"),
        2_700..=5_399 => return "an hour".to_string(),
        5_400..=79_199 => ((secs + 1_800) / 3_600, "hours"),
        79_200..=129_599 => return "a day".to_string(),
        _ => ((secs + 43_200) / 86_400, "days"),
    };
    format!("{} {}", value, unit)
}

/// Whether (and when) the job runs again.
#[derive(Debug, Clone)]
pub enum ScheduleState {
    OneShot,
    Recurring {
        schedule: CronSchedule,
        next_fire: Option<DateTime<Local>>,
    },
}

impl ScheduleState {
    pub fn new(schedule: Option<CronSchedule>) -> Self {
        match schedule {
            Some(schedule) => ScheduleState::Recurring {
                schedule,
                next_fire: None,
            },
            None => ScheduleState::OneShot,
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, ScheduleState::Recurring { .. })
    }

    /// The instant computed by the last [`advance`](Self::advance).
    pub fn next_fire(&self) -> Option<DateTime<Local>> {
        match self {
            ScheduleState::Recurring { next_fire, .. } => *next_fire,
            ScheduleState::OneShot => None,
        }
    }

    /// Recomputes the next fire instant from `now`.
    ///
    /// Returns the instant and the wait, or `None` when the job should stop.
    pub fn advance(&mut self, now: DateTime<Local>) -> Option<(DateTime<Local>, Duration)> {
        match self {
            ScheduleState::OneShot => None,
            ScheduleState::Recurring {
                schedule,
                next_fire,
            } => {
                let next = next_fire_after(schedule, &now)?;
                *next_fire = Some(next);
                Some((next, wait_until(&next, &now)))
            }
        }
    }
}
