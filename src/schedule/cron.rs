//! Five-field cron expressions
//!
//! `minute hour day-of-month month day-of-week`, each field accepting `*`,
//! `a`, `a-b`, `*/n`, `a-b/n`, `a/n` and comma lists. Months and weekdays
//! also accept three-letter names; weekday `7` is Sunday. When both
//! day-of-month and day-of-week are restricted, a time matches if either
//! one does.

use crate::core::error::ScheduleError;
use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

const MONTHS: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAYS: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// How far `next_after` searches before giving up
const SEARCH_DAYS: i64 = 366 * 5;

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// First accepted name maps to this value
    name_base: u32,
}

const MINUTE: Field = Field { name: "minute", min: 0, max: 59, names: &[], name_base: 0 };
const HOUR: Field = Field { name: "hour", min: 0, max: 23, names: &[], name_base: 0 };
const DAY_OF_MONTH: Field = Field { name: "day-of-month", min: 1, max: 31, names: &[], name_base: 0 };
const MONTH: Field = Field { name: "month", min: 1, max: 12, names: MONTHS, name_base: 1 };
const DAY_OF_WEEK: Field = Field { name: "day-of-week", min: 0, max: 7, names: WEEKDAYS, name_base: 0 };

/// A parsed cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let malformed = |reason: String| ScheduleError::Malformed {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(malformed(format!("expected 5 fields, found {}", fields.len())));
        }

        let minutes = parse_field(fields[0], &MINUTE).map_err(malformed)?;
        let hours = parse_field(fields[1], &HOUR).map_err(malformed)?;
        let days_of_month = parse_field(fields[2], &DAY_OF_MONTH).map_err(malformed)?;
        let months = parse_field(fields[3], &MONTH).map_err(malformed)?;
        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK).map_err(malformed)?;

        // 7 is an alias for Sunday
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: fields.join(" "),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the minute containing `t` matches
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        bit(self.minutes, t.minute())
            && bit(self.hours, t.hour())
            && bit(self.months, t.month())
            && self.day_matches(t)
    }

    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom = bit(self.days_of_month, t.day());
        let dow = bit(self.days_of_week, t.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First matching minute strictly after `t`
    pub fn next_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = truncate_to_minute(t) + Duration::minutes(1);
        let limit = candidate + Duration::days(SEARCH_DAYS);

        while candidate <= limit {
            if !bit(self.months, candidate.month()) || !self.day_matches(candidate) {
                let midnight = truncate_to_day(candidate);
                candidate = midnight + Duration::days(1);
                continue;
            }
            if !bit(self.hours, candidate.hour()) {
                candidate = candidate.duration_trunc(Duration::hours(1)).ok()? + Duration::hours(1);
                continue;
            }
            if bit(self.minutes, candidate.minute()) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }

        None
    }

    /// The next `count` firing times after `t`
    pub fn upcoming(&self, t: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut result = Vec::with_capacity(count);
        let mut cursor = t;
        while result.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    result.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        result
    }
}

impl FromStr for CronExpr {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronExpr::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Drop seconds and sub-seconds
pub fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::minutes(1)).unwrap_or(t)
}

fn truncate_to_day(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::days(1)).unwrap_or(t)
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn parse_field(field: &str, spec: &Field) -> Result<u64, String> {
    let mut mask = 0u64;

    for part in field.split(',') {
        if part.is_empty() {
            return Err(format!("empty list item in {} field", spec.name));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}' in {} field", step, spec.name))?;
                if step == 0 {
                    return Err(format!("zero step in {} field", spec.name));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, spec)?, parse_value(b, spec)?)
        } else {
            let v = parse_value(range, spec)?;
            // `a/n` means from a to the end of the range
            if step.is_some() {
                (v, spec.max)
            } else {
                (v, v)
            }
        };

        if lo > hi {
            return Err(format!("range {}-{} is backwards in {} field", lo, hi, spec.name));
        }

        for v in (lo..=hi).step_by(step.unwrap_or(1) as usize) {
            mask |= 1u64 << v;
        }
    }

    Ok(mask)
}

fn parse_value(s: &str, spec: &Field) -> Result<u32, String> {
    let value = match s.parse::<u32>() {
        Ok(v) => v,
        Err(_) => {
            let lower = s.to_ascii_lowercase();
            spec.names
                .iter()
                .position(|n| *n == lower)
                .map(|i| i as u32 + spec.name_base)
                .ok_or_else(|| format!("invalid value '{}' in {} field", s, spec.name))?
        }
    };

    if value < spec.min || value > spec.max {
        return Err(format!(
            "value {} out of range {}-{} in {} field",
            value, spec.min, spec.max, spec.name
        ));
    }
    Ok(value)
}
