//! Harvest frequencies, periodic triggers and the persisted schedule reference.
//!
//! A source declares a [`Frequency`]. Non-manual frequencies translate into a
//! [`Trigger`] that the scheduler registers with the task queue as a
//! [`PeriodicTask`].

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Task name registered with the queue for harvesting runs.
pub const HARVEST_TASK: &str = "harvest";

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Unit of a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl Period {
    fn suffix(self) -> &'static str {
        match self {
            Period::Seconds => "s",
            Period::Minutes => "m",
            Period::Hours => "h",
            Period::Days => "d",
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "s" => Some(Period::Seconds),
            "m" => Some(Period::Minutes),
            "h" => Some(Period::Hours),
            "d" => Some(Period::Days),
            _ => None,
        }
    }
}

/// Fire every `every` `period`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub every: u32,
    pub period: Period,
}

impl Interval {
    pub fn new(every: u32, period: Period) -> Self {
        Self { every, period }
    }

    /// Length of one period, None if it does not fit a `Duration`.
    pub fn duration(&self) -> Option<Duration> {
        let every = i64::from(self.every);
        match self.period {
            Period::Seconds => Duration::try_seconds(every),
            Period::Minutes => Duration::try_minutes(every),
            Period::Hours => Duration::try_hours(every),
            Period::Days => Duration::try_days(every),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.every, self.period.suffix())
    }
}

fn interval_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)\s*([smhd])$").expect("valid interval regex"))
}

impl FromStr for Interval {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let caps = interval_pattern()
            .captures(trimmed)
            .ok_or_else(|| AppError::schedule(s, "expected <n>s, <n>m, <n>h or <n>d"))?;
        let every: u32 = caps[1]
            .parse()
            .map_err(|e| AppError::schedule(s, format!("bad count: {e}")))?;
        if every == 0 {
            return Err(AppError::schedule(s, "interval must be greater than zero"));
        }
        let period = Period::from_suffix(&caps[2])
            .ok_or_else(|| AppError::schedule(s, "unknown interval unit"))?;
        let interval = Self { every, period };
        interval
            .duration()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .ok_or_else(|| AppError::schedule(s, "interval is out of range"))?;
        Ok(interval)
    }
}

/// Five-field crontab, `*` meaning any value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crontab {
    pub minute: String,
    pub hour: String,
    pub day_of_week: String,
    pub day_of_month: String,
    pub month_of_year: String,
}

impl Default for Crontab {
    fn default() -> Self {
        Self {
            minute: "*".into(),
            hour: "*".into(),
            day_of_week: "*".into(),
            day_of_month: "*".into(),
            month_of_year: "*".into(),
        }
    }
}

impl Crontab {
    /// Build and validate a crontab from its individual fields.
    pub fn new(
        minute: &str,
        hour: &str,
        day_of_month: &str,
        month_of_year: &str,
        day_of_week: &str,
    ) -> Result<Self> {
        let crontab = Self {
            minute: minute.trim().to_string(),
            hour: hour.trim().to_string(),
            day_of_week: day_of_week.trim().to_string(),
            day_of_month: day_of_month.trim().to_string(),
            month_of_year: month_of_year.trim().to_string(),
        };
        crontab.validate()?;
        Ok(crontab)
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("minute", &self.minute, 0, 59),
            ("hour", &self.hour, 0, 23),
            ("day_of_month", &self.day_of_month, 1, 31),
            ("month_of_year", &self.month_of_year, 1, 12),
            ("day_of_week", &self.day_of_week, 0, 6),
        ];
        for (name, value, min, max) in fields {
            validate_field(value, min, max)
                .map_err(|message| AppError::schedule(self.to_string(), format!("{name}: {message}")))?;
        }
        Ok(())
    }

    /// Equivalent expression in the seconds-first syntax of the `cron` crate.
    ///
    /// Day-of-week numbers are written as names since the crate counts
    /// Sunday as 1 while crontabs count it as 0.
    pub fn to_cron_expression(&self) -> String {
        format!(
            "0 {} {} {} {} {}",
            self.minute,
            self.hour,
            self.day_of_month,
            self.month_of_year,
            day_names(&self.day_of_week)
        )
    }

    fn schedule(&self) -> Result<cron::Schedule> {
        cron::Schedule::from_str(&self.to_cron_expression())
            .map_err(|e| AppError::schedule(self.to_string(), e))
    }
}

impl fmt::Display for Crontab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month_of_year, self.day_of_week
        )
    }
}

impl FromStr for Crontab {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        match parts.as_slice() {
            [minute, hour, dom, month, dow] => Crontab::new(minute, hour, dom, month, dow),
            _ => Err(AppError::schedule(
                s,
                "expected five fields: minute hour day_of_month month_of_year day_of_week",
            )),
        }
    }
}

fn validate_field(field: &str, min: u32, max: u32) -> std::result::Result<(), String> {
    if field.is_empty() {
        return Err("empty field".into());
    }
    for part in field.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (part, None),
        };
        if let Some(step) = step {
            match step.parse::<u32>() {
                Ok(n) if n > 0 => {}
                _ => return Err(format!("invalid step '{step}'")),
            }
        }
        if base == "*" {
            continue;
        }
        let (start, end) = match base.split_once('-') {
            Some((start, end)) => (start, end),
            None => (base, base),
        };
        let parse = |v: &str| {
            v.parse::<u32>()
                .map_err(|_| format!("'{v}' is not a number"))
                .and_then(|n| {
                    if (min..=max).contains(&n) {
                        Ok(n)
                    } else {
                        Err(format!("{n} is outside {min}-{max}"))
                    }
                })
        };
        if parse(start)? > parse(end)? {
            return Err(format!("range '{base}' is reversed"));
        }
    }
    Ok(())
}

fn day_names(field: &str) -> String {
    field
        .split(',')
        .map(|part| {
            let (base, step) = match part.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (part, None),
            };
            let base = base
                .split('-')
                .map(|v| match v.parse::<usize>() {
                    Ok(n) if n < DAY_NAMES.len() => DAY_NAMES[n].to_string(),
                    _ => v.to_string(),
                })
                .collect::<Vec<_>>()
                .join("-");
            match step {
                Some(step) => format!("{base}/{step}"),
                None => base,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Concrete periodic trigger registered with the task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Interval(Interval),
    Crontab(Crontab),
}

impl Trigger {
    /// Next fire time strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval(interval) => from.checked_add_signed(interval.duration()?),
            Trigger::Crontab(crontab) => crontab.schedule().ok()?.after(&from).next(),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval(interval) => interval.fmt(f),
            Trigger::Crontab(crontab) => crontab.fmt(f),
        }
    }
}

impl FromStr for Trigger {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(crontab) = named_crontab(s) {
            return Ok(Trigger::Crontab(crontab));
        }
        if interval_pattern().is_match(s) {
            return s.parse().map(Trigger::Interval);
        }
        s.parse().map(Trigger::Crontab)
    }
}

fn named_crontab(name: &str) -> Option<Crontab> {
    let expr = match name {
        "@hourly" => "0 * * * *",
        "@daily" => "0 0 * * *",
        "@weekly" => "0 0 * * 0",
        "@monthly" => "0 0 1 * *",
        _ => return None,
    };
    expr.parse().ok()
}

/// How often a source should be harvested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Frequency {
    #[default]
    Manual,
    Interval(Interval),
    Crontab(Crontab),
}

impl Frequency {
    /// Periodic trigger for this frequency, if any.
    pub fn trigger(&self) -> Option<Trigger> {
        match self {
            Frequency::Manual => None,
            Frequency::Interval(interval) => Some(Trigger::Interval(*interval)),
            Frequency::Crontab(crontab) => Some(Trigger::Crontab(crontab.clone())),
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Frequency::Manual)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Manual => f.write_str("manual"),
            Frequency::Interval(interval) => interval.fmt(f),
            Frequency::Crontab(crontab) => crontab.fmt(f),
        }
    }
}

impl FromStr for Frequency {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("manual") {
            return Ok(Frequency::Manual);
        }
        Ok(match s.parse::<Trigger>()? {
            Trigger::Interval(interval) => Frequency::Interval(interval),
            Trigger::Crontab(crontab) => Frequency::Crontab(crontab),
        })
    }
}

impl TryFrom<String> for Frequency {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Frequency> for String {
    fn from(value: Frequency) -> Self {
        value.to_string()
    }
}

/// A periodic trigger registered for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicTask {
    /// Unique key within the task queue
    pub name: String,
    pub task: String,
    pub source_id: String,
    pub trigger: Trigger,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_run_count: u64,
}

impl PeriodicTask {
    /// Build an enabled harvest task for a source.
    pub fn harvest(source_id: &str, trigger: Trigger, now: DateTime<Utc>) -> Self {
        Self {
            name: task_name(source_id),
            task: HARVEST_TASK.to_string(),
            source_id: source_id.to_string(),
            trigger,
            enabled: true,
            created_at: now,
            last_run_at: None,
            total_run_count: 0,
        }
    }

    /// Next time this task should fire.
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.trigger
            .next_after(self.last_run_at.unwrap_or(self.created_at))
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run().is_some_and(|next| next <= now)
    }

    pub fn mark_run(&mut self, now: DateTime<Utc>) {
        self.last_run_at = Some(now);
        self.total_run_count += 1;
    }
}

/// Queue key of the harvest task for a source.
pub fn task_name(source_id: &str) -> String {
    format!("{HARVEST_TASK}:{source_id}")
}
