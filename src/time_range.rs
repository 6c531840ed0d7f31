//! The active observability window.
//!
//! A range is either a named quick range (`last15Minutes`, `last7Days`, ...)
//! anchored at "now", or a custom explicit range. Both carry resolved epoch
//! seconds so callees never need to know which mode produced them.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

/// Quick ranges offered by the time picker, shortest first.
pub const QUICK_RANGES: &[&str] = &[
    "last5Minutes",
    "last15Minutes",
    "last30Minutes",
    "last1Hour",
    "last3Hours",
    "last6Hours",
    "last12Hours",
    "last1Day",
    "last2Days",
    "last7Days",
    "last30Days",
    "last90Days",
    "last1Year",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TimeMode {
    Custom,
    Quick(String),
}

impl From<String> for TimeMode {
    fn from(value: String) -> Self {
        if value == "custom" {
            Self::Custom
        } else {
            Self::Quick(value)
        }
    }
}

impl From<TimeMode> for String {
    fn from(mode: TimeMode) -> String {
        match mode {
            TimeMode::Custom => "custom".to_string(),
            TimeMode::Quick(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub time: TimeMode,
    pub time_start: i64,
    pub time_end: i64,
}

/// Length in seconds of a quick range name like `last15Minutes`.
pub fn quick_range_seconds(name: &str) -> Option<i64> {
    lazy_static::lazy_static! {
        static ref QUICK: regex::Regex =
            regex::Regex::new(r"^last(\d+)(Minutes?|Hours?|Days?|Years?)$").unwrap();
    }
    let caps = QUICK.captures(name)?;
    let amount: i64 = caps[1].parse().ok()?;
    let unit = match caps[2].trim_end_matches('s') {
        "Minute" => 60,
        "Hour" => 60 * 60,
        "Day" => 24 * 60 * 60,
        "Year" => 365 * 24 * 60 * 60,
        _ => return None,
    };
    amount.checked_mul(unit).filter(|secs| *secs > 0)
}

/// Current wall clock in epoch seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl TimeRange {
    /// Quick range ending at `now`.
    pub fn quick(name: &str, now: i64) -> Result<Self> {
        let secs = quick_range_seconds(name).ok_or_else(|| {
            RuntimeError::Configuration(format!("unknown quick time range \"{name}\""))
        })?;
        Ok(Self {
            time: TimeMode::Quick(name.to_string()),
            time_start: now - secs,
            time_end: now,
        })
    }

    /// Explicit range; `start` must not be after `end`.
    pub fn custom(start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(RuntimeError::Configuration(format!(
                "time range start {start} is after end {end}"
            )));
        }
        Ok(Self {
            time: TimeMode::Custom,
            time_start: start,
            time_end: end,
        })
    }

    /// Re-anchor a quick range at `now`. Custom ranges are returned unchanged.
    pub fn refreshed(&self, now: i64) -> Self {
        match &self.time {
            TimeMode::Quick(name) => Self::quick(name, now).unwrap_or_else(|_| self.clone()),
            TimeMode::Custom => self.clone(),
        }
    }

    pub fn duration_secs(&self) -> i64 {
        self.time_end - self.time_start
    }
}
