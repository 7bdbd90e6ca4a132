//! Collection cadence: frequency classes, validated schedules, and slot math.
//!
//! Everything here is a pure function of the configuration and the supplied
//! `now`. No counters are kept, so a restarted process computes the same next
//! fire time as the one it replaced.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// How often a series is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrequencyClass {
    #[serde(rename = "realtime")]
    Realtime,
    #[serde(rename = "15min")]
    FifteenMin,
    #[serde(rename = "hourly")]
    Hourly,
    #[serde(rename = "daily")]
    Daily,
    #[serde(rename = "weekly")]
    Weekly,
    #[serde(rename = "monthly")]
    Monthly,
    /// Every minute; for exercising the pipeline.
    #[serde(rename = "test")]
    Test,
}

impl FrequencyClass {
    /// Returns the configuration string for this class.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FrequencyClass::Realtime => "realtime",
            FrequencyClass::FifteenMin => "15min",
            FrequencyClass::Hourly => "hourly",
            FrequencyClass::Daily => "daily",
            FrequencyClass::Weekly => "weekly",
            FrequencyClass::Monthly => "monthly",
            FrequencyClass::Test => "test",
        }
    }

    /// Returns true if `schedule_hour` affects this class.
    #[must_use]
    pub fn uses_hour(&self) -> bool {
        matches!(
            self,
            FrequencyClass::Daily | FrequencyClass::Weekly | FrequencyClass::Monthly
        )
    }

    /// Returns true if `schedule_minute` affects this class.
    #[must_use]
    pub fn uses_minute(&self) -> bool {
        self.uses_hour() || matches!(self, FrequencyClass::Hourly)
    }

    /// Approximate period length. Monthly uses the longest month.
    #[must_use]
    pub fn nominal_period(&self) -> Duration {
        match self {
            FrequencyClass::Realtime | FrequencyClass::Test => Duration::minutes(1),
            FrequencyClass::FifteenMin => Duration::minutes(15),
            FrequencyClass::Hourly => Duration::hours(1),
            FrequencyClass::Daily => Duration::days(1),
            FrequencyClass::Weekly => Duration::days(7),
            FrequencyClass::Monthly => Duration::days(31),
        }
    }

    /// Returns the start of the canonical slot containing `ts`.
    ///
    /// Slots are period starts: minute, quarter-hour, top of hour,
    /// UTC midnight, Monday midnight, and the 1st of the month.
    #[must_use]
    pub fn slot_floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            FrequencyClass::Realtime | FrequencyClass::Test => floor_secs(ts, 60),
            FrequencyClass::FifteenMin => floor_secs(ts, 900),
            FrequencyClass::Hourly => floor_secs(ts, 3600),
            FrequencyClass::Daily => at(ts.date_naive(), NaiveTime::MIN),
            FrequencyClass::Weekly => at(monday_of(ts.date_naive()), NaiveTime::MIN),
            FrequencyClass::Monthly => at(first_of_month(ts.date_naive()), NaiveTime::MIN),
        }
    }

    /// Returns the slot following `slot`. `slot` must be slot-aligned.
    #[must_use]
    pub fn next_slot(&self, slot: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            FrequencyClass::Monthly => {
                at(add_month(first_of_month(slot.date_naive())), NaiveTime::MIN)
            }
            _ => slot + self.nominal_period(),
        }
    }
}

impl fmt::Display for FrequencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrequencyClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "realtime" => Ok(FrequencyClass::Realtime),
            "15min" => Ok(FrequencyClass::FifteenMin),
            "hourly" => Ok(FrequencyClass::Hourly),
            "daily" => Ok(FrequencyClass::Daily),
            "weekly" => Ok(FrequencyClass::Weekly),
            "monthly" => Ok(FrequencyClass::Monthly),
            "test" => Ok(FrequencyClass::Test),
            other => Err(ConfigError::UnknownFrequency(other.to_string())),
        }
    }
}

/// A validated cadence for one series.
///
/// Can only be built through [`ScheduleConfig::new`], so hour and minute are
/// always in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduleConfig {
    frequency: FrequencyClass,
    hour: u32,
    minute: u32,
}

impl ScheduleConfig {
    /// Creates a schedule.
    ///
    /// # Errors
    /// Returns `ConfigError` if `hour > 23` or `minute > 59`.
    pub fn new(frequency: FrequencyClass, hour: u32, minute: u32) -> Result<Self, ConfigError> {
        if hour > 23 {
            return Err(ConfigError::HourOutOfRange(hour));
        }
        if minute > 59 {
            return Err(ConfigError::MinuteOutOfRange(minute));
        }
        Ok(Self {
            frequency,
            hour,
            minute,
        })
    }

    /// Parses a schedule from its configuration strings.
    ///
    /// # Errors
    /// Returns `ConfigError` for an unknown frequency or out-of-range time.
    pub fn parse(update_freq: &str, hour: u32, minute: u32) -> Result<Self, ConfigError> {
        Self::new(update_freq.parse()?, hour, minute)
    }

    #[must_use]
    pub fn frequency(&self) -> FrequencyClass {
        self.frequency
    }

    #[must_use]
    pub fn hour(&self) -> u32 {
        self.hour
    }

    #[must_use]
    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// Returns the first fire time strictly after `now`.
    #[must_use]
    pub fn next_fire(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let minute = i64::from(self.minute);
        match self.frequency {
            FrequencyClass::Realtime | FrequencyClass::Test => {
                floor_secs(now, 60) + Duration::minutes(1)
            }
            FrequencyClass::FifteenMin => floor_secs(now, 900) + Duration::minutes(15),
            FrequencyClass::Hourly => {
                let candidate = floor_secs(now, 3600) + Duration::minutes(minute);
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::hours(1)
                }
            }
            FrequencyClass::Daily => {
                let candidate = at(now.date_naive(), self.time_of_day());
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
            FrequencyClass::Weekly => {
                let candidate = at(monday_of(now.date_naive()), self.time_of_day());
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::days(7)
                }
            }
            FrequencyClass::Monthly => {
                let first = first_of_month(now.date_naive());
                let candidate = at(first, self.time_of_day());
                if candidate > now {
                    candidate
                } else {
                    at(add_month(first), self.time_of_day())
                }
            }
        }
    }

    /// Returns true if a fire time lies in `(since, now]`.
    #[must_use]
    pub fn fired_between(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.next_fire(since) <= now
    }

    fn time_of_day(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for ScheduleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frequency {
            FrequencyClass::Hourly => write!(f, "hourly at :{:02}", self.minute),
            FrequencyClass::Daily | FrequencyClass::Weekly | FrequencyClass::Monthly => write!(
                f,
                "{} at {:02}:{:02} UTC",
                self.frequency, self.hour, self.minute
            ),
            other => write!(f, "{other}"),
        }
    }
}

fn floor_secs(ts: DateTime<Utc>, step: i64) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let excess = secs.rem_euclid(step);
    ts - Duration::seconds(excess) - Duration::nanoseconds(i64::from(ts.timestamp_subsec_nanos()))
}

fn at(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

fn add_month(first: NaiveDate) -> NaiveDate {
    first
        .checked_add_months(Months::new(1))
        .unwrap_or(NaiveDate::MAX)
}
