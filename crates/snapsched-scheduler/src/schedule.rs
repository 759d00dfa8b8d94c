use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime,
    SecondsFormat, TimeZone, Timelike, Utc,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Upper bound on a single interval (roughly a millennium).
const MAX_INTERVAL_SECS: i64 = 1000 * 366 * 86_400;

/// Calendar unit of a schedule spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl IntervalUnit {
    /// Canonical suffix used when a spec is rendered back to a string.
    pub fn suffix(self) -> &'static str {
        match self {
            IntervalUnit::Minute => "m",
            IntervalUnit::Hour => "h",
            IntervalUnit::Day => "d",
            IntervalUnit::Week => "w",
            IntervalUnit::Month => "M",
            IntervalUnit::Year => "Y",
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "m" => Some(IntervalUnit::Minute),
            "h" => Some(IntervalUnit::Hour),
            "d" => Some(IntervalUnit::Day),
            "w" => Some(IntervalUnit::Week),
            "M" | "mo" => Some(IntervalUnit::Month),
            "Y" | "y" => Some(IntervalUnit::Year),
            _ => None,
        }
    }

    /// Fixed length in seconds; `None` for calendar units.
    fn seconds(self) -> Option<i64> {
        match self {
            IntervalUnit::Minute => Some(60),
            IntervalUnit::Hour => Some(3_600),
            IntervalUnit::Day => Some(86_400),
            IntervalUnit::Week => Some(7 * 86_400),
            IntervalUnit::Month | IntervalUnit::Year => None,
        }
    }

    fn months(self) -> u32 {
        match self {
            IntervalUnit::Year => 12,
            _ => 1,
        }
    }
}

/// How far apart consecutive points of a progression are.
enum Step {
    Seconds(i64),
    Months(u32),
}

/// A parsed schedule spec such as `"1h"`, `"2w"` or `"6M"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScheduleSpec {
    pub multiplier: u32,
    pub unit: IntervalUnit,
}

impl ScheduleSpec {
    fn step(&self) -> Step {
        match self.unit.seconds() {
            Some(secs) => Step::Seconds(secs * i64::from(self.multiplier)),
            None => Step::Months(self.unit.months() * self.multiplier),
        }
    }

    fn approx_seconds(&self) -> i64 {
        match self.step() {
            Step::Seconds(secs) => secs,
            Step::Months(months) => i64::from(months) * 31 * 86_400,
        }
    }

    /// The `k`-th point of `start + k * interval`, or `None` past chrono's range.
    ///
    /// Calendar units add months to `start` itself rather than to the previous
    /// point, so a schedule started on the 31st comes back to the 31st after
    /// being clamped to a shorter month.
    pub fn point(&self, start: DateTime<Utc>, k: u64) -> Option<DateTime<Utc>> {
        match self.step() {
            Step::Seconds(step) => {
                let secs = step.checked_mul(i64::try_from(k).ok()?)?;
                start.checked_add_signed(Duration::try_seconds(secs)?)
            }
            Step::Months(step) => {
                let total = u32::try_from(k.checked_mul(u64::from(step))?).ok()?;
                start.checked_add_months(Months::new(total))
            }
        }
    }

    /// Index of the last progression point at or before `now`.
    fn floor_index(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> Option<u64> {
        if now < start {
            return None;
        }
        match self.step() {
            Step::Seconds(step) => {
                let elapsed_ms = (now - start).num_milliseconds();
                u64::try_from(elapsed_ms / (step * 1000)).ok()
            }
            Step::Months(step) => {
                let months = (i64::from(now.year()) - i64::from(start.year())) * 12
                    + i64::from(now.month())
                    - i64::from(start.month());
                let mut k = u64::try_from(months.max(0)).ok()? / u64::from(step);
                // Day-of-month and time-of-day can put the estimate one step off.
                while k > 0 && self.point(start, k).map_or(true, |p| p > now) {
                    k -= 1;
                }
                while self.point(start, k + 1).is_some_and(|p| p <= now) {
                    k += 1;
                }
                Some(k)
            }
        }
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.multiplier, self.unit.suffix())
    }
}

impl FromStr for ScheduleSpec {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        parse_spec(s)
    }
}

impl TryFrom<String> for ScheduleSpec {
    type Error = SchedulerError;

    fn try_from(s: String) -> Result<Self> {
        parse_spec(&s)
    }
}

impl From<ScheduleSpec> for String {
    fn from(spec: ScheduleSpec) -> Self {
        spec.to_string()
    }
}

/// Parse a schedule spec: a positive multiplier followed by a unit suffix.
///
/// Units: `m` minute, `h` hour, `d` day, `w` week, `M`/`mo` month, `Y`/`y` year.
pub fn parse_spec(spec: &str) -> Result<ScheduleSpec> {
    let spec = spec.trim();
    let split = spec
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(spec.len());
    let (digits, suffix) = spec.split_at(split);

    if digits.is_empty() {
        return Err(SchedulerError::InvalidSpec(format!(
            "missing multiplier in schedule {spec:?}"
        )));
    }
    let multiplier: u32 = digits.parse().map_err(|_| {
        SchedulerError::InvalidSpec(format!("multiplier out of range in schedule {spec:?}"))
    })?;
    if multiplier == 0 {
        return Err(SchedulerError::InvalidSpec(format!(
            "multiplier must be positive in schedule {spec:?}"
        )));
    }
    let unit = IntervalUnit::from_suffix(suffix).ok_or_else(|| {
        SchedulerError::InvalidSpec(format!(
            "unknown unit {suffix:?} in schedule {spec:?}, expected one of m, h, d, w, M, Y"
        ))
    })?;

    let parsed = ScheduleSpec { multiplier, unit };
    if parsed.approx_seconds() > MAX_INTERVAL_SECS {
        return Err(SchedulerError::InvalidSpec(format!(
            "interval too large in schedule {spec:?}"
        )));
    }
    Ok(parsed)
}

/// Smallest point of `start + k * interval` (k >= 0) that is at or after `now`.
pub fn next_due(start: DateTime<Utc>, spec: &ScheduleSpec, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(k) = spec.floor_index(start, now) else {
        return start;
    };
    let at = spec.point(start, k).unwrap_or(DateTime::<Utc>::MAX_UTC);
    if at == now {
        return at;
    }
    spec.point(start, k + 1).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Greatest point of `start + k * interval` that is at or before `now`.
///
/// `None` while `now` is still before `start`.
pub fn last_due(
    start: DateTime<Utc>,
    spec: &ScheduleSpec,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    spec.point(start, spec.floor_index(start, now)?)
}

/// Top of the next natural period for the spec's unit, used when no start is given.
///
/// The multiplier is ignored: a `"6h"` schedule created at 10:15 starts at 11:00.
pub fn default_start(spec: &ScheduleSpec, now: DateTime<Utc>) -> DateTime<Utc> {
    let date = now.date_naive();
    let midnight = |d: NaiveDate| d.and_time(NaiveTime::MIN);
    let next = match spec.unit {
        IntervalUnit::Minute => {
            DateTime::from_timestamp((now.timestamp().div_euclid(60) + 1) * 60, 0)
                .map(|dt| dt.naive_utc())
        }
        IntervalUnit::Hour => {
            DateTime::from_timestamp((now.timestamp().div_euclid(3_600) + 1) * 3_600, 0)
                .map(|dt| dt.naive_utc())
        }
        IntervalUnit::Day => date.succ_opt().map(midnight),
        IntervalUnit::Week => {
            let ahead = 7 - u64::from(now.weekday().num_days_from_monday());
            date.checked_add_days(Days::new(ahead)).map(midnight)
        }
        IntervalUnit::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
            .and_then(|d| d.checked_add_months(Months::new(1)))
            .map(midnight),
        IntervalUnit::Year => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1).map(midnight),
    };
    next.map(|n| Utc.from_utc_datetime(&n)).unwrap_or(now)
}

/// Parse a user-supplied start time. Values without an offset are UTC.
pub fn parse_start(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        let dt = dt.with_timezone(&Utc);
        return Ok(dt.with_nanosecond(0).unwrap_or(dt));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }
    Err(SchedulerError::InvalidSpec(format!(
        "cannot parse start time {s:?}, expected ISO 8601 such as 2024-01-01T00:00:00"
    )))
}

/// Canonical stored form of a timestamp: `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
