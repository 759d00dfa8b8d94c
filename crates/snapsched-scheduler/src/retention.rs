//! Retention grammar and the pruning decision.
//!
//! A retention spec such as `"24h7d4w"` keeps the newest snapshot of each of
//! the 24 most recent hours, 7 most recent days and 4 most recent ISO weeks.
//! The union of every period's keep set survives; everything else is pruned.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::types::SnapshotRecord;

/// Calendar bucket (or plain count) a retention entry counts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RetentionPeriod {
    #[serde(rename = "h")]
    Hour,
    #[serde(rename = "d")]
    Day,
    #[serde(rename = "w")]
    Week,
    #[serde(rename = "M")]
    Month,
    #[serde(rename = "Y")]
    Year,
    /// Keep the N newest snapshots regardless of calendar.
    #[serde(rename = "n")]
    Count,
}

impl RetentionPeriod {
    pub fn as_char(self) -> char {
        match self {
            RetentionPeriod::Hour => 'h',
            RetentionPeriod::Day => 'd',
            RetentionPeriod::Week => 'w',
            RetentionPeriod::Month => 'M',
            RetentionPeriod::Year => 'Y',
            RetentionPeriod::Count => 'n',
        }
    }

    /// `m` and `M` both mean month: there is no minutely retention.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'h' => Some(RetentionPeriod::Hour),
            'd' => Some(RetentionPeriod::Day),
            'w' => Some(RetentionPeriod::Week),
            'M' | 'm' => Some(RetentionPeriod::Month),
            'Y' | 'y' => Some(RetentionPeriod::Year),
            'n' => Some(RetentionPeriod::Count),
            _ => None,
        }
    }

    /// Bucket identifier for a snapshot. Equal keys share a bucket.
    fn bucket(self, ts: DateTime<Utc>, position: usize) -> i64 {
        match self {
            RetentionPeriod::Hour => ts.timestamp().div_euclid(3_600),
            RetentionPeriod::Day => i64::from(ts.date_naive().num_days_from_ce()),
            RetentionPeriod::Week => {
                let week = ts.iso_week();
                i64::from(week.year()) * 100 + i64::from(week.week())
            }
            RetentionPeriod::Month => i64::from(ts.year()) * 12 + i64::from(ts.month0()),
            RetentionPeriod::Year => i64::from(ts.year()),
            RetentionPeriod::Count => position as i64,
        }
    }
}

/// Per-period keep counts for one path. Ordered, so rendering is canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetentionSpec(BTreeMap<RetentionPeriod, u32>);

impl RetentionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `retention-spec-or-period` / `retention-count` argument pair.
    ///
    /// With a count, the first argument must be a single period letter
    /// (`h d w M m Y y n`, e.g. `"d"` with count `"7"`). Without one it is a
    /// compound spec such as `"7d4w"`.
    pub fn parse(spec_or_period: &str, count: Option<&str>) -> Result<Self> {
        let spec_or_period = spec_or_period.trim();
        match count {
            Some(count) => {
                let mut chars = spec_or_period.chars();
                let period = match (chars.next(), chars.next()) {
                    (Some(c), None) => RetentionPeriod::from_char(c),
                    _ => None,
                }
                .ok_or_else(|| {
                    SchedulerError::InvalidSpec(format!(
                        "retention period must be one of h, d, w, M, Y, n, got {spec_or_period:?}"
                    ))
                })?;
                let count = parse_count(count.trim(), spec_or_period)?;
                Ok(Self(BTreeMap::from([(period, count)])))
            }
            None => Self::parse_compound(spec_or_period),
        }
    }

    fn parse_compound(spec: &str) -> Result<Self> {
        if spec.is_empty() {
            return Err(SchedulerError::InvalidSpec(
                "retention spec must not be empty".to_string(),
            ));
        }
        let mut entries = BTreeMap::new();
        let mut digits = String::new();
        for c in spec.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let period = RetentionPeriod::from_char(c).ok_or_else(|| {
                SchedulerError::InvalidSpec(format!(
                    "unknown retention period {c:?} in {spec:?}"
                ))
            })?;
            if digits.is_empty() {
                return Err(SchedulerError::InvalidSpec(format!(
                    "missing count before {c:?} in {spec:?}"
                )));
            }
            let count = parse_count(&digits, spec)?;
            if entries.insert(period, count).is_some() {
                return Err(SchedulerError::InvalidSpec(format!(
                    "retention period {} repeated in {spec:?}",
                    period.as_char()
                )));
            }
            digits.clear();
        }
        if !digits.is_empty() {
            return Err(SchedulerError::InvalidSpec(format!(
                "trailing count without period in {spec:?}"
            )));
        }
        Ok(Self(entries))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, period: RetentionPeriod) -> Option<u32> {
        self.0.get(&period).copied()
    }

    pub fn insert(&mut self, period: RetentionPeriod, count: u32) -> Option<u32> {
        self.0.insert(period, count)
    }

    pub fn remove(&mut self, period: RetentionPeriod) -> Option<u32> {
        self.0.remove(&period)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RetentionPeriod, u32)> + '_ {
        self.0.iter().map(|(p, c)| (*p, *c))
    }
}

impl fmt::Display for RetentionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (period, count) in self.iter() {
            write!(f, "{}{}", count, period.as_char())?;
        }
        Ok(())
    }
}

fn parse_count(digits: &str, spec: &str) -> Result<u32> {
    match digits.parse::<u32>() {
        Ok(0) => Err(SchedulerError::InvalidSpec(format!(
            "retention count must be positive in {spec:?}"
        ))),
        Ok(n) => Ok(n),
        Err(_) => Err(SchedulerError::InvalidSpec(format!(
            "invalid retention count {digits:?} in {spec:?}"
        ))),
    }
}

/// Names of the snapshots the policy does not keep.
pub fn select_for_pruning(snapshots: &[SnapshotRecord], policy: &RetentionSpec) -> BTreeSet<String> {
    select_for_pruning_capped(snapshots, policy, usize::MAX)
}

/// Like [`select_for_pruning`], then trims the keep set to the `cap` newest.
///
/// An empty policy keeps everything (subject to the cap). The newest snapshot
/// overall is never selected, whatever the policy or cap.
pub fn select_for_pruning_capped(
    snapshots: &[SnapshotRecord],
    policy: &RetentionSpec,
    cap: usize,
) -> BTreeSet<String> {
    // Newest first; equal timestamps fall back to the lexically greatest name.
    let mut ordered: Vec<&SnapshotRecord> = snapshots.iter().collect();
    ordered.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.name.cmp(&a.name)));

    let mut keep = vec![policy.is_empty(); ordered.len()];
    if let Some(newest) = keep.first_mut() {
        *newest = true;
    }

    for (period, limit) in policy.iter() {
        let mut last_bucket = None;
        let mut kept = 0u32;
        for (i, snap) in ordered.iter().enumerate() {
            if kept >= limit {
                break;
            }
            let bucket = period.bucket(snap.created, i);
            if last_bucket != Some(bucket) {
                keep[i] = true;
                kept += 1;
                last_bucket = Some(bucket);
            }
        }
    }

    let mut kept = 0usize;
    for (i, flag) in keep.iter_mut().enumerate() {
        if !*flag {
            continue;
        }
        if kept >= cap && i > 0 {
            *flag = false;
        } else {
            kept += 1;
        }
    }

    ordered
        .iter()
        .zip(keep)
        .filter(|(_, keep)| !keep)
        .map(|(snap, _)| snap.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn snap(name: &str, created: DateTime<Utc>) -> SnapshotRecord {
        SnapshotRecord {
            name: name.to_string(),
            created,
        }
    }

    fn hourly(days: i64) -> Vec<SnapshotRecord> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..days * 24)
            .map(|h| {
                let ts = start + Duration::hours(h);
                snap(&format!("scheduled-{}", ts.format("%Y-%m-%d-%H_%M_%S")), ts)
            })
            .collect()
    }

    #[test]
    fn parse_compound_and_render_canonically() {
        let spec = RetentionSpec::parse("12m4w7d", None).unwrap();
        assert_eq!(spec.get(RetentionPeriod::Day), Some(7));
        assert_eq!(spec.get(RetentionPeriod::Week), Some(4));
        assert_eq!(spec.get(RetentionPeriod::Month), Some(12));
        assert_eq!(spec.to_string(), "7d4w12M");
    }

    #[test]
    fn parse_period_with_count() {
        let spec = RetentionSpec::parse("h", Some("24")).unwrap();
        assert_eq!(spec.get(RetentionPeriod::Hour), Some(24));
        assert_eq!(spec.len(), 1);
    }

    #[test]
    fn parse_rejects_bad_retention() {
        for (spec, count) in [
            ("", None),
            ("7", None),
            ("d", None),
            ("7x", None),
            ("0d", None),
            ("7d7d", None),
            ("dd", Some("3")),
            ("7", Some("3")),
            ("d", Some("zero")),
            ("d", Some("0")),
        ] {
            assert!(
                matches!(
                    RetentionSpec::parse(spec, count),
                    Err(SchedulerError::InvalidSpec(_))
                ),
                "{spec:?} {count:?}"
            );
        }
    }

    #[test]
    fn thirty_days_hourly_with_24h7d4w() {
        // 2024-01-01 is a Monday; the last snapshot is Tue 2024-01-30 23:00.
        let snaps = hourly(30);
        let policy = RetentionSpec::parse("24h7d4w", None).unwrap();
        let pruned = select_for_pruning(&snaps, &policy);

        // 24 hourly + 6 new daily (Jan 24-29) + 2 new weekly (Jan 14, Jan 21).
        assert_eq!(snaps.len() - pruned.len(), 32);
        assert!(!pruned.contains("scheduled-2024-01-30-23_00_00"));
        assert!(!pruned.contains("scheduled-2024-01-30-00_00_00"));
        assert!(!pruned.contains("scheduled-2024-01-24-23_00_00"));
        assert!(!pruned.contains("scheduled-2024-01-21-23_00_00"));
        assert!(!pruned.contains("scheduled-2024-01-14-23_00_00"));
        assert!(pruned.contains("scheduled-2024-01-23-23_00_00"));
        assert!(pruned.contains("scheduled-2024-01-07-23_00_00"));
    }

    #[test]
    fn count_retention_keeps_newest_n() {
        let snaps = hourly(1);
        let policy = RetentionSpec::parse("n", Some("3")).unwrap();
        let pruned = select_for_pruning(&snaps, &policy);
        assert_eq!(pruned.len(), 21);
        assert!(!pruned.contains("scheduled-2024-01-01-21_00_00"));
        assert!(pruned.contains("scheduled-2024-01-01-20_00_00"));
    }

    #[test]
    fn same_bucket_keeps_latest_then_greatest_name() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let snaps = vec![
            snap("a", ts - Duration::hours(2)),
            snap("b", ts),
            snap("c", ts),
        ];
        let policy = RetentionSpec::parse("1d", None).unwrap();
        let pruned = select_for_pruning(&snaps, &policy);
        assert_eq!(pruned, BTreeSet::from(["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn newest_always_survives() {
        let snaps = hourly(2);
        // a policy whose buckets never include the newest is impossible, but the
        // cap can still be zero
        let pruned = select_for_pruning_capped(&snaps, &RetentionSpec::new(), 0);
        assert_eq!(pruned.len(), snaps.len() - 1);
        assert!(!pruned.contains("scheduled-2024-01-02-23_00_00"));
    }

    #[test]
    fn empty_policy_only_enforces_cap() {
        let snaps = hourly(1);
        assert!(select_for_pruning(&snaps, &RetentionSpec::new()).is_empty());
        let pruned = select_for_pruning_capped(&snaps, &RetentionSpec::new(), 10);
        assert_eq!(pruned.len(), 14);
        assert!(pruned.contains("scheduled-2024-01-01-13_00_00"));
        assert!(!pruned.contains("scheduled-2024-01-01-14_00_00"));
    }

    #[test]
    fn no_snapshots_nothing_to_prune() {
        let policy = RetentionSpec::parse("7d", None).unwrap();
        assert!(select_for_pruning(&[], &policy).is_empty());
    }
}
