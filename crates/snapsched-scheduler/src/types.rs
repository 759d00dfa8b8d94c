use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::retention::RetentionSpec;
use crate::schedule::{format_ts, ScheduleSpec};

/// A persisted snapshot schedule for one path of one filesystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Store row id; orders schedules of the same path by insertion.
    pub id: i64,
    pub fs: String,
    /// Absolute path inside the filesystem (subvolume already resolved).
    pub path: String,
    /// The path as the user gave it, relative to the subvolume if any.
    pub rel_path: String,
    pub subvol: Option<String>,
    pub schedule: ScheduleSpec,
    pub start: DateTime<Utc>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    /// Instant of the first snapshot this schedule took.
    pub first: Option<DateTime<Utc>>,
    /// Instant of the most recent snapshot this schedule took.
    pub last: Option<DateTime<Utc>>,
    pub last_pruned: Option<DateTime<Utc>>,
    /// Due instant of the last trigger; a due instant fires at most once.
    pub last_triggered_due: Option<DateTime<Utc>>,
    pub created_count: u64,
    pub pruned_count: u64,
    /// Retention of the schedule's path, shared by every schedule on it.
    pub retention: RetentionSpec,
}

impl Schedule {
    /// Multi-line `key: value` report used by `status`.
    pub fn report(&self) -> String {
        let opt = |ts: Option<DateTime<Utc>>| ts.map(format_ts).unwrap_or_else(|| "-".to_string());
        let retention = serde_json::to_string(&self.retention).unwrap_or_else(|_| "{}".to_string());
        [
            format!("path: {}", self.path),
            format!("subvol: {}", self.subvol.as_deref().unwrap_or("-")),
            format!("schedule: {}", self.schedule),
            format!("retention: {retention}"),
            format!("start: {}", format_ts(self.start)),
            format!("created: {}", format_ts(self.created_at)),
            format!("first: {}", opt(self.first)),
            format!("last: {}", opt(self.last)),
            format!("last_pruned: {}", opt(self.last_pruned)),
            format!("created_count: {}", self.created_count),
            format!("pruned_count: {}", self.pruned_count),
            format!("active: {}", self.active),
        ]
        .join("\n")
    }

    /// JSON object form of [`Schedule::report`].
    pub fn report_json(&self) -> serde_json::Value {
        serde_json::json!({
            "fs": self.fs,
            "path": self.path,
            "rel_path": self.rel_path,
            "subvol": self.subvol,
            "schedule": self.schedule.to_string(),
            "retention": self.retention,
            "start": format_ts(self.start),
            "created": format_ts(self.created_at),
            "first": self.first.map(format_ts),
            "last": self.last.map(format_ts),
            "last_pruned": self.last_pruned.map(format_ts),
            "created_count": self.created_count,
            "pruned_count": self.pruned_count,
            "active": self.active,
        })
    }

    /// Compact JSON entry used by `list`.
    pub fn json_list(&self) -> serde_json::Value {
        serde_json::json!({
            "path": self.path,
            "schedule": self.schedule.to_string(),
            "retention": self.retention,
        })
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.path, self.schedule, format_ts(self.start))
    }
}

/// Input for a new schedule row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSchedule {
    pub path: String,
    pub rel_path: String,
    pub subvol: Option<String>,
    pub schedule: ScheduleSpec,
    pub start: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Raw `add` arguments before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleParams {
    pub rel_path: String,
    pub schedule: String,
    pub start: Option<String>,
    pub subvol: Option<String>,
}

/// One existing snapshot of a path, as listed by the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub name: String,
    pub created: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::schedule::parse_spec;

    fn sample() -> Schedule {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Schedule {
            id: 1,
            fs: "cephfs".into(),
            path: "/volumes/_nogroup/sv/data".into(),
            rel_path: "/data".into(),
            subvol: Some("sv".into()),
            schedule: parse_spec("1d").unwrap(),
            start,
            active: true,
            created_at: start,
            first: None,
            last: None,
            last_pruned: None,
            last_triggered_due: None,
            created_count: 0,
            pruned_count: 0,
            retention: RetentionSpec::parse("7d", None).unwrap(),
        }
    }

    #[test]
    fn display_is_path_spec_start() {
        assert_eq!(
            sample().to_string(),
            "/volumes/_nogroup/sv/data 1d 2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn report_lists_every_field() {
        let report = sample().report();
        assert!(report.contains("path: /volumes/_nogroup/sv/data"));
        assert!(report.contains("subvol: sv"));
        assert!(report.contains(r#"retention: {"d":7}"#));
        assert!(report.contains("first: -"));
        assert!(report.ends_with("active: true"));
    }

    #[test]
    fn json_forms_use_canonical_strings() {
        let s = sample();
        let full = s.report_json();
        assert_eq!(full["schedule"], "1d");
        assert_eq!(full["start"], "2024-01-01T00:00:00Z");
        assert_eq!(full["retention"]["d"], 7);
        assert!(full["last"].is_null());

        let short = s.json_list();
        assert_eq!(short["path"], "/volumes/_nogroup/sv/data");
        assert!(short.get("start").is_none());
    }
}
