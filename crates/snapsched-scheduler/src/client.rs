use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use snapsched_core::config::SchedulerConfig;

use crate::{
    error::{Result, SchedulerError},
    fs::FilesystemService,
    retention::{select_for_pruning_capped, RetentionSpec},
    schedule::{default_start, last_due, parse_spec, parse_start, ScheduleSpec},
    store::{normalize_path, ScheduleStore, TriggerOutcome},
    types::{NewSchedule, Schedule, ScheduleParams},
};

/// What one [`SnapSchedClient::tick`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub triggered: usize,
    pub pruned: u64,
    /// Triggers, prunes or whole filesystems that failed with a non-fatal error.
    pub failed: usize,
    /// Triggers put off because the snapshot name was already taken.
    pub deferred: usize,
}

/// Schedule operations for every filesystem, plus the tick pass.
///
/// Stores open lazily, one per filesystem. The tick pass reads schedules
/// straight from each store, so changes made by another client or process
/// sharing the database files are picked up on the next pass.
pub struct SnapSchedClient {
    /// `None` keeps every store in memory.
    data_dir: Option<PathBuf>,
    filesystems: Arc<dyn FilesystemService>,
    stores: DashMap<String, Arc<ScheduleStore>>,
    max_snapshots_per_path: usize,
}

impl SnapSchedClient {
    pub fn from_config(
        config: &SchedulerConfig,
        filesystems: Arc<dyn FilesystemService>,
    ) -> Result<Self> {
        let data_dir = PathBuf::from(&config.data_dir);
        std::fs::create_dir_all(&data_dir).map_err(|e| SchedulerError::Connection {
            component: "store",
            reason: format!("{}: {e}", data_dir.display()),
        })?;
        Ok(Self {
            data_dir: Some(data_dir),
            filesystems,
            stores: DashMap::new(),
            max_snapshots_per_path: config.max_snapshots_per_path,
        })
    }

    pub fn in_memory(filesystems: Arc<dyn FilesystemService>, max_snapshots_per_path: usize) -> Self {
        Self {
            data_dir: None,
            filesystems,
            stores: DashMap::new(),
            max_snapshots_per_path,
        }
    }

    pub fn filesystems(&self) -> &Arc<dyn FilesystemService> {
        &self.filesystems
    }

    fn store(&self, fs: &str) -> Result<Arc<ScheduleStore>> {
        if let Some(store) = self.stores.get(fs) {
            return Ok(Arc::clone(&store));
        }
        if !self.filesystems.has_filesystem(fs) {
            return Err(SchedulerError::NotFound(format!("filesystem {fs} not found")));
        }
        let store = self
            .stores
            .entry(fs.to_string())
            .or_try_insert_with(|| self.open_store(fs).map(Arc::new))?;
        Ok(Arc::clone(&store))
    }

    /// The store of `fs` if it is open or already on disk; never creates one.
    fn existing_store(&self, fs: &str) -> Option<Result<Arc<ScheduleStore>>> {
        if let Some(store) = self.stores.get(fs) {
            return Some(Ok(Arc::clone(&store)));
        }
        let dir = self.data_dir.as_ref()?;
        if !dir.join(format!("{fs}.db")).exists() {
            return None;
        }
        Some(self.store(fs))
    }

    fn open_store(&self, fs: &str) -> Result<ScheduleStore> {
        match &self.data_dir {
            Some(dir) => ScheduleStore::open(fs, &dir.join(format!("{fs}.db"))),
            None => ScheduleStore::open_in_memory(fs),
        }
    }

    /// Open the stores of every known filesystem that already has one and
    /// check they load. Returns how many schedules are active.
    pub fn recover(&self) -> Result<usize> {
        let mut active = 0;
        for fs in self.filesystems.filesystems() {
            let Some(store) = self.existing_store(&fs) else {
                continue;
            };
            let count = store?.all()?.iter().filter(|s| s.active).count();
            debug!(%fs, active = count, "store recovered");
            active += count;
        }
        info!(active, "schedules recovered");
        Ok(active)
    }

    /// Schedules at exactly `path`.
    pub fn get_snap_schedules(&self, fs: &str, path: &str) -> Result<Vec<Schedule>> {
        self.store(fs)?.query(path, false)
    }

    /// Schedules at `path`, and below it when `recursive`.
    pub fn list_snap_schedules(&self, fs: &str, path: &str, recursive: bool) -> Result<Vec<Schedule>> {
        self.store(fs)?.query(path, recursive)
    }

    /// Validate `params` and store a new active schedule at `abs_path`.
    pub fn store_snap_schedule(
        &self,
        fs: &str,
        abs_path: &str,
        params: &ScheduleParams,
        now: DateTime<Utc>,
    ) -> Result<Schedule> {
        let schedule = parse_spec(&params.schedule)?;
        let start = match params.start.as_deref() {
            Some(start) => parse_start(start)?,
            None => default_start(&schedule, now),
        };
        self.store(fs)?.insert(&NewSchedule {
            path: normalize_path(abs_path),
            rel_path: normalize_path(&params.rel_path),
            subvol: params.subvol.clone(),
            schedule,
            start,
            created_at: now,
        })
    }

    pub fn rm_snap_schedule(
        &self,
        fs: &str,
        abs_path: &str,
        repeat: Option<&str>,
        start: Option<&str>,
    ) -> Result<usize> {
        let (repeat, start) = parse_filter(repeat, start)?;
        self.store(fs)?.delete(abs_path, repeat.as_ref(), start)
    }

    pub fn add_retention_spec(
        &self,
        fs: &str,
        abs_path: &str,
        spec_or_period: &str,
        count: Option<&str>,
    ) -> Result<RetentionSpec> {
        let spec = RetentionSpec::parse(spec_or_period, count)?;
        self.store(fs)?.upsert_retention(abs_path, &spec)
    }

    pub fn rm_retention_spec(
        &self,
        fs: &str,
        abs_path: &str,
        spec_or_period: &str,
        count: Option<&str>,
        purge: bool,
    ) -> Result<RetentionSpec> {
        let spec = RetentionSpec::parse(spec_or_period, count)?;
        self.store(fs)?.delete_retention(abs_path, &spec, purge)
    }

    pub fn activate_snap_schedule(
        &self,
        fs: &str,
        abs_path: &str,
        repeat: Option<&str>,
        start: Option<&str>,
    ) -> Result<usize> {
        self.set_active(fs, abs_path, repeat, start, true)
    }

    pub fn deactivate_snap_schedule(
        &self,
        fs: &str,
        abs_path: &str,
        repeat: Option<&str>,
        start: Option<&str>,
    ) -> Result<usize> {
        self.set_active(fs, abs_path, repeat, start, false)
    }

    fn set_active(
        &self,
        fs: &str,
        abs_path: &str,
        repeat: Option<&str>,
        start: Option<&str>,
        active: bool,
    ) -> Result<usize> {
        let (repeat, start) = parse_filter(repeat, start)?;
        self.store(fs)?
            .update_activation(abs_path, repeat.as_ref(), start, active)
    }

    /// One scheduler pass: fire every active schedule whose latest due
    /// instant has not fired yet, then prune the paths that got a snapshot.
    ///
    /// Calling it twice with the same `now` fires nothing the second time.
    /// Non-fatal failures are logged and counted, and a filesystem that fails
    /// does not hold up the others; a fatal one aborts the pass.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();
        for fs in self.filesystems.filesystems() {
            let Some(store) = self.existing_store(&fs) else {
                continue;
            };
            match store.and_then(|store| self.tick_store(&store, now, &mut report)) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(%fs, "tick skipped filesystem: {e}");
                    report.failed += 1;
                }
            }
        }

        if report != TickReport::default() {
            info!(
                triggered = report.triggered,
                pruned = report.pruned,
                failed = report.failed,
                deferred = report.deferred,
                "tick complete"
            );
        }
        Ok(report)
    }

    fn tick_store(&self, store: &ScheduleStore, now: DateTime<Utc>, report: &mut TickReport) -> Result<()> {
        let fs = store.fs();
        let due: Vec<(Schedule, DateTime<Utc>)> = store
            .all()?
            .into_iter()
            .filter(|s| s.active)
            .filter_map(|s| {
                let due = last_due(s.start, &s.schedule, now)?;
                let fresh = s.last_triggered_due.map_or(true, |last| due > last);
                fresh.then_some((s, due))
            })
            .collect();

        let mut fired_paths = BTreeSet::new();
        for (schedule, due) in due {
            match self.trigger(store, &schedule, due, now) {
                Ok(true) => {
                    report.triggered += 1;
                    fired_paths.insert(schedule.path.clone());
                }
                Ok(false) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(SchedulerError::SnapshotExists(name)) => {
                    debug!(%fs, path = %schedule.path, schedule = %schedule.schedule, snapshot = %name, "snapshot name taken, trigger deferred");
                    report.deferred += 1;
                }
                Err(e) => {
                    warn!(%fs, path = %schedule.path, schedule = %schedule.schedule, "trigger failed: {e}");
                    report.failed += 1;
                }
            }
        }

        for path in fired_paths {
            match self.prune(store, &path, now) {
                Ok(n) => report.pruned += n,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(%fs, %path, "prune failed: {e}");
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    fn trigger(
        &self,
        store: &ScheduleStore,
        schedule: &Schedule,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let outcome = store.fire(
            schedule.id,
            due,
            |current| self.filesystems.create_snapshot(&current.fs, &current.path, now),
            |current, snapshot| {
                if let Err(e) =
                    self.filesystems
                        .remove_snapshot(&current.fs, &current.path, &snapshot.name)
                {
                    error!(fs = %current.fs, path = %current.path, snapshot = %snapshot.name, "orphaned snapshot left behind: {e}");
                }
            },
        )?;
        match outcome {
            TriggerOutcome::Fired { schedule, snapshot } => {
                info!(fs = %schedule.fs, path = %schedule.path, schedule = %schedule.schedule, %due, snapshot = %snapshot.name, "schedule fired");
                Ok(true)
            }
            TriggerOutcome::Cancelled | TriggerOutcome::AlreadyTriggered => Ok(false),
        }
    }

    /// Apply the path's retention (and the snapshot cap) to its scheduled snapshots.
    fn prune(&self, store: &ScheduleStore, path: &str, now: DateTime<Utc>) -> Result<u64> {
        let fs = store.fs();
        let retention = store.retention(path)?;
        let snapshots = self.filesystems.list_snapshots(fs, path)?;
        let doomed = select_for_pruning_capped(&snapshots, &retention, self.max_snapshots_per_path);

        let mut removed = 0u64;
        for name in &doomed {
            match self.filesystems.remove_snapshot(fs, path, name) {
                Ok(()) => removed += 1,
                Err(e) => warn!(%fs, %path, snapshot = %name, "could not prune snapshot: {e}"),
            }
        }
        if removed > 0 {
            store.record_prune(path, removed, now)?;
            info!(%fs, %path, removed, kept = snapshots.len() as u64 - removed, "snapshots pruned");
        }
        Ok(removed)
    }
}

fn parse_filter(
    repeat: Option<&str>,
    start: Option<&str>,
) -> Result<(Option<ScheduleSpec>, Option<DateTime<Utc>>)> {
    Ok((
        repeat.map(parse_spec).transpose()?,
        start.map(parse_start).transpose()?,
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;
    use crate::types::SnapshotRecord;

    /// In-memory filesystem collaborator recording every snapshot request.
    #[derive(Default)]
    struct FakeFs {
        snapshots: Mutex<Vec<(String, SnapshotRecord)>>,
        fail_create: Mutex<bool>,
        /// Filesystems listed ahead of `cephfs`.
        leading: Vec<String>,
    }

    impl FakeFs {
        fn names(&self, path: &str) -> Vec<String> {
            let mut names: Vec<String> = self
                .snapshots
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p == path)
                .map(|(_, s)| s.name.clone())
                .collect();
            names.sort();
            names
        }
    }

    impl FilesystemService for FakeFs {
        fn filesystems(&self) -> Vec<String> {
            let mut all = self.leading.clone();
            all.push("cephfs".to_string());
            all
        }

        fn resolve_path(&self, _fs: &str, path: &str, _subvol: Option<&str>) -> Result<String> {
            Ok(normalize_path(path))
        }

        fn create_snapshot(&self, _fs: &str, path: &str, at: DateTime<Utc>) -> Result<SnapshotRecord> {
            if *self.fail_create.lock().unwrap() {
                return Err(SchedulerError::Connection {
                    component: "fs",
                    reason: "offline".into(),
                });
            }
            let record = SnapshotRecord {
                name: crate::fs::snapshot_name("scheduled", at),
                created: at,
            };
            let mut snapshots = self.snapshots.lock().unwrap();
            if snapshots.iter().any(|(p, s)| p == path && s.name == record.name) {
                return Err(SchedulerError::SnapshotExists(record.name));
            }
            snapshots.push((path.to_string(), record.clone()));
            Ok(record)
        }

        fn list_snapshots(&self, _fs: &str, path: &str) -> Result<Vec<SnapshotRecord>> {
            Ok(self
                .snapshots
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p == path)
                .map(|(_, s)| s.clone())
                .collect())
        }

        fn remove_snapshot(&self, _fs: &str, path: &str, name: &str) -> Result<()> {
            self.snapshots
                .lock()
                .unwrap()
                .retain(|(p, s)| !(p == path && s.name == name));
            Ok(())
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        parse_start(s).unwrap()
    }

    fn setup() -> (Arc<FakeFs>, SnapSchedClient) {
        let fs = Arc::new(FakeFs::default());
        let client = SnapSchedClient::in_memory(fs.clone(), 50);
        (fs, client)
    }

    fn params(path: &str, spec: &str, start: Option<&str>) -> ScheduleParams {
        ScheduleParams {
            rel_path: path.to_string(),
            schedule: spec.to_string(),
            start: start.map(str::to_string),
            subvol: None,
        }
    }

    #[test]
    fn daily_schedule_fires_once_per_due_instant() {
        let (fs, client) = setup();
        client
            .store_snap_schedule(
                "cephfs",
                "/data",
                &params("/data", "1d", Some("2024-01-01T00:00:00")),
                at("2023-12-31T12:00:00"),
            )
            .unwrap();

        let first = client.tick(at("2024-01-02T00:00:01")).unwrap();
        assert_eq!(first.triggered, 1);
        let names = fs.names("/data");
        assert_eq!(names.len(), 1);
        let created = crate::fs::parse_snapshot_name("scheduled", &names[0]).unwrap();
        assert!(created >= at("2024-01-02T00:00:00"));

        let later = client.tick(at("2024-01-02T12:00:00")).unwrap();
        assert_eq!(later.triggered, 0);
        assert_eq!(fs.names("/data").len(), 1);

        let stored = &client.get_snap_schedules("cephfs", "/data").unwrap()[0];
        assert_eq!(stored.created_count, 1);
        assert_eq!(stored.last_triggered_due, Some(at("2024-01-02T00:00:00")));
    }

    #[test]
    fn repeated_tick_is_idempotent() {
        let (fs, client) = setup();
        client
            .store_snap_schedule(
                "cephfs",
                "/data",
                &params("/data", "1h", Some("2024-01-01T00:00:00")),
                at("2024-01-01T00:00:00"),
            )
            .unwrap();
        let now = at("2024-01-01T05:30:00");
        assert_eq!(client.tick(now).unwrap().triggered, 1);
        assert_eq!(client.tick(now).unwrap().triggered, 0);
        assert_eq!(fs.names("/data").len(), 1);
    }

    #[test]
    fn nothing_fires_before_start() {
        let (fs, client) = setup();
        client
            .store_snap_schedule(
                "cephfs",
                "/data",
                &params("/data", "1h", None),
                at("2024-01-01T10:15:00"),
            )
            .unwrap();
        let stored = &client.get_snap_schedules("cephfs", "/data").unwrap()[0];
        assert_eq!(stored.start, at("2024-01-01T11:00:00"));

        assert_eq!(client.tick(at("2024-01-01T10:59:59")).unwrap().triggered, 0);
        assert_eq!(client.tick(at("2024-01-01T11:00:00")).unwrap().triggered, 1);
        assert_eq!(fs.names("/data").len(), 1);
    }

    #[test]
    fn deactivated_and_removed_schedules_stop_firing() {
        let (fs, client) = setup();
        client
            .store_snap_schedule(
                "cephfs",
                "/data",
                &params("/data", "1h", Some("2024-01-01T00:00:00")),
                at("2024-01-01T00:00:00"),
            )
            .unwrap();
        client
            .deactivate_snap_schedule("cephfs", "/data", None, None)
            .unwrap();
        assert_eq!(client.tick(at("2024-01-01T01:00:00")).unwrap().triggered, 0);

        client
            .activate_snap_schedule("cephfs", "/data", Some("1h"), None)
            .unwrap();
        assert_eq!(client.tick(at("2024-01-01T02:00:00")).unwrap().triggered, 1);

        client.rm_snap_schedule("cephfs", "/data", None, None).unwrap();
        assert_eq!(client.tick(at("2024-01-01T03:00:00")).unwrap().triggered, 0);
        assert_eq!(fs.names("/data").len(), 1);
    }

    #[test]
    fn failed_snapshot_is_retried_next_tick() {
        let (fs, client) = setup();
        client
            .store_snap_schedule(
                "cephfs",
                "/data",
                &params("/data", "1h", Some("2024-01-01T00:00:00")),
                at("2024-01-01T00:00:00"),
            )
            .unwrap();
        *fs.fail_create.lock().unwrap() = true;
        let report = client.tick(at("2024-01-01T01:00:00")).unwrap();
        assert_eq!((report.triggered, report.failed), (0, 1));

        *fs.fail_create.lock().unwrap() = false;
        let report = client.tick(at("2024-01-01T01:00:30")).unwrap();
        assert_eq!(report.triggered, 1);
    }

    #[test]
    fn tick_prunes_by_retention() {
        let (fs, client) = setup();
        client
            .store_snap_schedule(
                "cephfs",
                "/data",
                &params("/data", "1h", Some("2024-01-01T00:00:00")),
                at("2024-01-01T00:00:00"),
            )
            .unwrap();
        client
            .add_retention_spec("cephfs", "/data", "3n", None)
            .unwrap();

        let mut pruned = 0;
        for hour in 0..6 {
            let now = Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 5).unwrap();
            pruned += client.tick(now).unwrap().pruned;
        }
        assert_eq!(pruned, 3);
        assert_eq!(
            fs.names("/data"),
            vec![
                "scheduled-2024-01-01-03_00_05",
                "scheduled-2024-01-01-04_00_05",
                "scheduled-2024-01-01-05_00_05",
            ]
        );
        let stored = &client.get_snap_schedules("cephfs", "/data").unwrap()[0];
        assert_eq!(stored.pruned_count, 3);
        assert_eq!(stored.created_count, 6);
    }

    #[test]
    fn duplicate_and_unknown_filesystem_errors() {
        let (_fs, client) = setup();
        let p = params("/data", "1h", None);
        let now = at("2024-01-01T00:00:00");
        client.store_snap_schedule("cephfs", "/data", &p, now).unwrap();
        assert!(matches!(
            client.store_snap_schedule("cephfs", "/data", &p, now),
            Err(SchedulerError::DuplicateSchedule { .. })
        ));
        assert!(matches!(
            client.list_snap_schedules("other", "/", true),
            Err(SchedulerError::NotFound(_))
        ));
        assert!(matches!(
            client.store_snap_schedule("cephfs", "/data", &params("/data", "1x", None), now),
            Err(SchedulerError::InvalidSpec(_))
        ));
    }

    #[test]
    fn on_disk_stores_are_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let config = SchedulerConfig {
            data_dir: dir.path().display().to_string(),
            ..SchedulerConfig::default()
        };
        let fs = Arc::new(FakeFs::default());
        {
            let client = SnapSchedClient::from_config(&config, fs.clone()).unwrap();
            client
                .store_snap_schedule(
                    "cephfs",
                    "/data",
                    &params("/data", "1d", Some("2024-01-01")),
                    at("2024-01-01T00:00:00"),
                )
                .unwrap();
            client
                .store_snap_schedule(
                    "cephfs",
                    "/idle",
                    &params("/idle", "1d", Some("2024-01-01")),
                    at("2024-01-01T00:00:00"),
                )
                .unwrap();
            client
                .deactivate_snap_schedule("cephfs", "/idle", None, None)
                .unwrap();
        }

        let client = SnapSchedClient::from_config(&config, fs.clone()).unwrap();
        assert_eq!(client.recover().unwrap(), 1);
        assert_eq!(client.tick(at("2024-01-03T00:00:00")).unwrap().triggered, 1);
        assert!(fs.names("/idle").is_empty());
    }
    fn on_disk(dir: &std::path::Path, fs: Arc<FakeFs>) -> SnapSchedClient {
        let config = SchedulerConfig {
            data_dir: dir.display().to_string(),
            ..SchedulerConfig::default()
        };
        SnapSchedClient::from_config(&config, fs).unwrap()
    }

    #[test]
    fn schedules_added_by_another_client_fire() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(FakeFs::default());
        let serving = on_disk(dir.path(), fs.clone());
        assert_eq!(serving.recover().unwrap(), 0);

        let other = on_disk(dir.path(), fs.clone());
        other
            .store_snap_schedule(
                "cephfs",
                "/data",
                &params("/data", "1h", Some("2024-01-01T00:00:00")),
                at("2024-01-01T00:00:00"),
            )
            .unwrap();

        let mut triggered = 0;
        for hour in 0..48 {
            let now = at("2024-01-01T00:00:30") + chrono::Duration::hours(hour);
            triggered += serving.tick(now).unwrap().triggered;
        }
        assert_eq!(triggered, 48);

        // a second path added while the serving client already has the store open
        other
            .store_snap_schedule(
                "cephfs",
                "/home",
                &params("/home", "1d", Some("2024-01-03T00:00:00")),
                at("2024-01-02T23:00:00"),
            )
            .unwrap();
        let report = serving.tick(at("2024-01-03T00:00:30")).unwrap();
        assert_eq!(report.triggered, 2);
        assert_eq!(fs.names("/home"), vec!["scheduled-2024-01-03-00_00_30"]);
    }

    #[test]
    fn schedules_due_together_on_one_path_get_their_own_snapshots() {
        let (fs, client) = setup();
        for spec in ["1h", "1d"] {
            client
                .store_snap_schedule(
                    "cephfs",
                    "/data",
                    &params("/data", spec, Some("2024-01-01T00:00:00")),
                    at("2024-01-01T00:00:00"),
                )
                .unwrap();
        }

        let report = client.tick(at("2024-01-02T00:00:00")).unwrap();
        assert_eq!((report.triggered, report.deferred, report.failed), (1, 1, 0));
        let report = client.tick(at("2024-01-02T00:01:00")).unwrap();
        assert_eq!((report.triggered, report.deferred), (1, 0));

        let stored = client.get_snap_schedules("cephfs", "/data").unwrap();
        let created: u64 = stored.iter().map(|s| s.created_count).sum();
        assert_eq!(created, 2);
        assert_eq!(fs.names("/data").len(), 2);
    }

    #[test]
    fn broken_store_does_not_hold_up_other_filesystems() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the database file should be
        std::fs::create_dir_all(dir.path().join("broken.db")).unwrap();
        let fs = Arc::new(FakeFs {
            leading: vec!["broken".to_string()],
            ..FakeFs::default()
        });
        let client = on_disk(dir.path(), fs.clone());
        client
            .store_snap_schedule(
                "cephfs",
                "/data",
                &params("/data", "1h", Some("2024-01-01T00:00:00")),
                at("2024-01-01T00:00:00"),
            )
            .unwrap();

        let report = client.tick(at("2024-01-01T01:00:00")).unwrap();
        assert_eq!((report.triggered, report.failed), (1, 1));
        assert_eq!(fs.names("/data").len(), 1);
    }

    #[test]
    fn commands_racing_the_tick_lose_nothing() {
        let fs = Arc::new(FakeFs::default());
        let client = Arc::new(SnapSchedClient::in_memory(fs.clone(), 50));
        let created = at("2024-01-01T00:00:00");
        let first = at("2024-01-01T00:00:30");
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..20 {
                    let path = format!("/keep{i}");
                    client
                        .store_snap_schedule("cephfs", &path, &params(&path, "1h", Some("2024-01-01")), created)
                        .unwrap();
                }
            });
            scope.spawn(|| {
                for i in 0..20 {
                    let path = format!("/gone{i}");
                    client
                        .store_snap_schedule("cephfs", &path, &params(&path, "1h", Some("2024-01-01")), created)
                        .unwrap();
                    client.rm_snap_schedule("cephfs", &path, None, None).unwrap();
                }
                done.store(true, Ordering::SeqCst);
            });
            scope.spawn(|| {
                for _ in 0..10_000 {
                    if done.load(Ordering::SeqCst) {
                        break;
                    }
                    client.tick(first).unwrap();
                }
            });
        });
        client.tick(first).unwrap();

        let listed = client.list_snap_schedules("cephfs", "/", true).unwrap();
        assert_eq!(listed.len(), 20);
        for schedule in &listed {
            assert!(schedule.path.starts_with("/keep"));
            assert_eq!(schedule.created_count, 1, "{}", schedule.path);
            assert_eq!(fs.names(&schedule.path).len(), 1);
        }

        // removed schedules never fire again
        let gone_before: usize = (0..20).map(|i| fs.names(&format!("/gone{i}")).len()).sum();
        assert_eq!(client.tick(at("2024-01-01T01:00:30")).unwrap().triggered, 20);
        let gone_after: usize = (0..20).map(|i| fs.names(&format!("/gone{i}")).len()).sum();
        assert_eq!(gone_before, gone_after);
    }
}
