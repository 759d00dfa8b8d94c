use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, info};

use snapsched_core::config::SnapSchedConfig;

use crate::{
    error::{Result, SchedulerError},
    store::normalize_path,
    types::SnapshotRecord,
};

const SNAP_DIR: &str = ".snap";
const SUBVOLUME_ROOT: &str = "/volumes/_nogroup";
const SNAPSHOT_TIME_FORMAT: &str = "%Y-%m-%d-%H_%M_%S";

/// The filesystem side of the scheduler: path resolution and snapshot
/// create/list/remove.
///
/// Calls are synchronous; the tick loop runs them on a blocking thread.
pub trait FilesystemService: Send + Sync {
    /// Every filesystem this service can reach, default first.
    fn filesystems(&self) -> Vec<String>;

    fn default_filesystem(&self) -> Result<String> {
        self.filesystems()
            .into_iter()
            .next()
            .ok_or(SchedulerError::NoFilesystem)
    }

    fn has_filesystem(&self, fs: &str) -> bool {
        self.filesystems().iter().any(|name| name == fs)
    }

    /// Absolute path of `path` inside `fs`, rooted at `subvol` when given.
    fn resolve_path(&self, fs: &str, path: &str, subvol: Option<&str>) -> Result<String>;

    /// Take a scheduled snapshot of `path` stamped with `at`.
    fn create_snapshot(&self, fs: &str, path: &str, at: DateTime<Utc>) -> Result<SnapshotRecord>;

    /// Scheduled snapshots of `path`, in no particular order.
    fn list_snapshots(&self, fs: &str, path: &str) -> Result<Vec<SnapshotRecord>>;

    fn remove_snapshot(&self, fs: &str, path: &str, name: &str) -> Result<()>;
}

/// Name of the scheduled snapshot taken at `at`.
pub fn snapshot_name(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{prefix}-{}", at.format(SNAPSHOT_TIME_FORMAT))
}

/// Inverse of [`snapshot_name`]; `None` for anything not made by the scheduler.
pub fn parse_snapshot_name(prefix: &str, name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(prefix)?.strip_prefix('-')?;
    let naive = NaiveDateTime::parse_from_str(stamp, SNAPSHOT_TIME_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Filesystems reachable through local mount points, snapshotted by making
/// directories under `.snap`.
pub struct MountedFilesystems {
    mounts: HashMap<String, PathBuf>,
    order: Vec<String>,
    prefix: String,
}

impl MountedFilesystems {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            mounts: HashMap::new(),
            order: Vec::new(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &SnapSchedConfig) -> Self {
        let mut mounted = Self::new(config.scheduler.snapshot_prefix.clone());
        for fs in &config.filesystems {
            mounted = mounted.with_mount(&fs.name, &fs.mount);
        }
        mounted
    }

    /// Register `name` mounted at `mount`. The first one registered is the default.
    pub fn with_mount(mut self, name: &str, mount: impl Into<PathBuf>) -> Self {
        if self.mounts.insert(name.to_string(), mount.into()).is_none() {
            self.order.push(name.to_string());
        }
        self
    }

    fn mount(&self, fs: &str) -> Result<&Path> {
        self.mounts
            .get(fs)
            .map(PathBuf::as_path)
            .ok_or_else(|| SchedulerError::NotFound(format!("filesystem {fs} not found")))
    }

    /// Host path of `path` inside `fs`.
    fn host_path(&self, fs: &str, path: &str) -> Result<PathBuf> {
        let rel = normalize_path(path);
        Ok(self.mount(fs)?.join(rel.trim_start_matches('/')))
    }
}

fn io_error(context: String, e: io::Error) -> SchedulerError {
    match e.kind() {
        io::ErrorKind::NotFound => SchedulerError::NotFound(format!("{context} not found")),
        _ => SchedulerError::Connection {
            component: "fs",
            reason: format!("{context}: {e}"),
        },
    }
}

impl FilesystemService for MountedFilesystems {
    fn filesystems(&self) -> Vec<String> {
        self.order.clone()
    }

    fn resolve_path(&self, fs: &str, path: &str, subvol: Option<&str>) -> Result<String> {
        if path.split('/').any(|part| part == "..") {
            return Err(SchedulerError::InvalidSpec(format!(
                "path {path:?} must not contain '..'"
            )));
        }
        let mount = self.mount(fs)?;
        let Some(subvol) = subvol else {
            return Ok(normalize_path(path));
        };
        if subvol.is_empty() || subvol.contains('/') || subvol == ".." {
            return Err(SchedulerError::InvalidSpec(format!(
                "invalid subvolume name {subvol:?}"
            )));
        }
        let root = format!("{SUBVOLUME_ROOT}/{subvol}");
        let on_host = mount.join(root.trim_start_matches('/'));
        if !on_host.is_dir() {
            return Err(SchedulerError::NotFound(format!(
                "subvolume {subvol} not found in {fs}"
            )));
        }
        Ok(normalize_path(&format!("{root}/{path}")))
    }

    fn create_snapshot(&self, fs: &str, path: &str, at: DateTime<Utc>) -> Result<SnapshotRecord> {
        let target = self.host_path(fs, path)?;
        if !target.is_dir() {
            return Err(SchedulerError::NotFound(format!("{fs}:{path} not found")));
        }
        let snap_dir = target.join(SNAP_DIR);
        std::fs::create_dir_all(&snap_dir)
            .map_err(|e| io_error(format!("{fs}:{path}/{SNAP_DIR}"), e))?;

        let name = snapshot_name(&self.prefix, at);
        // A taken name belongs to another trigger; never claim it as ours.
        match std::fs::create_dir(snap_dir.join(&name)) {
            Ok(()) => info!(%fs, %path, snapshot = %name, "snapshot created"),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(%fs, %path, snapshot = %name, "snapshot name already taken");
                return Err(SchedulerError::SnapshotExists(name));
            }
            Err(e) => return Err(io_error(format!("{fs}:{path} snapshot {name}"), e)),
        }
        Ok(SnapshotRecord {
            created: parse_snapshot_name(&self.prefix, &name).unwrap_or(at),
            name,
        })
    }

    fn list_snapshots(&self, fs: &str, path: &str) -> Result<Vec<SnapshotRecord>> {
        let target = self.host_path(fs, path)?;
        let entries = match std::fs::read_dir(target.join(SNAP_DIR)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound && target.is_dir() => return Ok(vec![]),
            Err(e) => return Err(io_error(format!("{fs}:{path}/{SNAP_DIR}"), e)),
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(format!("{fs}:{path}/{SNAP_DIR}"), e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(created) = parse_snapshot_name(&self.prefix, &name) {
                snapshots.push(SnapshotRecord { name, created });
            }
        }
        Ok(snapshots)
    }

    fn remove_snapshot(&self, fs: &str, path: &str, name: &str) -> Result<()> {
        if parse_snapshot_name(&self.prefix, name).is_none() {
            return Err(SchedulerError::InvalidSpec(format!(
                "{name} is not a scheduled snapshot"
            )));
        }
        let dir = self.host_path(fs, path)?.join(SNAP_DIR).join(name);
        std::fs::remove_dir(&dir).map_err(|e| io_error(format!("{fs}:{path} snapshot {name}"), e))?;
        info!(%fs, %path, snapshot = %name, "snapshot removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, h, 30, 15).unwrap()
    }

    fn mounted(dir: &Path) -> MountedFilesystems {
        MountedFilesystems::new("scheduled")
            .with_mount("cephfs", dir)
            .with_mount("backup", dir.join("backup"))
    }

    #[test]
    fn snapshot_names_round_trip_through_the_prefix() {
        let name = snapshot_name("scheduled", at(3));
        assert_eq!(name, "scheduled-2024-01-02-03_30_15");
        assert_eq!(parse_snapshot_name("scheduled", &name), Some(at(3)));
        assert_eq!(parse_snapshot_name("other", &name), None);
        assert_eq!(parse_snapshot_name("scheduled", "manual-before-upgrade"), None);
    }

    #[test]
    fn default_is_first_mount() {
        let dir = tempfile::tempdir().unwrap();
        let fs = mounted(dir.path());
        assert_eq!(fs.default_filesystem().unwrap(), "cephfs");
        assert!(fs.has_filesystem("backup"));
        assert!(matches!(
            MountedFilesystems::new("s").default_filesystem(),
            Err(SchedulerError::NoFilesystem)
        ));
    }

    #[test]
    fn resolves_subvolume_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("volumes/_nogroup/sv1")).unwrap();
        let fs = mounted(dir.path());

        assert_eq!(fs.resolve_path("cephfs", "data/", None).unwrap(), "/data");
        assert_eq!(
            fs.resolve_path("cephfs", "/data", Some("sv1")).unwrap(),
            "/volumes/_nogroup/sv1/data"
        );
        assert!(matches!(
            fs.resolve_path("cephfs", "/data", Some("missing")),
            Err(SchedulerError::NotFound(_))
        ));
        assert!(matches!(
            fs.resolve_path("nope", "/data", None),
            Err(SchedulerError::NotFound(_))
        ));
        assert!(matches!(
            fs.resolve_path("cephfs", "/a/../b", None),
            Err(SchedulerError::InvalidSpec(_))
        ));
    }

    #[test]
    fn create_list_remove_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data/.snap/manual")).unwrap();
        let fs = mounted(dir.path());

        assert!(fs.list_snapshots("cephfs", "/data").unwrap().is_empty());
        let first = fs.create_snapshot("cephfs", "/data", at(1)).unwrap();
        fs.create_snapshot("cephfs", "/data", at(2)).unwrap();
        // a second snapshot in the same second must not reuse the first one
        assert!(matches!(
            fs.create_snapshot("cephfs", "/data", at(2)),
            Err(SchedulerError::SnapshotExists(ref name)) if name == "scheduled-2024-01-02-02_30_15"
        ));

        let mut names: Vec<String> = fs
            .list_snapshots("cephfs", "/data")
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["scheduled-2024-01-02-01_30_15", "scheduled-2024-01-02-02_30_15"]
        );

        fs.remove_snapshot("cephfs", "/data", &first.name).unwrap();
        assert_eq!(fs.list_snapshots("cephfs", "/data").unwrap().len(), 1);
        assert!(dir.path().join("data/.snap/manual").is_dir());
        assert!(matches!(
            fs.remove_snapshot("cephfs", "/data", "manual"),
            Err(SchedulerError::InvalidSpec(_))
        ));
    }

    #[test]
    fn snapshot_of_missing_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fs = mounted(dir.path());
        assert!(matches!(
            fs.create_snapshot("cephfs", "/gone", at(1)),
            Err(SchedulerError::NotFound(_))
        ));
        assert!(matches!(
            fs.list_snapshots("cephfs", "/gone"),
            Err(SchedulerError::NotFound(_))
        ));
    }
}
