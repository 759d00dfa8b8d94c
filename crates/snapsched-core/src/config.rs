use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60; // trigger loop cadence
pub const DEFAULT_MAX_SNAPSHOTS_PER_PATH: usize = 50;
pub const DEFAULT_SNAPSHOT_PREFIX: &str = "scheduled";
pub const MAX_COMMAND_FRAME_BYTES: usize = 64 * 1024; // serve mode: longest accepted stdin line

/// Top-level config (snapsched.toml + SNAPSCHED_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapSchedConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Filesystems the scheduler manages. The first entry is the default.
    #[serde(default)]
    pub filesystems: Vec<FilesystemConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Directory holding one SQLite store per filesystem (`<fs>.db`).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Hard cap on scheduled snapshots kept per path, applied after retention.
    #[serde(default = "default_max_snapshots_per_path")]
    pub max_snapshots_per_path: usize,
    #[serde(default = "default_snapshot_prefix")]
    pub snapshot_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            max_snapshots_per_path: DEFAULT_MAX_SNAPSHOTS_PER_PATH,
            snapshot_prefix: DEFAULT_SNAPSHOT_PREFIX.to_string(),
        }
    }
}

/// A filesystem mounted on this host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilesystemConfig {
    pub name: String,
    /// Local mount point of the filesystem root.
    pub mount: String,
}

fn default_data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.snapsched/db", home)
}
fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_max_snapshots_per_path() -> usize {
    DEFAULT_MAX_SNAPSHOTS_PER_PATH
}
fn default_snapshot_prefix() -> String {
    DEFAULT_SNAPSHOT_PREFIX.to_string()
}

impl SnapSchedConfig {
    /// Load config from a TOML file with SNAPSCHED_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.snapsched/snapsched.toml
    ///
    /// Nested keys use a double underscore in env vars, e.g.
    /// `SNAPSCHED_SCHEDULER__TICK_INTERVAL_SECS=30`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(%path, "loading config");

        let mut config: SnapSchedConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SNAPSCHED_").split("__"))
            .extract()
            .map_err(|e| crate::error::SnapSchedError::Config(e.to_string()))?;

        config.scheduler.data_dir = expand_home(&config.scheduler.data_dir);
        for fs in &mut config.filesystems {
            fs.mount = expand_home(&fs.mount);
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::error::Result<()> {
        if self.scheduler.tick_interval_secs == 0 {
            return Err(crate::error::SnapSchedError::Config(
                "scheduler.tick_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.snapshot_prefix.is_empty() {
            return Err(crate::error::SnapSchedError::Config(
                "scheduler.snapshot_prefix must not be empty".to_string(),
            ));
        }
        for (i, fs) in self.filesystems.iter().enumerate() {
            if fs.name.is_empty() || fs.name.contains('/') {
                return Err(crate::error::SnapSchedError::Config(format!(
                    "invalid filesystem name: {:?}",
                    fs.name
                )));
            }
            if self.filesystems[..i].iter().any(|other| other.name == fs.name) {
                return Err(crate::error::SnapSchedError::Config(format!(
                    "filesystem {} configured twice",
                    fs.name
                )));
            }
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.snapsched/snapsched.toml", home)
}

fn expand_home(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            format!("{}/{}", home, rest)
        }
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let cfg = SnapSchedConfig::default();
        assert_eq!(cfg.scheduler.tick_interval_secs, 60);
        assert_eq!(cfg.scheduler.max_snapshots_per_path, 50);
        assert_eq!(cfg.scheduler.snapshot_prefix, "scheduled");
        assert!(cfg.filesystems.is_empty());
    }

    #[test]
    fn load_reads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[scheduler]
data_dir = "/var/lib/snapsched"
tick_interval_secs = 15

[[filesystems]]
name = "cephfs"
mount = "/mnt/cephfs"

[[filesystems]]
name = "backup"
mount = "/mnt/backup"
"#
        )
        .unwrap();

        let cfg = SnapSchedConfig::load(file.path().to_str()).unwrap();
        assert_eq!(cfg.scheduler.data_dir, "/var/lib/snapsched");
        assert_eq!(cfg.scheduler.tick_interval_secs, 15);
        // unspecified keys keep their defaults
        assert_eq!(cfg.scheduler.max_snapshots_per_path, 50);
        let mounts: Vec<(&str, &str)> = cfg
            .filesystems
            .iter()
            .map(|f| (f.name.as_str(), f.mount.as_str()))
            .collect();
        assert_eq!(mounts, vec![("cephfs", "/mnt/cephfs"), ("backup", "/mnt/backup")]);
    }

    #[test]
    fn duplicate_filesystem_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[filesystems]]
name = "a"
mount = "/mnt/a"

[[filesystems]]
name = "a"
mount = "/mnt/b"
"#
        )
        .unwrap();

        assert!(SnapSchedConfig::load(file.path().to_str()).is_err());
    }

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        assert_eq!(expand_home("/abs/path"), "/abs/path");
        assert!(!expand_home("~/x").starts_with('~'));
    }
}
