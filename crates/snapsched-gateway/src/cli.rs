use clap::{Args, Parser, Subcommand, ValueEnum};
use snapsched_protocol::frames::{Command, OutputFormat};

pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("SNAPSCHED_GIT_SHA"), ")");

// ============================================================================
// CLI Types
// ============================================================================

/// snapsched - periodic filesystem snapshots with retention
#[derive(Parser, Debug)]
#[command(name = "snapsched", version = VERSION, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (overrides SNAPSCHED_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the trigger loop and read JSON commands from stdin, one per line
    Serve,

    /// Show full reports for the schedules at a path
    Status {
        /// Path inside the filesystem (defaults to the root)
        path: Option<String>,

        #[command(flatten)]
        location: Location,

        #[arg(long, value_enum, default_value_t = Format::Plain)]
        format: Format,
    },

    /// List schedules at a path, optionally with everything below it
    List {
        path: String,

        /// Include schedules of every path below PATH
        #[arg(short, long)]
        recursive: bool,

        #[command(flatten)]
        location: Location,

        #[arg(long, value_enum, default_value_t = Format::Plain)]
        format: Format,
    },

    /// Add a snapshot schedule, e.g. `add /data 1h`
    Add {
        path: String,

        /// Interval such as 30m, 1h, 1d, 2w, 1M or 1Y
        snap_schedule: String,

        /// First due instant (ISO 8601, UTC); defaults to the top of the next period
        start: Option<String>,

        #[command(flatten)]
        location: Location,
    },

    /// Remove schedules from a path (all of them unless filtered)
    Remove(Selector),

    /// Manage retention of a scheduled path
    Retention {
        #[command(subcommand)]
        action: RetentionAction,
    },

    /// Resume schedules at a path
    Activate(Selector),

    /// Pause schedules at a path without removing them
    Deactivate(Selector),
}

#[derive(Subcommand, Debug)]
pub enum RetentionAction {
    /// Add or update retention periods, e.g. `7d4w` or `d 7`
    Add {
        path: String,
        retention_spec_or_period: String,
        retention_count: Option<String>,

        #[command(flatten)]
        location: Location,
    },

    /// Remove retention periods
    Remove {
        path: String,
        retention_spec_or_period: String,
        retention_count: Option<String>,

        /// Allow removing the last retention period of a scheduled path
        #[arg(long)]
        purge: bool,

        #[command(flatten)]
        location: Location,
    },
}

/// Which filesystem (and subvolume) a path lives in.
#[derive(Args, Debug, Clone, Default)]
pub struct Location {
    /// Subvolume the path is relative to
    #[arg(long)]
    pub subvol: Option<String>,

    /// Filesystem name (defaults to the first configured one)
    #[arg(long)]
    pub fs: Option<String>,
}

/// Path plus optional schedule filters.
#[derive(Args, Debug, Clone)]
pub struct Selector {
    pub path: String,

    /// Only schedules with this interval
    pub repeat: Option<String>,

    /// Only schedules with this start
    pub start: Option<String>,

    #[command(flatten)]
    pub location: Location,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Plain,
    Json,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Plain => OutputFormat::Plain,
            Format::Json => OutputFormat::Json,
        }
    }
}

impl Commands {
    /// The wire command for a one-shot subcommand; `None` for `serve`.
    pub fn into_command(self) -> Option<Command> {
        let command = match self {
            Commands::Serve => return None,
            Commands::Status {
                path,
                location,
                format,
            } => Command::Status {
                path,
                subvol: location.subvol,
                fs: location.fs,
                format: format.into(),
            },
            Commands::List {
                path,
                recursive,
                location,
                format,
            } => Command::List {
                path,
                recursive,
                subvol: location.subvol,
                fs: location.fs,
                format: format.into(),
            },
            Commands::Add {
                path,
                snap_schedule,
                start,
                location,
            } => Command::Add {
                path,
                schedule: snap_schedule,
                start,
                fs: location.fs,
                subvol: location.subvol,
            },
            Commands::Remove(s) => Command::Remove {
                path: s.path,
                repeat: s.repeat,
                start: s.start,
                subvol: s.location.subvol,
                fs: s.location.fs,
            },
            Commands::Activate(s) => Command::Activate {
                path: s.path,
                repeat: s.repeat,
                start: s.start,
                subvol: s.location.subvol,
                fs: s.location.fs,
            },
            Commands::Deactivate(s) => Command::Deactivate {
                path: s.path,
                repeat: s.repeat,
                start: s.start,
                subvol: s.location.subvol,
                fs: s.location.fs,
            },
            Commands::Retention {
                action:
                    RetentionAction::Add {
                        path,
                        retention_spec_or_period,
                        retention_count,
                        location,
                    },
            } => Command::RetentionAdd {
                path,
                spec_or_period: retention_spec_or_period,
                count: retention_count,
                fs: location.fs,
                subvol: location.subvol,
            },
            Commands::Retention {
                action:
                    RetentionAction::Remove {
                        path,
                        retention_spec_or_period,
                        retention_count,
                        purge,
                        location,
                    },
            } => Command::RetentionRemove {
                path,
                spec_or_period: retention_spec_or_period,
                count: retention_count,
                fs: location.fs,
                subvol: location.subvol,
                purge,
            },
        };
        Some(command)
    }
}
