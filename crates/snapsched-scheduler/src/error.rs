use thiserror::Error;

use snapsched_core::errno::{EEXIST, EINVAL, EIO, ENOENT, ENOTCONN, EPERM};

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A backing store or filesystem could not be reached. Never retried.
    #[error("[{component}] connection error: {reason}")]
    Connection {
        component: &'static str,
        reason: String,
    },

    /// A schedule with the same path and spec already exists.
    #[error("Schedule {schedule} already exists for {path}")]
    DuplicateSchedule { path: String, schedule: String },

    /// No schedule, retention entry, or subvolume matched.
    #[error("{0}")]
    NotFound(String),

    /// Malformed schedule, retention, or start-time grammar.
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// The request is well-formed but would break a retention/schedule rule.
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// A snapshot with the generated name is already on disk.
    #[error("snapshot {0} already exists")]
    SnapshotExists(String),

    /// No filesystem is configured to fall back to.
    #[error("no filesystem found")]
    NoFilesystem,

    /// Stored data no longer satisfies the schema's invariants.
    #[error("Store corrupt: {0}")]
    Corrupt(String),

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// Stable negative errno returned in the command result triple.
    pub fn errno(&self) -> i32 {
        let code = match self {
            SchedulerError::Connection { .. } => ENOTCONN,
            SchedulerError::DuplicateSchedule { .. } | SchedulerError::SnapshotExists(_) => EEXIST,
            SchedulerError::NotFound(_) | SchedulerError::NoFilesystem => ENOENT,
            SchedulerError::InvalidSpec(_) => EINVAL,
            SchedulerError::PolicyViolation(_) => EPERM,
            SchedulerError::Corrupt(_) | SchedulerError::Database(_) | SchedulerError::Io(_) => EIO,
        };
        -code
    }

    /// Corruption is the only class the trigger loop refuses to continue past.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SchedulerError::Corrupt(_))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
