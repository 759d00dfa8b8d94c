//! Shared configuration and process-level errors for the snapshot scheduler.

pub mod config;
pub mod errno;
pub mod error;

pub use config::{FilesystemConfig, SchedulerConfig, SnapSchedConfig};
pub use error::{Result, SnapSchedError};
