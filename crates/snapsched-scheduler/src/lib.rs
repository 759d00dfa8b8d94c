//! `snapsched-scheduler`: periodic filesystem snapshots with SQLite persistence.
//!
//! # Overview
//!
//! Schedules and retention policies live in one SQLite store per filesystem
//! ([`store::ScheduleStore`]). The [`client::SnapSchedClient`] validates and
//! applies commands and runs the tick pass: every active schedule whose latest
//! due instant has not fired yet gets a snapshot, then its path is pruned
//! according to its retention. The [`engine::TickEngine`] drives the tick pass
//! on a fixed cadence, and [`ready::Readiness`] gates commands until the
//! stores are recovered.
//!
//! # Schedule units
//!
//! | Spec  | Interval                                        |
//! |-------|-------------------------------------------------|
//! | `Nm`  | N minutes                                       |
//! | `Nh`  | N hours                                         |
//! | `Nd`  | N days                                          |
//! | `Nw`  | N weeks                                         |
//! | `NM`  | N calendar months (day clamped to month length) |
//! | `NY`  | N calendar years                                |
//!
//! # Retention periods
//!
//! `h d w M Y` keep the newest snapshot of each of the N most recent hours,
//! days, weeks, months or years; `n` keeps the N newest snapshots.

pub mod client;
pub mod db;
pub mod engine;
pub mod error;
pub mod fs;
pub mod ready;
pub mod retention;
pub mod schedule;
pub mod store;
pub mod types;

pub use client::{SnapSchedClient, TickReport};
pub use engine::TickEngine;
pub use error::{Result, SchedulerError};
pub use fs::{FilesystemService, MountedFilesystems};
pub use ready::Readiness;
pub use retention::RetentionSpec;
pub use schedule::ScheduleSpec;
pub use store::ScheduleStore;
pub use types::{Schedule, ScheduleParams, SnapshotRecord};
