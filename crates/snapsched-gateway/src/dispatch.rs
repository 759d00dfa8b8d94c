//! Command dispatcher: every command in, one `(status, output, error)` triple out.
//!
//! Domain errors never escape; each is mapped to its negated errno and
//! message. Store corruption is still logged at error level.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use snapsched_core::errno::EIO;
use snapsched_protocol::frames::{Command, CommandResult, OutputFormat};
use snapsched_scheduler::{Schedule, ScheduleParams, SchedulerError, SnapSchedClient};
use tracing::{debug, error, warn};

use crate::app::AppState;

/// Run `command` once the scheduler is ready.
///
/// Store and filesystem work happens on the blocking pool so a slow snapshot
/// in the tick loop never stalls the command reader.
pub async fn dispatch(app: &AppState, command: Command) -> CommandResult {
    let name = command.name();
    if let Err(e) = app.readiness.wait().await {
        warn!(command = name, "command rejected: {e}");
        return CommandResult::err(e.errno(), e.to_string());
    }

    let client = Arc::clone(&app.client);
    match tokio::task::spawn_blocking(move || execute(&client, command)).await {
        Ok(result) => result,
        Err(e) => {
            error!(command = name, "command task failed: {e}");
            CommandResult::err(-EIO, format!("command {name} failed: {e}"))
        }
    }
}

/// A command that failed with a ready-made result.
struct Failure(CommandResult);

impl From<SchedulerError> for Failure {
    fn from(e: SchedulerError) -> Self {
        Failure(CommandResult::err(e.errno(), e.to_string()))
    }
}

/// Synchronous body of [`dispatch`].
fn execute(client: &SnapSchedClient, command: Command) -> CommandResult {
    let name = command.name();
    debug!(command = name, "dispatching command");
    match run(client, command) {
        Ok(output) => CommandResult::ok(output),
        Err(Failure(result)) => {
            if result.status == -EIO {
                error!(command = name, status = result.status, "{}", result.error);
            } else {
                debug!(command = name, status = result.status, "{}", result.error);
            }
            result
        }
    }
}

fn run(client: &SnapSchedClient, command: Command) -> Result<String, Failure> {
    let filesystems = client.filesystems();
    let fs = match command.fs() {
        Some(fs) => fs.to_string(),
        None => filesystems.default_filesystem()?,
    };
    let resolve = |path: &str, subvol: Option<&str>| filesystems.resolve_path(&fs, path, subvol);

    match command {
        Command::Status {
            path,
            subvol,
            format,
            ..
        } => {
            let path = path.unwrap_or_else(|| "/".to_string());
            let abs = resolve(&path, subvol.as_deref())?;
            let schedules = client.get_snap_schedules(&fs, &abs)?;
            Ok(match format {
                OutputFormat::Plain => join_reports(&schedules),
                OutputFormat::Json => {
                    Value::Array(schedules.iter().map(Schedule::report_json).collect()).to_string()
                }
            })
        }

        Command::List {
            path,
            recursive,
            subvol,
            format,
            ..
        } => {
            let abs = resolve(&path, subvol.as_deref())?;
            let schedules = client.list_snap_schedules(&fs, &abs, recursive)?;
            if schedules.is_empty() {
                return Err(SchedulerError::NotFound(format!("SnapSchedule for {path} not found")).into());
            }
            Ok(match format {
                OutputFormat::Plain => schedules
                    .iter()
                    .map(Schedule::to_string)
                    .collect::<Vec<_>>()
                    .join("\n"),
                OutputFormat::Json => {
                    Value::Array(schedules.iter().map(Schedule::json_list).collect()).to_string()
                }
            })
        }

        Command::Add {
            path,
            schedule,
            start,
            subvol,
            ..
        } => {
            let abs = resolve(&path, subvol.as_deref())?;
            let params = ScheduleParams {
                rel_path: path.clone(),
                schedule,
                start,
                subvol,
            };
            match client.store_snap_schedule(&fs, &abs, &params, Utc::now()) {
                Ok(_) => Ok(format!("Schedule set for path {path}")),
                Err(e @ SchedulerError::DuplicateSchedule { .. }) => {
                    let existing = client
                        .get_snap_schedules(&fs, &abs)
                        .map(|s| join_reports(&s))
                        .unwrap_or_default();
                    Err(Failure(CommandResult::err(
                        e.errno(),
                        format!("Found existing schedule\n{existing}"),
                    )))
                }
                Err(e) => Err(e.into()),
            }
        }

        Command::Remove {
            path,
            repeat,
            start,
            subvol,
            ..
        } => {
            let abs = resolve(&path, subvol.as_deref())?;
            client.rm_snap_schedule(&fs, &abs, repeat.as_deref(), start.as_deref())?;
            Ok(format!("Schedule removed for path {path}"))
        }

        Command::RetentionAdd {
            path,
            spec_or_period,
            count,
            subvol,
            ..
        } => {
            let abs = resolve(&path, subvol.as_deref())?;
            client.add_retention_spec(&fs, &abs, &spec_or_period, count.as_deref())?;
            Ok(format!("Retention added to path {path}"))
        }

        Command::RetentionRemove {
            path,
            spec_or_period,
            count,
            subvol,
            purge,
            ..
        } => {
            let abs = resolve(&path, subvol.as_deref())?;
            client.rm_retention_spec(&fs, &abs, &spec_or_period, count.as_deref(), purge)?;
            Ok(format!("Retention removed from path {path}"))
        }

        Command::Activate {
            path,
            repeat,
            start,
            subvol,
            ..
        } => {
            let abs = resolve(&path, subvol.as_deref())?;
            client.activate_snap_schedule(&fs, &abs, repeat.as_deref(), start.as_deref())?;
            Ok(format!("Schedule activated for path {path}"))
        }

        Command::Deactivate {
            path,
            repeat,
            start,
            subvol,
            ..
        } => {
            let abs = resolve(&path, subvol.as_deref())?;
            client.deactivate_snap_schedule(&fs, &abs, repeat.as_deref(), start.as_deref())?;
            Ok(format!("Schedule deactivated for path {path}"))
        }
    }
}

fn join_reports(schedules: &[Schedule]) -> String {
    schedules
        .iter()
        .map(Schedule::report)
        .collect::<Vec<_>>()
        .join("\n===\n")
}
