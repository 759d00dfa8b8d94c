use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, instrument, warn};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    retention::{RetentionPeriod, RetentionSpec},
    schedule::{format_ts, ScheduleSpec},
    types::{NewSchedule, Schedule, SnapshotRecord},
};

const SELECT_COLUMNS: &str = "id, path, rel_path, subvol, schedule, start, active, created_at,
    first, last, last_pruned, last_triggered_due, created_count, pruned_count";

/// What happened when the tick loop tried to fire a schedule for a due instant.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// Snapshot taken and the due instant recorded, in one transaction.
    Fired {
        schedule: Schedule,
        snapshot: SnapshotRecord,
    },
    /// Removed or deactivated since the caller last looked.
    Cancelled,
    /// This due instant (or a later one) was already recorded.
    AlreadyTriggered,
}

/// Durable schedule and retention records for one filesystem.
///
/// Every operation takes the connection lock, so command handling and the
/// tick loop serialize per filesystem. Writes that touch more than one row
/// run in an IMMEDIATE transaction so a second process sharing the file
/// serializes as well.
pub struct ScheduleStore {
    fs: String,
    conn: Mutex<Connection>,
}

impl ScheduleStore {
    /// Open (or create) the on-disk store for `fs`.
    pub fn open(fs: &str, db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(|e| SchedulerError::Connection {
            component: "store",
            reason: format!("{}: {e}", db_path.display()),
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        info!(%fs, path = %db_path.display(), "schedule store opened");
        Self::new(fs, conn)
    }

    pub fn open_in_memory(fs: &str) -> Result<Self> {
        Self::new(fs, Connection::open_in_memory()?)
    }

    /// Wrap an already-open connection, creating the schema if needed.
    pub fn new(fs: &str, conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            fs: fs.to_string(),
            conn: Mutex::new(conn),
        })
    }

    pub fn fs(&self) -> &str {
        &self.fs
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SchedulerError::Corrupt(format!("store lock for {} poisoned", self.fs)))
    }

    /// Insert a schedule. Fails with `DuplicateSchedule` if `(path, schedule)` exists.
    #[instrument(skip(self, new), fields(fs = %self.fs, path = %new.path, schedule = %new.schedule))]
    pub fn insert(&self, new: &NewSchedule) -> Result<Schedule> {
        let path = normalize_path(&new.path);
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT INTO schedules (path, rel_path, subvol, schedule, start, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                path,
                new.rel_path,
                new.subvol,
                new.schedule.to_string(),
                format_ts(new.start),
                format_ts(new.created_at),
            ],
        );
        match inserted {
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(SchedulerError::DuplicateSchedule {
                    path,
                    schedule: new.schedule.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
            Ok(_) => {}
        }
        let id = tx.last_insert_rowid();
        let schedule = fetch_by_id(&tx, &self.fs, id)?.ok_or_else(|| {
            SchedulerError::Corrupt(format!("schedule {id} vanished right after insert"))
        })?;
        tx.commit()?;
        info!(id, "schedule stored");
        Ok(schedule)
    }

    /// Schedules at `path`, or at `path` and below when `recursive`.
    ///
    /// Ordered by path, then insertion order.
    pub fn query(&self, path: &str, recursive: bool) -> Result<Vec<Schedule>> {
        let path = normalize_path(path);
        let prefix = if path == "/" {
            path.clone()
        } else {
            format!("{path}/")
        };
        let conn = self.lock()?;
        select_schedules(
            &conn,
            &self.fs,
            "WHERE path = ?1 OR (?2 AND substr(path, 1, length(?3)) = ?3)",
            params![path, recursive, prefix],
        )
    }

    /// Every schedule of this filesystem.
    pub fn all(&self) -> Result<Vec<Schedule>> {
        let conn = self.lock()?;
        select_schedules(&conn, &self.fs, "", [])
    }

    /// Set `active` on the schedules matching the filter. `NotFound` if none match.
    #[instrument(skip(self), fields(fs = %self.fs))]
    pub fn update_activation(
        &self,
        path: &str,
        schedule: Option<&ScheduleSpec>,
        start: Option<DateTime<Utc>>,
        active: bool,
    ) -> Result<usize> {
        let path = normalize_path(path);
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE schedules SET active = ?1
             WHERE path = ?2
               AND (?3 IS NULL OR schedule = ?3)
               AND (?4 IS NULL OR start = ?4)",
            params![
                active,
                path,
                schedule.map(|s| s.to_string()),
                start.map(format_ts),
            ],
        )?;
        if n == 0 {
            return Err(SchedulerError::NotFound(no_match(&path, schedule, start)));
        }
        info!(count = n, active, "schedule activation changed");
        Ok(n)
    }

    /// Delete matching schedules; with no spec/start, every schedule at `path`.
    ///
    /// When the last schedule of a path goes, its retention goes with it.
    #[instrument(skip(self), fields(fs = %self.fs))]
    pub fn delete(
        &self,
        path: &str,
        schedule: Option<&ScheduleSpec>,
        start: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let path = normalize_path(path);
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let n = tx.execute(
            "DELETE FROM schedules
             WHERE path = ?1
               AND (?2 IS NULL OR schedule = ?2)
               AND (?3 IS NULL OR start = ?3)",
            params![path, schedule.map(|s| s.to_string()), start.map(format_ts)],
        )?;
        if n == 0 {
            return Err(SchedulerError::NotFound(no_match(&path, schedule, start)));
        }
        if count_schedules(&tx, &path)? == 0 {
            let dropped = tx.execute("DELETE FROM retention WHERE path = ?1", [&path])?;
            if dropped > 0 {
                info!(%path, periods = dropped, "retention removed with last schedule");
            }
        }
        tx.commit()?;
        info!(count = n, "schedules removed");
        Ok(n)
    }

    /// Retention configured for `path` (empty if none).
    pub fn retention(&self, path: &str) -> Result<RetentionSpec> {
        let conn = self.lock()?;
        load_retention(&conn, &normalize_path(path))
    }

    /// Merge `spec` into the retention of `path` and return the result.
    ///
    /// Periods not named in `spec` are kept; a named period gets the new count.
    #[instrument(skip(self), fields(fs = %self.fs, spec = %spec))]
    pub fn upsert_retention(&self, path: &str, spec: &RetentionSpec) -> Result<RetentionSpec> {
        let path = normalize_path(path);
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if count_schedules(&tx, &path)? == 0 {
            return Err(SchedulerError::NotFound(format!("no schedule found for {path}")));
        }
        let current = load_retention(&tx, &path)?;
        for (period, count) in spec.iter() {
            if let Some(old) = current.get(period).filter(|old| *old != count) {
                info!(period = %period.as_char(), old, new = count, "retention count replaced");
            }
            tx.execute(
                "INSERT INTO retention (path, period, count) VALUES (?1, ?2, ?3)
                 ON CONFLICT (path, period) DO UPDATE SET count = excluded.count",
                params![path, period.as_char().to_string(), count],
            )?;
        }
        let merged = load_retention(&tx, &path)?;
        tx.commit()?;
        info!(retention = %merged, "retention updated");
        Ok(merged)
    }

    /// Remove the given period/count pairs from the retention of `path`.
    ///
    /// Every pair must be present with exactly that count. Emptying the
    /// retention of a path that still has schedules needs `purge`.
    #[instrument(skip(self), fields(fs = %self.fs, spec = %spec))]
    pub fn delete_retention(
        &self,
        path: &str,
        spec: &RetentionSpec,
        purge: bool,
    ) -> Result<RetentionSpec> {
        let path = normalize_path(path);
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = load_retention(&tx, &path)?;

        let mut remaining = current.clone();
        for (period, count) in spec.iter() {
            if current.get(period) != Some(count) {
                return Err(SchedulerError::NotFound(format!(
                    "retention {count}{} not set for {path}",
                    period.as_char()
                )));
            }
            remaining.remove(period);
        }
        if remaining.is_empty() && !purge && count_schedules(&tx, &path)? > 0 {
            return Err(SchedulerError::PolicyViolation(format!(
                "refusing to remove the last retention of {path} while it still has schedules \
                 (remove the schedule or purge the retention)"
            )));
        }

        for (period, _) in spec.iter() {
            tx.execute(
                "DELETE FROM retention WHERE path = ?1 AND period = ?2",
                params![path, period.as_char().to_string()],
            )?;
        }
        tx.commit()?;
        info!(retention = %remaining, "retention reduced");
        Ok(remaining)
    }

    /// Fire schedule `id` for `due`: create the snapshot and record the due
    /// instant as one unit.
    ///
    /// The row is re-read under the lock, so a schedule removed or deactivated
    /// since the caller's snapshot of state is never fired. If `create` fails
    /// nothing is recorded; if recording fails the snapshot is handed to `undo`.
    pub fn fire<C, U>(&self, id: i64, due: DateTime<Utc>, create: C, undo: U) -> Result<TriggerOutcome>
    where
        C: FnOnce(&Schedule) -> Result<SnapshotRecord>,
        U: FnOnce(&Schedule, &SnapshotRecord),
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(current) = fetch_by_id(&tx, &self.fs, id)? else {
            debug!(fs = %self.fs, id, "schedule removed before trigger");
            return Ok(TriggerOutcome::Cancelled);
        };
        if !current.active {
            debug!(fs = %self.fs, id, "schedule deactivated before trigger");
            return Ok(TriggerOutcome::Cancelled);
        }
        if current.last_triggered_due.is_some_and(|last| last >= due) {
            return Ok(TriggerOutcome::AlreadyTriggered);
        }

        let snapshot = create(&current)?;
        let created = format_ts(snapshot.created);
        let updated = tx.execute(
            "UPDATE schedules
             SET last_triggered_due = ?1,
                 last               = ?2,
                 first              = COALESCE(first, ?2),
                 created_count      = created_count + 1
             WHERE id = ?3",
            params![format_ts(due), created, id],
        );
        let recorded = match updated {
            Ok(_) => tx.commit(),
            Err(e) => Err(e),
        };
        if let Err(e) = recorded {
            warn!(fs = %self.fs, id, snapshot = %snapshot.name, "could not record trigger, removing snapshot: {e}");
            undo(&current, &snapshot);
            return Err(e.into());
        }
        Ok(TriggerOutcome::Fired {
            schedule: current,
            snapshot,
        })
    }

    /// Account `pruned` removed snapshots to every schedule at `path`.
    pub fn record_prune(&self, path: &str, pruned: u64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE schedules SET last_pruned = ?1, pruned_count = pruned_count + ?2
             WHERE path = ?3",
            params![format_ts(at), pruned, normalize_path(path)],
        )?;
        Ok(())
    }
}

/// Canonical absolute form: leading slash, no trailing or doubled slashes.
pub fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    format!("/{}", parts.join("/"))
}

fn no_match(path: &str, schedule: Option<&ScheduleSpec>, start: Option<DateTime<Utc>>) -> String {
    let mut msg = format!("no schedule found for {path}");
    if let Some(schedule) = schedule {
        msg.push_str(&format!(" with repeat {schedule}"));
    }
    if let Some(start) = start {
        msg.push_str(&format!(" starting {}", format_ts(start)));
    }
    msg
}

fn count_schedules(conn: &Connection, path: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM schedules WHERE path = ?1",
        [path],
        |row| row.get(0),
    )?)
}

fn fetch_by_id(conn: &Connection, fs: &str, id: i64) -> Result<Option<Schedule>> {
    let row = conn
        .query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM schedules WHERE id = ?1"),
            [id],
            read_row,
        )
        .optional()?;
    match row {
        Some(row) => {
            let retention = load_retention(conn, &row.path)?;
            Ok(Some(row.into_schedule(fs, retention)?))
        }
        None => Ok(None),
    }
}

fn select_schedules<P: rusqlite::Params>(
    conn: &Connection,
    fs: &str,
    filter: &str,
    params: P,
) -> Result<Vec<Schedule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM schedules {filter} ORDER BY path, id"
    ))?;
    let rows = stmt
        .query_map(params, read_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut retention_by_path: HashMap<String, RetentionSpec> = HashMap::new();
    let mut schedules = Vec::with_capacity(rows.len());
    for row in rows {
        let retention = match retention_by_path.get(&row.path) {
            Some(r) => r.clone(),
            None => {
                let r = load_retention(conn, &row.path)?;
                retention_by_path.insert(row.path.clone(), r.clone());
                r
            }
        };
        schedules.push(row.into_schedule(fs, retention)?);
    }
    Ok(schedules)
}

fn load_retention(conn: &Connection, path: &str) -> Result<RetentionSpec> {
    let mut stmt = conn.prepare_cached("SELECT period, count FROM retention WHERE path = ?1")?;
    let rows = stmt
        .query_map([path], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut spec = RetentionSpec::new();
    for (period, count) in rows {
        let mut chars = period.chars();
        let parsed = match (chars.next(), chars.next()) {
            (Some(c), None) => RetentionPeriod::from_char(c),
            _ => None,
        }
        .ok_or_else(|| {
            SchedulerError::Corrupt(format!("unknown retention period {period:?} for {path}"))
        })?;
        let count = u32::try_from(count).map_err(|_| {
            SchedulerError::Corrupt(format!("retention count {count} out of range for {path}"))
        })?;
        spec.insert(parsed, count);
    }
    Ok(spec)
}

/// A `schedules` row exactly as stored, before validation.
struct ScheduleRow {
    id: i64,
    path: String,
    rel_path: String,
    subvol: Option<String>,
    schedule: String,
    start: String,
    active: bool,
    created_at: String,
    first: Option<String>,
    last: Option<String>,
    last_pruned: Option<String>,
    last_triggered_due: Option<String>,
    created_count: i64,
    pruned_count: i64,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleRow> {
    Ok(ScheduleRow {
        id: row.get(0)?,
        path: row.get(1)?,
        rel_path: row.get(2)?,
        subvol: row.get(3)?,
        schedule: row.get(4)?,
        start: row.get(5)?,
        active: row.get(6)?,
        created_at: row.get(7)?,
        first: row.get(8)?,
        last: row.get(9)?,
        last_pruned: row.get(10)?,
        last_triggered_due: row.get(11)?,
        created_count: row.get(12)?,
        pruned_count: row.get(13)?,
    })
}

impl ScheduleRow {
    fn into_schedule(self, fs: &str, retention: RetentionSpec) -> Result<Schedule> {
        let id = self.id;
        let schedule: ScheduleSpec = self.schedule.parse().map_err(|e| {
            SchedulerError::Corrupt(format!("schedule {id} has unparsable spec: {e}"))
        })?;
        let ts = |column: &str, value: &str| parse_stored_ts(id, column, value);
        let opt_ts = |column: &str, value: Option<String>| {
            value.map(|v| parse_stored_ts(id, column, &v)).transpose()
        };
        let count = |column: &str, value: i64| {
            u64::try_from(value).map_err(|_| {
                SchedulerError::Corrupt(format!("schedule {id} has negative {column}"))
            })
        };

        Ok(Schedule {
            id,
            fs: fs.to_string(),
            start: ts("start", &self.start)?,
            created_at: ts("created_at", &self.created_at)?,
            first: opt_ts("first", self.first)?,
            last: opt_ts("last", self.last)?,
            last_pruned: opt_ts("last_pruned", self.last_pruned)?,
            last_triggered_due: opt_ts("last_triggered_due", self.last_triggered_due)?,
            created_count: count("created_count", self.created_count)?,
            pruned_count: count("pruned_count", self.pruned_count)?,
            path: self.path,
            rel_path: self.rel_path,
            subvol: self.subvol,
            schedule,
            active: self.active,
            retention,
        })
    }
}

fn parse_stored_ts(id: i64, column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SchedulerError::Corrupt(format!("schedule {id} has bad {column} {value:?}: {e}")))
}
