use rusqlite::Connection;

use crate::error::Result;

/// Initialise the schedule store schema in `conn`.
///
/// Creates the `schedules` and `retention` tables (idempotent). Timestamps are
/// stored as `YYYY-MM-DDTHH:MM:SSZ` so they compare correctly as text.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedules (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            path                TEXT    NOT NULL,
            rel_path            TEXT    NOT NULL,
            subvol              TEXT,
            schedule            TEXT    NOT NULL,   -- canonical spec, e.g. '1h'
            start               TEXT    NOT NULL,
            active              INTEGER NOT NULL DEFAULT 1,
            created_at          TEXT    NOT NULL,
            first               TEXT,
            last                TEXT,
            last_pruned         TEXT,
            last_triggered_due  TEXT,
            created_count       INTEGER NOT NULL DEFAULT 0,
            pruned_count        INTEGER NOT NULL DEFAULT 0,
            UNIQUE (path, schedule)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_schedules_path ON schedules (path);

        -- One row per (path, period); merged on add, never overwritten wholesale.
        CREATE TABLE IF NOT EXISTS retention (
            path    TEXT    NOT NULL,
            period  TEXT    NOT NULL,
            count   INTEGER NOT NULL CHECK (count > 0),
            PRIMARY KEY (path, period)
        ) STRICT;
        ",
    )?;
    Ok(())
}
