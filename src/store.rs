//! # Persistent Store
//!
//! SQLite holds two tables:
//!
//! - `now_playing`: at most one row (`id = 1`) with one TEXT column per
//!   persisted metadata field plus `paused`, `art` and `listeners`
//! - `library`: the mirrored track library, one TEXT column per library
//!   field, filled by the external updater
//!
//! Every operation opens its own connection through
//! [`retry_with_backoff`]. The service never gives up on the store; the
//! connection is opened without `CREATE`, so a missing database file is
//! treated like a server that isn't up yet and retried.
//!
//! Values are always bound as parameters. Column names are interpolated, but
//! they only ever come from [`Schema`].

use crate::retry::{retry_with_backoff, RetryPolicy, Sleeper};
use crate::schema::Schema;
use crate::snapshot::{join_listeners, split_listeners, NowPlayingSnapshot};
use anyhow::{Context, Result};
use log::{debug, error};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage for the now-playing row and the library mirror.
pub trait NowPlayingStore {
    /// The current row, if any.
    fn read(&self) -> Result<Option<NowPlayingSnapshot>>;

    fn insert(&self, snapshot: &NowPlayingSnapshot) -> Result<usize>;

    /// Overwrite every column of the existing row.
    fn update(&self, snapshot: &NowPlayingSnapshot) -> Result<usize>;

    /// Same song still playing: touch only position, pause flag and listeners.
    fn update_playback(&self, playback_time: &str, paused: bool, listeners: &[String]) -> Result<usize>;

    fn delete(&self) -> Result<usize>;

    /// Row count of the library mirror, or -1 when it can't be queried.
    fn remote_library_count(&self) -> i64;
}

fn quote(column: &str) -> String {
    format!("\"{column}\"")
}

/// Create both tables if they don't exist yet. Creates the database file.
pub fn init(db_path: &Path, schema: &Schema) -> Result<()> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to create database at {}", db_path.display()))?;

    let now_playing_columns: Vec<String> = schema
        .now_playing_columns()
        .iter()
        .map(|c| format!("{} TEXT NOT NULL DEFAULT ''", quote(c)))
        .collect();
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS now_playing (
                id        INTEGER PRIMARY KEY CHECK (id = 1),
                {},
                paused    INTEGER NOT NULL DEFAULT 0,
                art       TEXT,
                listeners TEXT NOT NULL DEFAULT ''
            )",
            now_playing_columns.join(",\n                ")
        ),
        (),
    )
    .context("Invalid SQL command when CREATEing now_playing TABLE.")?;

    let library_columns: Vec<String> = schema
        .library_columns()
        .iter()
        .map(|c| format!("{} TEXT", quote(c)))
        .collect();
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS library (
                id INTEGER PRIMARY KEY,
                {}
            )",
            library_columns.join(",\n                ")
        ),
        (),
    )
    .context("Invalid SQL command when CREATEing library TABLE.")?;

    debug!("Store initialised at {}", db_path.display());
    Ok(())
}

/// [`NowPlayingStore`] backed by a SQLite file.
pub struct SqliteStore {
    path: PathBuf,
    schema: Schema,
    retry: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
}

impl SqliteStore {
    pub fn new(path: PathBuf, schema: Schema, retry: RetryPolicy, sleeper: Box<dyn Sleeper>) -> Self {
        Self {
            path,
            schema,
            retry,
            sleeper,
        }
    }

    /// Connect, retrying per policy. Errors only once the policy gives up.
    fn connect(&self) -> Result<Connection> {
        retry_with_backoff(&self.retry, self.sleeper.as_ref(), "Opening store", || {
            let conn = Connection::open_with_flags(
                &self.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_context(|| format!("Rusqlite DB connection refused. DB location: {}", self.path.display()))?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            Ok(conn)
        })
    }

    /// Column list and bound values for a full row write.
    fn row_values(&self, snapshot: &NowPlayingSnapshot) -> (Vec<String>, Vec<Value>) {
        let mut columns = Vec::new();
        let mut values = Vec::new();

        for column in self.schema.now_playing_columns() {
            columns.push(quote(column));
            values.push(Value::Text(snapshot.get(column).unwrap_or_default().to_string()));
        }
        columns.push("paused".to_string());
        values.push(Value::Integer(i64::from(snapshot.paused)));
        columns.push("art".to_string());
        values.push(snapshot.art.clone().map_or(Value::Null, Value::Text));
        columns.push("listeners".to_string());
        values.push(Value::Text(snapshot.listeners_joined()));

        (columns, values)
    }
}

impl NowPlayingStore for SqliteStore {
    fn read(&self) -> Result<Option<NowPlayingSnapshot>> {
        let conn = self.connect()?;
        let columns = self.schema.now_playing_columns();

        let mut stmt = conn
            .prepare("SELECT * FROM now_playing LIMIT 1")
            .context("Invalid SQL statement when SELECTing FROM now_playing.")?;

        stmt.query_row([], |row| {
            let mut fields = BTreeMap::new();
            for column in &columns {
                let value: Option<String> = row.get(*column)?;
                fields.insert(column.to_string(), value.unwrap_or_default());
            }
            let paused: i64 = row.get("paused")?;
            let listeners: Option<String> = row.get("listeners")?;

            Ok(NowPlayingSnapshot {
                fields,
                paused: paused != 0,
                art: row.get::<_, Option<String>>("art")?.filter(|a| !a.is_empty()),
                listeners: split_listeners(listeners.as_deref().unwrap_or_default()),
            })
        })
        .optional()
        .context("Failed to read now playing row.")
    }

    fn insert(&self, snapshot: &NowPlayingSnapshot) -> Result<usize> {
        let conn = self.connect()?;
        let (columns, values) = self.row_values(snapshot);
        let placeholders = vec!["?"; values.len()].join(", ");

        // REPLACE keeps the table at one row even if a stale row survived.
        let sql = format!(
            "INSERT OR REPLACE INTO now_playing (id, {}) VALUES (1, {placeholders})",
            columns.join(", ")
        );
        conn.execute(&sql, params_from_iter(values.iter()))
            .context("Invalid SQL statement when INSERTing now playing row.")
    }

    fn update(&self, snapshot: &NowPlayingSnapshot) -> Result<usize> {
        let conn = self.connect()?;
        let (columns, values) = self.row_values(snapshot);
        let assignments: Vec<String> = columns.iter().map(|c| format!("{c} = ?")).collect();

        let sql = format!("UPDATE now_playing SET {}", assignments.join(", "));
        conn.execute(&sql, params_from_iter(values.iter()))
            .context("Invalid SQL statement when UPDATEing now playing row.")
    }

    fn update_playback(&self, playback_time: &str, paused: bool, listeners: &[String]) -> Result<usize> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE now_playing SET playback_time = ?1, paused = ?2, listeners = ?3",
            (playback_time, paused, join_listeners(listeners)),
        )
        .context("Invalid SQL statement when UPDATEing playback.")
    }

    fn delete(&self) -> Result<usize> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM now_playing", ())
            .context("Invalid SQL statement when DELETEing now playing row.")
    }

    fn remote_library_count(&self) -> i64 {
        let count = self.connect().and_then(|conn| {
            conn.query_row("SELECT COUNT(*) FROM library", [], |row| row.get::<_, i64>(0))
                .context("Could not count library entries.")
        });

        match count {
            Ok(n) if n >= 0 => n,
            Ok(_) => -1,
            Err(e) => {
                error!("Unable to count remote library: {e:#}");
                -1
            }
        }
    }
}
