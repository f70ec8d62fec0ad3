//! SQLite source provider
//!
//! Versions live in two bookkeeping tables:
//!
//! ```text
//! tracker_sequence (id = 1, value)      one row, bumped on every tracked change
//! tracker_versions (table_name, version) sequence value of each table's last change
//! ```
//!
//! Enabling tracking on a table installs `AFTER INSERT/UPDATE/DELETE`
//! triggers that bump the sequence and stamp it on the table's row. The
//! source-wide version is the sequence itself, so it keeps growing even when
//! a table stops being tracked.

use async_trait::async_trait;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::OnceLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::SourceProvider;
use crate::error::SourceError;

const TRIGGER_EVENTS: [&str; 3] = ["insert", "update", "delete"];

/// Trigger-tracked tables of one SQLite database.
pub struct SqliteSource {
    id: String,
    db: Mutex<Connection>,
}

impl SqliteSource {
    pub fn open(id: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(id, conn)
    }

    pub fn open_in_memory(id: impl Into<String>) -> Result<Self, SourceError> {
        Self::from_connection(id, Connection::open_in_memory()?)
    }

    /// Wraps an existing connection, creating the bookkeeping tables if needed.
    pub fn from_connection(id: impl Into<String>, conn: Connection) -> Result<Self, SourceError> {
        initialize_schema(&conn)?;
        Ok(Self {
            id: id.into(),
            db: Mutex::new(conn),
        })
    }

    /// Runs `f` on the connection unless the request is cancelled while waiting for it.
    pub async fn with_connection<T, F>(
        &self,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, SourceError>
    where
        F: FnOnce(&mut Connection) -> Result<T, SourceError> + Send,
    {
        let mut db = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            guard = self.db.lock() => guard,
        };
        f(&mut db)
    }
}

/// Creates the version bookkeeping tables.
///
/// WAL is requested so readers on other connections are not blocked by the
/// application's writes; in-memory databases keep their `memory` journal.
pub fn initialize_schema(conn: &Connection) -> Result<(), SourceError> {
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tracker_sequence (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            value INTEGER NOT NULL
        );
        INSERT OR IGNORE INTO tracker_sequence (id, value) VALUES (1, 0);
        CREATE TABLE IF NOT EXISTS tracker_versions (
            table_name TEXT PRIMARY KEY,
            version INTEGER NOT NULL
        );",
    )?;

    Ok(())
}

/// Table names are spliced into trigger DDL, so only plain identifiers pass.
pub fn validate_table_name(name: &str) -> Result<(), SourceError> {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    let re = IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,127}$").expect("identifier pattern is valid")
    });

    if re.is_match(name) && !name.starts_with("tracker_") {
        Ok(())
    } else {
        Err(SourceError::InvalidKey(name.to_string()))
    }
}

fn trigger_name(table: &str, event: &str) -> String {
    format!("tracker_{}_{}", table, event)
}

fn create_triggers_sql(table: &str) -> String {
    let mut sql = String::new();
    for event in TRIGGER_EVENTS {
        sql.push_str(&format!(
            "CREATE TRIGGER IF NOT EXISTS \"{trigger}\" AFTER {event} ON \"{table}\"
            BEGIN
                UPDATE tracker_sequence SET value = value + 1 WHERE id = 1;
                UPDATE tracker_versions
                    SET version = (SELECT value FROM tracker_sequence WHERE id = 1)
                    WHERE table_name = '{table}';
            END;\n",
            trigger = trigger_name(table, event),
            event = event.to_uppercase(),
            table = table,
        ));
    }
    sql
}

fn drop_triggers_sql(table: &str) -> String {
    TRIGGER_EVENTS
        .iter()
        .map(|event| format!("DROP TRIGGER IF EXISTS \"{}\";\n", trigger_name(table, event)))
        .collect()
}

fn tracked_version(conn: &Connection, key: &str) -> Result<i64, SourceError> {
    conn.prepare_cached("SELECT version FROM tracker_versions WHERE table_name = ?1")?
        .query_row([key], |row| row.get(0))
        .optional()?
        .ok_or_else(|| SourceError::NotFound(key.to_string()))
}

fn is_tracked(conn: &Connection, key: &str) -> Result<bool, SourceError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM tracker_versions WHERE table_name = ?1)",
        [key],
        |row| row.get(0),
    )?)
}

#[async_trait]
impl SourceProvider for SqliteSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn version_of(&self, key: &str, cancel: &CancellationToken) -> Result<i64, SourceError> {
        validate_table_name(key)?;
        self.with_connection(cancel, |conn| tracked_version(conn, key))
            .await
    }

    async fn versions_of(
        &self,
        keys: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>, SourceError> {
        for key in keys {
            validate_table_name(key)?;
        }

        self.with_connection(cancel, |conn| {
            // one read transaction so every version comes from the same snapshot
            let tx = conn.transaction()?;
            let versions = keys
                .iter()
                .map(|key| tracked_version(&tx, key))
                .collect::<Result<Vec<_>, _>>()?;
            tx.commit()?;
            Ok(versions)
        })
        .await
    }

    async fn source_version(&self, cancel: &CancellationToken) -> Result<i64, SourceError> {
        self.with_connection(cancel, |conn| {
            Ok(conn.query_row(
                "SELECT value FROM tracker_sequence WHERE id = 1",
                [],
                |row| row.get(0),
            )?)
        })
        .await
    }

    async fn enable_tracking(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, SourceError> {
        validate_table_name(key)?;

        let enabled = self
            .with_connection(cancel, |conn| {
                let tx = conn.transaction()?;

                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                    [key],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Err(SourceError::NotFound(key.to_string()));
                }
                if is_tracked(&tx, key)? {
                    return Ok(false);
                }

                tx.execute(
                    "INSERT INTO tracker_versions (table_name, version)
                     SELECT ?1, value FROM tracker_sequence WHERE id = 1",
                    [key],
                )?;
                tx.execute_batch(&create_triggers_sql(key))?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if enabled {
            tracing::info!(source_id = %self.id, table = key, "Enabled change tracking");
        }
        Ok(enabled)
    }

    async fn disable_tracking(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, SourceError> {
        validate_table_name(key)?;

        let disabled = self
            .with_connection(cancel, |conn| {
                let tx = conn.transaction()?;
                tx.execute_batch(&drop_triggers_sql(key))?;
                let removed =
                    tx.execute("DELETE FROM tracker_versions WHERE table_name = ?1", [key])?;
                tx.commit()?;
                Ok(removed > 0)
            })
            .await?;

        if disabled {
            tracing::info!(source_id = %self.id, table = key, "Disabled change tracking");
        }
        Ok(disabled)
    }

    async fn is_tracking(&self, key: &str, cancel: &CancellationToken) -> Result<bool, SourceError> {
        validate_table_name(key)?;
        self.with_connection(cancel, |conn| is_tracked(conn, key))
            .await
    }
}
