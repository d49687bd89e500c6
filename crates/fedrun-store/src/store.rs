use std::cell::Cell;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info, instrument, warn};

use crate::cursor::Cursor;
use crate::db::{create_client_table, open_connection, quote_ident};
use crate::error::{Result, StoreError};
use crate::types::to_micros;

/// Durable per-client example log in one SQLite file.
///
/// The store is driven from a single execution sequence and is deliberately
/// not `Sync`. The one-open-cursor rule is tracked at runtime; closing the
/// store while a cursor borrows it is rejected by the borrow checker.
pub struct ExampleStore {
    path: PathBuf,
    conn: Option<Connection>,
    /// Clients whose tables were created by `init`. Nothing else is ever
    /// interpolated into SQL.
    tables: BTreeSet<String>,
    cursor_open: Cell<bool>,
}

impl ExampleStore {
    /// Create a closed handle for the file at `path`. Nothing is touched on disk
    /// until [`init`](Self::init).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: None,
            tables: BTreeSet::new(),
            cursor_open: Cell::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the backing file and create any missing client tables.
    ///
    /// On failure the store is left closed.
    #[instrument(skip(self, client_names), fields(path = %self.path.display()))]
    pub fn init<I, S>(&mut self, client_names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => open_connection(&self.path).map_err(|source| StoreError::Open {
                path: self.path.display().to_string(),
                source,
            })?,
        };

        let mut tables = std::mem::take(&mut self.tables);
        for name in client_names {
            let name = name.as_ref();
            if let Err(source) = create_client_table(&conn, name) {
                // Dropping the connection closes it; the store stays closed.
                return Err(StoreError::Schema {
                    client: name.to_string(),
                    source,
                });
            }
            tables.insert(name.to_string());
        }

        debug!(tables = tables.len(), "example store initialised");
        self.tables = tables;
        self.conn = Some(conn);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Close the backing file. Succeeds immediately if already closed.
    ///
    /// If SQLite refuses to close, the connection is kept so that dropping the
    /// store retries the close; the caller should give up on this handle.
    pub fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        if self.cursor_open.get() {
            self.conn = Some(conn);
            return Err(StoreError::AlreadyOpen);
        }
        match conn.close() {
            Ok(()) => {
                self.tables.clear();
                debug!(path = %self.path.display(), "example store closed");
                Ok(())
            }
            Err((conn, e)) => {
                self.conn = Some(conn);
                Err(StoreError::Close(e))
            }
        }
    }

    /// Run SQLite's structural self-check. Anything but a single "ok" fails.
    pub fn check_integrity(&self) -> bool {
        let Some(conn) = self.conn.as_ref() else {
            return false;
        };
        match conn.query_row("PRAGMA integrity_check", [], |row| row.get::<_, String>(0)) {
            Ok(result) if result == "ok" => true,
            Ok(result) => {
                warn!(path = %self.path.display(), %result, "integrity check reported problems");
                false
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "integrity check failed to run");
                false
            }
        }
    }

    /// Append one example and return its freshly assigned id.
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub fn insert(
        &self,
        client_name: &str,
        payload: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        let (conn, table) = self.table(client_name)?;
        if payload.is_empty() {
            return Err(StoreError::Write("empty payload".into()));
        }
        let mut stmt = conn
            .prepare_cached(&format!(
                "INSERT INTO {table} (payload, timestamp) VALUES (?1, ?2)"
            ))
            .map_err(|e| StoreError::Write(e.to_string()))?;
        stmt.execute(params![payload, to_micros(timestamp)])
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(conn.last_insert_rowid())
    }

    /// Number of examples with `start <= timestamp <= end`.
    pub fn count_in_range(
        &self,
        client_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        let (conn, table) = self.table(client_name)?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE timestamp >= ?1 AND timestamp <= ?2"),
                params![to_micros(start), to_micros(end)],
                |row| row.get(0),
            )
            .map_err(StoreError::Read)?;
        Ok(count.max(0) as u64)
    }

    /// Open the store's single cursor over `[start, end]` for `client_name`.
    pub fn open_cursor(
        &self,
        client_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Cursor<'_>> {
        if self.cursor_open.get() {
            return Err(StoreError::AlreadyOpen);
        }
        let (_, table) = self.table(client_name)?;
        self.cursor_open.set(true);
        Ok(Cursor::new(
            self,
            client_name.to_string(),
            table,
            to_micros(start),
            to_micros(end),
        ))
    }

    /// Delete every row with `id <= max_id`. Returns whether anything was removed.
    pub fn delete_up_to_id(&self, client_name: &str, max_id: i64) -> Result<bool> {
        let (conn, table) = self.table(client_name)?;
        let n = conn
            .execute(&format!("DELETE FROM {table} WHERE id <= ?1"), [max_id])
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(n > 0)
    }

    /// Delete one client's rows older than `now - max_age`.
    pub fn delete_client_older_than(&self, client_name: &str, max_age: Duration) -> Result<usize> {
        let (conn, table) = self.table(client_name)?;
        let cutoff = to_micros(cutoff_for(max_age));
        conn.execute(&format!("DELETE FROM {table} WHERE timestamp < ?1"), [cutoff])
            .map_err(|e| StoreError::Write(e.to_string()))
    }

    /// Retention sweep over every registered client table.
    ///
    /// Returns the total number of rows removed.
    pub fn delete_older_than(&self, max_age: Duration) -> Result<usize> {
        if self.conn.is_none() {
            return Err(StoreError::NotOpen);
        }
        let mut total = 0;
        for client in &self.tables {
            let n = self.delete_client_older_than(client, max_age)?;
            if n > 0 {
                info!(client = %client, removed = n, "retention sweep removed examples");
            }
            total += n;
        }
        Ok(total)
    }

    // --- crate helpers -----------------------------------------------------

    pub(crate) fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    pub(crate) fn release_cursor(&self) {
        self.cursor_open.set(false);
    }

    /// Resolve a registered client to its connection and quoted table name.
    fn table(&self, client_name: &str) -> Result<(&Connection, String)> {
        let conn = self.conn.as_ref().ok_or(StoreError::NotOpen)?;
        if !self.tables.contains(client_name) {
            return Err(StoreError::UnknownClient(client_name.to_string()));
        }
        Ok((conn, quote_ident(client_name)))
    }
}

fn cutoff_for(max_age: Duration) -> DateTime<Utc> {
    let age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_sub_signed(age)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
