use std::path::Path;

use rusqlite::Connection;

/// Open the backing file and apply connection pragmas.
///
/// SQLite opens lazily, so a file that is not a database only fails here, on
/// the first statement that reads the header.
pub fn open_connection(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

/// Create the example table for `client` (idempotent).
///
/// Rows are ordered by `id` for iteration; the timestamp index keeps ranged
/// counts and retention sweeps cheap on large tables.
pub fn create_client_table(conn: &Connection, client: &str) -> rusqlite::Result<()> {
    let table = quote_ident(client);
    let index = quote_ident(&format!("{client}_timestamp_idx"));
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            payload    BLOB    NOT NULL,
            timestamp  INTEGER NOT NULL   -- microseconds since the Unix epoch
        );
        CREATE INDEX IF NOT EXISTS {index} ON {table} (timestamp);"
    ))
}

/// Quote an identifier for interpolation into SQL text.
///
/// Only names the store has registered through `init` ever reach this.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
