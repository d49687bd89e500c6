use thiserror::Error;

/// Errors returned by [`ExampleStore`](crate::store::ExampleStore) operations.
///
/// None of these are fatal to the process; the storage manager degrades to
/// "store unavailable" instead of propagating them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file could not be opened or configured.
    #[error("failed to open example store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A per-client table could not be created.
    #[error("failed to create table for client {client}: {source}")]
    Schema {
        client: String,
        #[source]
        source: rusqlite::Error,
    },

    /// An insert or delete failed below the store.
    #[error("write failed: {0}")]
    Write(String),

    /// No table has been registered for this client.
    #[error("unknown client: {0}")]
    UnknownClient(String),

    /// A cursor is already open on this store.
    #[error("a cursor is already open on this store")]
    AlreadyOpen,

    /// SQLite reported an error while closing; the handle retries on drop.
    #[error("failed to close example store: {0}")]
    Close(#[source] rusqlite::Error),

    #[error("example store is not open")]
    NotOpen,

    #[error("read failed: {0}")]
    Read(#[source] rusqlite::Error),
}

/// Errors returned by [`Cursor::next`](crate::cursor::Cursor::next).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    /// The range has been fully consumed. Terminal, and not a failure.
    #[error("cursor exhausted")]
    Exhausted,

    /// A row could not be decoded. The cursor closes itself.
    #[error("corrupt example row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
