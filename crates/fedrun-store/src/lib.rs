//! `fedrun-store`: persistent per-client example log backed by SQLite.
//!
//! # Overview
//!
//! Each registered client owns one table of `(id, payload, timestamp)` rows in
//! a single database file per storage namespace. [`store::ExampleStore`] is the
//! raw handle; [`manager::StorageManager`] ties its open/close lifecycle to the
//! active user session and is the only thing the rest of the daemon talks to.
//!
//! At most one [`cursor::Cursor`] may be open on a store at any time.

pub mod cursor;
pub mod db;
pub mod error;
pub mod manager;
pub mod store;
pub mod types;

pub use cursor::Cursor;
pub use error::{CursorError, Result, StoreError};
pub use manager::{NamespaceProvider, StorageManager};
pub use store::ExampleStore;
pub use types::Example;
