use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::cursor::Cursor;
use crate::store::ExampleStore;

/// Source of the current storage namespace (one per logged-in user).
///
/// An empty string means there is no active namespace, which is handled the
/// same way as a stopped session.
pub trait NamespaceProvider: Send + Sync {
    fn current_namespace(&self) -> String;
}

/// Owns the example store and binds its lifecycle to the user session.
///
/// Producers go through [`ingest`](Self::ingest), the scheduler through
/// [`get_training_cursor`](Self::get_training_cursor). Store errors never leave
/// this type: they are logged and turned into `false` / `None`.
pub struct StorageManager {
    root: PathBuf,
    file_name: String,
    retention: Duration,
    clients: Vec<String>,
    namespaces: Arc<dyn NamespaceProvider>,
    store: Option<ExampleStore>,
    active_namespace: Option<String>,
}

impl StorageManager {
    /// `root` holds one sub-directory per namespace, each with a single
    /// `file_name` database containing a table for every entry in `clients`.
    pub fn new(
        root: impl Into<PathBuf>,
        file_name: impl Into<String>,
        retention: Duration,
        clients: Vec<String>,
        namespaces: Arc<dyn NamespaceProvider>,
    ) -> Self {
        Self {
            root: root.into(),
            file_name: file_name.into(),
            retention,
            clients,
            namespaces,
            store: None,
            active_namespace: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.store.as_ref().is_some_and(ExampleStore::is_open)
    }

    pub fn active_namespace(&self) -> Option<&str> {
        self.active_namespace.as_deref()
    }

    /// Path of the database file for `namespace`.
    pub fn store_path(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace).join(&self.file_name)
    }

    /// Open the store for the current namespace.
    ///
    /// A store that fails to initialise or fails its integrity check is
    /// deleted and left closed; the next session start recreates it empty.
    /// A freshly opened store gets an immediate retention sweep.
    pub fn on_session_started(&mut self) {
        let namespace = self.namespaces.current_namespace();
        if !is_valid_namespace(&namespace) {
            if namespace.is_empty() {
                debug!("session started without a storage namespace");
            } else {
                warn!(%namespace, "refusing unusable storage namespace");
            }
            self.on_session_stopped();
            return;
        }

        if self.is_open() {
            if self.active_namespace.as_deref() == Some(namespace.as_str()) {
                return;
            }
            info!(%namespace, "storage namespace changed, reopening example store");
            self.on_session_stopped();
        }

        let path = self.store_path(&namespace);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!(path = %parent.display(), error = %e, "cannot create store directory");
                return;
            }
        }

        let mut store = ExampleStore::new(&path);
        let healthy = match store.init(&self.clients) {
            Ok(()) => store.check_integrity(),
            Err(e) => {
                warn!(error = %e, "example store failed to initialise");
                false
            }
        };

        if !healthy {
            if let Err(e) = store.close() {
                warn!(error = %e, "close failed on unhealthy store");
            }
            drop(store);
            remove_store_files(&path);
            warn!(path = %path.display(), "example store deleted after failed open");
            return;
        }

        match store.delete_older_than(self.retention) {
            Ok(removed) => debug!(removed, "retention sweep complete"),
            Err(e) => warn!(error = %e, "retention sweep failed"),
        }

        info!(%namespace, path = %path.display(), "example store opened");
        self.store = Some(store);
        self.active_namespace = Some(namespace);
    }

    /// Close the store, if one is open.
    pub fn on_session_stopped(&mut self) {
        self.active_namespace = None;
        if let Some(mut store) = self.store.take() {
            match store.close() {
                Ok(()) => info!("example store closed"),
                // Dropping the handle retries the close.
                Err(e) => error!(error = %e, "example store failed to close cleanly"),
            }
        }
    }

    /// Persist one example stamped with the current time.
    pub fn ingest(&self, client_name: &str, payload: &[u8]) -> bool {
        let Some(store) = self.open_store() else {
            debug!(client = %client_name, "dropping example: store not open");
            return false;
        };
        match store.insert(client_name, payload, Utc::now()) {
            Ok(id) => {
                debug!(client = %client_name, id, "example stored");
                true
            }
            Err(e) => {
                warn!(client = %client_name, error = %e, "failed to store example");
                false
            }
        }
    }

    /// Cursor over `client_name`'s examples in `[start, end]`, provided the
    /// range is valid and holds at least `min_count` examples.
    pub fn get_training_cursor(
        &self,
        client_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        min_count: u64,
    ) -> Option<Cursor<'_>> {
        let store = self.open_store()?;
        if start > end || start.timestamp_micros() < 0 {
            debug!(client = %client_name, %start, %end, "invalid example range");
            return None;
        }
        let count = match store.count_in_range(client_name, start, end) {
            Ok(count) => count,
            Err(e) => {
                warn!(client = %client_name, error = %e, "failed to count examples");
                return None;
            }
        };
        if count < min_count {
            debug!(client = %client_name, count, min_count, "not enough examples for a round");
            return None;
        }
        match store.open_cursor(client_name, start, end) {
            Ok(cursor) => Some(cursor),
            Err(e) => {
                warn!(client = %client_name, error = %e, "failed to open example cursor");
                None
            }
        }
    }

    /// Delete `client_name`'s examples with `id <= max_id`.
    ///
    /// Returns false when the store is closed or nothing matched.
    pub fn delete_up_to_id(&self, client_name: &str, max_id: i64) -> bool {
        let Some(store) = self.open_store() else {
            return false;
        };
        match store.delete_up_to_id(client_name, max_id) {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(client = %client_name, error = %e, "failed to delete consumed examples");
                false
            }
        }
    }

    /// Direct access to the open store, mainly for inspection.
    pub fn store(&self) -> Option<&ExampleStore> {
        self.open_store()
    }

    fn open_store(&self) -> Option<&ExampleStore> {
        self.store.as_ref().filter(|s| s.is_open())
    }
}

impl Drop for StorageManager {
    fn drop(&mut self) {
        self.on_session_stopped();
    }
}

/// A namespace becomes a directory name, so it must be a single plain path
/// component.
fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace != "."
        && namespace != ".."
        && !namespace.contains(['/', '\\', '\0'])
}

/// Remove the database file and any SQLite sidecar files next to it.
fn remove_store_files(path: &Path) {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        let file = PathBuf::from(name);
        match std::fs::remove_file(&file) {
            Ok(()) => debug!(path = %file.display(), "removed store file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(path = %file.display(), error = %e, "failed to remove store file"),
        }
    }
}
