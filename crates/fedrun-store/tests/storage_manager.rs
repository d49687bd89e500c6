// Session lifecycle, admission and corruption recovery of StorageManager.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fedrun_store::{NamespaceProvider, StorageManager};

/// Namespace provider the tests can switch at will.
#[derive(Default)]
struct TestNamespace(Mutex<String>);

impl TestNamespace {
    fn set(&self, ns: &str) {
        *self.0.lock().unwrap() = ns.to_string();
    }
}

impl NamespaceProvider for TestNamespace {
    fn current_namespace(&self) -> String {
        self.0.lock().unwrap().clone()
    }
}

fn manager(dir: &tempfile::TempDir) -> (StorageManager, Arc<TestNamespace>) {
    let ns = Arc::new(TestNamespace::default());
    ns.set("user_a");
    let mgr = StorageManager::new(
        dir.path(),
        "examples.db",
        Duration::from_secs(30 * 24 * 3600),
        vec!["c1".to_string(), "c2".to_string()],
        ns.clone(),
    );
    (mgr, ns)
}

fn window() -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    (now - chrono::Duration::hours(1), now + chrono::Duration::hours(1))
}

#[test]
fn ingest_requires_an_open_store() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mgr, _) = manager(&dir);
    assert!(!mgr.ingest("c1", b"x"));

    mgr.on_session_started();
    assert!(mgr.is_open());
    assert!(mgr.ingest("c1", b"x"));
    assert!(!mgr.ingest("unknown", b"x"));

    mgr.on_session_stopped();
    assert!(!mgr.is_open());
    assert!(!mgr.ingest("c1", b"x"));
}

#[test]
fn session_start_is_a_no_op_when_already_open() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mgr, _) = manager(&dir);
    mgr.on_session_started();
    assert!(mgr.ingest("c1", b"x"));
    mgr.on_session_started();
    let (start, end) = window();
    assert!(mgr.get_training_cursor("c1", start, end, 1).is_some());
}

#[test]
fn empty_namespace_reads_as_stopped_session() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mgr, ns) = manager(&dir);
    mgr.on_session_started();
    assert!(mgr.is_open());

    ns.set("");
    mgr.on_session_started();
    assert!(!mgr.is_open());
}

#[test]
fn switching_namespace_reopens_a_separate_store() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mgr, ns) = manager(&dir);
    mgr.on_session_started();
    assert!(mgr.ingest("c1", b"from a"));

    ns.set("user_b");
    mgr.on_session_started();
    assert_eq!(mgr.active_namespace(), Some("user_b"));
    let (start, end) = window();
    assert!(mgr.get_training_cursor("c1", start, end, 1).is_none());
    assert!(dir.path().join("user_a").join("examples.db").exists());
    assert!(dir.path().join("user_b").join("examples.db").exists());
}

#[test]
fn cursor_is_denied_below_min_count() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mgr, _) = manager(&dir);
    mgr.on_session_started();
    for i in 0..10 {
        assert!(mgr.ingest("c1", format!("e{i}").as_bytes()));
    }
    let (start, end) = window();
    assert!(mgr.get_training_cursor("c1", start, end, 50).is_none());

    let mut cursor = mgr.get_training_cursor("c1", start, end, 10).unwrap();
    let mut n = 0;
    while cursor.next().is_ok() {
        n += 1;
    }
    assert_eq!(n, 10);
}

#[test]
fn invalid_ranges_are_denied() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mgr, _) = manager(&dir);
    mgr.on_session_started();
    mgr.ingest("c1", b"x");
    let (start, end) = window();
    assert!(mgr.get_training_cursor("c1", end, start, 0).is_none());
    let before_epoch = DateTime::from_timestamp(-10, 0).unwrap();
    assert!(mgr.get_training_cursor("c1", before_epoch, end, 0).is_none());
}

#[test]
fn unreadable_store_file_is_deleted_then_recreated() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mgr, _) = manager(&dir);
    let path: PathBuf = mgr.store_path("user_a");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, vec![0xAB; 4096]).unwrap();

    mgr.on_session_started();
    assert!(!mgr.is_open());
    assert!(!path.exists());

    mgr.on_session_started();
    assert!(mgr.is_open());
    let store = mgr.store().unwrap();
    assert!(store.check_integrity());
    let (start, end) = window();
    assert_eq!(store.count_in_range("c1", start, end).unwrap(), 0);
}

/// Leaves the timestamp index of `c1` missing one table row, so the file
/// opens cleanly but fails `PRAGMA integrity_check`.
fn desync_timestamp_index(path: &std::path::Path) {
    let (root, sql): (i64, String) = {
        let conn = rusqlite::Connection::open(path).unwrap();
        let entry = conn
            .query_row(
                "SELECT rootpage, sql FROM sqlite_master WHERE name = 'c1_timestamp_idx'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        conn.execute_batch(
            "PRAGMA writable_schema = ON;
             DELETE FROM sqlite_master WHERE name = 'c1_timestamp_idx';
             PRAGMA writable_schema = OFF;",
        )
        .unwrap();
        entry
    };
    {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute(
            "INSERT INTO \"c1\" (payload, timestamp) VALUES (x'01', 1)",
            [],
        )
        .unwrap();
    }
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch("PRAGMA writable_schema = ON;").unwrap();
    conn.execute(
        "INSERT INTO sqlite_master (type, name, tbl_name, rootpage, sql)
         VALUES ('index', 'c1_timestamp_idx', 'c1', ?1, ?2)",
        rusqlite::params![root, sql],
    )
    .unwrap();
}

#[test]
fn store_failing_integrity_check_is_deleted_then_recreated() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mgr, _) = manager(&dir);
    mgr.on_session_started();
    assert!(mgr.ingest("c1", b"kept until corruption"));
    mgr.on_session_stopped();

    let path = mgr.store_path("user_a");
    desync_timestamp_index(&path);
    {
        let mut reopened = fedrun_store::ExampleStore::new(&path);
        reopened.init(["c1", "c2"]).unwrap();
        assert!(!reopened.check_integrity());
        reopened.close().unwrap();
    }

    mgr.on_session_started();
    assert!(!mgr.is_open());
    assert!(!path.exists());

    mgr.on_session_started();
    assert!(mgr.is_open());
    let store = mgr.store().unwrap();
    assert!(store.check_integrity());
    let epoch = DateTime::from_timestamp(0, 0).unwrap();
    assert_eq!(store.count_in_range("c1", epoch, Utc::now()).unwrap(), 0);
}

#[test]
fn session_start_sweeps_expired_examples() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mgr, _) = manager(&dir);
    mgr.on_session_started();
    let store = mgr.store().unwrap();
    store
        .insert("c1", b"stale", Utc::now() - chrono::Duration::days(45))
        .unwrap();
    store.insert("c1", b"fresh", Utc::now()).unwrap();
    mgr.on_session_stopped();

    mgr.on_session_started();
    let epoch = DateTime::from_timestamp(0, 0).unwrap();
    let count = mgr
        .store()
        .unwrap()
        .count_in_range("c1", epoch, Utc::now())
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn delete_up_to_id_reports_whether_anything_was_removed() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mgr, _) = manager(&dir);
    assert!(!mgr.delete_up_to_id("c1", 10));
    mgr.on_session_started();
    mgr.ingest("c1", b"a");
    mgr.ingest("c1", b"b");
    assert!(mgr.delete_up_to_id("c1", 2));
    assert!(!mgr.delete_up_to_id("c1", 2));
}
