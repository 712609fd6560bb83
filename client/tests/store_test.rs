//! Integration tests for the serialized local store.

use rowcloud::{LocalStore, OpenOptions};
use rowcloud_engine::Value;
use std::sync::Arc;
use std::thread;

const WRITERS: usize = 8;
const STATEMENTS: usize = 50;

fn audit_store() -> LocalStore {
    let store = LocalStore::open_in_memory().unwrap();
    store.execute(
        "CREATE TABLE audit (seq INTEGER PRIMARY KEY AUTOINCREMENT, writer INTEGER, marker INTEGER)",
        &[],
    );
    store
}

#[cfg(test)]
mod serialization_tests {
    use super::*;

    #[test]
    fn test_concurrent_callers_see_one_total_order() {
        let store = Arc::new(audit_store());

        let handles: Vec<_> = (0..WRITERS)
            .map(|writer| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut last_seen = 0;
                    for _ in 0..STATEMENTS {
                        // Reads the previous marker and appends the next one in
                        // a single statement; any interleaving would duplicate
                        // or skip a marker.
                        let id = store.execute(
                            "INSERT INTO audit (writer, marker) \
                             SELECT ?, COALESCE(MAX(marker), 0) + 1 FROM audit",
                            &[Value::Integer(writer as i64)],
                        );
                        assert!(id > last_seen);
                        last_seen = id;

                        let rows = store.query("SELECT COUNT(*) AS n FROM audit", &[]);
                        let n = rows[0].get("n").and_then(Value::as_i64).unwrap();
                        assert!(n >= id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let rows = store.query("SELECT seq, marker FROM audit ORDER BY seq", &[]);
        assert_eq!(rows.len(), WRITERS * STATEMENTS);
        for (index, row) in rows.iter().enumerate() {
            let seq = row.get("seq").and_then(Value::as_i64).unwrap();
            let marker = row.get("marker").and_then(Value::as_i64).unwrap();
            assert_eq!(seq, index as i64 + 1);
            assert_eq!(marker, seq);
        }
    }

    #[test]
    fn test_clones_share_one_connection() {
        let store = audit_store();
        let other = store.clone();
        other.execute("INSERT INTO audit (writer, marker) VALUES (1, 1)", &[]);
        let rows = store.query("SELECT COUNT(*) AS n FROM audit", &[]);
        assert_eq!(rows[0].get("n"), Some(&Value::Integer(1)));

        assert!(store.close());
        assert!(other.query("SELECT 1", &[]).is_empty());
        assert_eq!(other.execute("SELECT 1", &[]), 0);
    }

    #[test]
    fn test_update_reports_at_least_one() {
        let store = audit_store();
        assert_eq!(
            store.execute("UPDATE audit SET marker = 0 WHERE seq = 99", &[]),
            1
        );
        assert_eq!(store.execute("CREATE INDEX idx_marker ON audit(marker)", &[]), 1);
    }
}

#[cfg(test)]
mod file_tests {
    use super::*;

    #[test]
    fn test_reopen_sees_committed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let store = LocalStore::open(OpenOptions::file(&path)).unwrap();
            store.execute("CREATE TABLE t (v TEXT)", &[]);
            store.execute("INSERT INTO t (v) VALUES (?)", &[Value::from("kept")]);
            assert_eq!(store.path(), Some(path.as_path()));
            assert!(store.close());
        }
        let store = LocalStore::open(OpenOptions::file(&path)).unwrap();
        let rows = store.query("SELECT v FROM t", &[]);
        assert_eq!(rows[0].get("v"), Some(&Value::Text("kept".into())));
    }

    #[test]
    fn test_missing_template_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let options = OpenOptions::file(dir.path().join("app.db"))
            .template(dir.path().join("does-not-exist.db"));
        assert!(matches!(
            LocalStore::open(options),
            Err(rowcloud::Error::Io(_))
        ));
    }
}
