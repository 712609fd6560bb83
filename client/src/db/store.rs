//! Serialized access to the embedded database.
//!
//! One worker thread owns the connection. Every call is shipped to it as a
//! job and the caller blocks until the reply arrives, so statements never
//! interleave on the connection.

use crate::config::Config;
use crate::db::kv;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rowcloud_engine::codec::{
    self, from_storage, from_storage_untyped, sniff_declared_type, to_storage, ColumnKind,
    StorageValue,
};
use rowcloud_engine::Value;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// A result row: column name to value. NULL columns are omitted.
pub type Row = BTreeMap<String, Value>;

/// Key of the persisted maintenance countdown.
pub const LAUNCH_COUNT_KEY: &str = "LaunchCount";

type Job = Box<dyn FnOnce(&mut Option<Connection>) + Send>;

/// How to open a [`LocalStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOptions {
    /// Writable database file; ignored for in-memory stores
    pub path: PathBuf,
    pub in_memory: bool,
    /// Copied to `path` when `path` does not exist yet
    pub template: Option<PathBuf>,
    /// Closes between maintenance passes
    pub maintenance_interval: i64,
}

impl OpenOptions {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            in_memory: false,
            template: None,
            maintenance_interval: 500,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            in_memory: true,
            template: None,
            maintenance_interval: 500,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            path: config.database_file(),
            in_memory: config.in_memory,
            template: config.template_db.clone(),
            maintenance_interval: config.maintenance_interval,
        }
    }

    pub fn template(mut self, template: impl Into<PathBuf>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn maintenance_interval(mut self, interval: i64) -> Self {
        self.maintenance_interval = interval;
        self
    }
}

struct Inner {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    path: Option<PathBuf>,
    maintenance_interval: i64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if let Some(handle) = self.worker.lock().ok().and_then(|mut w| w.take()) {
            let _ = handle.join();
        }
    }
}

/// Handle to an open database. Cheap to clone; all clones share one worker.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.inner.path)
            .finish()
    }
}

impl LocalStore {
    /// Open (creating if needed) the database described by `options`.
    pub fn open(options: OpenOptions) -> Result<Self> {
        let conn = if options.in_memory {
            Connection::open_in_memory()?
        } else {
            prepare_file(&options)?;
            Connection::open(&options.path)?
        };

        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name("rowcloud-db".to_string())
            .spawn(move || {
                let mut slot = Some(conn);
                for job in receiver {
                    job(&mut slot);
                }
            })?;

        let path = (!options.in_memory).then(|| options.path.clone());
        info!(path = ?path, "database opened");

        Ok(Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
                path,
                maintenance_interval: options.maintenance_interval,
            }),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(OpenOptions::in_memory())
    }

    /// Database file path, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Run a statement. Returns the new row id for `INSERT`, the affected
    /// row count (at least 1) for `UPDATE`/`DELETE`, 1 for anything else,
    /// and 0 on failure.
    pub fn execute(&self, sql: &str, params: &[Value]) -> i64 {
        match self.try_execute(sql, params) {
            Ok(result) => result,
            Err(err) => {
                error!(sql = %sql, params = ?params, error = %err, "statement failed");
                0
            }
        }
    }

    /// Run a query. Returns no rows on failure.
    pub fn query(&self, sql: &str, params: &[Value]) -> Vec<Row> {
        match self.try_query(sql, params) {
            Ok(rows) => rows,
            Err(err) => {
                error!(sql = %sql, params = ?params, error = %err, "query failed");
                Vec::new()
            }
        }
    }

    /// Like [`LocalStore::execute`] but reports failures.
    pub fn try_execute(&self, sql: &str, params: &[Value]) -> Result<i64> {
        debug!(sql = %sql, params = params.len(), "execute");
        let sql = sql.to_string();
        let params = params.to_vec();
        self.run(move |conn| execute_on(conn, &sql, &params))
    }

    /// Like [`LocalStore::query`] but reports failures.
    pub fn try_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(sql = %sql, params = params.len(), "query");
        let sql = sql.to_string();
        let params = params.to_vec();
        self.run(move |conn| query_on(conn, &sql, &params))
    }

    /// Run `f` on the worker with the open connection.
    pub fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        self.submit(move |slot| match slot.as_mut() {
            Some(conn) => f(conn),
            None => Err(Error::Closed),
        })
    }

    fn submit<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Option<Connection>) -> Result<T> + Send + 'static,
    {
        let sender = self
            .inner
            .sender
            .lock()
            .map_err(|_| Error::WorkerGone)?
            .clone()
            .ok_or(Error::Closed)?;

        let (reply_tx, reply_rx) = mpsc::channel();
        let job: Job = Box::new(move |slot| {
            let _ = reply_tx.send(f(slot));
        });
        sender.send(job).map_err(|_| Error::WorkerGone)?;
        reply_rx.recv().map_err(|_| Error::WorkerGone)?
    }

    /// Schema version kept in `PRAGMA user_version`.
    pub fn schema_version(&self) -> i64 {
        self.run(|conn| Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?))
            .unwrap_or_else(|err| {
                error!(error = %err, "could not read schema version");
                0
            })
    }

    pub fn set_schema_version(&self, version: i64) -> bool {
        self.run(move |conn| {
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
            Ok(())
        })
        .map_err(|err| error!(version, error = %err, "could not set schema version"))
        .is_ok()
    }

    /// Canonical text form of a date as stored by this database.
    pub fn format_date(&self, date: &DateTime<Utc>) -> String {
        codec::format_date(date)
    }

    /// Close the database, running maintenance when the launch countdown
    /// expires. Further calls on any clone fail with [`Error::Closed`].
    pub fn close(&self) -> bool {
        let interval = self.inner.maintenance_interval;
        let closed = self.submit(move |slot| {
            let Some(conn) = slot.take() else {
                return Ok(false);
            };
            match run_maintenance(&conn, interval) {
                Ok(true) => info!("database maintenance completed"),
                Ok(false) => {}
                Err(err) => warn!(error = %err, "database maintenance failed"),
            }
            conn.close().map_err(|(_, err)| Error::Database(err))?;
            Ok(true)
        });

        if let Ok(mut sender) = self.inner.sender.lock() {
            sender.take();
        }
        if let Some(handle) = self.inner.worker.lock().ok().and_then(|mut w| w.take()) {
            let _ = handle.join();
        }

        match closed {
            Ok(closed) => {
                if closed {
                    info!(path = ?self.inner.path, "database closed");
                }
                closed
            }
            Err(Error::Closed) => false,
            Err(err) => {
                error!(error = %err, "database close failed");
                false
            }
        }
    }
}

fn prepare_file(options: &OpenOptions) -> Result<()> {
    if let Some(parent) = options.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    if let Some(template) = &options.template {
        if !options.path.exists() {
            std::fs::copy(template, &options.path)?;
            info!(
                template = %template.display(),
                path = %options.path.display(),
                "copied template database"
            );
        }
    }
    Ok(())
}

/// Decrement the countdown; repack and refresh statistics when it expires.
fn run_maintenance(conn: &Connection, interval: i64) -> Result<bool> {
    kv::ensure_table(conn)?;
    let remaining = kv::read_i64(conn, LAUNCH_COUNT_KEY)?.unwrap_or(interval) - 1;
    if remaining < 0 {
        conn.execute_batch("VACUUM; ANALYZE;")?;
        kv::write(conn, LAUNCH_COUNT_KEY, &Value::Integer(interval))?;
        Ok(true)
    } else {
        kv::write(conn, LAUNCH_COUNT_KEY, &Value::Integer(remaining))?;
        Ok(false)
    }
}

pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match to_storage(value) {
        StorageValue::Null => SqlValue::Null,
        StorageValue::Integer(i) => SqlValue::Integer(i),
        StorageValue::Real(f) => SqlValue::Real(f),
        StorageValue::Text(s) => SqlValue::Text(s),
        StorageValue::Blob(b) => SqlValue::Blob(b),
    }
}

fn storage_of(raw: ValueRef<'_>) -> StorageValue {
    match raw {
        ValueRef::Null => StorageValue::Null,
        ValueRef::Integer(i) => StorageValue::Integer(i),
        ValueRef::Real(f) => StorageValue::Real(f),
        ValueRef::Text(bytes) => StorageValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => StorageValue::Blob(bytes.to_vec()),
    }
}

fn bind_all(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> Result<()> {
    let expected = stmt.parameter_count();
    if expected != params.len() {
        return Err(Error::ParameterCount {
            expected,
            got: params.len(),
        });
    }
    for (index, value) in params.iter().enumerate() {
        stmt.raw_bind_parameter(index + 1, to_sql_value(value))?;
    }
    Ok(())
}

fn execute_on(conn: &Connection, sql: &str, params: &[Value]) -> Result<i64> {
    let mut stmt = conn.prepare(sql)?;
    bind_all(&mut stmt, params)?;
    {
        let mut rows = stmt.raw_query();
        while rows.next()?.is_some() {}
    }

    let verb = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    Ok(match verb.as_str() {
        "INSERT" | "REPLACE" => conn.last_insert_rowid(),
        "UPDATE" | "DELETE" => (conn.changes() as i64).max(1),
        _ => 1,
    })
}

fn query_on(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    bind_all(&mut stmt, params)?;

    let columns: Vec<(String, Option<ColumnKind>)> = stmt
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), c.decl_type().map(sniff_declared_type)))
        .collect();

    let mut out = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (index, (name, kind)) in columns.iter().enumerate() {
            let storage = storage_of(row.get_ref(index)?);
            let value = match kind {
                Some(kind) => from_storage(storage, *kind),
                None => from_storage_untyped(storage),
            };
            if !value.is_null() {
                record.insert(name.clone(), value);
            }
        }
        out.push(record);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowcloud_engine::codec::parse_date;

    fn store() -> LocalStore {
        let store = LocalStore::open_in_memory().unwrap();
        store.execute(
            "CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, name VARCHAR(20), \
             price DECIMAL(8,2), seen DATETIME, flag BOOLEAN, data BLOB)",
            &[],
        );
        store
    }

    #[test]
    fn execute_classifies_statements() {
        let store = store();
        let id = store.execute("INSERT INTO items (name) VALUES (?)", &["a".into()]);
        assert_eq!(id, 1);
        let id = store.execute("INSERT INTO items (name) VALUES (?)", &["b".into()]);
        assert_eq!(id, 2);

        assert_eq!(store.execute("UPDATE items SET name = 'c'", &[]), 2);
        // No matching rows still reports success.
        assert_eq!(store.execute("DELETE FROM items WHERE id = 99", &[]), 1);
        assert_eq!(store.execute("CREATE INDEX idx_name ON items(name)", &[]), 1);
    }

    #[test]
    fn failures_are_sentinels() {
        let store = store();
        assert_eq!(store.execute("INSERT INTO nowhere VALUES (1)", &[]), 0);
        assert!(store.query("SELECT * FROM nowhere", &[]).is_empty());
    }

    #[test]
    fn parameter_count_mismatch_is_rejected() {
        let store = store();
        assert_eq!(store.execute("INSERT INTO items (name) VALUES (?)", &[]), 0);
        let err = store
            .try_execute("INSERT INTO items (name) VALUES (?)", &["a".into(), "b".into()])
            .unwrap_err();
        assert!(matches!(err, Error::ParameterCount { expected: 1, got: 2 }));
        assert!(store.query("SELECT * FROM items", &[]).is_empty());
    }

    #[test]
    fn query_decodes_by_declared_type() {
        let store = store();
        let when = parse_date("2024-03-01 08:00:00").unwrap();
        store.execute(
            "INSERT INTO items (name, price, seen, flag, data) VALUES (?, ?, ?, ?, ?)",
            &[
                "pen".into(),
                Value::Real(2.5),
                Value::Date(when),
                Value::Bool(true),
                Value::Blob(vec![1, 2, 3]),
            ],
        );
        store.execute("INSERT INTO items (name) VALUES ('bare')", &[]);

        let rows = store.query("SELECT * FROM items ORDER BY id", &[]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], Value::Text("pen".into()));
        assert_eq!(rows[0]["price"], Value::Real(2.5));
        assert_eq!(rows[0]["seen"], Value::Date(when));
        assert_eq!(rows[0]["flag"], Value::Integer(1));
        assert_eq!(rows[0]["data"], Value::Blob(vec![1, 2, 3]));

        // NULL columns are omitted.
        assert!(!rows[1].contains_key("price"));
        assert!(!rows[1].contains_key("seen"));
    }

    #[test]
    fn expression_columns_are_untyped() {
        let store = store();
        store.execute("INSERT INTO items (name) VALUES ('a')", &[]);
        let rows = store.query("SELECT COUNT(*) AS total FROM items", &[]);
        assert_eq!(rows[0]["total"], Value::Integer(1));
    }

    #[test]
    fn schema_version_pragma() {
        let store = store();
        assert_eq!(store.schema_version(), 0);
        assert!(store.set_schema_version(7));
        assert_eq!(store.schema_version(), 7);
    }

    #[test]
    fn closed_store_rejects_calls() {
        let store = store();
        let clone = store.clone();
        assert!(store.close());
        assert!(!store.close());
        assert_eq!(clone.execute("INSERT INTO items (name) VALUES ('x')", &[]), 0);
        assert!(matches!(
            clone.try_query("SELECT 1", &[]),
            Err(Error::Closed)
        ));
    }
}
