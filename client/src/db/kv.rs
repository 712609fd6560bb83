//! Durable key-value area stored next to the record tables.

use crate::db::store::{to_sql_value, LocalStore};
use crate::error::Result;
use rowcloud_engine::Value;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::error;

/// Backing table of the key-value area.
pub const KV_TABLE: &str = "_rowcloud_kv";

pub(crate) fn ensure_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _rowcloud_kv (
            key TEXT PRIMARY KEY,
            value BLOB,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

pub(crate) fn write(conn: &Connection, key: &str, value: &Value) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    conn.execute(
        "INSERT INTO _rowcloud_kv (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
         value = excluded.value,
         updated_at = excluded.updated_at",
        params![key, to_sql_value(value), now],
    )?;
    Ok(())
}

pub(crate) fn remove(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM _rowcloud_kv WHERE key = ?1", params![key])?;
    Ok(())
}

pub(crate) fn read(conn: &Connection, key: &str) -> Result<Option<Value>> {
    let value = conn
        .query_row(
            "SELECT value FROM _rowcloud_kv WHERE key = ?1",
            params![key],
            |row| {
                Ok(match row.get_ref(0)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(i) => Value::Integer(i),
                    ValueRef::Real(f) => Value::Real(f),
                    ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(b) => Value::Blob(b.to_vec()),
                })
            },
        )
        .optional()?;
    Ok(value)
}

pub(crate) fn read_i64(conn: &Connection, key: &str) -> Result<Option<i64>> {
    Ok(read(conn, key)?.and_then(|v| v.as_i64()))
}

/// Typed access to the key-value area of one database.
///
/// Each write is a single upsert and therefore atomic.
#[derive(Debug, Clone)]
pub struct KeyValueStore {
    store: LocalStore,
}

impl KeyValueStore {
    /// Attach to `store`, creating the backing table if needed.
    pub fn new(store: LocalStore) -> Result<Self> {
        store.run(|conn| ensure_table(conn))?;
        Ok(Self { store })
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        self.store.run(move |conn| read(conn, &key))
    }

    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let key = key.to_string();
        self.store.run(move |conn| write(conn, &key, &value))
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.store.run(move |conn| remove(conn, &key))
    }

    pub fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        match self.get(key) {
            Ok(Some(Value::Blob(bytes))) => Some(bytes),
            Ok(Some(Value::Text(text))) => Some(text.into_bytes()),
            Ok(_) => None,
            Err(err) => {
                error!(key, error = %err, "could not read key");
                None
            }
        }
    }

    pub fn set_bytes(&self, key: &str, bytes: Vec<u8>) -> bool {
        self.logged(key, self.set(key, Value::Blob(bytes)))
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get_i64(key).map(|v| v != 0).unwrap_or(false)
    }

    pub fn set_bool(&self, key: &str, value: bool) -> bool {
        self.logged(key, self.set(key, Value::Integer(value as i64)))
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Ok(value) => value.and_then(|v| v.as_i64()),
            Err(err) => {
                error!(key, error = %err, "could not read key");
                None
            }
        }
    }

    pub fn set_i64(&self, key: &str, value: i64) -> bool {
        self.logged(key, self.set(key, Value::Integer(value)))
    }

    /// Remove a key, returning whether the store accepted the delete.
    pub fn delete(&self, key: &str) -> bool {
        self.logged(key, self.remove(key))
    }

    fn logged(&self, key: &str, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                error!(key, error = %err, "could not write key");
                false
            }
        }
    }
}
