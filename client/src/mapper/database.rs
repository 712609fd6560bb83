//! Database handle and table bootstrap.

use crate::config::Config;
use crate::db::{KeyValueStore, LocalStore, OpenOptions};
use crate::error::{Error, Result};
use crate::mapper::Table;
use dashmap::DashSet;
use rowcloud_engine::schema::quote_ident;
use rowcloud_engine::{Record, TableDescriptor, Value};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

struct Inner {
    store: LocalStore,
    kv: KeyValueStore,
    /// Tables whose structure was verified through this handle
    verified: DashSet<String>,
    bootstrap: Mutex<()>,
}

/// An open database together with the tables verified through it.
///
/// Cheap to clone. Table verification happens once per table per handle.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("store", &self.inner.store)
            .field("verified", &self.inner.verified.len())
            .finish()
    }
}

impl Database {
    pub fn open(options: OpenOptions) -> Result<Self> {
        Self::with_store(LocalStore::open(options)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(OpenOptions::in_memory())
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open(OpenOptions::from_config(config))
    }

    /// Wrap an already open store.
    pub fn with_store(store: LocalStore) -> Result<Self> {
        let kv = KeyValueStore::new(store.clone())?;
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                kv,
                verified: DashSet::new(),
                bootstrap: Mutex::new(()),
            }),
        })
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn kv(&self) -> &KeyValueStore {
        &self.inner.kv
    }

    pub fn schema_version(&self) -> i64 {
        self.inner.store.schema_version()
    }

    pub fn set_schema_version(&self, version: i64) -> bool {
        self.inner.store.set_schema_version(version)
    }

    pub fn close(&self) -> bool {
        self.inner.store.close()
    }

    /// Whether `table` has been verified through this handle.
    pub fn is_verified(&self, table: &str) -> bool {
        self.inner.verified.contains(table)
    }

    /// The table for `R`, creating or migrating it on first use.
    pub fn table<R: Record>(&self) -> Result<Table<R>> {
        let descriptor = Arc::new(TableDescriptor::of::<R>()?);

        if !self.inner.verified.contains(&descriptor.table) {
            let _guard = self
                .inner
                .bootstrap
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !self.inner.verified.contains(&descriptor.table) {
                self.bootstrap(&descriptor)?;
                self.inner.verified.insert(descriptor.table.clone());
            }
        }

        Ok(Table::new(self.clone(), descriptor))
    }

    fn bootstrap(&self, descriptor: &TableDescriptor) -> Result<()> {
        let store = &self.inner.store;
        let table = &descriptor.table;

        let matches = store.try_query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND lower(name) = lower(?)",
            &[Value::Text(table.clone())],
        )?;

        match matches.len() {
            0 => {
                store
                    .try_execute(&descriptor.create_sql(), &[])
                    .map_err(|err| {
                        error!(table = %table, error = %err, "table creation failed");
                        Error::TableCreation(table.clone())
                    })?;
                info!(table = %table, "created table");
            }
            1 => {
                let actual = matches[0]
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(table)
                    .to_string();
                self.add_missing_columns(descriptor, &actual)?;
            }
            n => {
                return Err(Error::SchemaIntegrity {
                    table: table.clone(),
                    matches: n,
                })
            }
        }
        Ok(())
    }

    /// Additive migration: add every declared column the table lacks.
    fn add_missing_columns(&self, descriptor: &TableDescriptor, actual: &str) -> Result<()> {
        let store = &self.inner.store;
        let existing: Vec<String> = store
            .try_query(&format!("PRAGMA table_info({})", quote_ident(actual)), &[])?
            .into_iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_string))
            .collect();

        for column in descriptor.missing_columns(&existing) {
            store
                .try_execute(&descriptor.add_column_sql(column), &[])
                .map_err(|err| {
                    error!(table = %actual, column = %column.name, error = %err, "adding column failed");
                    Error::Migration {
                        table: actual.to_string(),
                        column: column.name.clone(),
                    }
                })?;
            info!(table = %actual, column = %column.name, "added column");
        }
        Ok(())
    }
}
