//! Active-record operations over one record type.

use crate::error::{Error, Result};
use crate::mapper::{Database, Query};
use crate::sync::SyncEngine;
use chrono::{DateTime, Utc};
use rowcloud_engine::codec::date_from_seconds;
use rowcloud_engine::convert::{from_cloud_record, primary_key_from_name};
use rowcloud_engine::schema::{quote_ident, COL_CLOUD_META, COL_IS_DELETED, COL_UPDATED};
use rowcloud_engine::{CloudRecord, FetchType, FieldType, Record, Scope, TableDescriptor, Value};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Options for [`Table::save_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Push the saved record to the remote store
    pub update_cloud: bool,
    /// Remote scope, defaulting to the record type's scope
    pub scope: Option<Scope>,
    // Only records decoded from the remote store carry authoritative metadata.
    pub(crate) write_cloud_meta: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            update_cloud: true,
            scope: None,
            write_cloud_meta: false,
        }
    }
}

impl SaveOptions {
    /// Save locally only.
    pub fn local() -> Self {
        Self {
            update_cloud: false,
            ..Self::default()
        }
    }

    pub(crate) fn remote() -> Self {
        Self {
            write_cloud_meta: true,
            ..Self::local()
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// Options for [`Table::delete_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    pub update_cloud: bool,
    /// Remove the row instead of flagging it deleted
    pub force: bool,
    pub scope: Option<Scope>,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            update_cloud: true,
            force: false,
            scope: None,
        }
    }
}

impl DeleteOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn local(mut self) -> Self {
        self.update_cloud = false;
        self
    }
}

/// Typed access to the table of `R`.
///
/// Obtained from [`Database::table`], which guarantees the table exists
/// with every declared column.
pub struct Table<R: Record> {
    db: Database,
    descriptor: Arc<TableDescriptor>,
    sync: Option<Arc<SyncEngine>>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Clone for Table<R> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            descriptor: Arc::clone(&self.descriptor),
            sync: self.sync.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> std::fmt::Debug for Table<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("table", &self.descriptor.table)
            .field("synced", &self.sync.is_some())
            .finish()
    }
}

impl<R: Record> Table<R> {
    pub(crate) fn new(db: Database, descriptor: Arc<TableDescriptor>) -> Self {
        Self {
            db,
            descriptor,
            sync: None,
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.table
    }

    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Push saves and deletes through `engine`.
    pub fn with_sync(mut self, engine: Arc<SyncEngine>) -> Self {
        self.sync = Some(engine);
        self
    }

    /// A copy of this table that never talks to the remote store.
    pub fn without_sync(&self) -> Self {
        Self {
            sync: None,
            ..self.clone()
        }
    }

    pub fn is_synced(&self) -> bool {
        self.sync.is_some()
    }

    /// Save with default options. See [`Table::save_with`].
    pub fn save(&self, record: &mut R) -> i64 {
        self.save_with(record, SaveOptions::default())
    }

    /// Insert or update `record`.
    ///
    /// Whether a row exists is probed by primary key. Unset integer keys are
    /// assigned by the database; unset text keys get a random UUID. Returns
    /// the primary key for integer keys, a positive value for text keys,
    /// and 0 on failure.
    pub fn save_with(&self, record: &mut R, options: SaveOptions) -> i64 {
        record.before_save();

        let now = now();
        let text_key = self
            .descriptor
            .primary_key_column()
            .is_some_and(|c| c.field_type == FieldType::Text);

        let mut has_key = record.has_primary_key();
        let exists = has_key && self.exists(&record.primary_key_value());
        if !has_key && text_key {
            record.set_primary_key(Value::Text(Uuid::new_v4().to_string()));
            has_key = true;
        }

        {
            let meta = record.meta_mut();
            if meta.created.is_none() {
                meta.created = Some(now);
            }
            meta.updated = Some(now);
        }

        let columns = self.column_values(record, options.write_cloud_meta);
        let outcome = if exists {
            self.update_row(&record.primary_key_value(), &columns)
        } else {
            self.insert_row(&columns, has_key)
        };

        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                error!(table = %self.descriptor.table, error = %err, "save failed");
                return 0;
            }
        };

        let saved = if !has_key {
            record.set_primary_key(Value::Integer(result));
            result
        } else {
            match record.primary_key_value() {
                Value::Integer(pk) => pk,
                _ => result.max(1),
            }
        };
        debug!(table = %self.descriptor.table, inserted = !exists, pk = %record.primary_key_value(), "saved");

        if options.update_cloud {
            if let Some(engine) = &self.sync {
                engine.enqueue_save(self.without_sync(), record.clone(), options.scope);
            }
        }
        saved
    }

    /// Soft-delete `record`, pushing a tombstone to the remote store.
    pub fn delete(&self, record: &mut R) -> bool {
        self.delete_with(record, DeleteOptions::default())
    }

    /// Delete `record`. Soft deletes flag the row and stamp `updated`;
    /// forced deletes remove the row.
    pub fn delete_with(&self, record: &mut R, options: DeleteOptions) -> bool {
        if !record.has_primary_key() {
            return false;
        }
        let pk = record.primary_key_value();
        let pk_col = quote_ident(&self.descriptor.primary_key);
        let table = quote_ident(&self.descriptor.table);

        let ok = if options.force {
            let sql = format!("DELETE FROM {} WHERE {} = ?", table, pk_col);
            self.db.store().execute(&sql, &[pk]) != 0
        } else {
            let now = now();
            record.meta_mut().is_deleted = true;
            record.meta_mut().updated = Some(now);
            let sql = format!(
                "UPDATE {} SET {} = 1, {} = ? WHERE {} = ?",
                table,
                quote_ident(COL_IS_DELETED),
                quote_ident(COL_UPDATED),
                pk_col
            );
            self.db.store().execute(&sql, &[Value::Date(now), pk]) != 0
        };

        if ok && options.update_cloud {
            if let Some(engine) = &self.sync {
                if options.force {
                    engine.enqueue_delete(self.without_sync(), record.clone(), options.scope);
                } else {
                    engine.enqueue_save(self.without_sync(), record.clone(), options.scope);
                }
            }
        }
        ok
    }

    /// Reload every field of `record` from its row.
    pub fn refresh(&self, record: &mut R) -> bool {
        if !record.has_primary_key() {
            return false;
        }
        match self.select_by_key(record.primary_key_value()) {
            Some(row) => {
                *record = self.materialize(&row);
                true
            }
            None => false,
        }
    }

    /// Rows matching `query`.
    pub fn rows(&self, query: &Query) -> Vec<R> {
        let sql = format!(
            "SELECT * FROM {}{}{}",
            quote_ident(&self.descriptor.table),
            query.where_clause(),
            query.tail()
        );
        self.rows_for(&sql, query.params())
    }

    /// Every non-deleted row.
    pub fn all(&self) -> Vec<R> {
        self.rows(&Query::new())
    }

    /// The `number`-th row (1-based) matching `query`.
    pub fn row(&self, number: usize, query: &Query) -> Option<R> {
        if number == 0 {
            return None;
        }
        let sql = format!(
            "SELECT * FROM {}{}{} LIMIT 1 OFFSET {}",
            quote_ident(&self.descriptor.table),
            query.where_clause(),
            query.order_clause(),
            number - 1
        );
        self.rows_for(&sql, query.params()).into_iter().next()
    }

    /// The row with primary key `key`, deleted or not.
    pub fn row_by(&self, key: impl Into<Value>) -> Option<R> {
        self.select_by_key(key.into())
            .map(|row| self.materialize(&row))
    }

    /// Number of rows matching `query`.
    pub fn count(&self, query: &Query) -> i64 {
        let sql = format!(
            "SELECT COUNT(*) AS count FROM {}{}",
            quote_ident(&self.descriptor.table),
            query.where_clause()
        );
        self.db
            .store()
            .query(&sql, query.params())
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    /// Delete every row matching the query filter (fetch type ignored).
    /// Local only.
    pub fn remove(&self, query: &Query, force: bool) -> bool {
        let table = quote_ident(&self.descriptor.table);
        let filter = query.where_clause_for(FetchType::All);
        if force {
            let sql = format!("DELETE FROM {}{}", table, filter);
            self.db.store().execute(&sql, query.params()) != 0
        } else {
            let sql = format!(
                "UPDATE {} SET {} = 1, {} = ?{}",
                table,
                quote_ident(COL_IS_DELETED),
                quote_ident(COL_UPDATED),
                filter
            );
            let mut params = vec![Value::Date(now())];
            params.extend_from_slice(query.params());
            self.db.store().execute(&sql, &params) != 0
        }
    }

    /// Permanently remove soft-deleted rows matching the query filter.
    pub fn clear_trash(&self, query: &Query) -> bool {
        let sql = format!(
            "DELETE FROM {}{}",
            quote_ident(&self.descriptor.table),
            query.where_clause_for(FetchType::Deleted)
        );
        self.db.store().execute(&sql, query.params()) != 0
    }

    /// Remove every row.
    pub fn zap(&self) -> bool {
        let sql = format!("DELETE FROM {}", quote_ident(&self.descriptor.table));
        self.db.store().execute(&sql, &[]) != 0
    }

    /// Materialize records from an arbitrary select.
    pub fn rows_for(&self, sql: &str, params: &[Value]) -> Vec<R> {
        self.db
            .store()
            .query(sql, params)
            .iter()
            .map(|row| self.materialize(row))
            .collect()
    }

    /// Stored remote metadata for the row with key `key`.
    pub fn stored_cloud_meta(&self, key: &Value) -> Option<Vec<u8>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            quote_ident(COL_CLOUD_META),
            quote_ident(&self.descriptor.table),
            quote_ident(&self.descriptor.primary_key)
        );
        self.db
            .store()
            .query(&sql, &[key.clone()])
            .into_iter()
            .next()
            .and_then(|mut row| row.remove(COL_CLOUD_META))
            .and_then(|value| match value {
                Value::Blob(bytes) if !bytes.is_empty() => Some(bytes),
                _ => None,
            })
    }

    /// Overwrite only the remote metadata of a row.
    pub fn store_cloud_meta(&self, key: &Value, meta: &[u8]) -> bool {
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} = ?",
            quote_ident(&self.descriptor.table),
            quote_ident(COL_CLOUD_META),
            quote_ident(&self.descriptor.primary_key)
        );
        self.db
            .store()
            .execute(&sql, &[Value::Blob(meta.to_vec()), key.clone()])
            != 0
    }

    /// Write a remote record locally without pushing it back.
    pub fn apply_remote(&self, cloud: &CloudRecord) -> Result<R> {
        let mut record: R = from_cloud_record(cloud)?;
        if self.save_with(&mut record, SaveOptions::remote()) == 0 {
            return Err(Error::LocalWrite(cloud.id.to_string()));
        }
        Ok(record)
    }

    /// Remove the row a deleted remote record maps to.
    pub fn apply_remote_delete(&self, record_name: &str) -> Result<()> {
        let pk = primary_key_from_name::<R>(record_name)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(&self.descriptor.table),
            quote_ident(&self.descriptor.primary_key)
        );
        self.db.store().try_execute(&sql, &[pk])?;
        Ok(())
    }

    fn exists(&self, key: &Value) -> bool {
        let sql = format!(
            "SELECT COUNT(*) AS count FROM {} WHERE {} = ?",
            quote_ident(&self.descriptor.table),
            quote_ident(&self.descriptor.primary_key)
        );
        self.db
            .store()
            .query(&sql, &[key.clone()])
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .is_some_and(|count| count > 0)
    }

    fn select_by_key(&self, key: Value) -> Option<crate::db::Row> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            quote_ident(&self.descriptor.table),
            quote_ident(&self.descriptor.primary_key)
        );
        self.db.store().query(&sql, &[key]).into_iter().next()
    }

    fn materialize(&self, row: &crate::db::Row) -> R {
        let mut record = R::default();
        record.load_values(row);
        record.after_load();
        record
    }

    // The stored remote metadata is only replaced by remote applies and
    // acknowledgements; an in-memory copy may be older than the row.
    fn column_values(&self, record: &R, with_cloud_meta: bool) -> Vec<(String, Value)> {
        let mut columns: Vec<(String, Value)> = record.values().into_iter().collect();
        columns.extend(
            record
                .meta()
                .values()
                .into_iter()
                .filter(|(name, value)| {
                    *name != COL_CLOUD_META || (with_cloud_meta && !value.is_null())
                })
                .map(|(name, value)| (name.to_string(), value)),
        );
        columns
    }

    fn insert_row(&self, columns: &[(String, Value)], has_key: bool) -> Result<i64> {
        let pk = &self.descriptor.primary_key;
        let cols: Vec<&(String, Value)> = columns
            .iter()
            .filter(|(name, _)| has_key || name != pk)
            .collect();

        let names: Vec<String> = cols.iter().map(|(name, _)| quote_ident(name)).collect();
        let marks = vec!["?"; cols.len()].join(", ");
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.descriptor.table),
            names.join(", "),
            marks
        );

        // A concurrent save may have inserted the same key since the probe.
        if has_key {
            let updates: Vec<String> = cols
                .iter()
                .filter(|(name, _)| name != pk)
                .map(|(name, _)| format!("{0} = excluded.{0}", quote_ident(name)))
                .collect();
            if updates.is_empty() {
                sql.push_str(&format!(" ON CONFLICT({}) DO NOTHING", quote_ident(pk)));
            } else {
                sql.push_str(&format!(
                    " ON CONFLICT({}) DO UPDATE SET {}",
                    quote_ident(pk),
                    updates.join(", ")
                ));
            }
        }

        let params: Vec<Value> = cols.into_iter().map(|(_, value)| value.clone()).collect();
        self.db.store().try_execute(&sql, &params)
    }

    fn update_row(&self, key: &Value, columns: &[(String, Value)]) -> Result<i64> {
        let pk = &self.descriptor.primary_key;
        let cols: Vec<&(String, Value)> = columns.iter().filter(|(name, _)| name != pk).collect();
        let sets: Vec<String> = cols
            .iter()
            .map(|(name, _)| format!("{} = ?", quote_ident(name)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_ident(&self.descriptor.table),
            sets.join(", "),
            quote_ident(pk)
        );
        let mut params: Vec<Value> = cols.into_iter().map(|(_, value)| value.clone()).collect();
        params.push(key.clone());
        self.db.store().try_execute(&sql, &params)
    }
}

/// Current time truncated to the stored precision.
fn now() -> DateTime<Utc> {
    let now = Utc::now();
    date_from_seconds(now.timestamp() as f64).unwrap_or(now)
}
