//! The record trait implemented by every persisted type.

use crate::codec::Value;
use crate::schema::{table_name_for, FieldDef, COL_CLOUD_META, COL_CREATED, COL_IS_DELETED, COL_UPDATED};
use crate::Scope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bookkeeping carried by every record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMeta {
    /// Soft-delete flag
    pub is_deleted: bool,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    /// Encoded remote system fields; empty until the record has been synced
    pub cloud_meta: Vec<u8>,
}

impl RecordMeta {
    /// Column values for the bookkeeping columns.
    pub fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            (COL_IS_DELETED, Value::Bool(self.is_deleted)),
            (COL_CREATED, self.created.into()),
            (COL_UPDATED, self.updated.into()),
            (
                COL_CLOUD_META,
                if self.cloud_meta.is_empty() {
                    Value::Null
                } else {
                    Value::Blob(self.cloud_meta.clone())
                },
            ),
        ]
    }

    /// Read bookkeeping columns from a row. Absent columns reset to defaults.
    pub fn load(&mut self, row: &BTreeMap<String, Value>) {
        self.is_deleted = row
            .get(COL_IS_DELETED)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.created = row.get(COL_CREATED).and_then(Value::as_date);
        self.updated = row.get(COL_UPDATED).and_then(Value::as_date);
        self.cloud_meta = row
            .get(COL_CLOUD_META)
            .and_then(Value::as_blob)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
    }
}

/// Which rows a query sees with respect to the soft-delete flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchType {
    All,
    Deleted,
    #[default]
    NonDeleted,
}

impl FetchType {
    fn clause(self) -> Option<String> {
        match self {
            FetchType::All => None,
            FetchType::Deleted => Some(format!("{} = 1", COL_IS_DELETED)),
            FetchType::NonDeleted => Some(format!("{} = 0", COL_IS_DELETED)),
        }
    }

    /// Combine a caller filter with this fetch type. Empty means no `WHERE`.
    pub fn compose(self, filter: &str) -> String {
        let filter = filter.trim();
        match (filter.is_empty(), self.clause()) {
            (true, None) => String::new(),
            (true, Some(clause)) => clause,
            (false, None) => filter.to_string(),
            (false, Some(clause)) => format!("({}) AND {}", filter, clause),
        }
    }
}

/// A domain type mapped to one table.
///
/// Implementors list their fields once in [`Record::fields`] and expose
/// them by name through [`Record::get`] and [`Record::set`]. Everything
/// else (table layout, row mapping, remote encoding) is derived.
pub trait Record: Default + Clone + Send + Sync + 'static {
    /// Stable type tag, also used as the remote record type.
    const TYPE_NAME: &'static str;

    /// Declared fields, primary key included.
    fn fields() -> Vec<FieldDef>;

    /// Current value of a declared field.
    fn get(&self, field: &str) -> Value;

    /// Assign a declared field. Values arrive already coerced to the
    /// field's declared type.
    fn set(&mut self, field: &str, value: Value);

    fn meta(&self) -> &RecordMeta;

    fn meta_mut(&mut self) -> &mut RecordMeta;

    fn table_name() -> String {
        table_name_for(Self::TYPE_NAME)
    }

    fn primary_key() -> &'static str {
        "id"
    }

    /// Scope used when no explicit scope is passed to a remote call.
    fn cloud_scope() -> Scope {
        Scope::Private
    }

    fn zone_name() -> String {
        format!("{}-zone", Self::table_name())
    }

    /// Runs before every local save.
    fn before_save(&mut self) {}

    /// Runs after every load from the local store.
    fn after_load(&mut self) {}

    /// Persisted field values by name.
    fn values(&self) -> BTreeMap<String, Value> {
        Self::fields()
            .into_iter()
            .filter(|f| !f.ignored)
            .map(|f| {
                let value = self.get(&f.name);
                (f.name, value)
            })
            .collect()
    }

    fn primary_key_value(&self) -> Value {
        self.get(Self::primary_key())
    }

    fn set_primary_key(&mut self, value: Value) {
        self.set(Self::primary_key(), value);
    }

    /// `-1`, empty text and `Null` mark a record that was never inserted.
    fn has_primary_key(&self) -> bool {
        is_set_primary_key(&self.primary_key_value())
    }

    /// Assign declared fields from a row. Fields absent from the row keep
    /// their current value; unreadable values fall back to the default.
    fn load_values(&mut self, row: &BTreeMap<String, Value>) {
        for field in Self::fields().into_iter().filter(|f| !f.ignored) {
            let Some(raw) = row.get(&field.name) else {
                continue;
            };
            let value = raw
                .coerce(field.field_type)
                .unwrap_or_else(|| field.default.clone());
            self.set(&field.name, value);
        }
        self.meta_mut().load(row);
    }
}

/// Whether a primary-key value identifies an inserted row.
pub fn is_set_primary_key(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Integer(i) => *i != -1,
        Value::Text(s) => !s.is_empty(),
        _ => true,
    }
}
