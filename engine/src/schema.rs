//! Field and table descriptors.
//!
//! Every record type declares its fields once. The table descriptor derived
//! from them drives table creation and additive migration.

use crate::codec::Value;
use crate::{error::Result, Error, Record};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Soft-delete flag column.
pub const COL_IS_DELETED: &str = "isDeleted";
/// Creation timestamp column.
pub const COL_CREATED: &str = "created";
/// Last-save timestamp column.
pub const COL_UPDATED: &str = "updated";
/// Opaque remote metadata column.
pub const COL_CLOUD_META: &str = "cloudMeta";

/// Semantic field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Real,
    Bool,
    Text,
    Date,
    Blob,
}

impl FieldType {
    /// Declared SQL type used for columns of this field type.
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldType::Integer => "INTEGER",
            FieldType::Real => "REAL",
            FieldType::Bool => "BOOLEAN",
            FieldType::Text => "TEXT",
            FieldType::Date => "DATETIME",
            FieldType::Blob => "BLOB",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Integer => write!(f, "Integer"),
            FieldType::Real => write!(f, "Real"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Text => write!(f, "Text"),
            FieldType::Date => write!(f, "Date"),
            FieldType::Blob => write!(f, "Blob"),
        }
    }
}

/// Definition of a persisted field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field (and column) name
    pub name: String,
    /// Type inferred from the default value
    pub field_type: FieldType,
    /// Representative default, also used when a stored value cannot be read
    pub default: Value,
    /// Ignored fields are never persisted
    pub ignored: bool,
}

impl FieldDef {
    /// Create a field whose type is inferred from `default`.
    ///
    /// A `Null` default carries no type information and is treated as text.
    pub fn new(name: impl Into<String>, default: impl Into<Value>) -> Self {
        let default = default.into();
        Self {
            name: name.into(),
            field_type: default.field_type().unwrap_or(FieldType::Text),
            default,
            ignored: false,
        }
    }

    /// Exclude this field from persistence.
    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }
}

/// A column of a derived table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub field_type: FieldType,
    pub primary_key: bool,
    pub default: Value,
}

impl ColumnDef {
    fn new(name: &str, field_type: FieldType, default: Value) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            primary_key: false,
            default,
        }
    }

    /// Column definition as used inside `CREATE TABLE`.
    pub fn definition(&self) -> String {
        if self.primary_key {
            return match self.field_type {
                FieldType::Integer => format!(
                    "{} INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL UNIQUE",
                    quote_ident(&self.name)
                ),
                other => format!(
                    "{} {} PRIMARY KEY NOT NULL UNIQUE",
                    quote_ident(&self.name),
                    other.sql_type()
                ),
            };
        }
        self.plain_definition()
    }

    /// Column definition without key constraints, valid for `ADD COLUMN`.
    pub fn plain_definition(&self) -> String {
        let mut def = format!("{} {}", quote_ident(&self.name), self.field_type.sql_type());
        if let Some(literal) = self.default_literal() {
            def.push_str(" DEFAULT ");
            def.push_str(&literal);
        }
        def
    }

    // Only numeric columns carry a literal default.
    fn default_literal(&self) -> Option<String> {
        match (self.field_type, &self.default) {
            (FieldType::Integer, v) => Some(v.as_i64().unwrap_or(0).to_string()),
            (FieldType::Real, v) => {
                let f = v.as_f64().unwrap_or(0.0);
                Some(if f.is_finite() { f.to_string() } else { "0".to_string() })
            }
            (FieldType::Bool, v) => Some((v.as_bool().unwrap_or(false) as i64).to_string()),
            _ => None,
        }
    }
}

/// Table layout derived from a record type.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    pub table: String,
    pub primary_key: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDescriptor {
    /// Derive the table for `R`: its persisted fields plus bookkeeping columns.
    pub fn of<R: Record>() -> Result<Self> {
        let primary_key = R::primary_key().to_string();
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        let mut pk_found = false;

        for field in R::fields().into_iter().filter(|f| !f.ignored) {
            if !seen.insert(field.name.to_lowercase()) {
                return Err(Error::DuplicateField(field.name));
            }
            let mut column = ColumnDef::new(&field.name, field.field_type, field.default);
            if field.name == primary_key {
                if !matches!(field.field_type, FieldType::Integer | FieldType::Text) {
                    return Err(Error::InvalidPrimaryKeyType {
                        field: field.name,
                        got: column.field_type.to_string(),
                    });
                }
                column.primary_key = true;
                pk_found = true;
            }
            columns.push(column);
        }

        if !pk_found {
            return Err(Error::MissingPrimaryKeyField {
                type_name: R::TYPE_NAME.to_string(),
                field: primary_key,
            });
        }

        for meta in meta_columns() {
            if !seen.insert(meta.name.to_lowercase()) {
                return Err(Error::DuplicateField(meta.name));
            }
            columns.push(meta);
        }

        Ok(Self {
            table: R::table_name(),
            primary_key,
            columns,
        })
    }

    /// The primary-key column.
    pub fn primary_key_column(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this table.
    pub fn create_sql(&self) -> String {
        let defs: Vec<String> = self.columns.iter().map(ColumnDef::definition).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.table),
            defs.join(", ")
        )
    }

    /// `ALTER TABLE ... ADD COLUMN` statement for one column.
    pub fn add_column_sql(&self, column: &ColumnDef) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(&self.table),
            column.plain_definition()
        )
    }

    /// Columns not present in `existing` (compared case-insensitively).
    pub fn missing_columns<S: AsRef<str>>(&self, existing: &[S]) -> Vec<&ColumnDef> {
        let present: HashSet<String> = existing
            .iter()
            .map(|name| name.as_ref().to_lowercase())
            .collect();
        self.columns
            .iter()
            .filter(|c| !present.contains(&c.name.to_lowercase()))
            .collect()
    }
}

fn meta_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new(COL_IS_DELETED, FieldType::Bool, Value::Bool(false)),
        ColumnDef::new(COL_CREATED, FieldType::Date, Value::Null),
        ColumnDef::new(COL_UPDATED, FieldType::Date, Value::Null),
        ColumnDef::new(COL_CLOUD_META, FieldType::Blob, Value::Null),
    ]
}

/// Default table name for a type: lower-cased and pluralized.
pub fn table_name_for(type_name: &str) -> String {
    let lower = type_name.to_lowercase();
    if let Some(stem) = lower.strip_suffix('y') {
        format!("{}ies", stem)
    } else if lower.ends_with('s') {
        format!("{}es", lower)
    } else {
        format!("{}s", lower)
    }
}

/// Quote an identifier for use in generated SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
