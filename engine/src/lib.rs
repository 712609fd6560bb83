//! # Rowcloud Engine
//!
//! Record mapping and remote record model for offline-first apps backed by
//! an embedded SQLite database and a remote cloud record store.
//!
//! This crate holds the pure parts of rowcloud. It performs no IO; the
//! `rowcloud-client` crate drives the local database and the remote store
//! using the types defined here.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A domain type implements [`Record`] by listing its fields once as
//! [`FieldDef`]s (name plus a representative default, which fixes the
//! column type) and exposing them through `get`/`set`. Every record also
//! carries [`RecordMeta`]: a soft-delete flag, created/updated timestamps
//! and the opaque remote metadata blob.
//!
//! ### Tables
//!
//! [`TableDescriptor::of`] derives the table for a record type. Table names
//! default to the pluralized, lower-cased type name (`Category` becomes
//! `categories`). Integer primary keys auto-increment; `-1` means unset.
//!
//! ### Column Codec
//!
//! The [`codec`] module maps [`Value`]s to SQLite storage classes and to
//! remote field values. Dates are stored as UTC text `yyyy-MM-dd HH:mm:ss`.
//!
//! ### Remote Records
//!
//! [`CloudRecord`]s live in zones ([`ZoneId`]) inside a [`Scope`]. The
//! [`convert`] module turns records into remote records and back, and the
//! [`CloudError`] helpers classify remote failures.
//!
//! ## Quick Start
//!
//! ```rust
//! use rowcloud_engine::{FieldDef, Record, RecordMeta, TableDescriptor, Value};
//!
//! #[derive(Debug, Clone, Default)]
//! struct Category {
//!     id: i64,
//!     name: String,
//!     meta: RecordMeta,
//! }
//!
//! impl Record for Category {
//!     const TYPE_NAME: &'static str = "Category";
//!
//!     fn fields() -> Vec<FieldDef> {
//!         vec![FieldDef::new("id", -1i64), FieldDef::new("name", "")]
//!     }
//!
//!     fn get(&self, field: &str) -> Value {
//!         match field {
//!             "id" => self.id.into(),
//!             "name" => self.name.clone().into(),
//!             _ => Value::Null,
//!         }
//!     }
//!
//!     fn set(&mut self, field: &str, value: Value) {
//!         match field {
//!             "id" => self.id = value.as_i64().unwrap_or(-1),
//!             "name" => self.name = value.as_str().unwrap_or_default().to_string(),
//!             _ => {}
//!         }
//!     }
//!
//!     fn meta(&self) -> &RecordMeta {
//!         &self.meta
//!     }
//!
//!     fn meta_mut(&mut self) -> &mut RecordMeta {
//!         &mut self.meta
//!     }
//! }
//!
//! let table = TableDescriptor::of::<Category>().unwrap();
//! assert_eq!(table.table, "categories");
//! assert!(table.create_sql().starts_with("CREATE TABLE IF NOT EXISTS"));
//! ```

pub mod changes;
pub mod cloud;
pub mod cloud_error;
pub mod codec;
pub mod convert;
pub mod error;
pub mod page;
pub mod reconcile;
pub mod record;
pub mod schema;

// Re-export main types at crate root
pub use changes::{subscription_key, token_key, ChangeToken, DatabaseChanges, ZoneChanges};
pub use cloud::{
    CloudRecord, RecordId, SavePolicy, Scope, Subscription, SystemFields, ZoneId,
    DEFAULT_ZONE_NAME,
};
pub use cloud_error::{CloudError, CloudErrorCode};
pub use codec::{ColumnKind, RemoteValue, StorageValue, Value};
pub use error::{Error, Result};
pub use page::{Cursor, Page};
pub use reconcile::{Conflict, MergeDecision, MergeStrategy};
pub use record::{is_set_primary_key, FetchType, Record, RecordMeta};
pub use schema::{table_name_for, ColumnDef, FieldDef, FieldType, TableDescriptor};
