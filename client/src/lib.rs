//! # Rowcloud
//!
//! Active-record persistence over an embedded SQLite database with
//! incremental sync against a remote cloud record store.
//!
//! - [`Database`] owns a serialized [`LocalStore`] and creates or migrates
//!   the table of each record type on first use through [`Database::table`].
//! - [`Table`] saves, deletes and queries records. Local operations never
//!   return errors; failures are logged and reported as `0`, `false` or an
//!   empty result.
//! - [`SyncEngine`] pulls remote changes using durable change tokens and
//!   pushes local saves in batches through a [`RemoteStore`].
//!
//! ```no_run
//! use rowcloud::{Config, Database, Query};
//! # use rowcloud_engine::{FieldDef, Record, RecordMeta, Value};
//! # #[derive(Debug, Clone)]
//! # struct Category { id: i64, name: String, meta: RecordMeta }
//! # impl Default for Category {
//! #     fn default() -> Self { Self { id: -1, name: String::new(), meta: RecordMeta::default() } }
//! # }
//! # impl Record for Category {
//! #     const TYPE_NAME: &'static str = "Category";
//! #     fn fields() -> Vec<FieldDef> { vec![FieldDef::new("id", -1i64), FieldDef::new("name", "")] }
//! #     fn get(&self, f: &str) -> Value { match f { "id" => self.id.into(), "name" => self.name.clone().into(), _ => Value::Null } }
//! #     fn set(&mut self, f: &str, v: Value) { match f { "id" => self.id = v.as_i64().unwrap_or(-1), "name" => self.name = v.as_str().unwrap_or_default().into(), _ => {} } }
//! #     fn meta(&self) -> &RecordMeta { &self.meta }
//! #     fn meta_mut(&mut self) -> &mut RecordMeta { &mut self.meta }
//! # }
//!
//! let db = Database::from_config(&Config::from_env()?)?;
//! let categories = db.table::<Category>()?;
//!
//! let mut books = Category { name: "Books".into(), ..Default::default() };
//! categories.save(&mut books);
//!
//! let found = categories.rows(&Query::filtered("name = ?").bind("Books"));
//! assert_eq!(found.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod mapper;
pub mod remote;
pub mod sync;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use db::{KeyValueStore, LocalStore, OpenOptions, Row};
pub use error::{Error, Result, SyncError, SyncResult};
pub use mapper::{Database, DeleteOptions, Query, SaveOptions, Table};
pub use remote::{MemoryRemote, ModifyResult, RemoteOp, RemoteResult, RemoteStore};
pub use sync::{
    ChangeNotification, ChangeNotifier, ChangeTokenStore, MergeHook, RemoteApplier, SaveReport,
    SubscriptionManager, SubscriptionStatus, SyncEngine, SyncSummary,
};
pub use telemetry::init_tracing;
