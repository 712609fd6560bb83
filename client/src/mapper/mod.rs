//! Active-record mapping over the local store.

pub mod database;
pub mod query;
pub mod table;

pub use database::Database;
pub use query::Query;
pub use table::{DeleteOptions, SaveOptions, Table};
