//! Embedded database access.

pub mod kv;
pub mod store;

pub use kv::{KeyValueStore, KV_TABLE};
pub use store::{LocalStore, OpenOptions, Row, LAUNCH_COUNT_KEY};
