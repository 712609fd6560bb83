//! Type registry for incoming remote records.

use crate::error::Result;
use crate::mapper::Table;
use rowcloud_engine::{CloudRecord, Record};

/// Writes remote records of one type into the local store.
pub trait RemoteApplier: Send + Sync {
    /// The remote record type this applier handles.
    fn record_type(&self) -> &'static str;

    fn apply_changed(&self, record: &CloudRecord) -> Result<()>;

    /// Remove the local row of a record deleted remotely.
    fn apply_deleted(&self, record_name: &str) -> Result<()>;
}

impl<R: Record> RemoteApplier for Table<R> {
    fn record_type(&self) -> &'static str {
        R::TYPE_NAME
    }

    fn apply_changed(&self, record: &CloudRecord) -> Result<()> {
        self.apply_remote(record).map(|_| ())
    }

    fn apply_deleted(&self, record_name: &str) -> Result<()> {
        self.apply_remote_delete(record_name)
    }
}
