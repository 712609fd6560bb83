//! Remote record store contract.
//!
//! The sync engine only talks to the remote store through [`RemoteStore`].
//! [`MemoryRemote`] implements it in memory for tests and offline work.

pub mod memory;

pub use memory::{MemoryRemote, RemoteOp};

use async_trait::async_trait;
use rowcloud_engine::{
    ChangeToken, CloudError, CloudRecord, Cursor, DatabaseChanges, Page, RecordId, SavePolicy,
    Scope, Subscription, ZoneChanges, ZoneId,
};

/// Result alias for remote calls.
pub type RemoteResult<T> = std::result::Result<T, CloudError>;

/// Per-record outcome of a batched modify.
#[derive(Debug, Clone, Default)]
pub struct ModifyResult {
    /// Saved records as the server now stores them, or the per-item error
    pub saved: Vec<(RecordId, RemoteResult<CloudRecord>)>,
    pub deleted: Vec<(RecordId, RemoteResult<()>)>,
}

impl ModifyResult {
    /// Per-item errors of this batch, saves and deletes alike.
    pub fn errors(&self) -> impl Iterator<Item = (&RecordId, &CloudError)> {
        let saved = self
            .saved
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (id, e)));
        let deleted = self
            .deleted
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (id, e)));
        saved.chain(deleted)
    }
}

/// Operations consumed from the remote record store.
///
/// A batch-level `Err` means nothing in the batch was applied; per-record
/// failures are reported inside [`ModifyResult`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create_zone(&self, scope: Scope, zone: ZoneId) -> RemoteResult<()>;

    async fn delete_zone(&self, scope: Scope, zone: ZoneId) -> RemoteResult<()>;

    /// One page of records of `record_type` in `zone`.
    async fn query_records(
        &self,
        scope: Scope,
        zone: ZoneId,
        record_type: String,
        cursor: Option<Cursor>,
    ) -> RemoteResult<Page<CloudRecord>>;

    async fn fetch_record(&self, scope: Scope, id: RecordId) -> RemoteResult<CloudRecord>;

    async fn modify_records(
        &self,
        scope: Scope,
        save: Vec<CloudRecord>,
        delete: Vec<RecordId>,
        policy: SavePolicy,
    ) -> RemoteResult<ModifyResult>;

    /// Zones changed since `token`, one page at a time.
    async fn fetch_database_changes(
        &self,
        scope: Scope,
        token: Option<ChangeToken>,
    ) -> RemoteResult<DatabaseChanges>;

    /// Records changed or deleted in `zone` since `token`, one page at a time.
    async fn fetch_zone_changes(
        &self,
        scope: Scope,
        zone: ZoneId,
        token: Option<ChangeToken>,
    ) -> RemoteResult<ZoneChanges>;

    async fn save_subscription(&self, scope: Scope, subscription: Subscription)
        -> RemoteResult<()>;
}
