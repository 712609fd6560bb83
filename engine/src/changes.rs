//! Change tokens and change feeds.

use crate::cloud::{CloudRecord, RecordId, Scope, ZoneId};
use serde::{Deserialize, Serialize};

/// Opaque continuation cursor issued by the remote store. Never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeToken(pub Vec<u8>);

impl ChangeToken {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ChangeToken {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Storage key for a scope token, or a zone token when `zone` is given.
pub fn token_key(scope: Scope, zone: Option<&ZoneId>) -> String {
    match zone {
        None => format!("{}DatabaseServerChangeToken", scope.as_str()),
        Some(zone) => format!("{}.{}.ZoneChangeToken", scope.as_str(), zone.name),
    }
}

/// Storage key for the per-scope "subscription saved" flag.
pub fn subscription_key(scope: Scope) -> String {
    format!("{}DatabaseSubscriptionSaved", scope.as_str())
}

/// One page of database-level changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseChanges {
    pub changed_zones: Vec<ZoneId>,
    pub deleted_zones: Vec<ZoneId>,
    pub purged_zones: Vec<ZoneId>,
    /// Token to persist once this page is processed
    pub token: Option<ChangeToken>,
    pub more_coming: bool,
}

/// One page of zone-level changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneChanges {
    pub changed: Vec<CloudRecord>,
    /// Deleted record ids with their record type
    pub deleted: Vec<(RecordId, String)>,
    pub token: Option<ChangeToken>,
    pub more_coming: bool,
}
