//! Remote record model.
//!
//! These types describe records as the remote store sees them. A record's
//! system fields are serialized into the local `cloudMeta` column so a later
//! save updates the same remote record in place.

use crate::codec::RemoteValue;
use crate::{error::Result, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// Name of the zone that always exists in every scope.
pub const DEFAULT_ZONE_NAME: &str = "_defaultZone";

/// A remote data partition with its own access and sync semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Private,
    Public,
    Shared,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Private, Scope::Public, Scope::Shared];

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Private => "Private",
            Scope::Public => "Public",
            Scope::Shared => "Shared",
        }
    }

    /// Custom zones are not available in the public scope.
    pub fn supports_custom_zones(self) -> bool {
        !matches!(self, Scope::Public)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(Scope::Private),
            "public" => Ok(Scope::Public),
            "shared" => Ok(Scope::Shared),
            other => Err(format!("unknown scope '{}'", other)),
        }
    }
}

/// Identifier of a zone within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId {
    pub name: String,
}

impl ZoneId {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn default_zone() -> Self {
        Self::new(DEFAULT_ZONE_NAME)
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_ZONE_NAME
    }
}

impl Default for ZoneId {
    fn default() -> Self {
        Self::default_zone()
    }
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Identifier of a remote record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    pub zone: ZoneId,
    pub name: String,
}

impl RecordId {
    pub fn new(zone: ZoneId, name: impl Into<String>) -> Self {
        Self {
            zone,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.zone, self.name)
    }
}

/// Server bookkeeping for a record, persisted locally as `cloudMeta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemFields {
    pub id: RecordId,
    pub record_type: String,
    /// Server version tag; `None` for a record the server has never seen
    pub change_tag: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    /// Field values the server last acknowledged
    #[serde(default)]
    pub known_fields: BTreeMap<String, RemoteValue>,
}

impl SystemFields {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::InvalidCloudMeta(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::InvalidCloudMeta(e.to_string()))
    }
}

/// A record as stored remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudRecord {
    pub id: RecordId,
    pub record_type: String,
    pub change_tag: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    fields: BTreeMap<String, RemoteValue>,
    #[serde(skip)]
    changed_keys: BTreeSet<String>,
}

impl CloudRecord {
    /// A record the server has never seen.
    pub fn new(record_type: impl Into<String>, id: RecordId) -> Self {
        Self {
            id,
            record_type: record_type.into(),
            change_tag: None,
            created_at: None,
            modified_at: None,
            fields: BTreeMap::new(),
            changed_keys: BTreeSet::new(),
        }
    }

    /// Rebuild a record from stored system fields. Known values are restored
    /// without being marked as changed.
    pub fn from_system_fields(system: SystemFields) -> Self {
        Self {
            id: system.id,
            record_type: system.record_type,
            change_tag: system.change_tag,
            created_at: system.created_at,
            modified_at: system.modified_at,
            fields: system.known_fields,
            changed_keys: BTreeSet::new(),
        }
    }

    pub fn system_fields(&self) -> SystemFields {
        SystemFields {
            id: self.id.clone(),
            record_type: self.record_type.clone(),
            change_tag: self.change_tag.clone(),
            created_at: self.created_at,
            modified_at: self.modified_at,
            known_fields: self.fields.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&RemoteValue> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, RemoteValue> {
        &self.fields
    }

    /// Assign a field; `None` clears it. Marks the key changed only when the
    /// stored value actually differs.
    pub fn set(&mut self, key: impl Into<String>, value: Option<RemoteValue>) {
        let key = key.into();
        let differs = self.fields.get(&key) != value.as_ref();
        if !differs {
            return;
        }
        match value {
            Some(v) => {
                self.fields.insert(key.clone(), v);
            }
            None => {
                self.fields.remove(&key);
            }
        }
        self.changed_keys.insert(key);
    }

    pub fn changed_keys(&self) -> &BTreeSet<String> {
        &self.changed_keys
    }

    pub fn has_changes(&self) -> bool {
        !self.changed_keys.is_empty()
    }

    pub fn clear_changes(&mut self) {
        self.changed_keys.clear();
    }

    /// Copy every field of `other` into this record, marking differences.
    pub fn apply_fields_from(&mut self, other: &CloudRecord) {
        let keys: BTreeSet<String> = self
            .fields
            .keys()
            .chain(other.fields.keys())
            .cloned()
            .collect();
        for key in keys {
            self.set(key.clone(), other.fields.get(&key).cloned());
        }
    }
}

/// How a batched save treats fields and server versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SavePolicy {
    /// Reject when the server version moved; replace every field
    IfServerRecordUnchanged,
    /// Reject when the server version moved; write only changed keys
    #[default]
    ChangedKeys,
    /// Replace every field regardless of server version
    AllKeys,
}

impl SavePolicy {
    /// Whether a stale change tag rejects the save.
    pub fn checks_version(self) -> bool {
        !matches!(self, SavePolicy::AllKeys)
    }
}

/// A database change subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    /// Silent subscriptions deliver no user-visible alert
    pub silent: bool,
}

impl Subscription {
    /// Silent subscription `<prefix>-<scope>-changes`.
    pub fn database_changes(prefix: &str, scope: Scope) -> Self {
        Self {
            id: format!("{}-{}-changes", prefix, scope.as_str().to_lowercase()),
            silent: true,
        }
    }
}
