//! Conflict handling for remote saves.
//!
//! A save rejected because the server version moved yields a [`Conflict`]
//! holding both versions. The sync layer asks a merge hook for a
//! [`MergeDecision`]; [`MergeStrategy`] provides the stock hooks.

use crate::{CloudError, CloudRecord};
use serde::{Deserialize, Serialize};

/// A client/server record pair for one rejected save.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    /// The record the client tried to save
    pub client: CloudRecord,
    /// The current server version
    pub server: CloudRecord,
}

impl Conflict {
    /// Extract the conflicting pair from a remote error, if it carries one.
    pub fn from_error(err: &CloudError) -> Option<Self> {
        err.merge_records().map(|(client, server)| Self {
            client: client.clone(),
            server: server.clone(),
        })
    }

    /// The server record with every client field laid over it, ready to be
    /// saved against the current server version.
    pub fn client_over_server(&self) -> CloudRecord {
        let mut merged = self.server.clone();
        merged.clear_changes();
        merged.apply_fields_from(&self.client);
        merged
    }
}

/// What to do about a conflict.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MergeDecision {
    /// Leave local metadata untouched; the record stays eligible for a later save
    #[default]
    Skip,
    /// Apply the server version locally
    AcceptServer,
    /// Save this record instead, once
    Resubmit(CloudRecord),
}

/// Stock merge behaviours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// Never resolve automatically (default)
    #[default]
    Manual,
    /// Client fields overwrite the server version
    ClientWins,
    /// Server version replaces the local row
    ServerWins,
}

impl MergeStrategy {
    pub fn decide(self, conflict: &Conflict) -> MergeDecision {
        match self {
            MergeStrategy::Manual => MergeDecision::Skip,
            MergeStrategy::ClientWins => MergeDecision::Resubmit(conflict.client_over_server()),
            MergeStrategy::ServerWins => MergeDecision::AcceptServer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RemoteValue;
    use crate::{RecordId, ZoneId};

    fn conflict() -> Conflict {
        let id = RecordId::new(ZoneId::new("tasks-zone"), "tasks-1");
        let mut client = CloudRecord::new("Task", id.clone());
        client.change_tag = Some("1".into());
        client.set("title", Some(RemoteValue::String("mine".into())));

        let mut server = CloudRecord::new("Task", id);
        server.change_tag = Some("2".into());
        server.set("title", Some(RemoteValue::String("theirs".into())));
        server.set("done", Some(RemoteValue::Int64(1)));
        server.clear_changes();

        Conflict { client, server }
    }

    #[test]
    fn manual_skips() {
        assert_eq!(MergeStrategy::default().decide(&conflict()), MergeDecision::Skip);
    }

    #[test]
    fn server_wins_accepts_server() {
        assert_eq!(
            MergeStrategy::ServerWins.decide(&conflict()),
            MergeDecision::AcceptServer
        );
    }

    #[test]
    fn client_wins_resubmits_against_server_version() {
        let MergeDecision::Resubmit(record) = MergeStrategy::ClientWins.decide(&conflict()) else {
            panic!("expected resubmit");
        };
        assert_eq!(record.change_tag.as_deref(), Some("2"));
        assert_eq!(record.get("title"), Some(&RemoteValue::String("mine".into())));
        // Fields the client never had are cleared.
        assert!(record.get("done").is_none());
        assert!(record.changed_keys().contains("title"));
    }

    #[test]
    fn conflict_from_error() {
        let c = conflict();
        let err = CloudError::conflict(c.client.clone(), c.server.clone());
        assert_eq!(Conflict::from_error(&err), Some(c));
        assert!(Conflict::from_error(&CloudError::zone_not_found("z")).is_none());
    }
}
