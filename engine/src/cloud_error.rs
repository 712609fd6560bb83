//! Errors reported by the remote record store and their classification.

use crate::cloud::{CloudRecord, RecordId};
use std::collections::BTreeMap;
use thiserror::Error;

/// Primary error codes of the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudErrorCode {
    ZoneNotFound,
    UnknownItem,
    ServerRecordChanged,
    /// Batch error; per-item errors are in [`CloudError::partial`]
    PartialFailure,
    NetworkFailure,
    NotAuthenticated,
    QuotaExceeded,
    ServiceUnavailable,
    Internal,
}

/// A structured remote error.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code:?}: {message}")]
pub struct CloudError {
    pub code: CloudErrorCode,
    pub message: String,
    /// Per-item errors of a partial batch failure
    pub partial: BTreeMap<RecordId, CloudError>,
    /// For conflicts: the record the client tried to save
    pub client_record: Option<Box<CloudRecord>>,
    /// For conflicts: the current server version
    pub server_record: Option<Box<CloudRecord>>,
}

impl CloudError {
    pub fn new(code: CloudErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            partial: BTreeMap::new(),
            client_record: None,
            server_record: None,
        }
    }

    pub fn zone_not_found(zone: &str) -> Self {
        Self::new(CloudErrorCode::ZoneNotFound, format!("zone '{}' does not exist", zone))
    }

    pub fn unknown_item(id: &RecordId) -> Self {
        Self::new(CloudErrorCode::UnknownItem, format!("record '{}' does not exist", id))
    }

    pub fn conflict(client: CloudRecord, server: CloudRecord) -> Self {
        let mut err = Self::new(
            CloudErrorCode::ServerRecordChanged,
            format!("record '{}' changed on the server", server.id),
        );
        err.client_record = Some(Box::new(client));
        err.server_record = Some(Box::new(server));
        err
    }

    /// Wrap per-item errors into a batch failure.
    pub fn partial_failure(items: BTreeMap<RecordId, CloudError>) -> Self {
        let mut err = Self::new(
            CloudErrorCode::PartialFailure,
            format!("{} item(s) failed", items.len()),
        );
        err.partial = items;
        err
    }

    /// Whether this error, or any nested per-item error, carries `code`.
    pub fn is_specific(&self, code: CloudErrorCode) -> bool {
        self.code == code || self.partial.values().any(|e| e.is_specific(code))
    }

    pub fn is_zone_not_found(&self) -> bool {
        self.is_specific(CloudErrorCode::ZoneNotFound)
    }

    pub fn is_unknown_item(&self) -> bool {
        self.is_specific(CloudErrorCode::UnknownItem)
    }

    /// Missing zone or missing item.
    pub fn is_record_not_found(&self) -> bool {
        self.is_zone_not_found() || self.is_unknown_item()
    }

    pub fn is_conflict(&self) -> bool {
        self.is_specific(CloudErrorCode::ServerRecordChanged)
    }

    /// The first client/server record pair of a conflict, descending into
    /// nested per-item errors.
    pub fn merge_records(&self) -> Option<(&CloudRecord, &CloudRecord)> {
        if self.code == CloudErrorCode::ServerRecordChanged {
            if let (Some(client), Some(server)) = (&self.client_record, &self.server_record) {
                return Some((client, server));
            }
        }
        self.partial.values().find_map(CloudError::merge_records)
    }

    /// Transient failures worth retrying later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            CloudErrorCode::NetworkFailure | CloudErrorCode::ServiceUnavailable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ZoneId;

    fn id(name: &str) -> RecordId {
        RecordId::new(ZoneId::new("tasks-zone"), name)
    }

    #[test]
    fn nested_codes_are_found() {
        let mut items = BTreeMap::new();
        items.insert(id("a"), CloudError::zone_not_found("tasks-zone"));
        let err = CloudError::partial_failure(items);

        assert!(err.is_zone_not_found());
        assert!(err.is_record_not_found());
        assert!(!err.is_unknown_item());
        assert!(!err.is_conflict());
    }

    #[test]
    fn merge_records_descends_into_partial() {
        let client = CloudRecord::new("Task", id("a"));
        let mut server = CloudRecord::new("Task", id("a"));
        server.change_tag = Some("9".into());

        let mut items = BTreeMap::new();
        items.insert(id("b"), CloudError::unknown_item(&id("b")));
        items.insert(id("a"), CloudError::conflict(client.clone(), server.clone()));
        let err = CloudError::partial_failure(items);

        assert!(err.is_conflict());
        let (c, s) = err.merge_records().unwrap();
        assert_eq!(c, &client);
        assert_eq!(s.change_tag.as_deref(), Some("9"));
    }

    #[test]
    fn plain_error_has_no_merge_pair() {
        let err = CloudError::new(CloudErrorCode::NetworkFailure, "offline");
        assert!(err.merge_records().is_none());
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "NetworkFailure: offline");
    }
}
