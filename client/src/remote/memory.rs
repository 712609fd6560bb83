//! In-memory remote record store.
//!
//! Every mutation gets a sequence number from one counter. Change tokens
//! are the sequence number of the last event a page covered, so a replay
//! with the newest token sees nothing.

use super::{ModifyResult, RemoteResult, RemoteStore};
use async_trait::async_trait;
use chrono::Utc;
use rowcloud_engine::{
    ChangeToken, CloudError, CloudErrorCode, CloudRecord, Cursor, DatabaseChanges, Page, RecordId,
    SavePolicy, Scope, Subscription, ZoneChanges, ZoneId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

const DEFAULT_PAGE_SIZE: usize = 100;

/// Remote operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    CreateZone,
    DeleteZone,
    QueryRecords,
    FetchRecord,
    ModifyRecords,
    FetchDatabaseChanges,
    FetchZoneChanges,
    SaveSubscription,
}

#[derive(Debug, Clone)]
enum ZoneEvent {
    Changed(String),
    Deleted(RecordId, String),
}

impl ZoneEvent {
    fn key(&self) -> &str {
        match self {
            ZoneEvent::Changed(name) => name,
            ZoneEvent::Deleted(id, _) => &id.name,
        }
    }
}

#[derive(Debug, Clone)]
enum DatabaseEvent {
    Changed(ZoneId),
    Deleted(ZoneId),
}

impl DatabaseEvent {
    fn zone(&self) -> &ZoneId {
        match self {
            DatabaseEvent::Changed(zone) | DatabaseEvent::Deleted(zone) => zone,
        }
    }
}

#[derive(Debug, Default)]
struct Zone {
    records: BTreeMap<String, CloudRecord>,
    log: Vec<(u64, ZoneEvent)>,
}

#[derive(Debug, Default)]
struct ScopeState {
    zones: BTreeMap<ZoneId, Zone>,
    log: Vec<(u64, DatabaseEvent)>,
    subscriptions: BTreeMap<String, Subscription>,
}

#[derive(Debug)]
struct State {
    seq: u64,
    tags: u64,
    scopes: HashMap<Scope, ScopeState>,
    calls: HashMap<RemoteOp, usize>,
    failures: HashMap<RemoteOp, CloudError>,
}

impl State {
    fn new() -> Self {
        let scopes = Scope::ALL
            .into_iter()
            .map(|scope| {
                let mut state = ScopeState::default();
                state.zones.insert(ZoneId::default_zone(), Zone::default());
                (scope, state)
            })
            .collect();
        Self {
            seq: 0,
            tags: 0,
            scopes,
            calls: HashMap::new(),
            failures: HashMap::new(),
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn next_tag(&mut self) -> String {
        self.tags += 1;
        self.tags.to_string()
    }

    fn scope(&mut self, scope: Scope) -> &mut ScopeState {
        self.scopes.entry(scope).or_default()
    }

    /// Count the call and consume an injected failure.
    fn enter(&mut self, op: RemoteOp) -> RemoteResult<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn store(&mut self, scope: Scope, mut record: CloudRecord) -> CloudRecord {
        let now = Utc::now();
        let seq = self.next_seq();
        record.change_tag = Some(self.next_tag());
        record.created_at.get_or_insert(now);
        record.modified_at = Some(now);
        record.clear_changes();

        let zone_id = record.id.zone.clone();
        let state = self.scope(scope);
        let zone = state.zones.entry(zone_id.clone()).or_default();
        zone.log.push((seq, ZoneEvent::Changed(record.id.name.clone())));
        zone.records.insert(record.id.name.clone(), record.clone());
        state.log.push((seq, DatabaseEvent::Changed(zone_id)));
        record
    }

    fn remove(&mut self, scope: Scope, id: &RecordId) -> bool {
        let seq = self.next_seq();
        let state = self.scope(scope);
        let Some(zone) = state.zones.get_mut(&id.zone) else {
            return false;
        };
        let Some(record) = zone.records.remove(&id.name) else {
            return false;
        };
        zone.log
            .push((seq, ZoneEvent::Deleted(id.clone(), record.record_type)));
        state.log.push((seq, DatabaseEvent::Changed(id.zone.clone())));
        true
    }
}

/// A [`RemoteStore`] held entirely in memory.
///
/// Every scope starts with its default zone. Feeds return at most
/// `page_size` entries per call.
#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<State>,
    page_size: usize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of times `op` has been called.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: RemoteOp, err: CloudError) {
        self.lock().failures.insert(op, err);
    }

    pub fn zone_exists(&self, scope: Scope, zone: &ZoneId) -> bool {
        self.lock()
            .scopes
            .get(&scope)
            .is_some_and(|s| s.zones.contains_key(zone))
    }

    pub fn has_subscription(&self, scope: Scope, id: &str) -> bool {
        self.lock()
            .scopes
            .get(&scope)
            .is_some_and(|s| s.subscriptions.contains_key(id))
    }

    pub fn record(&self, scope: Scope, id: &RecordId) -> Option<CloudRecord> {
        self.lock()
            .scopes
            .get(&scope)
            .and_then(|s| s.zones.get(&id.zone))
            .and_then(|z| z.records.get(&id.name))
            .cloned()
    }

    pub fn records_in(&self, scope: Scope, zone: &ZoneId) -> Vec<CloudRecord> {
        self.lock()
            .scopes
            .get(&scope)
            .and_then(|s| s.zones.get(zone))
            .map(|z| z.records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Write a record as another device would, bypassing version checks.
    /// Fields of `record` are laid over any stored version. Creates the
    /// zone if needed.
    pub fn put_record(&self, scope: Scope, record: CloudRecord) -> CloudRecord {
        let mut state = self.lock();
        let existing = state
            .scopes
            .get(&scope)
            .and_then(|s| s.zones.get(&record.id.zone))
            .and_then(|z| z.records.get(&record.id.name))
            .cloned();
        match existing {
            Some(mut merged) => {
                for (key, value) in record.fields() {
                    merged.set(key.clone(), Some(value.clone()));
                }
                state.store(scope, merged)
            }
            None => state.store(scope, record),
        }
    }

    /// Delete a record as another device would.
    pub fn delete_record(&self, scope: Scope, id: &RecordId) -> bool {
        self.lock().remove(scope, id)
    }

    fn page<T: Clone>(&self, events: Vec<(u64, T)>) -> (Vec<(u64, T)>, bool) {
        let more = events.len() > self.page_size;
        let page = events.into_iter().take(self.page_size).collect();
        (page, more)
    }
}

fn token_seq(token: Option<&ChangeToken>) -> u64 {
    token
        .and_then(|t| <[u8; 8]>::try_from(t.as_bytes()).ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}

fn token_for(seq: u64) -> ChangeToken {
    ChangeToken(seq.to_be_bytes().to_vec())
}

/// Latest event per key after `since`, oldest first.
fn latest_after<T: Clone, K: Ord>(
    log: &[(u64, T)],
    since: u64,
    key: impl Fn(&T) -> K,
) -> Vec<(u64, T)> {
    let mut latest: BTreeMap<K, (u64, T)> = BTreeMap::new();
    for (seq, event) in log.iter().filter(|(seq, _)| *seq > since) {
        latest.insert(key(event), (*seq, event.clone()));
    }
    let mut events: Vec<(u64, T)> = latest.into_values().collect();
    events.sort_by_key(|(seq, _)| *seq);
    events
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn create_zone(&self, scope: Scope, zone: ZoneId) -> RemoteResult<()> {
        let mut state = self.lock();
        state.enter(RemoteOp::CreateZone)?;
        if !scope.supports_custom_zones() && !zone.is_default() {
            return Err(CloudError::new(
                CloudErrorCode::Internal,
                format!("{} scope has no custom zones", scope),
            ));
        }
        if state.scope(scope).zones.contains_key(&zone) {
            return Ok(());
        }
        let seq = state.next_seq();
        let scope_state = state.scope(scope);
        scope_state.zones.insert(zone.clone(), Zone::default());
        scope_state.log.push((seq, DatabaseEvent::Changed(zone)));
        Ok(())
    }

    async fn delete_zone(&self, scope: Scope, zone: ZoneId) -> RemoteResult<()> {
        let mut state = self.lock();
        state.enter(RemoteOp::DeleteZone)?;
        let seq = state.next_seq();
        let scope_state = state.scope(scope);
        if scope_state.zones.remove(&zone).is_none() {
            return Err(CloudError::zone_not_found(&zone.name));
        }
        scope_state.log.push((seq, DatabaseEvent::Deleted(zone)));
        Ok(())
    }

    async fn query_records(
        &self,
        scope: Scope,
        zone: ZoneId,
        record_type: String,
        cursor: Option<Cursor>,
    ) -> RemoteResult<Page<CloudRecord>> {
        let mut state = self.lock();
        state.enter(RemoteOp::QueryRecords)?;
        let records = state
            .scope(scope)
            .zones
            .get(&zone)
            .ok_or_else(|| CloudError::zone_not_found(&zone.name))?
            .records
            .values()
            .filter(|r| r.record_type == record_type)
            .cloned()
            .collect::<Vec<_>>();

        let offset = cursor
            .and_then(|c| c.0.parse::<usize>().ok())
            .unwrap_or(0);
        let end = (offset + self.page_size).min(records.len());
        let items = records.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_cursor = (end < records.len()).then(|| Cursor(end.to_string()));
        Ok(Page { items, next_cursor })
    }

    async fn fetch_record(&self, scope: Scope, id: RecordId) -> RemoteResult<CloudRecord> {
        let mut state = self.lock();
        state.enter(RemoteOp::FetchRecord)?;
        let zone = state
            .scope(scope)
            .zones
            .get(&id.zone)
            .ok_or_else(|| CloudError::zone_not_found(&id.zone.name))?;
        zone.records
            .get(&id.name)
            .cloned()
            .ok_or_else(|| CloudError::unknown_item(&id))
    }

    async fn modify_records(
        &self,
        scope: Scope,
        save: Vec<CloudRecord>,
        delete: Vec<RecordId>,
        policy: SavePolicy,
    ) -> RemoteResult<ModifyResult> {
        let mut state = self.lock();
        state.enter(RemoteOp::ModifyRecords)?;

        // A missing zone fails the whole batch before anything is written.
        let mut missing = BTreeMap::new();
        {
            let scope_state = state.scope(scope);
            let ids = save.iter().map(|r| &r.id).chain(delete.iter());
            for id in ids {
                if !scope_state.zones.contains_key(&id.zone) {
                    missing.insert(id.clone(), CloudError::zone_not_found(&id.zone.name));
                }
            }
        }
        if !missing.is_empty() {
            return Err(CloudError::partial_failure(missing));
        }

        let mut result = ModifyResult::default();
        for record in save {
            let id = record.id.clone();
            let existing = state
                .scope(scope)
                .zones
                .get(&id.zone)
                .and_then(|z| z.records.get(&id.name))
                .cloned();

            if policy.checks_version() {
                match &existing {
                    Some(server) if server.change_tag != record.change_tag => {
                        result
                            .saved
                            .push((id, Err(CloudError::conflict(record, server.clone()))));
                        continue;
                    }
                    None if record.change_tag.is_some() => {
                        result.saved.push((id.clone(), Err(CloudError::unknown_item(&id))));
                        continue;
                    }
                    _ => {}
                }
            }

            let stored = match (existing, policy) {
                (Some(mut server), SavePolicy::ChangedKeys) => {
                    for key in record.changed_keys() {
                        server.set(key.clone(), record.get(key).cloned());
                    }
                    server
                }
                (existing, _) => {
                    let mut fresh = CloudRecord::new(record.record_type.clone(), id.clone());
                    fresh.created_at = existing.and_then(|e| e.created_at);
                    fresh.apply_fields_from(&record);
                    fresh
                }
            };
            let stored = state.store(scope, stored);
            result.saved.push((id, Ok(stored)));
        }

        for id in delete {
            if state.remove(scope, &id) {
                result.deleted.push((id, Ok(())));
            } else {
                result.deleted.push((id.clone(), Err(CloudError::unknown_item(&id))));
            }
        }
        Ok(result)
    }

    async fn fetch_database_changes(
        &self,
        scope: Scope,
        token: Option<ChangeToken>,
    ) -> RemoteResult<DatabaseChanges> {
        let mut state = self.lock();
        state.enter(RemoteOp::FetchDatabaseChanges)?;
        let since = token_seq(token.as_ref());
        let events = latest_after(&state.scope(scope).log, since, |e| e.zone().clone());
        let (page, more_coming) = self.page(events);

        let mut changes = DatabaseChanges {
            token: Some(token_for(page.last().map_or(since, |(s, _)| *s))),
            more_coming,
            ..DatabaseChanges::default()
        };
        for (_, event) in page {
            match event {
                DatabaseEvent::Changed(zone) => changes.changed_zones.push(zone),
                DatabaseEvent::Deleted(zone) => changes.deleted_zones.push(zone),
            }
        }
        Ok(changes)
    }

    async fn fetch_zone_changes(
        &self,
        scope: Scope,
        zone: ZoneId,
        token: Option<ChangeToken>,
    ) -> RemoteResult<ZoneChanges> {
        let mut state = self.lock();
        state.enter(RemoteOp::FetchZoneChanges)?;
        let since = token_seq(token.as_ref());
        let zone_state = state
            .scope(scope)
            .zones
            .get(&zone)
            .ok_or_else(|| CloudError::zone_not_found(&zone.name))?;
        let events = latest_after(&zone_state.log, since, |e| e.key().to_string());
        let (page, more_coming) = self.page(events);

        let mut changes = ZoneChanges {
            token: Some(token_for(page.last().map_or(since, |(s, _)| *s))),
            more_coming,
            ..ZoneChanges::default()
        };
        for (_, event) in page {
            match event {
                ZoneEvent::Changed(name) => {
                    if let Some(record) = zone_state.records.get(&name) {
                        changes.changed.push(record.clone());
                    }
                }
                ZoneEvent::Deleted(id, record_type) => changes.deleted.push((id, record_type)),
            }
        }
        Ok(changes)
    }

    async fn save_subscription(
        &self,
        scope: Scope,
        subscription: Subscription,
    ) -> RemoteResult<()> {
        let mut state = self.lock();
        state.enter(RemoteOp::SaveSubscription)?;
        state
            .scope(scope)
            .subscriptions
            .insert(subscription.id.clone(), subscription);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowcloud_engine::RemoteValue;

    fn block<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    fn record(zone: &str, name: &str, title: &str) -> CloudRecord {
        let mut rec = CloudRecord::new("Task", RecordId::new(ZoneId::new(zone), name));
        rec.set("title", Some(RemoteValue::String(title.into())));
        rec
    }

    #[test]
    fn missing_zone_fails_whole_batch() {
        let remote = MemoryRemote::new();
        let err = block(remote.modify_records(
            Scope::Private,
            vec![record("tasks-zone", "tasks-1", "a")],
            vec![],
            SavePolicy::ChangedKeys,
        ))
        .unwrap_err();
        assert!(err.is_zone_not_found());
        assert!(remote.records_in(Scope::Private, &ZoneId::new("tasks-zone")).is_empty());
    }

    #[test]
    fn stale_tag_is_a_conflict() {
        let remote = MemoryRemote::new();
        let server = remote.put_record(Scope::Private, record("_defaultZone", "tasks-1", "theirs"));
        assert_eq!(server.change_tag.as_deref(), Some("1"));

        let mut mine = record("_defaultZone", "tasks-1", "mine");
        mine.change_tag = Some("0".into());
        let result = block(remote.modify_records(
            Scope::Private,
            vec![mine],
            vec![],
            SavePolicy::ChangedKeys,
        ))
        .unwrap();
        let (_, outcome) = &result.saved[0];
        assert!(outcome.as_ref().unwrap_err().is_conflict());
    }

    #[test]
    fn all_keys_ignores_version() {
        let remote = MemoryRemote::new();
        remote.put_record(Scope::Private, record("_defaultZone", "tasks-1", "theirs"));
        let result = block(remote.modify_records(
            Scope::Private,
            vec![record("_defaultZone", "tasks-1", "mine")],
            vec![],
            SavePolicy::AllKeys,
        ))
        .unwrap();
        assert!(result.errors().next().is_none());
        let id = RecordId::new(ZoneId::default(), "tasks-1");
        assert_eq!(
            remote.record(Scope::Private, &id).unwrap().get("title"),
            Some(&RemoteValue::String("mine".into()))
        );
    }

    #[test]
    fn zone_feed_pages_and_resumes() {
        let remote = MemoryRemote::new().with_page_size(2);
        for i in 0..3 {
            remote.put_record(Scope::Private, record("_defaultZone", &format!("tasks-{}", i), "x"));
        }
        let zone = ZoneId::default();
        let first = block(remote.fetch_zone_changes(Scope::Private, zone.clone(), None)).unwrap();
        assert_eq!(first.changed.len(), 2);
        assert!(first.more_coming);

        let second =
            block(remote.fetch_zone_changes(Scope::Private, zone.clone(), first.token)).unwrap();
        assert_eq!(second.changed.len(), 1);
        assert!(!second.more_coming);

        let replay =
            block(remote.fetch_zone_changes(Scope::Private, zone, second.token.clone())).unwrap();
        assert!(replay.changed.is_empty());
        assert_eq!(replay.token, second.token);
    }

    #[test]
    fn injected_failure_fires_once() {
        let remote = MemoryRemote::new();
        remote.fail_next(
            RemoteOp::SaveSubscription,
            CloudError::new(CloudErrorCode::NetworkFailure, "offline"),
        );
        let sub = Subscription::database_changes("test", Scope::Private);
        assert!(block(remote.save_subscription(Scope::Private, sub.clone())).is_err());
        assert!(block(remote.save_subscription(Scope::Private, sub)).is_ok());
        assert_eq!(remote.calls(RemoteOp::SaveSubscription), 2);
    }

    #[test]
    fn public_scope_rejects_custom_zones() {
        let remote = MemoryRemote::new();
        assert!(block(remote.create_zone(Scope::Public, ZoneId::new("tasks-zone"))).is_err());
        assert!(block(remote.create_zone(Scope::Private, ZoneId::new("tasks-zone"))).is_ok());
        assert!(remote.zone_exists(Scope::Private, &ZoneId::new("tasks-zone")));
    }
}
