//! Remote sync engine.
//!
//! Inbound: database changes since the scope token, then zone changes since
//! each zone token, applied locally through the type registry. Tokens are
//! persisted only after the page they close has been applied, so a crash
//! replays at most one page.
//!
//! Outbound: batched changed-keys saves with one zone-creation retry and a
//! merge hook for per-record conflicts.

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::mapper::{Database, Table};
use crate::remote::{ModifyResult, RemoteStore};
use crate::sync::notify::{ChangeNotification, ChangeNotifier};
use crate::sync::registry::RemoteApplier;
use crate::sync::subscription::{SubscriptionManager, SubscriptionStatus};
use crate::sync::tokens::ChangeTokenStore;
use dashmap::DashMap;
use futures::future::join_all;
use rowcloud_engine::convert::{
    from_cloud_record, record_name, system_fields_of, to_cloud_record, zone_for,
};
use rowcloud_engine::{
    CloudRecord, Conflict, MergeDecision, MergeStrategy, Record, RecordId, SavePolicy, Scope,
    ZoneId,
};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Decides what to do about a conflicting save.
pub type MergeHook = Arc<dyn Fn(&Conflict) -> MergeDecision + Send + Sync>;

/// Counters for one inbound sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Changed records written locally
    pub applied: usize,
    /// Deleted records removed locally
    pub deleted: usize,
    /// Records of unregistered types
    pub skipped: usize,
    /// Records that could not be written locally
    pub failed: usize,
    /// Zones fetched
    pub zones: usize,
    /// Scopes whose fetch failed during setup
    pub failed_scopes: Vec<Scope>,
}

impl SyncSummary {
    fn absorb(&mut self, other: SyncSummary) {
        self.applied += other.applied;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.zones += other.zones;
        self.failed_scopes.extend(other.failed_scopes);
    }
}

/// Outcome of a batched remote save.
#[derive(Debug)]
pub struct SaveReport<R> {
    /// Items now matching the server, with updated remote metadata
    pub saved: Vec<R>,
    /// Conflicts left unresolved by the merge hook
    pub conflicts: Vec<Conflict>,
    pub failed: Vec<(RecordId, SyncError)>,
}

impl<R> Default for SaveReport<R> {
    fn default() -> Self {
        Self {
            saved: Vec::new(),
            conflicts: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<R> SaveReport<R> {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.failed.is_empty()
    }
}

/// Drives sync between the local database and a [`RemoteStore`].
pub struct SyncEngine {
    db: Database,
    remote: Arc<dyn RemoteStore>,
    tokens: ChangeTokenStore,
    subscriptions: SubscriptionManager,
    registry: DashMap<String, Arc<dyn RemoteApplier>>,
    notifier: Arc<ChangeNotifier>,
    merge_hook: RwLock<Option<MergeHook>>,
    scopes: Vec<Scope>,
    cloud_sync: bool,
    runtime: Option<Handle>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("scopes", &self.scopes)
            .field("cloud_sync", &self.cloud_sync)
            .field("types", &self.registry.len())
            .finish()
    }
}

impl SyncEngine {
    /// Create an engine. Background pushes run on the current tokio runtime
    /// when one is active.
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>, config: &Config) -> Arc<Self> {
        let tokens = ChangeTokenStore::new(db.kv().clone());
        let subscriptions = SubscriptionManager::new(
            db.kv().clone(),
            Arc::clone(&remote),
            config.subscription_prefix.clone(),
        );
        Arc::new(Self {
            db,
            remote,
            tokens,
            subscriptions,
            registry: DashMap::new(),
            notifier: ChangeNotifier::new_shared(),
            merge_hook: RwLock::new(None),
            scopes: config.sync_scopes.clone(),
            cloud_sync: config.cloud_sync,
            runtime: Handle::try_current().ok(),
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Route incoming records of type `R` to `table`.
    pub fn register<R: Record>(&self, table: &Table<R>) {
        let applier: Arc<dyn RemoteApplier> = Arc::new(table.without_sync());
        self.registry.insert(R::TYPE_NAME.to_string(), applier);
        debug!(record_type = R::TYPE_NAME, "registered record type");
    }

    pub fn is_registered(&self, record_type: &str) -> bool {
        self.registry.contains_key(record_type)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn tokens(&self) -> &ChangeTokenStore {
        &self.tokens
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Listen for locally applied remote changes, optionally of one type.
    pub fn subscribe_changes(
        &self,
        record_type: Option<&str>,
    ) -> (String, mpsc::UnboundedReceiver<ChangeNotification>) {
        self.notifier.subscribe(record_type.map(str::to_string))
    }

    pub fn set_merge_hook<F>(&self, hook: F)
    where
        F: Fn(&Conflict) -> MergeDecision + Send + Sync + 'static,
    {
        let hook: MergeHook = Arc::new(hook);
        *self
            .merge_hook
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(hook);
    }

    pub fn set_merge_strategy(&self, strategy: MergeStrategy) {
        self.set_merge_hook(move |conflict| strategy.decide(conflict));
    }

    fn decide(&self, conflict: &Conflict) -> MergeDecision {
        let hook = self
            .merge_hook
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        hook.map(|hook| hook(conflict)).unwrap_or_default()
    }

    /// Subscribe and fetch every configured scope.
    ///
    /// A scope whose fetch fails is listed in `failed_scopes`; the others
    /// still sync.
    pub async fn setup(&self) -> SyncSummary {
        let mut summary = SyncSummary::default();
        for &scope in &self.scopes {
            if self.subscriptions.ensure(scope).await == SubscriptionStatus::Deferred {
                debug!(scope = %scope, "continuing without subscription");
            }
            match self.fetch_database_changes(scope).await {
                Ok(scope_summary) => summary.absorb(scope_summary),
                Err(err) => {
                    warn!(scope = %scope, error = %err, "scope sync failed");
                    summary.failed_scopes.push(scope);
                }
            }
        }
        summary
    }

    /// Entry point for an inbound push notification.
    pub async fn handle_notification(&self, scope: Scope) -> SyncResult<SyncSummary> {
        info!(scope = %scope, "change notification received");
        self.fetch_database_changes(scope).await
    }

    /// Fetch changed zones since the stored scope token and sync each.
    ///
    /// The scope token of a page is stored once every zone the page named
    /// has synced.
    pub async fn fetch_database_changes(&self, scope: Scope) -> SyncResult<SyncSummary> {
        let mut summary = SyncSummary::default();
        loop {
            let token = self.tokens.get(scope, None);
            let page = self.remote.fetch_database_changes(scope, token).await?;

            for zone in page.deleted_zones.iter().chain(&page.purged_zones) {
                info!(scope = %scope, zone = %zone, "remote zone removed");
                self.tokens.set(scope, Some(zone), None);
            }

            summary.absorb(self.fetch_zone_changes(scope, &page.changed_zones).await?);

            if let Some(token) = &page.token {
                self.tokens.set(scope, None, Some(token));
            }
            if !page.more_coming {
                break;
            }
        }
        Ok(summary)
    }

    /// Sync `zones` concurrently. Every zone runs to completion; the first
    /// error is returned after all have finished.
    pub async fn fetch_zone_changes(
        &self,
        scope: Scope,
        zones: &[ZoneId],
    ) -> SyncResult<SyncSummary> {
        let unique: BTreeSet<&ZoneId> = zones.iter().collect();
        let results = join_all(unique.into_iter().map(|zone| self.sync_zone(scope, zone))).await;

        let mut summary = SyncSummary::default();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(zone_summary) => summary.absorb(zone_summary),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    async fn sync_zone(&self, scope: Scope, zone: &ZoneId) -> SyncResult<SyncSummary> {
        let mut summary = SyncSummary {
            zones: 1,
            ..SyncSummary::default()
        };
        let mut touched = BTreeSet::new();

        loop {
            let token = self.tokens.get(scope, Some(zone));
            let page = match self
                .remote
                .fetch_zone_changes(scope, zone.clone(), token)
                .await
            {
                Ok(page) => page,
                Err(err) if err.is_zone_not_found() => {
                    info!(scope = %scope, zone = %zone, "zone no longer exists");
                    self.tokens.set(scope, Some(zone), None);
                    break;
                }
                Err(err) => return Err(err.into()),
            };

            for record in &page.changed {
                let Some(applier) = self.applier(&record.record_type) else {
                    debug!(record_type = %record.record_type, "no local type for remote record");
                    summary.skipped += 1;
                    continue;
                };
                match applier.apply_changed(record) {
                    Ok(()) => {
                        summary.applied += 1;
                        touched.insert(record.record_type.clone());
                    }
                    Err(err) => {
                        error!(record = %record.id, error = %err, "could not apply remote record");
                        summary.failed += 1;
                    }
                }
            }

            for (id, record_type) in &page.deleted {
                let Some(applier) = self.applier(record_type) else {
                    summary.skipped += 1;
                    continue;
                };
                match applier.apply_deleted(&id.name) {
                    Ok(()) => {
                        summary.deleted += 1;
                        touched.insert(record_type.clone());
                    }
                    Err(err) => {
                        error!(record = %id, error = %err, "could not apply remote deletion");
                        summary.failed += 1;
                    }
                }
            }

            if let Some(token) = &page.token {
                self.tokens.set(scope, Some(zone), Some(token));
            }
            if !page.more_coming {
                break;
            }
        }

        debug!(scope = %scope, zone = %zone, applied = summary.applied, deleted = summary.deleted, "zone synced");
        for record_type in touched {
            self.notify(ChangeNotification::new(record_type));
        }
        Ok(summary)
    }

    fn applier(&self, record_type: &str) -> Option<Arc<dyn RemoteApplier>> {
        self.registry
            .get(record_type)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn notify(&self, notification: ChangeNotification) {
        let notifier = Arc::clone(&self.notifier);
        self.spawn(async move {
            notifier.broadcast(&notification);
        });
    }

    /// Save `items` remotely in one batch.
    ///
    /// The batch is retried once after creating the zone when the zone is
    /// missing. Successful items get their remote metadata written back to
    /// the local row; conflicts go through the merge hook.
    pub async fn save<R: Record>(
        &self,
        table: &Table<R>,
        items: Vec<R>,
        scope: Option<Scope>,
    ) -> SyncResult<SaveReport<R>> {
        let scope = scope.unwrap_or_else(R::cloud_scope);
        let zone = zone_for::<R>(scope);

        let mut pending: HashMap<String, R> = HashMap::new();
        let mut records = Vec::with_capacity(items.len());
        for mut item in items {
            if let Some(meta) = table.stored_cloud_meta(&item.primary_key_value()) {
                item.meta_mut().cloud_meta = meta;
            }
            let record = to_cloud_record(&item, &zone)?;
            pending.insert(record.id.name.clone(), item);
            records.push(record);
        }
        if records.is_empty() {
            return Ok(SaveReport::default());
        }

        let outcome = self.modify(scope, &zone, records, Vec::new()).await?;

        let mut report = SaveReport::default();
        let mut resubmit = Vec::new();
        for (id, result) in outcome.saved {
            let Some(item) = pending.remove(&id.name) else {
                continue;
            };
            match result {
                Ok(server) => self.acknowledge(table, item, &server, &mut report),
                Err(err) => match Conflict::from_error(&err) {
                    Some(conflict) => match self.decide(&conflict) {
                        MergeDecision::Skip => report.conflicts.push(conflict),
                        MergeDecision::AcceptServer => match table.apply_remote(&conflict.server) {
                            Ok(local) => report.saved.push(local),
                            Err(err) => report.failed.push((id, err.into())),
                        },
                        MergeDecision::Resubmit(record) => resubmit.push((item, record)),
                    },
                    None => report.failed.push((id, err.into())),
                },
            }
        }

        if !resubmit.is_empty() {
            self.resubmit(table, scope, &zone, resubmit, &mut report).await?;
        }

        if !report.is_clean() {
            warn!(
                record_type = R::TYPE_NAME,
                conflicts = report.conflicts.len(),
                failed = report.failed.len(),
                "remote save incomplete"
            );
        }
        Ok(report)
    }

    async fn resubmit<R: Record>(
        &self,
        table: &Table<R>,
        scope: Scope,
        zone: &ZoneId,
        items: Vec<(R, CloudRecord)>,
        report: &mut SaveReport<R>,
    ) -> SyncResult<()> {
        let mut pending: HashMap<String, R> = HashMap::new();
        let mut records = Vec::with_capacity(items.len());
        for (item, record) in items {
            pending.insert(record.id.name.clone(), item);
            records.push(record);
        }

        let outcome = self.modify(scope, zone, records, Vec::new()).await?;
        for (id, result) in outcome.saved {
            let Some(item) = pending.remove(&id.name) else {
                continue;
            };
            match result {
                Ok(server) => self.acknowledge(table, item, &server, report),
                Err(err) => match Conflict::from_error(&err) {
                    Some(conflict) => report.conflicts.push(conflict),
                    None => report.failed.push((id, err.into())),
                },
            }
        }
        Ok(())
    }

    // Only the metadata is written back; the row's other fields stay as they are.
    fn acknowledge<R: Record>(
        &self,
        table: &Table<R>,
        mut item: R,
        server: &CloudRecord,
        report: &mut SaveReport<R>,
    ) {
        match server.system_fields().encode() {
            Ok(meta) => {
                if !table.store_cloud_meta(&item.primary_key_value(), &meta) {
                    warn!(record = %server.id, "could not store remote metadata");
                }
                item.meta_mut().cloud_meta = meta;
                report.saved.push(item);
            }
            Err(err) => report.failed.push((server.id.clone(), err.into())),
        }
    }

    async fn modify(
        &self,
        scope: Scope,
        zone: &ZoneId,
        save: Vec<CloudRecord>,
        delete: Vec<RecordId>,
    ) -> SyncResult<ModifyResult> {
        let first = self
            .remote
            .modify_records(scope, save.clone(), delete.clone(), SavePolicy::ChangedKeys)
            .await;
        match first {
            Err(err) if err.is_zone_not_found() && scope.supports_custom_zones() => {
                info!(scope = %scope, zone = %zone, "creating missing zone");
                self.remote.create_zone(scope, zone.clone()).await?;
                Ok(self
                    .remote
                    .modify_records(scope, save, delete, SavePolicy::ChangedKeys)
                    .await?)
            }
            other => Ok(other?),
        }
    }

    /// Delete the remote record of `item`. A record or zone that is already
    /// gone counts as deleted.
    pub async fn delete_remote<R: Record>(
        &self,
        table: &Table<R>,
        mut item: R,
        scope: Option<Scope>,
    ) -> SyncResult<()> {
        let scope = scope.unwrap_or_else(R::cloud_scope);
        if let Some(meta) = table.stored_cloud_meta(&item.primary_key_value()) {
            item.meta_mut().cloud_meta = meta;
        }
        let id = match system_fields_of(&item)? {
            Some(system) => system.id,
            None => RecordId::new(
                zone_for::<R>(scope),
                record_name::<R>(&item.primary_key_value()),
            ),
        };

        let outcome = match self
            .remote
            .modify_records(scope, Vec::new(), vec![id.clone()], SavePolicy::ChangedKeys)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) if err.is_record_not_found() => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        for (_, result) in outcome.deleted {
            if let Err(err) = result {
                if !err.is_record_not_found() {
                    return Err(err.into());
                }
            }
        }
        debug!(record = %id, "remote record deleted");
        Ok(())
    }

    /// Every remote record of type `R` in its zone, following cursors.
    pub async fn records<R: Record>(&self, scope: Option<Scope>) -> SyncResult<Vec<R>> {
        let scope = scope.unwrap_or_else(R::cloud_scope);
        let zone = zone_for::<R>(scope);
        let mut records = Vec::new();
        let mut cursor = None;
        loop {
            let page = match self
                .remote
                .query_records(scope, zone.clone(), R::TYPE_NAME.to_string(), cursor)
                .await
            {
                Ok(page) => page,
                Err(err) if err.is_zone_not_found() => break,
                Err(err) => return Err(err.into()),
            };
            for record in &page.items {
                records.push(from_cloud_record::<R>(record)?);
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(records)
    }

    /// The remote record of type `R` named `name`, or `None` when it does
    /// not exist.
    pub async fn record<R: Record>(&self, name: &str, scope: Option<Scope>) -> SyncResult<Option<R>> {
        let scope = scope.unwrap_or_else(R::cloud_scope);
        let id = RecordId::new(zone_for::<R>(scope), name);
        match self.remote.fetch_record(scope, id).await {
            Ok(cloud) => Ok(Some(from_cloud_record::<R>(&cloud)?)),
            Err(err) if err.is_record_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete the zone holding `R` in `scope` and forget its change token.
    ///
    /// Local rows are kept. The next save recreates the zone.
    pub async fn delete_zone<R: Record>(&self, scope: Scope) -> SyncResult<()> {
        let zone = zone_for::<R>(scope);
        if zone.is_default() {
            return Ok(());
        }
        match self.remote.delete_zone(scope, zone.clone()).await {
            Ok(()) => {}
            Err(err) if err.is_zone_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        self.tokens.set(scope, Some(&zone), None);
        info!(scope = %scope, zone = %zone.name, "zone deleted");
        Ok(())
    }

    /// Create the zone holding `R` in `scope`.
    pub async fn create_zone<R: Record>(&self, scope: Scope) -> SyncResult<()> {
        let zone = zone_for::<R>(scope);
        if zone.is_default() {
            return Ok(());
        }
        self.remote.create_zone(scope, zone).await?;
        Ok(())
    }

    /// Push a saved record in the background.
    pub fn enqueue_save<R: Record>(self: &Arc<Self>, table: Table<R>, item: R, scope: Option<Scope>) {
        if !self.cloud_sync {
            return;
        }
        let engine = Arc::clone(self);
        self.spawn(async move {
            match engine.save(&table, vec![item], scope).await {
                Ok(report) if report.is_clean() => {}
                Ok(_) => debug!(record_type = R::TYPE_NAME, "background save left items unsynced"),
                Err(err) => warn!(
                    record_type = R::TYPE_NAME,
                    retryable = err.remote().is_some_and(|e| e.is_retryable()),
                    error = %err,
                    "background save failed"
                ),
            }
        });
    }

    /// Delete a record remotely in the background.
    pub fn enqueue_delete<R: Record>(self: &Arc<Self>, table: Table<R>, item: R, scope: Option<Scope>) {
        if !self.cloud_sync {
            return;
        }
        let engine = Arc::clone(self);
        self.spawn(async move {
            if let Err(err) = engine.delete_remote(&table, item, scope).await {
                warn!(
                    record_type = R::TYPE_NAME,
                    retryable = err.remote().is_some_and(|e| e.is_retryable()),
                    error = %err,
                    "background delete failed"
                );
            }
        });
    }

    /// Wait for every background push and notification started so far.
    pub async fn flush(&self) {
        loop {
            let tasks = {
                let mut pending = self
                    .pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                std::mem::take(&mut *pending)
            };
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(err) = task.await {
                    error!(error = %err, "background sync task panicked");
                }
            }
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(handle) = Handle::try_current().ok().or_else(|| self.runtime.clone()) else {
            warn!(error = %SyncError::NoRuntime, "dropping background sync task");
            return;
        };
        let task = handle.spawn(task);
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pending.retain(|t| !t.is_finished());
        pending.push(task);
    }
}
