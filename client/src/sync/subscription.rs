//! Per-scope change subscriptions.

use crate::db::KeyValueStore;
use crate::remote::RemoteStore;
use rowcloud_engine::{subscription_key, Scope, Subscription};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of [`SubscriptionManager::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    AlreadySubscribed,
    Registered,
    /// Registration failed; it is retried on the next call
    Deferred,
}

/// Registers one silent database subscription per scope, once.
///
/// The "saved" flag is set only after the remote store confirms.
#[derive(Clone)]
pub struct SubscriptionManager {
    kv: KeyValueStore,
    remote: Arc<dyn RemoteStore>,
    prefix: String,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl SubscriptionManager {
    pub fn new(kv: KeyValueStore, remote: Arc<dyn RemoteStore>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            remote,
            prefix: prefix.into(),
        }
    }

    pub fn is_subscribed(&self, scope: Scope) -> bool {
        self.kv.get_bool(&subscription_key(scope))
    }

    pub async fn ensure(&self, scope: Scope) -> SubscriptionStatus {
        if self.is_subscribed(scope) {
            return SubscriptionStatus::AlreadySubscribed;
        }

        let subscription = Subscription::database_changes(&self.prefix, scope);
        let id = subscription.id.clone();
        match self.remote.save_subscription(scope, subscription).await {
            Ok(()) => {
                self.kv.set_bool(&subscription_key(scope), true);
                info!(scope = %scope, subscription = %id, "subscription registered");
                SubscriptionStatus::Registered
            }
            Err(err) => {
                warn!(scope = %scope, error = %err, "subscription registration deferred");
                SubscriptionStatus::Deferred
            }
        }
    }

    /// Forget the local flag so the next `ensure` registers again.
    pub fn forget(&self, scope: Scope) -> bool {
        self.kv.delete(&subscription_key(scope))
    }
}
