//! Synchronization with the remote record store.

pub mod engine;
pub mod notify;
pub mod registry;
pub mod subscription;
pub mod tokens;

pub use engine::{MergeHook, SaveReport, SyncEngine, SyncSummary};
pub use notify::{ChangeNotification, ChangeNotifier};
pub use registry::RemoteApplier;
pub use subscription::{SubscriptionManager, SubscriptionStatus};
pub use tokens::ChangeTokenStore;
