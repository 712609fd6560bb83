//! Change notifications.
//!
//! Tracks listeners interested in locally applied remote changes and fans
//! out one notification per affected record type.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sender half held for each listener.
pub type NotificationSender = mpsc::UnboundedSender<ChangeNotification>;

/// Remote changes to `record_type` were written to the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub record_type: String,
}

impl ChangeNotification {
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
        }
    }

    /// Notification name observers match on: `<Type>DataChangedNotification`.
    pub fn name(&self) -> String {
        format!("{}DataChangedNotification", self.record_type)
    }
}

#[derive(Debug)]
struct Listener {
    /// Only notifications for this type are delivered, when set
    record_type: Option<String>,
    sender: NotificationSender,
}

/// Registry of notification listeners.
///
/// Thread-safe and shared via `Arc`.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    listeners: DashMap<String, Listener>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a listener. Returns its id.
    pub fn register(&self, record_type: Option<String>, sender: NotificationSender) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.listeners.insert(
            id.clone(),
            Listener {
                record_type,
                sender,
            },
        );
        tracing::debug!(listener = %id, "change listener registered");
        id
    }

    /// Register a listener backed by a fresh channel.
    pub fn subscribe(
        &self,
        record_type: Option<String>,
    ) -> (String, mpsc::UnboundedReceiver<ChangeNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.register(record_type, tx), rx)
    }

    pub fn unregister(&self, id: &str) {
        if self.listeners.remove(id).is_some() {
            tracing::debug!(listener = %id, "change listener unregistered");
        }
    }

    /// Deliver `notification` to every matching listener.
    ///
    /// Listeners whose receiver is gone are dropped. Returns the number of
    /// listeners that received it.
    pub fn broadcast(&self, notification: &ChangeNotification) -> usize {
        let mut sent = 0;
        let mut closed = Vec::new();

        for entry in self.listeners.iter() {
            let listener = entry.value();
            let wanted = listener
                .record_type
                .as_deref()
                .map_or(true, |t| t == notification.record_type);
            if !wanted {
                continue;
            }
            if listener.sender.send(notification.clone()).is_ok() {
                sent += 1;
            } else {
                closed.push(entry.key().clone());
            }
        }

        for id in closed {
            self.unregister(&id);
        }

        tracing::debug!(
            notification = %notification.name(),
            recipients = sent,
            "broadcast change notification"
        );
        sent
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
