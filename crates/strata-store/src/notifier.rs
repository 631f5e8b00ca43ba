//! Post-write notification fan-out.
//!
//! After every successful mutating operation the store emits a
//! [`ChangeEvent`] through the [`SubscriptionNotifier`]. Delivery is
//! synchronous and in registration order. Notification is best-effort, not
//! transactional with persistence: a listener failure is logged and counted,
//! and never rolls back the already-committed write.
//!
//! The listener registry itself is owned by an external subscription
//! provider; this module only invokes it.

use bytes::Bytes;
use std::sync::{Arc, RwLock};

use strata_core::{DocumentKind, PartitionKey};

use crate::metrics::record_notify_failure;

/// The kind of mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A document was created.
    Created,
    /// A document was replaced.
    Updated,
    /// A document was deleted.
    Deleted,
}

/// A committed mutation, delivered to listeners after the write succeeded.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// Entity kind of the affected document.
    pub document_kind: DocumentKind,
    /// Partition of the affected document.
    pub partition: PartitionKey,
    /// ID of the affected document.
    pub id: String,
    /// JSON body after the write (for deletes, the prior snapshot when the
    /// store had one in hand; batch deletes carry no body).
    pub body: Option<Bytes>,
}

/// Error type listeners may return; the notifier only logs it.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// A registered change listener.
pub trait ChangeListener: Send + Sync {
    /// Handles a committed change.
    ///
    /// # Errors
    ///
    /// Returned errors are logged and counted by the notifier; they do not
    /// affect the committed write or later listeners.
    fn on_change(&self, event: &ChangeEvent) -> Result<(), ListenerError>;
}

/// Fans change events out to registered listeners.
///
/// Clones share the same listener registry.
#[derive(Clone, Default)]
pub struct SubscriptionNotifier {
    listeners: Arc<RwLock<Vec<Arc<dyn ChangeListener>>>>,
}

impl SubscriptionNotifier {
    /// Creates a notifier with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Delivery order follows registration order.
    pub fn register(&self, listener: Arc<dyn ChangeListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().map_or(0, |listeners| listeners.len())
    }

    /// Delivers an event to every listener, in registration order.
    pub fn notify(&self, event: &ChangeEvent) {
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };

        for listener in &listeners {
            if let Err(error) = listener.on_change(event) {
                record_notify_failure();
                tracing::warn!(
                    kind = %event.document_kind,
                    partition = %event.partition,
                    id = %event.id,
                    %error,
                    "change listener failed; write is already committed"
                );
            }
        }
    }
}

impl std::fmt::Debug for SubscriptionNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionNotifier")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Listener that records every event it receives, in delivery order.
///
/// Intended for tests and local inspection.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: std::sync::Mutex<Vec<ChangeEvent>>,
}

impl RecordingListener {
    /// Creates an empty recording listener.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().map_or_else(|_| Vec::new(), |events| events.clone())
    }
}

impl ChangeListener for RecordingListener {
    fn on_change(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strata_core::TenantId;

    fn event(id: &str) -> ChangeEvent {
        ChangeEvent {
            kind: ChangeKind::Created,
            document_kind: DocumentKind::Project,
            partition: PartitionKey::tenant(&TenantId::new_unchecked("acme")),
            id: id.to_string(),
            body: None,
        }
    }

    struct OrderedListener {
        tag: usize,
        order: Arc<std::sync::Mutex<Vec<usize>>>,
    }

    impl ChangeListener for OrderedListener {
        fn on_change(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
            self.order.lock().unwrap().push(self.tag);
            Ok(())
        }
    }

    struct FailingListener {
        calls: Arc<AtomicUsize>,
    }

    impl ChangeListener for FailingListener {
        fn on_change(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err("listener exploded".into())
        }
    }

    #[test]
    fn delivers_in_registration_order() {
        let notifier = SubscriptionNotifier::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for tag in 0..3 {
            notifier.register(Arc::new(OrderedListener {
                tag,
                order: order.clone(),
            }));
        }

        notifier.notify(&event("doc-1"));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn listener_failure_does_not_stop_fanout() {
        let notifier = SubscriptionNotifier::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let recorder = Arc::new(RecordingListener::new());

        notifier.register(Arc::new(FailingListener {
            calls: calls.clone(),
        }));
        notifier.register(recorder.clone());

        notifier.notify(&event("doc-1"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.events().len(), 1, "later listeners still run");
    }

    #[test]
    fn clones_share_the_registry() {
        let notifier = SubscriptionNotifier::new();
        let clone = notifier.clone();
        clone.register(Arc::new(RecordingListener::new()));
        assert_eq!(notifier.listener_count(), 1);
    }
}
