//! Observer capability and subscription bookkeeping
//!
//! Observers are notified synchronously on whichever thread classified the
//! event (hook thread or hold-timer thread). Anything slower than a channel
//! send belongs behind a [`ChannelObserver`].

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::events::{KeyCode, KeyNotification, KeyOperation, RawKeyEvent};

/// Shared handle to an observer. Identity is the allocation, not the value.
pub type ObserverRef = Arc<dyn KeyObserver>;

/// Errors an observer may report back to the dispatcher
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("observer channel is closed")]
    Disconnected,

    #[error("observer failed: {0}")]
    Failed(String),
}

/// Receives classified key events
pub trait KeyObserver: Send + Sync {
    fn update(
        &self,
        code: KeyCode,
        operation: KeyOperation,
        event: &RawKeyEvent,
    ) -> Result<(), ObserverError>;
}

impl<F> KeyObserver for F
where
    F: Fn(KeyCode, KeyOperation, &RawKeyEvent) -> Result<(), ObserverError> + Send + Sync,
{
    fn update(
        &self,
        code: KeyCode,
        operation: KeyOperation,
        event: &RawKeyEvent,
    ) -> Result<(), ObserverError> {
        self(code, operation, event)
    }
}

/// Whether two handles point at the same observer
pub fn same_observer(a: &ObserverRef, b: &ObserverRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Notify each observer in turn, isolating failures
///
/// A returned error or a panic is logged and counted; the remaining
/// observers still see the event. Returns the number of failures.
pub fn notify_all<'a, I>(observers: I, code: KeyCode, operation: KeyOperation, event: &RawKeyEvent) -> usize
where
    I: IntoIterator<Item = &'a ObserverRef>,
{
    let mut failures = 0;

    for observer in observers {
        match panic::catch_unwind(AssertUnwindSafe(|| observer.update(code, operation, event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                warn!(%code, %operation, error = %e, "observer failed, continuing dispatch");
            }
            Err(payload) => {
                failures += 1;
                warn!(
                    %code,
                    %operation,
                    panic = panic_message(payload.as_ref()),
                    "observer panicked, continuing dispatch"
                );
            }
        }
    }

    failures
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Selector → ordered observer list, copy-on-write per selector
///
/// Dispatch takes a snapshot (`Arc<[ObserverRef]>`) and iterates it with no
/// lock held, so subscribe/unsubscribe from inside `update` is safe and
/// never skips or repeats an observer of the event in flight.
pub struct SubscriptionTable<K> {
    entries: RwLock<HashMap<K, Arc<[ObserverRef]>>>,
}

impl<K: Eq + Hash + Clone> SubscriptionTable<K> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Append `observer` under `key`. Returns false if it was already there.
    pub fn subscribe(&self, key: K, observer: ObserverRef) -> bool {
        let mut entries = self.entries.write();
        let current = entries.get(&key);

        if current.is_some_and(|list| list.iter().any(|o| same_observer(o, &observer))) {
            return false;
        }

        let mut list: Vec<ObserverRef> = current.map(|l| l.to_vec()).unwrap_or_default();
        list.push(observer);
        entries.insert(key, list.into());
        true
    }

    /// Remove `observer` from `key`. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, key: &K, observer: &ObserverRef) -> bool {
        let mut entries = self.entries.write();
        let Some(current) = entries.get(key) else {
            return false;
        };

        let list: Vec<ObserverRef> = current
            .iter()
            .filter(|o| !same_observer(o, observer))
            .cloned()
            .collect();

        if list.len() == current.len() {
            return false;
        }

        if list.is_empty() {
            entries.remove(key);
        } else {
            entries.insert(key.clone(), list.into());
        }
        true
    }

    /// Snapshot of the observers under `key`
    pub fn observers(&self, key: &K) -> Option<Arc<[ObserverRef]>> {
        self.entries.read().get(key).cloned()
    }

    /// Snapshot of every selector with its observers
    pub fn entries(&self) -> Vec<(K, Arc<[ObserverRef]>)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    /// Total number of (selector, observer) registrations
    pub fn len(&self) -> usize {
        self.entries.read().values().map(|l| l.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl<K: Eq + Hash + Clone> Default for SubscriptionTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer that forwards events onto an unbounded channel
///
/// The consumer drains the receiver on its own task or thread. Sending
/// never blocks the dispatching thread.
pub struct ChannelObserver<T = KeyNotification> {
    tx: mpsc::UnboundedSender<T>,
    wrap: Box<dyn Fn(KeyNotification) -> T + Send + Sync>,
}

impl ChannelObserver<KeyNotification> {
    /// Create an observer together with the receiving end
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<KeyNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_sender(tx, |note| note), rx)
    }
}

impl<T: Send + 'static> ChannelObserver<T> {
    /// Forward into an existing channel, wrapping each notification
    pub fn with_sender<F>(tx: mpsc::UnboundedSender<T>, wrap: F) -> Arc<Self>
    where
        F: Fn(KeyNotification) -> T + Send + Sync + 'static,
    {
        Arc::new(Self {
            tx,
            wrap: Box::new(wrap),
        })
    }
}

impl<T: Send + 'static> KeyObserver for ChannelObserver<T> {
    fn update(
        &self,
        code: KeyCode,
        operation: KeyOperation,
        event: &RawKeyEvent,
    ) -> Result<(), ObserverError> {
        trace!(%code, %operation, "forwarding to channel");
        let message = (self.wrap)(KeyNotification::new(code, operation, event));
        self.tx.send(message).map_err(|_| ObserverError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> (ObserverRef, Arc<Mutex<Vec<(KeyCode, KeyOperation)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: ObserverRef = Arc::new(
            move |code: KeyCode, op: KeyOperation, _: &RawKeyEvent| -> Result<(), ObserverError> {
                sink.lock().push((code, op));
                Ok(())
            },
        );
        (observer, seen)
    }

    #[test]
    fn test_subscribe_preserves_order_and_ignores_duplicates() {
        let table = SubscriptionTable::new();
        let (a, _) = recorder();
        let (b, _) = recorder();

        assert!(table.subscribe(1u32, Arc::clone(&a)));
        assert!(table.subscribe(1u32, Arc::clone(&b)));
        assert!(!table.subscribe(1u32, Arc::clone(&a)));

        let list = table.observers(&1).unwrap();
        assert_eq!(list.len(), 2);
        assert!(same_observer(&list[0], &a));
        assert!(same_observer(&list[1], &b));
    }

    #[test]
    fn test_unsubscribe_removes_empty_selector() {
        let table = SubscriptionTable::new();
        let (a, _) = recorder();

        table.subscribe(7u32, Arc::clone(&a));
        assert!(table.unsubscribe(&7, &a));
        assert!(!table.unsubscribe(&7, &a));
        assert!(table.observers(&7).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_snapshot_unaffected_by_later_mutation() {
        let table = SubscriptionTable::new();
        let (a, _) = recorder();
        let (b, _) = recorder();
        table.subscribe(1u32, Arc::clone(&a));
        table.subscribe(1u32, Arc::clone(&b));

        let snapshot = table.observers(&1).unwrap();
        table.unsubscribe(&1, &b);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(table.observers(&1).unwrap().len(), 1);
    }

    #[test]
    fn test_notify_all_isolates_errors_and_panics() {
        let failing: ObserverRef = Arc::new(
            |_: KeyCode, _: KeyOperation, _: &RawKeyEvent| -> Result<(), ObserverError> {
                Err(ObserverError::Failed("boom".into()))
            },
        );
        let panicking: ObserverRef = Arc::new(
            |_: KeyCode, _: KeyOperation, _: &RawKeyEvent| -> Result<(), ObserverError> {
                panic!("observer exploded")
            },
        );
        let (ok, seen) = recorder();

        let observers = vec![failing, panicking, ok];
        let failures = notify_all(&observers, KeyCode(4), KeyOperation::Press, &RawKeyEvent::default());

        assert_eq!(failures, 2);
        assert_eq!(*seen.lock(), vec![(KeyCode(4), KeyOperation::Press)]);
    }

    #[test]
    fn test_channel_observer_forwards_and_reports_disconnect() {
        let (observer, mut rx) = ChannelObserver::channel();
        let event = RawKeyEvent::new(3);

        observer.update(KeyCode(9), KeyOperation::Release, &event).unwrap();
        let note = rx.try_recv().unwrap();
        assert_eq!(note.code, KeyCode(9));
        assert_eq!(note.operation, KeyOperation::Release);
        assert_eq!(note.flags, 3);

        drop(rx);
        assert!(matches!(
            observer.update(KeyCode(9), KeyOperation::Press, &event),
            Err(ObserverError::Disconnected)
        ));
    }

    #[test]
    fn test_channel_observer_wraps_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer = ChannelObserver::with_sender(tx, |note| (42u64, note));

        observer.update(KeyCode(1), KeyOperation::Hold, &RawKeyEvent::default()).unwrap();
        let (tag, note) = rx.try_recv().unwrap();
        assert_eq!(tag, 42);
        assert_eq!(note.operation, KeyOperation::Hold);
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{KeyObserver, ObserverError, ObserverRef};
    use crate::events::{KeyCode, KeyOperation, RawKeyEvent};

    /// Observer that remembers every notification it receives
    #[derive(Default)]
    pub struct Recorder {
        seen: Mutex<Vec<(KeyCode, KeyOperation)>>,
    }

    impl Recorder {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn seen(&self) -> Vec<(KeyCode, KeyOperation)> {
            self.seen.lock().clone()
        }

        pub fn operations(&self) -> Vec<KeyOperation> {
            self.seen.lock().iter().map(|(_, op)| *op).collect()
        }

        pub fn count(&self, operation: KeyOperation) -> usize {
            self.seen.lock().iter().filter(|(_, op)| *op == operation).count()
        }
    }

    impl KeyObserver for Recorder {
        fn update(
            &self,
            code: KeyCode,
            operation: KeyOperation,
            _event: &RawKeyEvent,
        ) -> Result<(), ObserverError> {
            self.seen.lock().push((code, operation));
            Ok(())
        }
    }

    pub fn as_observer(recorder: &Arc<Recorder>) -> ObserverRef {
        Arc::clone(recorder) as ObserverRef
    }
}
