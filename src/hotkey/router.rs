//! Key event router
//!
//! Turns raw key-down / key-up notifications from the hook thread into
//! PRESS, HOLD and RELEASE and dispatches them per selector.
//!
//! Per key: `Idle -> Pressed -> (Held | Idle)`. A PRESS arms a one-shot hold
//! timer tagged with a fresh generation. The timer thread and the hook
//! thread both classify under the same key-state lock, so once RELEASE has
//! been processed a late timer finds a different (or no) generation and is
//! ignored, and a HOLD that got the lock first is fully delivered before
//! RELEASE.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::scheduler::HoldScheduler;
use crate::events::{KeyCode, KeyOperation, RawKeyEvent};
use crate::observer::{notify_all, same_observer, ObserverRef, SubscriptionTable};

/// How long a key must stay down before HOLD is reported
pub const HOLD_THRESHOLD: Duration = Duration::from_millis(1000);

/// Selector matching every key code
pub const KEY_ALL: Selector = Selector::All;

/// What a router subscription listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Every key code
    All,
    /// One key code
    Key(KeyCode),
}

impl From<KeyCode> for Selector {
    fn from(code: KeyCode) -> Self {
        Selector::Key(code)
    }
}

/// Errors raised while setting up the router
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("failed to spawn hold timer thread: {0}")]
    TimerThread(String),
}

/// Registration with the native hook, released once at shutdown
pub trait HookHandle: Send {
    fn release(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyPhase {
    Pressed,
    Held,
}

#[derive(Debug)]
struct KeyTiming {
    generation: u64,
    phase: KeyPhase,
    /// Payload of the PRESS, replayed with the HOLD
    event: RawKeyEvent,
}

struct RouterInner {
    subscriptions: SubscriptionTable<Selector>,
    /// Keys currently in Pressed or Held. Also serialises classification.
    keys: Mutex<HashMap<KeyCode, KeyTiming>>,
    scheduler: HoldScheduler,
    generation: AtomicU64,
    hold_threshold: Duration,
    hook: Mutex<Option<Box<dyn HookHandle>>>,
    shut_down: AtomicBool,
}

/// Cloneable handle to the router
///
/// Every clone refers to the same subscription table and timers.
#[derive(Clone)]
pub struct KeyEventRouter {
    inner: Arc<RouterInner>,
}

impl KeyEventRouter {
    /// Create a router with the standard 1000 ms hold threshold
    pub fn new() -> Result<Self, RouterError> {
        Self::with_hold_threshold(HOLD_THRESHOLD)
    }

    pub fn with_hold_threshold(hold_threshold: Duration) -> Result<Self, RouterError> {
        let inner = Arc::new(RouterInner {
            subscriptions: SubscriptionTable::new(),
            keys: Mutex::new(HashMap::new()),
            scheduler: HoldScheduler::new(),
            generation: AtomicU64::new(0),
            hold_threshold,
            hook: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        inner.scheduler.spawn(move |code, generation| {
            if let Some(inner) = weak.upgrade() {
                inner.fire_hold(code, generation);
            }
        })?;

        debug!(hold_threshold_ms = hold_threshold.as_millis() as u64, "key event router created");
        Ok(Self { inner })
    }

    pub fn subscribe(&self, selector: Selector, observer: ObserverRef) {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            warn!(?selector, "subscribe after shutdown ignored");
            return;
        }
        if !self.inner.subscriptions.subscribe(selector, observer) {
            trace!(?selector, "observer already subscribed");
        }
    }

    /// Returns false if the observer was not subscribed under `selector`
    pub fn unsubscribe(&self, selector: Selector, observer: &ObserverRef) -> bool {
        self.inner.subscriptions.unsubscribe(&selector, observer)
    }

    /// Hand the hook registration to the router so shutdown releases it
    pub fn attach_hook(&self, mut hook: Box<dyn HookHandle>) {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            hook.release();
            return;
        }
        if let Some(mut previous) = self.inner.hook.lock().replace(hook) {
            warn!("replacing existing hook registration");
            previous.release();
        }
    }

    pub fn has_hook(&self) -> bool {
        self.inner.hook.lock().is_some()
    }

    /// Raw key-down from the hook thread
    pub fn raw_key_down(&self, code: KeyCode, event: RawKeyEvent) {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return;
        }

        let mut keys = self.inner.keys.lock();
        let observers = self.inner.observers_for(code);
        if observers.is_empty() {
            return;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(stale) = keys.remove(&code) {
            debug!(%code, stale = stale.generation, "key pressed again without release");
            self.inner.scheduler.cancel(code, stale.generation);
        }
        self.inner
            .scheduler
            .arm(code, generation, self.inner.hold_threshold);
        keys.insert(
            code,
            KeyTiming {
                generation,
                phase: KeyPhase::Pressed,
                event: event.clone(),
            },
        );

        trace!(%code, generation, observers = observers.len(), "dispatching PRESS");
        notify_all(&observers, code, KeyOperation::Press, &event);
    }

    /// Raw key-up from the hook thread
    pub fn raw_key_up(&self, code: KeyCode, event: RawKeyEvent) {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return;
        }

        let mut keys = self.inner.keys.lock();
        if let Some(timing) = keys.remove(&code) {
            let cancelled = self.inner.scheduler.cancel(code, timing.generation);
            let held = timing.phase == KeyPhase::Held;
            trace!(%code, generation = timing.generation, cancelled, held, "key released");
        }

        let observers = self.inner.observers_for(code);
        if observers.is_empty() {
            return;
        }

        trace!(%code, observers = observers.len(), "dispatching RELEASE");
        notify_all(&observers, code, KeyOperation::Release, &event);
    }

    /// Cancel every timer, clear subscriptions and release the hook. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("shutting down key event router");
        self.inner.scheduler.shutdown();
        self.inner.subscriptions.clear();

        if let Some(mut hook) = self.inner.hook.lock().take() {
            hook.release();
        }

        // Skipped when shutdown comes from inside a dispatch
        if let Some(mut keys) = self.inner.keys.try_lock() {
            keys.clear();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Number of (selector, observer) registrations
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Number of hold timers armed and not yet fired
    pub fn pending_holds(&self) -> usize {
        self.inner.scheduler.pending()
    }
}

impl RouterInner {
    /// Observers of `code` followed by observers of ALL, each at most once
    fn observers_for(&self, code: KeyCode) -> Vec<ObserverRef> {
        let mut observers: Vec<ObserverRef> = self
            .subscriptions
            .observers(&Selector::Key(code))
            .map(|list| list.to_vec())
            .unwrap_or_default();

        if let Some(all) = self.subscriptions.observers(&Selector::All) {
            for observer in all.iter() {
                if !observers.iter().any(|o| same_observer(o, observer)) {
                    observers.push(Arc::clone(observer));
                }
            }
        }

        observers
    }

    fn fire_hold(&self, code: KeyCode, generation: u64) {
        let mut keys = self.keys.lock();
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }

        let Some(timing) = keys.get_mut(&code) else {
            trace!(%code, generation, "hold timer fired after release");
            return;
        };
        if timing.generation != generation || timing.phase != KeyPhase::Pressed {
            trace!(%code, generation, live = timing.generation, "stale hold timer ignored");
            return;
        }

        timing.phase = KeyPhase::Held;
        let event = timing.event.clone();
        let observers = self.observers_for(code);

        trace!(
            %code,
            generation,
            held_ms = event.received_at.elapsed().as_millis() as u64,
            observers = observers.len(),
            "dispatching HOLD"
        );
        notify_all(&observers, code, KeyOperation::Hold, &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::recording::{as_observer, Recorder};
    use crate::observer::{KeyObserver, ObserverError};
    use std::thread;

    const A: KeyCode = KeyCode(0x00);
    const B: KeyCode = KeyCode(0x0B);

    fn router(threshold_ms: u64) -> KeyEventRouter {
        KeyEventRouter::with_hold_threshold(Duration::from_millis(threshold_ms)).unwrap()
    }

    fn down(router: &KeyEventRouter, code: KeyCode) {
        router.raw_key_down(code, RawKeyEvent::default());
    }

    fn up(router: &KeyEventRouter, code: KeyCode) {
        router.raw_key_up(code, RawKeyEvent::default());
    }

    #[test]
    fn test_quick_release_has_no_hold() {
        let router = router(200);
        let rec = Recorder::new();
        router.subscribe(Selector::Key(A), as_observer(&rec));

        down(&router, A);
        up(&router, A);
        thread::sleep(Duration::from_millis(350));

        assert_eq!(rec.operations(), vec![KeyOperation::Press, KeyOperation::Release]);
        assert_eq!(router.pending_holds(), 0);
    }

    #[test]
    fn test_long_press_holds_exactly_once() {
        let router = router(40);
        let rec = Recorder::new();
        router.subscribe(Selector::Key(A), as_observer(&rec));

        down(&router, A);
        thread::sleep(Duration::from_millis(250));
        assert_eq!(rec.operations(), vec![KeyOperation::Press, KeyOperation::Hold]);

        thread::sleep(Duration::from_millis(150));
        up(&router, A);
        assert_eq!(
            rec.operations(),
            vec![KeyOperation::Press, KeyOperation::Hold, KeyOperation::Release]
        );

        // A new cycle gets its own HOLD
        down(&router, A);
        thread::sleep(Duration::from_millis(250));
        up(&router, A);
        assert_eq!(rec.count(KeyOperation::Hold), 2);
    }

    #[test]
    fn test_unsubscribed_key_is_dropped() {
        let router = router(40);
        let rec = Recorder::new();
        router.subscribe(Selector::Key(A), as_observer(&rec));

        down(&router, B);
        assert_eq!(router.pending_holds(), 0);
        thread::sleep(Duration::from_millis(120));
        up(&router, B);

        assert!(rec.seen().is_empty());
    }

    #[test]
    fn test_all_selector_sees_every_key_once() {
        let router = router(10_000);
        let rec = Recorder::new();
        router.subscribe(KEY_ALL, as_observer(&rec));
        router.subscribe(Selector::Key(A), as_observer(&rec));

        down(&router, A);
        down(&router, B);
        up(&router, B);
        up(&router, A);

        assert_eq!(
            rec.seen(),
            vec![
                (A, KeyOperation::Press),
                (B, KeyOperation::Press),
                (B, KeyOperation::Release),
                (A, KeyOperation::Release),
            ]
        );
    }

    #[test]
    fn test_key_observers_precede_all_observers() {
        let router = router(10_000);
        let order = Arc::new(Mutex::new(Vec::new()));

        let all_order = Arc::clone(&order);
        let all: ObserverRef = Arc::new(
            move |_: KeyCode, _: KeyOperation, _: &RawKeyEvent| -> Result<(), ObserverError> {
                all_order.lock().push("all");
                Ok(())
            },
        );
        let key_order = Arc::clone(&order);
        let key: ObserverRef = Arc::new(
            move |_: KeyCode, _: KeyOperation, _: &RawKeyEvent| -> Result<(), ObserverError> {
                key_order.lock().push("key");
                Ok(())
            },
        );
        router.subscribe(KEY_ALL, all);
        router.subscribe(Selector::Key(A), key);

        down(&router, A);
        assert_eq!(*order.lock(), vec!["key", "all"]);
    }

    fn live_generation(router: &KeyEventRouter, code: KeyCode) -> u64 {
        router.inner.keys.lock()[&code].generation
    }

    #[test]
    fn test_stale_hold_timer_after_release_is_ignored() {
        let router = router(60_000);
        let rec = Recorder::new();
        router.subscribe(Selector::Key(A), as_observer(&rec));

        down(&router, A);
        let stale = live_generation(&router, A);
        up(&router, A);

        // Timer already popped off the queue when RELEASE won the lock
        router.inner.fire_hold(A, stale);

        down(&router, A);
        assert_ne!(live_generation(&router, A), stale);
        router.inner.fire_hold(A, stale);

        assert_eq!(
            rec.operations(),
            vec![KeyOperation::Press, KeyOperation::Release, KeyOperation::Press]
        );
    }

    #[test]
    fn test_live_hold_timer_fires_once() {
        let router = router(60_000);
        let rec = Recorder::new();
        router.subscribe(Selector::Key(A), as_observer(&rec));

        down(&router, A);
        let live = live_generation(&router, A);
        router.inner.fire_hold(A, live);
        router.inner.fire_hold(A, live);
        up(&router, A);

        assert_eq!(
            rec.operations(),
            vec![KeyOperation::Press, KeyOperation::Hold, KeyOperation::Release]
        );
    }

    /// Unsubscribes `target` from another key while handling its own event
    struct Unsubscriber {
        router: KeyEventRouter,
        target: ObserverRef,
    }

    impl KeyObserver for Unsubscriber {
        fn update(&self, _: KeyCode, _: KeyOperation, _: &RawKeyEvent) -> Result<(), ObserverError> {
            self.router.unsubscribe(Selector::Key(A), &self.target);
            Ok(())
        }
    }

    #[test]
    fn test_unsubscribe_during_dispatch_keeps_event() {
        let router = router(10_000);
        let other = Recorder::new();
        let after = Recorder::new();
        router.subscribe(Selector::Key(A), as_observer(&other));

        let unsubscriber: ObserverRef = Arc::new(Unsubscriber {
            router: router.clone(),
            target: as_observer(&other),
        });
        router.subscribe(Selector::Key(B), unsubscriber);
        router.subscribe(Selector::Key(B), as_observer(&after));

        down(&router, B);

        assert_eq!(after.seen(), vec![(B, KeyOperation::Press)]);
        assert_eq!(router.subscription_count(), 2);

        down(&router, A);
        assert!(other.seen().is_empty());
    }

    #[test]
    fn test_failing_observer_does_not_break_state_machine() {
        let router = router(40);
        let failing: ObserverRef = Arc::new(
            |_: KeyCode, _: KeyOperation, _: &RawKeyEvent| -> Result<(), ObserverError> {
                Err(ObserverError::Failed("feature crashed".into()))
            },
        );
        let rec = Recorder::new();
        router.subscribe(Selector::Key(A), failing);
        router.subscribe(Selector::Key(A), as_observer(&rec));

        down(&router, A);
        thread::sleep(Duration::from_millis(250));
        up(&router, A);

        assert_eq!(
            rec.operations(),
            vec![KeyOperation::Press, KeyOperation::Hold, KeyOperation::Release]
        );
    }

    #[test]
    fn test_repress_without_release_rearms_single_timer() {
        let router = router(10_000);
        let rec = Recorder::new();
        router.subscribe(Selector::Key(A), as_observer(&rec));

        down(&router, A);
        down(&router, A);

        assert_eq!(router.pending_holds(), 1);
        assert_eq!(rec.count(KeyOperation::Press), 2);
    }

    struct CountingHook(Arc<AtomicU64>);

    impl HookHandle for CountingHook {
        fn release(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_shutdown_is_idempotent_and_releases_hook_once() {
        let router = router(40);
        let released = Arc::new(AtomicU64::new(0));
        router.attach_hook(Box::new(CountingHook(Arc::clone(&released))));
        let rec = Recorder::new();
        router.subscribe(Selector::Key(A), as_observer(&rec));

        down(&router, A);
        assert_eq!(router.pending_holds(), 1);

        router.shutdown();
        router.shutdown();

        assert!(router.is_shut_down());
        assert!(!router.has_hook());
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(router.pending_holds(), 0);
        assert_eq!(router.subscription_count(), 0);

        thread::sleep(Duration::from_millis(120));
        up(&router, A);
        assert_eq!(rec.operations(), vec![KeyOperation::Press]);
    }

    #[test]
    fn test_hook_attached_after_shutdown_is_released_immediately() {
        let router = router(40);
        router.shutdown();

        let released = Arc::new(AtomicU64::new(0));
        router.attach_hook(Box::new(CountingHook(Arc::clone(&released))));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
