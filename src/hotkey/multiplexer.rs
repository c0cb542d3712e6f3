//! Hotkey multiplexer
//!
//! Sits on the router as a single ALL observer, tracks the set of pressed
//! keys and fans events out to three kinds of subscription: single-key
//! press/release, single-key hold, and chords.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::keys;
use super::router::{KeyEventRouter, KEY_ALL};
use crate::events::{KeyCode, KeyOperation, RawKeyEvent};
use crate::observer::{notify_all, KeyObserver, ObserverError, ObserverRef, SubscriptionTable};

/// Errors building hotkey subscriptions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HotkeyError {
    #[error("a chord needs at least one key")]
    EmptyChord,

    #[error("unknown key name: {0}")]
    UnknownKey(String),
}

/// A set of keys that must be down together. Order does not matter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<KeyCode>", into = "Vec<KeyCode>")]
pub struct Chord(BTreeSet<KeyCode>);

impl Chord {
    pub fn new<I>(codes: I) -> Result<Self, HotkeyError>
    where
        I: IntoIterator<Item = KeyCode>,
    {
        let codes: BTreeSet<KeyCode> = codes.into_iter().collect();
        if codes.is_empty() {
            return Err(HotkeyError::EmptyChord);
        }
        Ok(Self(codes))
    }

    /// Build a chord from key names in the key-name table
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, HotkeyError> {
        let codes = names
            .iter()
            .map(|name| {
                keys::lookup(name.as_ref())
                    .map(|spec| spec.code)
                    .ok_or_else(|| HotkeyError::UnknownKey(name.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(codes)
    }

    pub fn codes(&self) -> impl Iterator<Item = KeyCode> + '_ {
        self.0.iter().copied()
    }

    pub fn contains(&self, code: KeyCode) -> bool {
        self.0.contains(&code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every key of the chord is in `pressed`
    pub fn is_active(&self, pressed: &HashSet<KeyCode>) -> bool {
        self.0.iter().all(|code| pressed.contains(code))
    }
}

impl TryFrom<Vec<KeyCode>> for Chord {
    type Error = HotkeyError;

    fn try_from(codes: Vec<KeyCode>) -> Result<Self, Self::Error> {
        Self::new(codes)
    }
}

impl From<Chord> for Vec<KeyCode> {
    fn from(chord: Chord) -> Self {
        chord.codes().collect()
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, code) in self.codes().enumerate() {
            if i > 0 {
                write!(f, "+")?;
            }
            match keys::name_of(code) {
                Some(name) => write!(f, "{name}")?,
                None => write!(f, "{code}")?,
            }
        }
        Ok(())
    }
}

/// When chord observers are notified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordRepeat {
    /// On every event while all chord keys are down, including events of
    /// unrelated keys and HOLD of chord keys
    #[default]
    EveryEvent,
    /// Once when the chord becomes fully pressed; re-armed when one of its
    /// keys is released
    OncePerActivation,
}

impl FromStr for ChordRepeat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "every_event" => Ok(Self::EveryEvent),
            "once_per_activation" | "once" => Ok(Self::OncePerActivation),
            other => Err(format!(
                "unknown chord repeat policy '{other}' (expected every_event or once_per_activation)"
            )),
        }
    }
}

impl fmt::Display for ChordRepeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChordRepeat::EveryEvent => write!(f, "every_event"),
            ChordRepeat::OncePerActivation => write!(f, "once_per_activation"),
        }
    }
}

struct MuxInner {
    repeat: ChordRepeat,
    pressed: Mutex<HashSet<KeyCode>>,
    key_events: SubscriptionTable<KeyCode>,
    holds: SubscriptionTable<KeyCode>,
    chords: SubscriptionTable<Chord>,
    /// Chords already notified in the current activation
    fired_chords: Mutex<HashSet<Chord>>,
}

impl MuxInner {
    fn dispatch(&self, code: KeyCode, operation: KeyOperation, event: &RawKeyEvent) {
        let pressed = {
            let mut pressed = self.pressed.lock();
            match operation {
                KeyOperation::Press | KeyOperation::Hold => {
                    pressed.insert(code);
                }
                KeyOperation::Release => {
                    pressed.remove(&code);
                }
            }
            pressed.clone()
        };

        let direct = match operation {
            KeyOperation::Press | KeyOperation::Release => self.key_events.observers(&code),
            KeyOperation::Hold => self.holds.observers(&code),
        };
        if let Some(observers) = direct {
            trace!(%code, %operation, observers = observers.len(), "notifying key subscribers");
            notify_all(observers.iter(), code, operation, event);
        }

        self.dispatch_chords(&pressed, code, operation, event);
    }

    /// Chords are visited in `Chord` order (by key code), so the order in
    /// which different chords are notified for one event is stable
    fn dispatch_chords(
        &self,
        pressed: &HashSet<KeyCode>,
        code: KeyCode,
        operation: KeyOperation,
        event: &RawKeyEvent,
    ) {
        let mut chords = self.chords.entries();
        chords.sort_by(|(a, _), (b, _)| a.cmp(b));

        for (chord, observers) in chords {
            let active = chord.is_active(pressed);

            let notify = match self.repeat {
                ChordRepeat::EveryEvent => active,
                ChordRepeat::OncePerActivation => {
                    let mut fired = self.fired_chords.lock();
                    if active {
                        fired.insert(chord.clone())
                    } else {
                        fired.remove(&chord);
                        false
                    }
                }
            };

            if notify {
                debug!(%chord, %code, %operation, "chord active");
                notify_all(observers.iter(), code, operation, event);
            }
        }
    }
}

impl KeyObserver for MuxInner {
    fn update(
        &self,
        code: KeyCode,
        operation: KeyOperation,
        event: &RawKeyEvent,
    ) -> Result<(), ObserverError> {
        self.dispatch(code, operation, event);
        Ok(())
    }
}

/// Fans router events out to key, hold and chord subscribers
pub struct HotkeyMultiplexer {
    router: KeyEventRouter,
    inner: Arc<MuxInner>,
    /// `inner` as registered with the router
    registration: ObserverRef,
    shut_down: AtomicBool,
}

impl HotkeyMultiplexer {
    /// Attach to `router` with the default chord policy
    pub fn new(router: &KeyEventRouter) -> Self {
        Self::with_repeat(router, ChordRepeat::default())
    }

    pub fn with_repeat(router: &KeyEventRouter, repeat: ChordRepeat) -> Self {
        let inner = Arc::new(MuxInner {
            repeat,
            pressed: Mutex::new(HashSet::new()),
            key_events: SubscriptionTable::new(),
            holds: SubscriptionTable::new(),
            chords: SubscriptionTable::new(),
            fired_chords: Mutex::new(HashSet::new()),
        });
        let registration: ObserverRef = Arc::clone(&inner) as ObserverRef;
        router.subscribe(KEY_ALL, Arc::clone(&registration));

        debug!(%repeat, "hotkey multiplexer attached to router");
        Self {
            router: router.clone(),
            inner,
            registration,
            shut_down: AtomicBool::new(false),
        }
    }

    fn accepting(&self, what: &str) -> bool {
        if self.shut_down.load(Ordering::SeqCst) {
            warn!(what, "subscription after shutdown ignored");
            return false;
        }
        true
    }

    pub fn subscribe_chord(&self, chord: Chord, observer: ObserverRef) {
        if self.accepting("chord") {
            debug!(%chord, "chord subscribed");
            self.inner.chords.subscribe(chord, observer);
        }
    }

    pub fn unsubscribe_chord(&self, chord: &Chord, observer: &ObserverRef) -> bool {
        let removed = self.inner.chords.unsubscribe(chord, observer);
        if removed && self.inner.chords.observers(chord).is_none() {
            self.inner.fired_chords.lock().remove(chord);
        }
        removed
    }

    pub fn subscribe_hold(&self, code: KeyCode, observer: ObserverRef) {
        if self.accepting("hold") {
            self.inner.holds.subscribe(code, observer);
        }
    }

    pub fn unsubscribe_hold(&self, code: KeyCode, observer: &ObserverRef) -> bool {
        self.inner.holds.unsubscribe(&code, observer)
    }

    pub fn subscribe_key_event(&self, code: KeyCode, observer: ObserverRef) {
        if self.accepting("key event") {
            self.inner.key_events.subscribe(code, observer);
        }
    }

    pub fn unsubscribe_key_event(&self, code: KeyCode, observer: &ObserverRef) -> bool {
        self.inner.key_events.unsubscribe(&code, observer)
    }

    /// Keys currently known to be down, sorted
    pub fn pressed_keys(&self) -> Vec<KeyCode> {
        let mut keys: Vec<KeyCode> = self.inner.pressed.lock().iter().copied().collect();
        keys.sort();
        keys
    }

    /// Total subscriptions across key, hold and chord tables
    pub fn subscription_count(&self) -> usize {
        self.inner.key_events.len() + self.inner.holds.len() + self.inner.chords.len()
    }

    pub fn chord_repeat(&self) -> ChordRepeat {
        self.inner.repeat
    }

    /// Detach from the router and drop every subscription. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("shutting down hotkey multiplexer");
        self.router.unsubscribe(KEY_ALL, &self.registration);
        self.inner.key_events.clear();
        self.inner.holds.clear();
        self.inner.chords.clear();
        self.inner.fired_chords.lock().clear();
        self.inner.pressed.lock().clear();
    }
}

impl Drop for HotkeyMultiplexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
