//! Global key event subsystem
//!
//! The listener feeds raw key-down / key-up into the router, which
//! classifies PRESS / HOLD / RELEASE per key. The multiplexer sits on the
//! router and serves single-key, hold and chord subscriptions.

pub mod keys;
mod listener;
pub mod modifiers;
mod multiplexer;
mod router;
mod scheduler;

pub use listener::{HookError, HotkeyListener, ListenerHandle};
pub use multiplexer::{Chord, ChordRepeat, HotkeyError, HotkeyMultiplexer};
pub use router::{HookHandle, KeyEventRouter, RouterError, Selector, HOLD_THRESHOLD, KEY_ALL};
pub use scheduler::HoldScheduler;
