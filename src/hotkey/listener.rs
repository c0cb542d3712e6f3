//! Global key listener using macOS CGEventTap
//!
//! Feeds raw key-down / key-up notifications into the router from a
//! dedicated thread with its own CFRunLoop. OS autorepeat downs are dropped
//! so a held key produces a single PRESS and can reach the hold threshold.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use super::router::{HookHandle, KeyEventRouter};

/// Errors that can occur in the key listener
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("key listener is already running")]
    AlreadyRunning,

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("global key hook is not supported on this platform")]
    Unsupported,
}

/// Global key listener feeding a [`KeyEventRouter`]
pub struct HotkeyListener {
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    router: KeyEventRouter,
    running: Arc<AtomicBool>,
}

/// Keeps the event tap alive; releasing it stops the listener thread
pub struct ListenerHandle {
    running: Arc<AtomicBool>,
}

impl HookHandle for ListenerHandle {
    fn release(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("key listener released");
        }
    }
}

impl HotkeyListener {
    pub fn new(router: KeyEventRouter) -> Self {
        Self {
            router,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if the listener is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start listening
    ///
    /// Spawns the `hotkey-listener` thread and waits until the event tap is
    /// installed, so a missing Accessibility permission is reported here.
    #[cfg(target_os = "macos")]
    pub fn start(&self) -> Result<ListenerHandle, HookError> {
        use std::sync::mpsc;
        use std::thread;
        use tracing::error;

        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HookError::AlreadyRunning);
        }

        let router = self.router.clone();
        let running = Arc::clone(&self.running);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), HookError>>();

        let spawned = thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("key listener thread started");

                if let Err(e) = tap::run_event_loop(router, Arc::clone(&running), ready_tx.clone()) {
                    error!(?e, "key listener error");
                    let _ = ready_tx.send(Err(e));
                }

                running.store(false, Ordering::SeqCst);
                info!("key listener thread stopped");
            });

        if let Err(e) = spawned {
            self.running.store(false, Ordering::SeqCst);
            return Err(HookError::ThreadSpawn(e.to_string()));
        }

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(ListenerHandle {
                running: Arc::clone(&self.running),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(HookError::EventTapCreation),
        }
    }

    #[cfg(not(target_os = "macos"))]
    pub fn start(&self) -> Result<ListenerHandle, HookError> {
        tracing::warn!("no global key hook available on this platform");
        Err(HookError::Unsupported)
    }
}

#[cfg(target_os = "macos")]
mod tap {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
    use core_graphics::event::{
        CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
        CGEventTapPlacement, CGEventType, EventField,
    };
    use tracing::{debug, info, warn};

    use super::HookError;
    use crate::events::{KeyCode, RawKeyEvent};
    use crate::hotkey::modifiers::{modifier_flag, KeyTransition, ModifierFlag, ModifierTracker};
    use crate::hotkey::router::KeyEventRouter;

    /// What the tap callback hands to the run loop
    enum RawMessage {
        Down(KeyCode, u64),
        Up(KeyCode, u64),
        FlagsChanged(KeyCode, CGEventFlags),
    }

    fn flag_mask(flag: ModifierFlag) -> CGEventFlags {
        match flag {
            ModifierFlag::Control => CGEventFlags::CGEventFlagControl,
            ModifierFlag::Option => CGEventFlags::CGEventFlagAlternate,
            ModifierFlag::Shift => CGEventFlags::CGEventFlagShift,
            ModifierFlag::Command => CGEventFlags::CGEventFlagCommand,
            ModifierFlag::Function => CGEventFlags::CGEventFlagSecondaryFn,
            ModifierFlag::CapsLock => CGEventFlags::CGEventFlagAlphaShift,
        }
    }

    /// Run the CFRunLoop with the event tap until `running` is cleared
    pub(super) fn run_event_loop(
        router: KeyEventRouter,
        running: Arc<AtomicBool>,
        ready_tx: mpsc::Sender<Result<(), HookError>>,
    ) -> Result<(), HookError> {
        let mut modifiers = ModifierTracker::new();

        let (callback_tx, callback_rx) = mpsc::channel::<RawMessage>();

        // CGEventTap callback - must be fast and non-blocking
        let callback = move |_proxy: core_graphics::event::CGEventTapProxy,
                             event_type: CGEventType,
                             event: &CGEvent|
              -> Option<CGEvent> {
            let code =
                KeyCode(event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u32);
            let flags = event.get_flags();

            match event_type {
                CGEventType::KeyDown => {
                    let autorepeat =
                        event.get_integer_value_field(EventField::KEYBOARD_EVENT_AUTOREPEAT) != 0;
                    if !autorepeat {
                        let _ = callback_tx.send(RawMessage::Down(code, flags.bits()));
                    }
                }
                CGEventType::KeyUp => {
                    let _ = callback_tx.send(RawMessage::Up(code, flags.bits()));
                }
                CGEventType::FlagsChanged => {
                    let _ = callback_tx.send(RawMessage::FlagsChanged(code, flags));
                }
                CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                    warn!("event tap disabled by the system");
                }
                _ => {}
            }
            Some(event.clone())
        };

        let tap = CGEventTap::new(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::ListenOnly,
            vec![
                CGEventType::KeyDown,
                CGEventType::KeyUp,
                CGEventType::FlagsChanged,
            ],
            callback,
        )
        .map_err(|_| HookError::EventTapCreation)?;

        tap.enable();

        let run_loop_source = tap
            .mach_port
            .create_runloop_source(0)
            .map_err(|_| HookError::EventTapCreation)?;
        let run_loop = CFRunLoop::get_current();

        unsafe {
            run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
        }

        info!("event tap created and enabled");
        let _ = ready_tx.send(Ok(()));

        while running.load(Ordering::SeqCst) {
            unsafe {
                CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
            }

            while let Ok(message) = callback_rx.try_recv() {
                match message {
                    RawMessage::Down(code, flags) => {
                        router.raw_key_down(code, RawKeyEvent::new(flags));
                    }
                    RawMessage::Up(code, flags) => {
                        router.raw_key_up(code, RawKeyEvent::new(flags));
                    }
                    RawMessage::FlagsChanged(code, flags) => {
                        let Some(flag) = modifier_flag(code) else {
                            continue;
                        };
                        let flag_set = flags.contains(flag_mask(flag));
                        for transition in modifiers.transition(code, flag_set) {
                            debug!(%code, ?transition, "modifier changed");
                            let event = RawKeyEvent::new(flags.bits());
                            match transition {
                                KeyTransition::Down => router.raw_key_down(code, event),
                                KeyTransition::Up => router.raw_key_up(code, event),
                            }
                        }
                    }
                }
            }
        }

        // Tap is removed when it goes out of scope
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_listener_creation() {
        let router = KeyEventRouter::with_hold_threshold(Duration::from_millis(100)).unwrap();
        let listener = HotkeyListener::new(router);
        assert!(!listener.is_running());
    }

    #[test]
    fn test_handle_release_stops_listener() {
        let running = Arc::new(AtomicBool::new(true));
        let mut handle = ListenerHandle {
            running: Arc::clone(&running),
        };

        handle.release();
        assert!(!running.load(Ordering::SeqCst));
        handle.release();
        assert!(!running.load(Ordering::SeqCst));
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_start_unsupported_off_macos() {
        let router = KeyEventRouter::with_hold_threshold(Duration::from_millis(100)).unwrap();
        let listener = HotkeyListener::new(router);
        assert!(matches!(listener.start(), Err(HookError::Unsupported)));
        assert!(!listener.is_running());
    }
}
