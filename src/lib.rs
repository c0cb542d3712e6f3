//! keyplex: global keyboard input for desktop features
//!
//! - [`hotkey`]: PRESS / HOLD / RELEASE classification and key, hold and
//!   chord subscriptions on top of a global key hook
//! - [`emulator`]: replaying key combinations into the focused application
//! - [`ipc`]: the daemon's Unix socket protocol

pub mod config;
pub mod emulator;
pub mod events;
pub mod hotkey;
pub mod ipc;
pub mod lifecycle;
pub mod observer;
