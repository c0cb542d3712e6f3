//! Key event types shared by the router, the multiplexer and the IPC layer
//!
//! Key codes are assigned by the hook source; this crate only compares them.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Platform key code as delivered by the hook source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyCode(pub u32);

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

impl From<u32> for KeyCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

/// Classified lifecycle step of a single key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOperation {
    /// Key went down
    Press,
    /// Key stayed down past the hold threshold (at most once per press)
    Hold,
    /// Key went up
    Release,
}

impl fmt::Display for KeyOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyOperation::Press => write!(f, "PRESS"),
            KeyOperation::Hold => write!(f, "HOLD"),
            KeyOperation::Release => write!(f, "RELEASE"),
        }
    }
}

/// Raw payload that came with a hook notification
///
/// Passed through to observers untouched. The router keeps the PRESS
/// payload around so the later HOLD carries the same event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawKeyEvent {
    /// Platform modifier flags at the time of the event
    pub flags: u64,
    /// When the hook delivered the event
    pub received_at: Instant,
}

impl RawKeyEvent {
    pub fn new(flags: u64) -> Self {
        Self {
            flags,
            received_at: Instant::now(),
        }
    }
}

impl Default for RawKeyEvent {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A classified key event as handed across a channel boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyNotification {
    pub code: KeyCode,
    pub operation: KeyOperation,
    pub flags: u64,
}

impl KeyNotification {
    pub fn new(code: KeyCode, operation: KeyOperation, event: &RawKeyEvent) -> Self {
        Self {
            code,
            operation,
            flags: event.flags,
        }
    }
}

impl fmt::Display for KeyNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation, self.code)
    }
}
