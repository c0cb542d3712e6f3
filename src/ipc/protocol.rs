//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.
//! Responses answer requests in order; notifications may be interleaved
//! between them once a client holds a subscription.

use serde::{Deserialize, Serialize};

use crate::events::{KeyCode, KeyNotification};
use crate::hotkey::ChordRepeat;

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Identifies one subscription held by a client
pub type SubscriptionId = u64;

/// Requests from a client to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Replay a key combination into the focused application
    EmulateKeys {
        keys: Vec<String>,
        #[serde(default)]
        delay_ms: u64,
    },

    /// PRESS and RELEASE of one key
    SubscribeKey { key: String },

    /// HOLD of one key
    SubscribeHold { key: String },

    /// Events while all keys of a chord are down, as often as the
    /// daemon's chord repeat policy allows
    SubscribeChord { keys: Vec<String> },

    Unsubscribe { subscription: SubscriptionId },
}

/// Responses from daemon to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Emulation accepted; it runs after the requested delay
    EmulationScheduled,

    Subscribed { subscription: SubscriptionId },

    Unsubscribed { subscription: SubscriptionId },

    /// Error response
    Error { code: ErrorCode, message: String },
}

impl Response {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

/// Machine-readable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    UnknownKey,
    EmptyChord,
    EmptySequence,
    UnknownSubscription,
    EmulationUnavailable,
}

/// Push notification from daemon to a subscribed client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A subscribed key, hold or chord fired
    KeyEvent {
        subscription: SubscriptionId,
        event: KeyNotification,
    },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Whether the global key hook is installed
    pub hook_attached: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,

    pub pressed_keys: Vec<KeyCode>,

    /// Active key, hold and chord subscriptions
    pub subscriptions: usize,

    pub chord_repeat: ChordRepeat,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            hook_attached: false,
            uptime_secs: 0,
            pressed_keys: Vec::new(),
            subscriptions: 0,
            chord_repeat: ChordRepeat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{KeyOperation, RawKeyEvent};

    #[test]
    fn test_request_serialization() {
        let req = Request::SubscribeChord {
            keys: vec!["CTRL".into(), "SPACE".into()],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"subscribe_chord\""));
        assert!(json.contains("SPACE"));
    }

    #[test]
    fn test_emulate_delay_defaults_to_zero() {
        let req: Request = serde_json::from_str(r#"{"type":"emulate_keys","keys":["CTRL","V"]}"#).unwrap();
        assert_eq!(
            req,
            Request::EmulateKeys {
                keys: vec!["CTRL".into(), "V".into()],
                delay_ms: 0,
            }
        );
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"chord_repeat\":\"every_event\""));

        let err = serde_json::to_value(Response::error(ErrorCode::UnknownKey, "no such key: FOO")).unwrap();
        assert_eq!(err["code"], "unknown_key");
    }

    #[test]
    fn test_notification_carries_event() {
        let note = Notification::KeyEvent {
            subscription: 7,
            event: KeyNotification::new(KeyCode(0x31), KeyOperation::Hold, &RawKeyEvent::new(0)),
        };
        let value = serde_json::to_value(&note).unwrap();
        assert_eq!(value["type"], "key_event");
        assert_eq!(value["subscription"], 7);
        assert_eq!(value["event"]["operation"], "hold");
        assert_eq!(value["event"]["code"], 0x31);
    }
}
