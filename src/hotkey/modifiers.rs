//! Modifier key down/up tracking
//!
//! macOS reports modifier keys as flag changes rather than key-down /
//! key-up. Left and right variants share one flag, so the tracker keeps the
//! set of physically held modifier codes to tell a press from a release.

use std::collections::HashSet;

use super::keys::vk;
use crate::events::KeyCode;

/// Modifier flag a key code drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierFlag {
    Control,
    Option,
    Shift,
    Command,
    Function,
    /// Toggles on press; there is no separate release
    CapsLock,
}

/// Which modifier flag a key code belongs to, if any
pub fn modifier_flag(code: KeyCode) -> Option<ModifierFlag> {
    match code {
        vk::CONTROL | vk::RIGHT_CONTROL => Some(ModifierFlag::Control),
        vk::OPTION | vk::RIGHT_OPTION => Some(ModifierFlag::Option),
        vk::SHIFT | vk::RIGHT_SHIFT => Some(ModifierFlag::Shift),
        vk::COMMAND | vk::RIGHT_COMMAND => Some(ModifierFlag::Command),
        vk::FUNCTION => Some(ModifierFlag::Function),
        vk::CAPS_LOCK => Some(ModifierFlag::CapsLock),
        _ => None,
    }
}

/// Raw direction derived from a flag change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransition {
    Down,
    Up,
}

const DOWN: &[KeyTransition] = &[KeyTransition::Down];
const UP: &[KeyTransition] = &[KeyTransition::Up];
const TAP: &[KeyTransition] = &[KeyTransition::Down, KeyTransition::Up];

/// Tracks which modifier keys are physically held
#[derive(Debug, Default)]
pub struct ModifierTracker {
    held: HashSet<KeyCode>,
}

impl ModifierTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate a flag change for `code` into raw transitions.
    ///
    /// `flag_set` is whether the modifier's flag is set after the change.
    /// Returns nothing for codes that are not modifiers.
    pub fn transition(&mut self, code: KeyCode, flag_set: bool) -> &'static [KeyTransition] {
        let Some(flag) = modifier_flag(code) else {
            return &[];
        };

        if flag == ModifierFlag::CapsLock {
            return TAP;
        }

        if !flag_set {
            self.held.remove(&code);
            return UP;
        }

        // Flag still set: either this key went down, or it went up while
        // its left/right twin keeps the flag raised
        if self.held.remove(&code) {
            UP
        } else {
            self.held.insert(code);
            DOWN
        }
    }

    pub fn is_held(&self, code: KeyCode) -> bool {
        self.held.contains(&code)
    }

    /// Check if all modifiers are released
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_and_release() {
        let mut tracker = ModifierTracker::new();

        assert_eq!(tracker.transition(vk::CONTROL, true), DOWN);
        assert!(tracker.is_held(vk::CONTROL));
        assert_eq!(tracker.transition(vk::CONTROL, false), UP);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_twin_release_while_other_side_held() {
        let mut tracker = ModifierTracker::new();

        assert_eq!(tracker.transition(vk::SHIFT, true), DOWN);
        assert_eq!(tracker.transition(vk::RIGHT_SHIFT, true), DOWN);
        // Left shift up, flag stays set because right shift is down
        assert_eq!(tracker.transition(vk::SHIFT, true), UP);
        assert!(tracker.is_held(vk::RIGHT_SHIFT));
        assert_eq!(tracker.transition(vk::RIGHT_SHIFT, false), UP);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_caps_lock_is_a_tap() {
        let mut tracker = ModifierTracker::new();
        assert_eq!(tracker.transition(vk::CAPS_LOCK, true), TAP);
        assert_eq!(tracker.transition(vk::CAPS_LOCK, false), TAP);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_non_modifier_ignored() {
        let mut tracker = ModifierTracker::new();
        assert!(tracker.transition(vk::A, true).is_empty());
        assert_eq!(modifier_flag(vk::A), None);
        assert_eq!(modifier_flag(vk::RIGHT_COMMAND), Some(ModifierFlag::Command));
    }
}
