//! Key-name table
//!
//! Maps the canonical uppercase names used by stored shortcut definitions
//! to macOS virtual key codes, split into modifiers and normal keys. Keys
//! without a dedicated Mac key use the key in the same position on an
//! extended keyboard (INSERT is Help, PRINTSCREEN/SCROLLLOCK/PAUSE are
//! F13/F14/F15, NUMLOCK is keypad Clear).

use crate::events::KeyCode;

/// macOS virtual key codes (`kVK_*`)
pub mod vk {
    use crate::events::KeyCode;

    pub const A: KeyCode = KeyCode(0x00);
    pub const S: KeyCode = KeyCode(0x01);
    pub const D: KeyCode = KeyCode(0x02);
    pub const F: KeyCode = KeyCode(0x03);
    pub const H: KeyCode = KeyCode(0x04);
    pub const G: KeyCode = KeyCode(0x05);
    pub const Z: KeyCode = KeyCode(0x06);
    pub const X: KeyCode = KeyCode(0x07);
    pub const C: KeyCode = KeyCode(0x08);
    pub const V: KeyCode = KeyCode(0x09);
    pub const B: KeyCode = KeyCode(0x0B);
    pub const Q: KeyCode = KeyCode(0x0C);
    pub const W: KeyCode = KeyCode(0x0D);
    pub const E: KeyCode = KeyCode(0x0E);
    pub const R: KeyCode = KeyCode(0x0F);
    pub const Y: KeyCode = KeyCode(0x10);
    pub const T: KeyCode = KeyCode(0x11);
    pub const DIGIT_1: KeyCode = KeyCode(0x12);
    pub const DIGIT_2: KeyCode = KeyCode(0x13);
    pub const DIGIT_3: KeyCode = KeyCode(0x14);
    pub const DIGIT_4: KeyCode = KeyCode(0x15);
    pub const DIGIT_6: KeyCode = KeyCode(0x16);
    pub const DIGIT_5: KeyCode = KeyCode(0x17);
    pub const EQUAL: KeyCode = KeyCode(0x18);
    pub const DIGIT_9: KeyCode = KeyCode(0x19);
    pub const DIGIT_7: KeyCode = KeyCode(0x1A);
    pub const MINUS: KeyCode = KeyCode(0x1B);
    pub const DIGIT_8: KeyCode = KeyCode(0x1C);
    pub const DIGIT_0: KeyCode = KeyCode(0x1D);
    pub const RIGHT_BRACKET: KeyCode = KeyCode(0x1E);
    pub const O: KeyCode = KeyCode(0x1F);
    pub const U: KeyCode = KeyCode(0x20);
    pub const LEFT_BRACKET: KeyCode = KeyCode(0x21);
    pub const I: KeyCode = KeyCode(0x22);
    pub const P: KeyCode = KeyCode(0x23);
    pub const RETURN: KeyCode = KeyCode(0x24);
    pub const L: KeyCode = KeyCode(0x25);
    pub const J: KeyCode = KeyCode(0x26);
    pub const QUOTE: KeyCode = KeyCode(0x27);
    pub const K: KeyCode = KeyCode(0x28);
    pub const SEMICOLON: KeyCode = KeyCode(0x29);
    pub const BACKSLASH: KeyCode = KeyCode(0x2A);
    pub const COMMA: KeyCode = KeyCode(0x2B);
    pub const SLASH: KeyCode = KeyCode(0x2C);
    pub const N: KeyCode = KeyCode(0x2D);
    pub const M: KeyCode = KeyCode(0x2E);
    pub const PERIOD: KeyCode = KeyCode(0x2F);
    pub const TAB: KeyCode = KeyCode(0x30);
    pub const SPACE: KeyCode = KeyCode(0x31);
    pub const GRAVE: KeyCode = KeyCode(0x32);
    pub const DELETE: KeyCode = KeyCode(0x33);
    pub const ESCAPE: KeyCode = KeyCode(0x35);
    pub const RIGHT_COMMAND: KeyCode = KeyCode(0x36);
    pub const COMMAND: KeyCode = KeyCode(0x37);
    pub const SHIFT: KeyCode = KeyCode(0x38);
    pub const CAPS_LOCK: KeyCode = KeyCode(0x39);
    pub const OPTION: KeyCode = KeyCode(0x3A);
    pub const CONTROL: KeyCode = KeyCode(0x3B);
    pub const RIGHT_SHIFT: KeyCode = KeyCode(0x3C);
    pub const RIGHT_OPTION: KeyCode = KeyCode(0x3D);
    pub const RIGHT_CONTROL: KeyCode = KeyCode(0x3E);
    pub const FUNCTION: KeyCode = KeyCode(0x3F);
    pub const KEYPAD_DECIMAL: KeyCode = KeyCode(0x41);
    pub const KEYPAD_MULTIPLY: KeyCode = KeyCode(0x43);
    pub const KEYPAD_PLUS: KeyCode = KeyCode(0x45);
    pub const KEYPAD_CLEAR: KeyCode = KeyCode(0x47);
    pub const KEYPAD_DIVIDE: KeyCode = KeyCode(0x4B);
    pub const KEYPAD_MINUS: KeyCode = KeyCode(0x4E);
    pub const KEYPAD_0: KeyCode = KeyCode(0x52);
    pub const KEYPAD_1: KeyCode = KeyCode(0x53);
    pub const KEYPAD_2: KeyCode = KeyCode(0x54);
    pub const KEYPAD_3: KeyCode = KeyCode(0x55);
    pub const KEYPAD_4: KeyCode = KeyCode(0x56);
    pub const KEYPAD_5: KeyCode = KeyCode(0x57);
    pub const KEYPAD_6: KeyCode = KeyCode(0x58);
    pub const KEYPAD_7: KeyCode = KeyCode(0x59);
    pub const KEYPAD_8: KeyCode = KeyCode(0x5B);
    pub const KEYPAD_9: KeyCode = KeyCode(0x5C);
    pub const KEYPAD_COMMA: KeyCode = KeyCode(0x5F);
    pub const F5: KeyCode = KeyCode(0x60);
    pub const F6: KeyCode = KeyCode(0x61);
    pub const F7: KeyCode = KeyCode(0x62);
    pub const F3: KeyCode = KeyCode(0x63);
    pub const F8: KeyCode = KeyCode(0x64);
    pub const F9: KeyCode = KeyCode(0x65);
    pub const F11: KeyCode = KeyCode(0x67);
    pub const F13: KeyCode = KeyCode(0x69);
    pub const F14: KeyCode = KeyCode(0x6B);
    pub const F10: KeyCode = KeyCode(0x6D);
    pub const CONTEXT_MENU: KeyCode = KeyCode(0x6E);
    pub const F12: KeyCode = KeyCode(0x6F);
    pub const F15: KeyCode = KeyCode(0x71);
    pub const HELP: KeyCode = KeyCode(0x72);
    pub const HOME: KeyCode = KeyCode(0x73);
    pub const PAGE_UP: KeyCode = KeyCode(0x74);
    pub const FORWARD_DELETE: KeyCode = KeyCode(0x75);
    pub const F4: KeyCode = KeyCode(0x76);
    pub const END: KeyCode = KeyCode(0x77);
    pub const F2: KeyCode = KeyCode(0x78);
    pub const PAGE_DOWN: KeyCode = KeyCode(0x79);
    pub const F1: KeyCode = KeyCode(0x7A);
    pub const LEFT_ARROW: KeyCode = KeyCode(0x7B);
    pub const RIGHT_ARROW: KeyCode = KeyCode(0x7C);
    pub const DOWN_ARROW: KeyCode = KeyCode(0x7D);
    pub const UP_ARROW: KeyCode = KeyCode(0x7E);
}

/// Whether a key is combined with others or typed on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    Modifier,
    Normal,
}

/// One entry of the key-name table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    pub name: &'static str,
    pub code: KeyCode,
    pub class: KeyClass,
}

impl KeySpec {
    pub fn is_modifier(&self) -> bool {
        self.class == KeyClass::Modifier
    }
}

const fn modifier(name: &'static str, code: KeyCode) -> KeySpec {
    KeySpec {
        name,
        code,
        class: KeyClass::Modifier,
    }
}

const fn key(name: &'static str, code: KeyCode) -> KeySpec {
    KeySpec {
        name,
        code,
        class: KeyClass::Normal,
    }
}

/// Every recognised key name. Aliases share a code; the first name listed
/// for a code is its canonical name.
pub static KEY_TABLE: &[KeySpec] = &[
    // Modifiers
    modifier("CTRL", vk::CONTROL),
    modifier("ALT", vk::OPTION),
    modifier("ALTGR", vk::RIGHT_OPTION),
    modifier("SHIFT", vk::SHIFT),
    modifier("WIN", vk::COMMAND),
    modifier("META", vk::RIGHT_COMMAND),
    // Letters
    key("A", vk::A),
    key("B", vk::B),
    key("C", vk::C),
    key("D", vk::D),
    key("E", vk::E),
    key("F", vk::F),
    key("G", vk::G),
    key("H", vk::H),
    key("I", vk::I),
    key("J", vk::J),
    key("K", vk::K),
    key("L", vk::L),
    key("M", vk::M),
    key("N", vk::N),
    key("O", vk::O),
    key("P", vk::P),
    key("Q", vk::Q),
    key("R", vk::R),
    key("S", vk::S),
    key("T", vk::T),
    key("U", vk::U),
    key("V", vk::V),
    key("W", vk::W),
    key("X", vk::X),
    key("Y", vk::Y),
    key("Z", vk::Z),
    // Digits
    key("0", vk::DIGIT_0),
    key("1", vk::DIGIT_1),
    key("2", vk::DIGIT_2),
    key("3", vk::DIGIT_3),
    key("4", vk::DIGIT_4),
    key("5", vk::DIGIT_5),
    key("6", vk::DIGIT_6),
    key("7", vk::DIGIT_7),
    key("8", vk::DIGIT_8),
    key("9", vk::DIGIT_9),
    // Function keys
    key("F1", vk::F1),
    key("F2", vk::F2),
    key("F3", vk::F3),
    key("F4", vk::F4),
    key("F5", vk::F5),
    key("F6", vk::F6),
    key("F7", vk::F7),
    key("F8", vk::F8),
    key("F9", vk::F9),
    key("F10", vk::F10),
    key("F11", vk::F11),
    key("F12", vk::F12),
    // Navigation
    key("UP", vk::UP_ARROW),
    key("DOWN", vk::DOWN_ARROW),
    key("LEFT", vk::LEFT_ARROW),
    key("RIGHT", vk::RIGHT_ARROW),
    key("HOME", vk::HOME),
    key("END", vk::END),
    key("PAGEUP", vk::PAGE_UP),
    key("PAGEDOWN", vk::PAGE_DOWN),
    key("INSERT", vk::HELP),
    key("DELETE", vk::FORWARD_DELETE),
    // Editing
    key("SPACE", vk::SPACE),
    key("ENTER", vk::RETURN),
    key("TAB", vk::TAB),
    key("ESC", vk::ESCAPE),
    key("BACKSPACE", vk::DELETE),
    // Lock and system
    key("CAPSLOCK", vk::CAPS_LOCK),
    key("SCROLLLOCK", vk::F14),
    key("NUMLOCK", vk::KEYPAD_CLEAR),
    key("PAUSE", vk::F15),
    key("PRINTSCREEN", vk::F13),
    key("CONTEXTMENU", vk::CONTEXT_MENU),
    // Punctuation, symbol and name
    key("-", vk::MINUS),
    key("MINUS", vk::MINUS),
    key("=", vk::EQUAL),
    key("EQUALS", vk::EQUAL),
    key("[", vk::LEFT_BRACKET),
    key("OPENBRACKET", vk::LEFT_BRACKET),
    key("]", vk::RIGHT_BRACKET),
    key("CLOSEBRACKET", vk::RIGHT_BRACKET),
    key("\\", vk::BACKSLASH),
    key("BACKSLASH", vk::BACKSLASH),
    key(";", vk::SEMICOLON),
    key("SEMICOLON", vk::SEMICOLON),
    key("'", vk::QUOTE),
    key("QUOTE", vk::QUOTE),
    key(",", vk::COMMA),
    key("COMMA", vk::COMMA),
    key(".", vk::PERIOD),
    key("PERIOD", vk::PERIOD),
    key("/", vk::SLASH),
    key("SLASH", vk::SLASH),
    key("`", vk::GRAVE),
    key("BACKQUOTE", vk::GRAVE),
    // Numeric pad
    key("NUMPAD0", vk::KEYPAD_0),
    key("NUMPAD1", vk::KEYPAD_1),
    key("NUMPAD2", vk::KEYPAD_2),
    key("NUMPAD3", vk::KEYPAD_3),
    key("NUMPAD4", vk::KEYPAD_4),
    key("NUMPAD5", vk::KEYPAD_5),
    key("NUMPAD6", vk::KEYPAD_6),
    key("NUMPAD7", vk::KEYPAD_7),
    key("NUMPAD8", vk::KEYPAD_8),
    key("NUMPAD9", vk::KEYPAD_9),
    key("NUM_ADD", vk::KEYPAD_PLUS),
    key("ADD", vk::KEYPAD_PLUS),
    key("NUM_SUBTRACT", vk::KEYPAD_MINUS),
    key("SUBTRACT", vk::KEYPAD_MINUS),
    key("NUM_MULTIPLY", vk::KEYPAD_MULTIPLY),
    key("MULTIPLY", vk::KEYPAD_MULTIPLY),
    key("NUM_DIVIDE", vk::KEYPAD_DIVIDE),
    key("DIVIDE", vk::KEYPAD_DIVIDE),
    key("NUM_DECIMAL", vk::KEYPAD_DECIMAL),
    key("DECIMAL", vk::KEYPAD_DECIMAL),
    key("NUM_SEPARATOR", vk::KEYPAD_COMMA),
    key("SEPARATOR", vk::KEYPAD_COMMA),
];

/// Look up a key name, ignoring case and surrounding whitespace
pub fn lookup(name: &str) -> Option<&'static KeySpec> {
    let name = name.trim();
    KEY_TABLE
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}

/// Canonical name for a code, if the table knows it
pub fn name_of(code: KeyCode) -> Option<&'static str> {
    KEY_TABLE
        .iter()
        .find(|spec| spec.code == code)
        .map(|spec| spec.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(lookup("ctrl").unwrap().code, vk::CONTROL);
        assert_eq!(lookup(" v ").unwrap().code, vk::V);
        assert_eq!(lookup("PageUp").unwrap().code, vk::PAGE_UP);
        assert!(lookup("UNKNOWNKEY").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn test_modifier_partition() {
        let modifiers: Vec<&str> = KEY_TABLE
            .iter()
            .filter(|s| s.is_modifier())
            .map(|s| s.name)
            .collect();
        assert_eq!(modifiers, vec!["CTRL", "ALT", "ALTGR", "SHIFT", "WIN", "META"]);
        assert!(lookup("shift").unwrap().is_modifier());
        assert!(!lookup("A").unwrap().is_modifier());
        assert!(!lookup("CAPSLOCK").unwrap().is_modifier());
    }

    #[test]
    fn test_punctuation_aliases_share_codes() {
        let pairs = [
            ("-", "MINUS"),
            ("=", "EQUALS"),
            ("[", "OPENBRACKET"),
            ("]", "CLOSEBRACKET"),
            ("\\", "BACKSLASH"),
            (";", "SEMICOLON"),
            ("'", "QUOTE"),
            (",", "COMMA"),
            (".", "PERIOD"),
            ("/", "SLASH"),
            ("`", "BACKQUOTE"),
        ];
        for (symbol, name) in pairs {
            assert_eq!(lookup(symbol).unwrap().code, lookup(name).unwrap().code, "{name}");
        }
    }

    #[test]
    fn test_numpad_with_and_without_prefix() {
        for op in ["ADD", "SUBTRACT", "MULTIPLY", "DIVIDE", "DECIMAL", "SEPARATOR"] {
            let prefixed = format!("NUM_{op}");
            assert_eq!(lookup(op).unwrap().code, lookup(&prefixed).unwrap().code, "{op}");
        }
        for digit in 0..10 {
            assert!(lookup(&format!("NUMPAD{digit}")).is_some());
        }
    }

    #[test]
    fn test_full_ranges_present() {
        for c in 'A'..='Z' {
            assert!(lookup(&c.to_string()).is_some(), "{c}");
        }
        for d in 0..10 {
            assert!(lookup(&d.to_string()).is_some(), "{d}");
        }
        for f in 1..=12 {
            assert!(lookup(&format!("F{f}")).is_some(), "F{f}");
        }
    }

    #[test]
    fn test_names_unique_and_codes_distinct_per_canonical_key() {
        let names: HashSet<&str> = KEY_TABLE.iter().map(|s| s.name).collect();
        assert_eq!(names.len(), KEY_TABLE.len());

        let letters: HashSet<KeyCode> = ('A'..='Z')
            .map(|c| lookup(&c.to_string()).unwrap().code)
            .collect();
        assert_eq!(letters.len(), 26);
    }

    #[test]
    fn test_name_of_returns_canonical_name() {
        assert_eq!(name_of(vk::MINUS), Some("-"));
        assert_eq!(name_of(vk::CONTROL), Some("CTRL"));
        assert_eq!(name_of(KeyCode(0xFFFF)), None);
    }
}
