//! Key encoding for terminal input
//!
//! Converts named keys, key chords and crossterm key events to the byte
//! sequences a terminal application expects, and computes the compound
//! word-delete operation.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::core::term::TerminalModes;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// A key the encoder knows how to send
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    Backspace,
    Tab,
    Enter,
    Escape,
    F(u8),
    BracketedPasteStart,
    BracketedPasteEnd,
}

impl Key {
    /// Look up a key by name (`"up"`, `"f5"`, `"space"`, `"a"`, ...)
    pub fn from_name(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            return Some(Key::Char(ch));
        }

        let key = match name.to_ascii_lowercase().as_str() {
            "up" => Key::Up,
            "down" => Key::Down,
            "left" => Key::Left,
            "right" => Key::Right,
            "home" => Key::Home,
            "end" => Key::End,
            "pageup" | "page_up" => Key::PageUp,
            "pagedown" | "page_down" => Key::PageDown,
            "insert" => Key::Insert,
            "delete" => Key::Delete,
            "backspace" => Key::Backspace,
            "tab" => Key::Tab,
            "enter" => Key::Enter,
            "escape" | "esc" => Key::Escape,
            "space" => Key::Char(' '),
            "bracketed_paste_mode_start" => Key::BracketedPasteStart,
            "bracketed_paste_mode_end" => Key::BracketedPasteEnd,
            other => {
                let n = other.strip_prefix('f')?.parse::<u8>().ok()?;
                if !(1..=12).contains(&n) {
                    return None;
                }
                Key::F(n)
            }
        };
        Some(key)
    }

    /// Convert a crossterm key code
    pub fn from_code(code: KeyCode) -> Option<Self> {
        let key = match code {
            KeyCode::Char(ch) => Key::Char(ch),
            KeyCode::Enter => Key::Enter,
            KeyCode::Backspace => Key::Backspace,
            KeyCode::Tab | KeyCode::BackTab => Key::Tab,
            KeyCode::Esc => Key::Escape,
            KeyCode::Up => Key::Up,
            KeyCode::Down => Key::Down,
            KeyCode::Right => Key::Right,
            KeyCode::Left => Key::Left,
            KeyCode::Home => Key::Home,
            KeyCode::End => Key::End,
            KeyCode::PageUp => Key::PageUp,
            KeyCode::PageDown => Key::PageDown,
            KeyCode::Insert => Key::Insert,
            KeyCode::Delete => Key::Delete,
            KeyCode::F(n) => Key::F(n),
            _ => return None,
        };
        Some(key)
    }
}

/// A key plus modifiers, e.g. `ctrl+shift+c`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyChord {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyChord {
    /// Parse `mod+mod+key`. A lone `+` is the plus key.
    pub fn parse(chord: &str) -> Option<Self> {
        let (mods_part, key_part) = match chord.rfind('+') {
            Some(pos) if pos + 1 < chord.len() => (&chord[..pos], &chord[pos + 1..]),
            Some(pos) if pos > 0 => (&chord[..pos - 1], "+"),
            _ => ("", chord),
        };

        let mut modifiers = Modifiers::empty();
        for part in mods_part.split('+').filter(|p| !p.is_empty()) {
            modifiers |= match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => Modifiers::CTRL,
                "alt" | "meta" => Modifiers::ALT,
                "shift" => Modifiers::SHIFT,
                _ => return None,
            };
        }

        Some(Self {
            key: Key::from_name(key_part)?,
            modifiers,
        })
    }
}

/// Direction of a word delete
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WordDirection {
    Backward,
    Forward,
}

/// Key encoder for converting keys to bytes
pub struct KeyEncoder;

impl KeyEncoder {
    /// Encode a named key. Unknown names encode to nothing.
    pub fn encode(name: &str, mods: Modifiers, modes: &TerminalModes) -> Vec<u8> {
        match Key::from_name(name) {
            Some(key) => Self::encode_key(key, mods, modes),
            None => {
                tracing::debug!("Unknown key name: {}", name);
                Vec::new()
            }
        }
    }

    /// Encode a crossterm KeyEvent
    pub fn encode_event(event: &KeyEvent, modes: &TerminalModes) -> Vec<u8> {
        let mut mods = Modifiers::from(event.modifiers);
        if event.code == KeyCode::BackTab {
            mods |= Modifiers::SHIFT;
        }
        match Key::from_code(event.code) {
            Some(key) => Self::encode_key(key, mods, modes),
            None => Vec::new(),
        }
    }

    pub fn encode_key(key: Key, mods: Modifiers, modes: &TerminalModes) -> Vec<u8> {
        match key {
            // Character keys
            Key::Char(ch) => Self::map_char(ch, mods),

            Key::Enter => {
                if modes.linefeed_newline {
                    vec![0x0D, 0x0A]
                } else {
                    vec![0x0D]
                }
            }

            Key::Backspace => {
                if mods.contains(Modifiers::ALT) {
                    vec![0x1B, 0x7F]
                } else if mods.contains(Modifiers::CTRL) {
                    vec![0x08]
                } else {
                    vec![0x7F]
                }
            }

            Key::Tab => {
                if mods.contains(Modifiers::SHIFT) {
                    b"\x1b[Z".to_vec()
                } else {
                    vec![0x09]
                }
            }

            Key::Escape => vec![0x1B],

            // Arrow keys
            Key::Up => Self::cursor_key(b'A', mods, modes),
            Key::Down => Self::cursor_key(b'B', mods, modes),
            Key::Right => Self::cursor_key(b'C', mods, modes),
            Key::Left => Self::cursor_key(b'D', mods, modes),

            // Navigation keys
            Key::Home => Self::cursor_key(b'H', mods, modes),
            Key::End => Self::cursor_key(b'F', mods, modes),
            Key::PageUp => Self::tilde_key(5, mods),
            Key::PageDown => Self::tilde_key(6, mods),
            Key::Insert => Self::tilde_key(2, mods),
            Key::Delete => Self::tilde_key(3, mods),

            // Function keys
            Key::F(n) => Self::function_key(n, mods),

            Key::BracketedPasteStart => b"\x1b[200~".to_vec(),
            Key::BracketedPasteEnd => b"\x1b[201~".to_vec(),
        }
    }

    /// The bytes deleting one word in `direction`: repeated backspace or
    /// delete, enough to cover the word next to the cursor
    pub fn delete_word(line: &str, cursor: usize, direction: WordDirection) -> Vec<u8> {
        let count = word_delete_count(line, cursor, direction);
        let key = match direction {
            WordDirection::Backward => Key::Backspace,
            WordDirection::Forward => Key::Delete,
        };
        Self::encode_key(key, Modifiers::empty(), &TerminalModes::default()).repeat(count)
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        // Ctrl + letter = control character
        if mods.contains(Modifiers::CTRL) && !mods.contains(Modifiers::ALT) {
            if let Some(code) = Self::control_code(ch) {
                return vec![code];
            }
        }

        // Ctrl + Alt + key = ESC + control character
        if mods.contains(Modifiers::CTRL) && mods.contains(Modifiers::ALT) {
            if let Some(code) = Self::control_code(ch) {
                return vec![0x1B, code];
            }
        }

        let ch = if mods.contains(Modifiers::SHIFT) && ch.is_ascii_lowercase() {
            ch.to_ascii_uppercase()
        } else {
            ch
        };

        // Alt + key = ESC + key
        let mut bytes = Vec::with_capacity(5);
        if mods.contains(Modifiers::ALT) {
            bytes.push(0x1B);
        }
        let mut buf = [0u8; 4];
        bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        bytes
    }

    fn control_code(ch: char) -> Option<u8> {
        if ch.is_ascii_alphabetic() {
            return Some((ch.to_ascii_lowercase() as u8) - b'a' + 1);
        }
        match ch {
            '@' | '`' | ' ' | '2' => Some(0x00),
            '[' | '3' => Some(0x1B),
            '\\' | '4' => Some(0x1C),
            ']' | '5' => Some(0x1D),
            '^' | '~' | '6' => Some(0x1E),
            '_' | '?' | '7' => Some(0x1F),
            _ => None,
        }
    }

    /// Arrow/Home/End sequence
    fn cursor_key(key: u8, mods: Modifiers, modes: &TerminalModes) -> Vec<u8> {
        if !mods.is_empty() {
            // With modifiers: ESC [ 1 ; <mod> <key>
            let mod_code = Self::modifier_code(mods);
            format!("\x1b[1;{}{}", mod_code, key as char).into_bytes()
        } else if modes.application_cursor {
            // Application mode: ESC O <key>
            vec![0x1B, b'O', key]
        } else {
            // Normal mode: ESC [ <key>
            vec![0x1B, b'[', key]
        }
    }

    /// Tilde key sequence (PageUp, PageDown, Insert, Delete)
    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            let mod_code = Self::modifier_code(mods);
            format!("\x1b[{};{}~", code, mod_code).into_bytes()
        }
    }

    /// Function key sequence
    fn function_key(n: u8, mods: Modifiers) -> Vec<u8> {
        let code = match n {
            1..=4 => {
                let key = b"PQRS"[(n - 1) as usize];
                if mods.is_empty() {
                    return vec![0x1B, b'O', key];
                }
                let mod_code = Self::modifier_code(mods);
                return format!("\x1b[1;{}{}", mod_code, key as char).into_bytes();
            }
            5 => 15,
            6..=10 => n + 11,
            11 | 12 => n + 12,
            _ => return Vec::new(),
        };
        Self::tilde_key(code, mods)
    }

    /// Calculate xterm modifier code
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// How many single-character deletes remove one word from `cursor` (a
/// character offset into `line`).
///
/// Backward: back to the start of the last word beginning before the
/// cursor. Forward: up to the end of the first word ending after it. The
/// result is at least 1 and, when any characters are available, never more
/// than the characters between the cursor and the line boundary.
pub fn word_delete_count(line: &str, cursor: usize, direction: WordDirection) -> usize {
    let mut chars: Vec<char> = line.chars().collect();
    if chars.len() < cursor {
        // Cursor past the trimmed text: the gap is blank cells
        chars.resize(cursor, ' ');
    }

    match direction {
        WordDirection::Backward => {
            let before = &chars[..cursor];
            let word_start = (0..before.len())
                .rev()
                .find(|&i| is_word_char(before[i]) && (i == 0 || !is_word_char(before[i - 1])));
            word_start.map_or(1, |start| cursor - start)
        }
        WordDirection::Forward => {
            let after = &chars[cursor..];
            let word_end = (1..=after.len()).find(|&i| {
                is_word_char(after[i - 1]) && (i == after.len() || !is_word_char(after[i]))
            });
            word_end.unwrap_or(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    fn encode(name: &str) -> Vec<u8> {
        KeyEncoder::encode(name, Modifiers::empty(), &TerminalModes::default())
    }

    #[test]
    fn test_char_keys() {
        let modes = TerminalModes::default();

        // Normal character
        let event = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(KeyEncoder::encode_event(&event, &modes), b"a".to_vec());

        // Ctrl+C
        let event = key_event(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(KeyEncoder::encode_event(&event, &modes), vec![0x03]);

        // Alt+x
        let event = key_event(KeyCode::Char('x'), KeyModifiers::ALT);
        assert_eq!(KeyEncoder::encode_event(&event, &modes), vec![0x1B, b'x']);

        // Ctrl+Alt+x
        let chord = KeyChord::parse("ctrl+alt+x").unwrap();
        assert_eq!(
            KeyEncoder::encode_key(chord.key, chord.modifiers, &modes),
            vec![0x1B, 0x18]
        );
    }

    #[test]
    fn test_arrow_keys() {
        assert_eq!(encode("up"), b"\x1b[A");
        assert_eq!(encode("down"), b"\x1b[B");
        assert_eq!(encode("right"), b"\x1b[C");
        assert_eq!(encode("left"), b"\x1b[D");

        let modes = TerminalModes {
            application_cursor: true,
            ..TerminalModes::default()
        };
        assert_eq!(KeyEncoder::encode("up", Modifiers::empty(), &modes), b"\x1bOA");
        assert_eq!(KeyEncoder::encode("home", Modifiers::empty(), &modes), b"\x1bOH");

        // With Ctrl
        assert_eq!(
            KeyEncoder::encode("up", Modifiers::CTRL, &TerminalModes::default()),
            b"\x1b[1;5A"
        );
        assert_eq!(
            KeyEncoder::encode("left", Modifiers::SHIFT | Modifiers::ALT, &modes),
            b"\x1b[1;4D"
        );
    }

    #[test]
    fn test_function_keys() {
        assert_eq!(encode("f1"), b"\x1bOP");
        assert_eq!(encode("f4"), b"\x1bOS");
        assert_eq!(encode("f5"), b"\x1b[15~");
        assert_eq!(encode("f6"), b"\x1b[17~");
        assert_eq!(encode("f10"), b"\x1b[21~");
        assert_eq!(encode("f11"), b"\x1b[23~");
        assert_eq!(encode("f12"), b"\x1b[24~");
        assert_eq!(
            KeyEncoder::encode("f5", Modifiers::SHIFT, &TerminalModes::default()),
            b"\x1b[15;2~"
        );
        assert_eq!(
            KeyEncoder::encode("f2", Modifiers::CTRL, &TerminalModes::default()),
            b"\x1b[1;5Q"
        );
    }

    #[test]
    fn test_editing_keys() {
        assert_eq!(encode("backspace"), vec![0x7F]);
        assert_eq!(encode("delete"), b"\x1b[3~");
        assert_eq!(encode("insert"), b"\x1b[2~");
        assert_eq!(encode("pageup"), b"\x1b[5~");
        assert_eq!(encode("pagedown"), b"\x1b[6~");
        assert_eq!(encode("tab"), vec![0x09]);
        assert_eq!(encode("enter"), vec![0x0D]);
        assert_eq!(encode("escape"), vec![0x1B]);
        assert_eq!(encode("space"), b" ");
        assert_eq!(encode("bracketed_paste_mode_start"), b"\x1b[200~");
        assert_eq!(encode("bracketed_paste_mode_end"), b"\x1b[201~");
    }

    #[test]
    fn test_unknown_keys_encode_empty() {
        assert!(encode("hyper").is_empty());
        assert!(encode("f13").is_empty());
        assert!(encode("").is_empty());
    }

    #[test]
    fn test_chord_parse() {
        let chord = KeyChord::parse("ctrl+shift+c").unwrap();
        assert_eq!(chord.key, Key::Char('c'));
        assert_eq!(chord.modifiers, Modifiers::CTRL | Modifiers::SHIFT);

        let chord = KeyChord::parse("alt++").unwrap();
        assert_eq!(chord.key, Key::Char('+'));
        assert_eq!(chord.modifiers, Modifiers::ALT);

        assert_eq!(KeyChord::parse("pagedown").unwrap().key, Key::PageDown);
        assert!(KeyChord::parse("super+x").is_none());
    }

    #[test]
    fn test_word_delete_backward() {
        // "echo hello|"
        assert_eq!(word_delete_count("echo hello", 10, WordDirection::Backward), 5);
        // "echo hello |" includes the trailing blank
        assert_eq!(word_delete_count("echo hello", 11, WordDirection::Backward), 6);
        // "echo hel|lo"
        assert_eq!(word_delete_count("echo hello", 8, WordDirection::Backward), 3);
        // Nothing before the cursor
        assert_eq!(word_delete_count("echo", 0, WordDirection::Backward), 1);
        // Only punctuation before the cursor
        assert_eq!(word_delete_count("--- x", 3, WordDirection::Backward), 1);
    }

    #[test]
    fn test_word_delete_forward() {
        // "|echo hello"
        assert_eq!(word_delete_count("echo hello", 0, WordDirection::Forward), 4);
        // "echo| hello" skips the blank and the next word
        assert_eq!(word_delete_count("echo hello", 4, WordDirection::Forward), 6);
        // At the end of the line
        assert_eq!(word_delete_count("echo", 4, WordDirection::Forward), 1);
        // Only punctuation after the cursor
        assert_eq!(word_delete_count("a --", 1, WordDirection::Forward), 1);
    }

    #[test]
    fn test_delete_word_bytes() {
        assert_eq!(
            KeyEncoder::delete_word("ls foo", 6, WordDirection::Backward),
            vec![0x7F; 3]
        );
        assert_eq!(
            KeyEncoder::delete_word("ls foo", 0, WordDirection::Forward),
            b"\x1b[3~\x1b[3~".to_vec()
        );
    }

    proptest! {
        #[test]
        fn prop_word_delete_bounds(line in "[a-z_ .-]{0,24}", cursor in 0usize..30) {
            let len = line.chars().count();
            let before = cursor;
            let after = len.saturating_sub(cursor);

            let back = word_delete_count(&line, cursor, WordDirection::Backward);
            prop_assert!(back >= 1);
            prop_assert!(back <= before.max(1));

            let fwd = word_delete_count(&line, cursor, WordDirection::Forward);
            prop_assert!(fwd >= 1);
            prop_assert!(fwd <= after.max(1));
        }
    }
}
