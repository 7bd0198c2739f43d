//! Key mapping for terminal input
//!
//! Converts key events to the bytes a VT100 would send to the host.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::core::term::function_key_sequence;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
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

/// What a key press asks the client to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInput {
    /// Bytes for the host, already in wire form
    Send(Vec<u8>),
    /// Unmodified function key F1..F12
    FunctionKey(u8),
    /// Escape character (Ctrl+]): leave the session
    Quit,
}

/// Key mapper for converting key events to bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Map a crossterm KeyEvent to client input
    pub fn map(event: &KeyEvent) -> Option<KeyInput> {
        let mods = Modifiers::from(event.modifiers);

        let bytes = match event.code {
            KeyCode::Char(']') if mods == Modifiers::CTRL => return Some(KeyInput::Quit),
            KeyCode::Char(ch) => Self::map_char(ch, mods),

            // Telnet end of line
            KeyCode::Enter => vec![0x0D, 0x0A],

            KeyCode::Backspace => {
                if mods.contains(Modifiers::ALT) {
                    vec![0x1B, 0x7F]
                } else {
                    vec![0x7F]
                }
            }

            KeyCode::Tab => {
                if mods.contains(Modifiers::SHIFT) {
                    b"\x1b[Z".to_vec()
                } else {
                    vec![0x09]
                }
            }
            KeyCode::BackTab => b"\x1b[Z".to_vec(),

            KeyCode::Esc => vec![0x1B],

            // Arrow keys
            KeyCode::Up => Self::arrow_key(b'A', mods),
            KeyCode::Down => Self::arrow_key(b'B', mods),
            KeyCode::Right => Self::arrow_key(b'C', mods),
            KeyCode::Left => Self::arrow_key(b'D', mods),

            // Navigation keys
            KeyCode::Home => Self::special_key(b'H', mods),
            KeyCode::End => Self::special_key(b'F', mods),
            KeyCode::PageUp => Self::tilde_key(5, mods),
            KeyCode::PageDown => Self::tilde_key(6, mods),
            KeyCode::Insert => Self::tilde_key(2, mods),
            KeyCode::Delete => Self::tilde_key(3, mods),

            KeyCode::F(n) if mods.is_empty() => {
                return function_key_sequence(n).map(|_| KeyInput::FunctionKey(n));
            }
            KeyCode::F(n) => Self::modified_function_key(n, mods)?,

            _ => return None,
        };
        Some(KeyInput::Send(bytes))
    }

    /// Map a character with modifiers; text goes out as Latin-1
    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        // Ctrl + letter = control character
        if mods.contains(Modifiers::CTRL) && !mods.contains(Modifiers::ALT) {
            if ch.is_ascii_alphabetic() {
                return vec![(ch.to_ascii_lowercase() as u8) - b'a' + 1];
            }
            match ch {
                '@' | '`' | ' ' => return vec![0x00],
                '[' => return vec![0x1B],
                '\\' => return vec![0x1C],
                '^' | '~' => return vec![0x1E],
                '_' | '?' => return vec![0x1F],
                _ => {}
            }
        }

        // Ctrl + Alt + letter
        if mods.contains(Modifiers::CTRL | Modifiers::ALT) && ch.is_ascii_alphabetic() {
            return vec![0x1B, (ch.to_ascii_lowercase() as u8) - b'a' + 1];
        }

        let byte = latin1(ch);
        if mods.contains(Modifiers::ALT) && !mods.contains(Modifiers::CTRL) {
            vec![0x1B, byte]
        } else {
            vec![byte]
        }
    }

    /// Arrow key sequence
    fn arrow_key(key: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![0x1B, b'[', key]
        } else {
            // ESC [ 1 ; <mod> <key>
            format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
        }
    }

    /// Special key (Home, End) sequence
    fn special_key(key: u8, mods: Modifiers) -> Vec<u8> {
        Self::arrow_key(key, mods)
    }

    /// Tilde key sequence (PageUp, PageDown, Insert, Delete)
    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            format!("\x1b[{};{}~", code, Self::modifier_code(mods)).into_bytes()
        }
    }

    /// Function key with modifiers, in xterm form
    fn modified_function_key(n: u8, mods: Modifiers) -> Option<Vec<u8>> {
        let base = function_key_sequence(n)?;
        let mod_code = Self::modifier_code(mods);
        let bytes = if base[1] == b'O' {
            // ESC O X -> ESC [ 1 ; mod X
            format!("\x1b[1;{}{}", mod_code, base[2] as char).into_bytes()
        } else {
            // ESC [ n ~ -> ESC [ n ; mod ~
            let code = String::from_utf8_lossy(&base[2..base.len() - 1]);
            format!("\x1b[{};{}~", code, mod_code).into_bytes()
        };
        Some(bytes)
    }

    /// Calculate xterm modifier code
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}

fn latin1(ch: char) -> u8 {
    u8::try_from(u32::from(ch)).unwrap_or(b'?')
}
