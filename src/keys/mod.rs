//! Key events to terminal input sequences

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tracing::debug;

/// Letters with a control-key binding and the byte they produce
const CONTROL_KEYS: [(char, u8); 14] = [
    ('a', 0x01),
    ('b', 0x02),
    ('c', 0x03),
    ('d', 0x04),
    ('e', 0x05),
    ('f', 0x06),
    ('h', 0x08),
    ('k', 0x0b),
    ('l', 0x0c),
    ('n', 0x0e),
    ('p', 0x10),
    ('t', 0x14),
    ('u', 0x15),
    ('w', 0x17),
];

/// Bytes the shell should receive for a key press, if the key is mapped.
///
/// `keypad_application_mode` switches cursor keys to their SS3 forms.
pub fn input_sequence_for_key(key_event: &KeyEvent, keypad_application_mode: bool) -> Option<String> {
    if key_event.kind == KeyEventKind::Release {
        return None;
    }

    let modifiers = key_event.modifiers;
    let non_ascii = modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);

    if let KeyCode::Char(c) = key_event.code {
        if !non_ascii {
            return Some(c.to_string());
        }
        if modifiers.contains(KeyModifiers::CONTROL) {
            return control_sequence(c);
        }
        debug!("No input sequence for {:?}", key_event);
        return None;
    }

    let cursor = |normal: &str, application: &str| {
        Some(if keypad_application_mode { application } else { normal }.to_string())
    };

    match key_event.code {
        // Backspace sends DEL rather than BS.
        KeyCode::Backspace => Some("\x7f".to_string()),
        KeyCode::Esc => Some("\x1b".to_string()),
        KeyCode::PageDown => Some("\x1b[6~".to_string()),
        KeyCode::PageUp => Some("\x1b[5~".to_string()),
        KeyCode::End => cursor("\x1b[F", "\x1bOF"),
        KeyCode::Home => cursor("\x1b[H", "\x1bOH"),
        KeyCode::Left => cursor("\x1b[D", "\x1bOD"),
        KeyCode::Up => cursor("\x1b[A", "\x1bOA"),
        KeyCode::Right => cursor("\x1b[C", "\x1bOC"),
        KeyCode::Down => cursor("\x1b[B", "\x1bOB"),
        KeyCode::Insert => Some("\x1b[2~".to_string()),
        KeyCode::Delete => Some("\x1b[3~".to_string()),
        KeyCode::Enter => Some("\n".to_string()),
        KeyCode::Tab => Some("\t".to_string()),
        _ => {
            debug!("No input sequence for {:?}", key_event);
            None
        }
    }
}

fn control_sequence(c: char) -> Option<String> {
    let letter = c.to_ascii_lowercase();
    CONTROL_KEYS
        .iter()
        .find(|(key, _)| *key == letter)
        .map(|(_, byte)| char::from(*byte).to_string())
}
