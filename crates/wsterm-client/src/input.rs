//! Local terminal input surface (spec.md §4.7's POSIX/Windows key pipelines
//! are named as external collaborators in §1 — "the terminal raw-mode
//! toggle ... on the client" — so only the call surface is implemented
//! here, against `crossterm`, the terminal crate already used elsewhere in
//! this corpus for raw-mode toggling and key reading).

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use crate::error::ClientError;

/// Puts the terminal into raw mode for the lifetime of the guard, restoring
/// the previous mode on drop (including on early return / panic unwind).
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    pub fn enable() -> Result<Self, ClientError> {
        terminal::enable_raw_mode()?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Blocks until the next key event, returning the bytes to forward to the
/// remote shell's stdin. `\n` is translated to `\r` (spec.md §4.7: "the
/// shell expects CR"); `Ctrl+C` becomes the 0x03 signal byte.
pub fn read_stdin_bytes() -> Result<Vec<u8>, ClientError> {
    loop {
        match event::read()? {
            Event::Key(KeyEvent { kind: KeyEventKind::Release, .. }) => continue,
            Event::Key(key) => return Ok(key_to_bytes(key)),
            Event::Resize(_, _) => continue,
            _ => continue,
        }
    }
}

fn key_to_bytes(key: KeyEvent) -> Vec<u8> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        if let KeyCode::Char(c) = key.code {
            let lower = c.to_ascii_lowercase();
            if lower.is_ascii_alphabetic() {
                return vec![(lower as u8) & 0x1f];
            }
        }
    }

    match key.code {
        KeyCode::Char(c) => {
            let mut buf = [0u8; 4];
            c.encode_utf8(&mut buf).as_bytes().to_vec()
        }
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        _ => Vec::new(),
    }
}
