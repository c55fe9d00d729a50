/*
    Cosmac

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! The user's terminal as a [Console], using crossterm for raw mode and key polling.

use std::{
    io::{self, Write},
    time::Duration,
};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal,
};

use cosmac_core::console::{mask_output, Console, TypeAhead};

/// Holds the terminal in raw mode until dropped.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            log::warn!("Failed to restore the terminal: {}", e);
        }
    }
}

/// Translate a key press into the byte an ASCII terminal would send.
pub fn translate_key(key: &KeyEvent) -> Option<u8> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            let upper = c.to_ascii_uppercase();
            match upper {
                '@'..='_' => Some(upper as u8 & 0x1F),
                '?' => Some(0x7F),
                _ => None,
            }
        }
        KeyCode::Char(c) if c.is_ascii() => Some(c as u8),
        KeyCode::Enter => Some(b'\r'),
        KeyCode::Backspace => Some(0x08),
        KeyCode::Tab => Some(b'\t'),
        KeyCode::Esc => Some(0x1B),
        KeyCode::Delete => Some(0x7F),
        _ => None,
    }
}

pub struct HostConsole {
    type_ahead: TypeAhead,
    break_pending: bool,
    stdout: io::Stdout,
}

impl HostConsole {
    pub fn new() -> Self {
        Self {
            type_ahead: TypeAhead::new(),
            break_pending: false,
            stdout: io::stdout(),
        }
    }

    /// Move every key press waiting in the terminal into the type-ahead buffer, waiting up to
    /// `timeout_ms` for the first.
    fn poll_keys(&mut self, timeout_ms: u64) {
        let mut timeout = Duration::from_millis(timeout_ms);
        loop {
            match event::poll(timeout) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    log::warn!("Console poll failed: {}", e);
                    break;
                }
            }
            timeout = Duration::ZERO;
            match event::read() {
                Ok(Event::Key(key)) => {
                    if let Some(byte) = translate_key(&key) {
                        self.break_pending |= self.type_ahead.absorb(&[byte]);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Console read failed: {}", e);
                    break;
                }
            }
        }
    }
}

impl Console for HostConsole {
    fn raw_read(&mut self, buf: &mut [u8], timeout_ms: u64) -> usize {
        if self.type_ahead.is_empty() {
            self.poll_keys(timeout_ms);
        }
        self.type_ahead.drain_into(buf)
    }

    fn raw_write(&mut self, bytes: &[u8]) {
        let masked: Vec<u8> = bytes.iter().filter_map(|b| mask_output(*b)).collect();
        let result = self.stdout.write_all(&masked).and_then(|_| self.stdout.flush());
        if let Err(e) = result {
            log::warn!("Console write failed: {}", e);
        }
    }

    fn is_console_break(&mut self, timeout_ms: u64) -> bool {
        self.poll_keys(timeout_ms);
        std::mem::take(&mut self.break_pending)
    }

    fn set_console_break(&mut self, ch: u8) {
        self.type_ahead.set_break_char(ch);
    }

    fn console_break(&self) -> u8 {
        self.type_ahead.break_char()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> Option<u8> {
        translate_key(&KeyEvent::new(code, modifiers))
    }

    #[test]
    fn keys_translate_to_ascii() {
        assert_eq!(key(KeyCode::Char('a'), KeyModifiers::NONE), Some(b'a'));
        assert_eq!(key(KeyCode::Char('A'), KeyModifiers::SHIFT), Some(b'A'));
        assert_eq!(key(KeyCode::Enter, KeyModifiers::NONE), Some(0x0D));
        assert_eq!(key(KeyCode::Backspace, KeyModifiers::NONE), Some(0x08));
        assert_eq!(key(KeyCode::Esc, KeyModifiers::NONE), Some(0x1B));
        assert_eq!(key(KeyCode::F(1), KeyModifiers::NONE), None);
        assert_eq!(key(KeyCode::Char('é'), KeyModifiers::NONE), None);
    }

    #[test]
    fn control_keys() {
        assert_eq!(key(KeyCode::Char('e'), KeyModifiers::CONTROL), Some(0x05));
        assert_eq!(key(KeyCode::Char('C'), KeyModifiers::CONTROL), Some(0x03));
        assert_eq!(key(KeyCode::Char('['), KeyModifiers::CONTROL), Some(0x1B));
        assert_eq!(key(KeyCode::Char('1'), KeyModifiers::CONTROL), None);
    }

    #[test]
    fn releases_are_ignored() {
        let mut event = KeyEvent::new(KeyCode::Char('x'), KeyModifiers::NONE);
        event.kind = KeyEventKind::Release;
        assert_eq!(translate_key(&event), None);
    }
}
