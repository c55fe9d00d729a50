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

//! The virtual console: a raw byte channel between emulated serial devices and the user.
//!
//! Front ends implement [Console] over a real terminal. [BufferConsole] is an in-memory
//! implementation used for headless operation and tests.

pub mod smart;
pub mod xmodem;

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

pub use smart::{SmartConsole, SmartConsoleConfig};

/// Control-E
pub const DEFAULT_CONSOLE_BREAK: u8 = 0x05;

pub trait Console {
    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms` for the first one. Returns the
    /// number of bytes read, which may be zero.
    fn raw_read(&mut self, buf: &mut [u8], timeout_ms: u64) -> usize;

    /// Write bytes to the user.
    fn raw_write(&mut self, bytes: &[u8]);

    /// Poll for user input. If the console break character has been typed, consume it and return
    /// true. Anything else typed is kept for later [Console::raw_read] calls.
    fn is_console_break(&mut self, timeout_ms: u64) -> bool;

    fn set_console_break(&mut self, ch: u8);

    fn console_break(&self) -> u8;
}

/// Map a byte written by the emulated program into something safe to put on a terminal. NUL is
/// dropped and the high bit is stripped.
#[inline]
pub fn mask_output(byte: u8) -> Option<u8> {
    match byte & 0x7F {
        0 => None,
        b => Some(b),
    }
}

/// Keystrokes read ahead of the emulated program, plus console break detection. Shared by all
/// console implementations.
#[derive(Debug)]
pub struct TypeAhead {
    buffer: VecDeque<u8>,
    break_char: u8,
}

impl Default for TypeAhead {
    fn default() -> Self {
        Self {
            buffer: VecDeque::new(),
            break_char: DEFAULT_CONSOLE_BREAK,
        }
    }
}

impl TypeAhead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn break_char(&self) -> u8 {
        self.break_char
    }

    pub fn set_break_char(&mut self, ch: u8) {
        self.break_char = ch;
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Queue freshly read keystrokes. Returns true if the break character was among them; the
    /// break character itself is consumed and bytes typed after it are kept.
    pub fn absorb(&mut self, bytes: &[u8]) -> bool {
        let mut seen_break = false;
        for &b in bytes {
            if b == self.break_char && !seen_break {
                seen_break = true;
            }
            else {
                self.buffer.push_back(b);
            }
        }
        seen_break
    }

    /// Move buffered keystrokes into `buf`.
    pub fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match self.buffer.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// A console backed by memory. Input is whatever has been pushed with [BufferConsole::push_input];
/// output accumulates until taken.
#[derive(Debug, Default)]
pub struct BufferConsole {
    input: VecDeque<u8>,
    output: Vec<u8>,
    type_ahead: TypeAhead,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes as if typed by the user.
    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    pub fn pending_input(&self) -> usize {
        self.input.len() + self.type_ahead.len()
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }
}

impl Console for BufferConsole {
    fn raw_read(&mut self, buf: &mut [u8], _timeout_ms: u64) -> usize {
        let mut n = self.type_ahead.drain_into(buf);
        while n < buf.len() {
            match self.input.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    fn raw_write(&mut self, bytes: &[u8]) {
        self.output.extend(bytes.iter().filter_map(|b| mask_output(*b)));
    }

    fn is_console_break(&mut self, _timeout_ms: u64) -> bool {
        let pending: Vec<u8> = self.input.drain(..).collect();
        self.type_ahead.absorb(&pending)
    }

    fn set_console_break(&mut self, ch: u8) {
        self.type_ahead.set_break_char(ch);
    }

    fn console_break(&self) -> u8 {
        self.type_ahead.break_char()
    }
}

/// A console shared between an owner and an observer, such as a test harness inspecting output
/// while a machine holds the console.
impl<C: Console> Console for Rc<RefCell<C>> {
    fn raw_read(&mut self, buf: &mut [u8], timeout_ms: u64) -> usize {
        self.borrow_mut().raw_read(buf, timeout_ms)
    }

    fn raw_write(&mut self, bytes: &[u8]) {
        self.borrow_mut().raw_write(bytes)
    }

    fn is_console_break(&mut self, timeout_ms: u64) -> bool {
        self.borrow_mut().is_console_break(timeout_ms)
    }

    fn set_console_break(&mut self, ch: u8) {
        self.borrow_mut().set_console_break(ch)
    }

    fn console_break(&self) -> u8 {
        self.borrow().console_break()
    }
}
