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

//! An overlay on the virtual console adding log capture, paced text upload and XMODEM file
//! transfer. Serial devices talk to it through the same [Console] contract as a plain console.
//!
//! Bytes injected by a text send or an XMODEM transfer are rate limited. After each injected byte
//! the overlay posts a pacing request, which the device context turns into a `TX_READY` event on
//! the event queue. No further byte is produced until that event has fired.

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{BufReader, BufWriter, ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use crate::{
    console::{
        xmodem::{Xmodem, XmodemError},
        Console,
    },
    error::CoreResult,
    events::EventParam,
    time::{cps_to_ns, ms_to_ns, SimTime},
};

pub const TX_READY: EventParam = 0;

const LOG_BUFFER_SIZE: usize = 512;

#[derive(Clone, Debug)]
pub struct SmartConsoleConfig {
    /// Delay after each character of a text send.
    pub char_delay: SimTime,
    /// Delay after an end of line in a text send.
    pub eol_delay: SimTime,
    /// Delay after each XMODEM protocol byte.
    pub xmodem_delay: SimTime,
    /// Fold CRLF and bare LF line endings to a bare CR.
    pub fold_crlf: bool,
}

impl Default for SmartConsoleConfig {
    fn default() -> Self {
        Self {
            char_delay: cps_to_ns(500),
            eol_delay: ms_to_ns(25),
            xmodem_delay: cps_to_ns(50),
            fold_crlf: true,
        }
    }
}

struct TextSend {
    path: PathBuf,
    reader: BufReader<File>,
    fold_crlf: bool,
    last_cr: bool,
    sent: u64,
}

impl TextSend {
    fn next_byte(&mut self) -> std::io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            let b = byte[0];
            let was_cr = self.last_cr;
            self.last_cr = b == b'\r';
            if self.fold_crlf && b == b'\n' {
                if was_cr {
                    continue;
                }
                return Ok(Some(b'\r'));
            }
            return Ok(Some(b));
        }
    }
}

struct LogCapture {
    path: PathBuf,
    writer: BufWriter<File>,
}

pub struct SmartConsole {
    inner: Box<dyn Console>,
    config: SmartConsoleConfig,
    log: Option<LogCapture>,
    text: Option<TextSend>,
    xmodem: Xmodem,
    xmodem_path: Option<PathBuf>,
    tx_ready: bool,
    pacing: Option<SimTime>,
}

impl SmartConsole {
    pub fn new(inner: Box<dyn Console>, config: SmartConsoleConfig) -> Self {
        Self {
            inner,
            config,
            log: None,
            text: None,
            xmodem: Xmodem::new(),
            xmodem_path: None,
            tx_ready: true,
            pacing: None,
        }
    }

    pub fn config(&self) -> &SmartConsoleConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SmartConsoleConfig) {
        self.config = config;
    }

    /// Replace the underlying console, returning the old one.
    pub fn replace_inner(&mut self, inner: Box<dyn Console>) -> Box<dyn Console> {
        std::mem::replace(&mut self.inner, inner)
    }

    /// Start copying console output to `path`.
    pub fn open_log(&mut self, path: impl AsRef<Path>, append: bool) -> CoreResult<()> {
        self.close_log();
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        log::info!("Logging console output to {}", path.display());
        self.log = Some(LogCapture {
            path: path.to_path_buf(),
            writer: BufWriter::with_capacity(LOG_BUFFER_SIZE, file),
        });
        Ok(())
    }

    pub fn close_log(&mut self) {
        if let Some(mut log) = self.log.take() {
            if let Err(e) = log.writer.flush() {
                log::error!("Error flushing log file {}: {}", log.path.display(), e);
            }
            log::info!("Closed console log {}", log.path.display());
        }
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log.as_ref().map(|l| l.path.as_path())
    }

    /// Start feeding the contents of `path` to the emulated program as if typed.
    pub fn send_text(&mut self, path: impl AsRef<Path>) -> CoreResult<()> {
        let fold = self.config.fold_crlf;
        self.send_text_with(path, fold)
    }

    pub fn send_text_with(&mut self, path: impl AsRef<Path>, fold_crlf: bool) -> CoreResult<()> {
        let path = path.as_ref();
        let file = File::open(path)?;
        self.abort_text();
        self.cancel_xmodem();
        log::info!("Sending text file {}", path.display());
        self.text = Some(TextSend {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            fold_crlf,
            last_cr: false,
            sent: 0,
        });
        Ok(())
    }

    pub fn abort_text(&mut self) {
        if let Some(text) = self.text.take() {
            log::info!("Text send of {} stopped after {} bytes", text.path.display(), text.sent);
        }
    }

    pub fn text_active(&self) -> bool {
        self.text.is_some()
    }

    /// Send `path` to the emulated program with XMODEM.
    pub fn send_file(&mut self, path: impl AsRef<Path>) -> CoreResult<()> {
        let path = path.as_ref();
        let file = File::open(path)?;
        self.abort_text();
        self.cancel_xmodem();
        log::info!("XMODEM sending {}", path.display());
        self.xmodem.start_send(BufReader::new(file));
        self.xmodem_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Receive a file from the emulated program with XMODEM, writing it to `path`.
    pub fn receive_file(&mut self, path: impl AsRef<Path>) -> CoreResult<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        self.abort_text();
        self.cancel_xmodem();
        log::info!("XMODEM receiving {}", path.display());
        self.xmodem.start_receive(BufWriter::new(file));
        self.xmodem_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Abandon any XMODEM transfer. A partially received file is closed and kept.
    pub fn cancel_xmodem(&mut self) {
        if self.xmodem.is_active() {
            self.xmodem.cancel();
            self.xmodem_path = None;
        }
    }

    pub fn xmodem_active(&self) -> bool {
        self.xmodem.is_active()
    }

    /// The outcome of the last finished XMODEM transfer, if not yet collected.
    pub fn take_xmodem_result(&mut self) -> Option<Result<u64, XmodemError>> {
        self.xmodem.take_result()
    }

    /// The delay before the next injected byte may be produced. Taken by whoever owns the event
    /// queue, which must deliver [TX_READY] back through [SmartConsole::on_event].
    pub fn take_pacing(&mut self) -> Option<SimTime> {
        self.pacing.take()
    }

    pub fn on_event(&mut self, param: EventParam) {
        if param == TX_READY {
            self.tx_ready = true;
        }
    }

    /// Forget any outstanding pacing delay. Called when the event queue is cleared.
    pub fn reset_pacing(&mut self) {
        self.tx_ready = true;
        self.pacing = None;
    }

    fn inject(&mut self, byte: u8, delay: SimTime) -> u8 {
        self.tx_ready = false;
        self.pacing = Some(delay);
        byte
    }

    fn next_text_byte(&mut self) -> Option<u8> {
        let text = self.text.as_mut()?;
        match text.next_byte() {
            Ok(Some(b)) => {
                text.sent += 1;
                Some(b)
            }
            Ok(None) => {
                log::info!("Text send of {} complete, {} bytes", text.path.display(), text.sent);
                self.text = None;
                None
            }
            Err(e) => {
                log::error!("Error reading {}: {}", text.path.display(), e);
                self.text = None;
                None
            }
        }
    }

    fn capture(&mut self, bytes: &[u8]) {
        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.writer.write_all(bytes) {
                log::error!("Error writing log file {}: {}", log.path.display(), e);
                self.log = None;
            }
        }
    }

    pub fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        match &self.log {
            Some(log) => writeln!(out, "Console log: {}", log.path.display())?,
            None => writeln!(out, "Console log: none")?,
        }
        match &self.text {
            Some(text) => writeln!(out, "Text send: {} ({} bytes sent)", text.path.display(), text.sent)?,
            None => writeln!(out, "Text send: idle")?,
        }
        match (&self.xmodem_path, self.xmodem.is_active()) {
            (Some(path), true) => writeln!(
                out,
                "XMODEM: {} {} ({:?}, {} bytes)",
                if self.xmodem.is_sending() { "sending" } else { "receiving" },
                path.display(),
                self.xmodem.state(),
                self.xmodem.bytes()
            ),
            _ => writeln!(out, "XMODEM: idle"),
        }
    }
}

impl Console for SmartConsole {
    fn raw_read(&mut self, buf: &mut [u8], timeout_ms: u64) -> usize {
        if buf.is_empty() {
            return 0;
        }
        if self.xmodem.is_active() {
            // Host keystrokes would corrupt the transfer and stay in the type-ahead.
            if self.tx_ready && self.xmodem.has_output() {
                if let Some(b) = self.xmodem.next_output() {
                    let delay = self.config.xmodem_delay;
                    buf[0] = self.inject(b, delay);
                    return 1;
                }
            }
            return 0;
        }
        if self.text.is_some() {
            if !self.tx_ready {
                return 0;
            }
            if let Some(b) = self.next_text_byte() {
                let delay = match b {
                    b'\r' | b'\n' => self.config.eol_delay,
                    _ => self.config.char_delay,
                };
                buf[0] = self.inject(b, delay);
                return 1;
            }
        }
        self.inner.raw_read(buf, timeout_ms)
    }

    fn raw_write(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        while self.xmodem.is_active() {
            let Some((&b, tail)) = rest.split_first()
            else {
                return;
            };
            self.xmodem.receive(b);
            rest = tail;
        }
        if rest.is_empty() {
            return;
        }
        self.capture(rest);
        self.inner.raw_write(rest);
    }

    fn is_console_break(&mut self, timeout_ms: u64) -> bool {
        self.inner.is_console_break(timeout_ms)
    }

    fn set_console_break(&mut self, ch: u8) {
        self.inner.set_console_break(ch);
    }

    fn console_break(&self) -> u8 {
        self.inner.console_break()
    }
}

impl Drop for SmartConsole {
    fn drop(&mut self) {
        self.close_log();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{
        xmodem::{ACK, EOT, NAK},
        BufferConsole,
    };
    use std::{cell::RefCell, rc::Rc};

    fn smart() -> (SmartConsole, Rc<RefCell<BufferConsole>>) {
        let host = Rc::new(RefCell::new(BufferConsole::new()));
        let console = SmartConsole::new(Box::new(host.clone()), SmartConsoleConfig::default());
        (console, host)
    }

    fn read_one(con: &mut SmartConsole) -> Option<u8> {
        let mut buf = [0u8; 1];
        match con.raw_read(&mut buf, 0) {
            0 => None,
            _ => Some(buf[0]),
        }
    }

    #[test]
    fn log_captures_output_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");
        let (mut con, host) = smart();
        con.raw_write(b"before ");
        con.open_log(&path, false).unwrap();
        con.raw_write(b"ab\x00\xC1");
        con.raw_write(b"\r\n");
        con.close_log();
        con.raw_write(b"after");

        assert_eq!(std::fs::read(&path).unwrap(), b"ab\x00\xC1\r\n");
        assert_eq!(host.borrow().output(), b"before abA\r\nafter");

        con.open_log(&path, true).unwrap();
        con.raw_write(b"more");
        drop(con);
        assert_eq!(std::fs::read(&path).unwrap(), b"ab\x00\xC1\r\nmore");
    }

    #[test]
    fn text_send_is_paced_and_folds_line_endings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.txt");
        std::fs::write(&path, b"a\r\nb\nc").unwrap();
        let (mut con, host) = smart();
        host.borrow_mut().push_input(b"k");
        con.send_text(&path).unwrap();
        assert!(con.text_active());

        let mut received = Vec::new();
        let mut delays = Vec::new();
        while let Some(b) = read_one(&mut con) {
            received.push(b);
            if let Some(delay) = con.take_pacing() {
                delays.push(delay);
                // Nothing more until the pacing event fires.
                assert_eq!(read_one(&mut con), None);
                con.on_event(TX_READY);
            }
        }
        // The host keystroke is delivered once the file is exhausted.
        assert_eq!(received, b"a\rb\rck");
        assert_eq!(delays[0], cps_to_ns(500));
        assert_eq!(delays[1], ms_to_ns(25));
        assert!(!con.text_active());
    }

    #[test]
    fn text_send_without_folding_keeps_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.txt");
        std::fs::write(&path, b"x\r\n").unwrap();
        let (mut con, _host) = smart();
        con.send_text_with(&path, false).unwrap();
        let mut received = Vec::new();
        while let Some(b) = read_one(&mut con) {
            received.push(b);
            con.on_event(TX_READY);
        }
        assert_eq!(received, b"x\r\n");
    }

    #[test]
    fn missing_text_file_is_an_error() {
        let (mut con, _host) = smart();
        assert!(con.send_text("/nonexistent/file.txt").is_err());
        assert!(!con.text_active());
    }

    fn pump(a: &mut SmartConsole, b: &mut SmartConsole) {
        let mut buf = [0u8; 1];
        let mut guard = 0;
        while a.xmodem_active() || b.xmodem_active() {
            let n = a.raw_read(&mut buf, 0);
            if a.take_pacing().is_some() {
                a.on_event(TX_READY);
            }
            b.raw_write(&buf[..n]);
            let n = b.raw_read(&mut buf, 0);
            if b.take_pacing().is_some() {
                b.on_event(TX_READY);
            }
            a.raw_write(&buf[..n]);
            guard += 1;
            assert!(guard < 200_000, "transfer did not terminate");
        }
    }

    #[test]
    fn xmodem_round_trip_between_consoles() {
        let dir = tempfile::tempdir().unwrap();
        for len in [0usize, 1, 127, 128, 129, 300] {
            let input = dir.path().join(format!("in{}.bin", len));
            let output = dir.path().join(format!("out{}.bin", len));
            let payload: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            std::fs::write(&input, &payload).unwrap();

            let (mut sender, _) = smart();
            let (mut receiver, _) = smart();
            sender.send_file(&input).unwrap();
            receiver.receive_file(&output).unwrap();
            pump(&mut sender, &mut receiver);

            assert_eq!(sender.take_xmodem_result().unwrap().unwrap(), len as u64);
            assert_eq!(receiver.take_xmodem_result().unwrap().unwrap(), len as u64);
            assert_eq!(std::fs::read(&output).unwrap(), payload, "length {}", len);
        }
    }

    #[test]
    fn xmodem_bytes_bypass_log_and_host() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("x.log");
        let out = dir.path().join("out.bin");
        let (mut con, host) = smart();
        con.open_log(&log_path, false).unwrap();
        con.receive_file(&out).unwrap();
        assert_eq!(read_one(&mut con), Some(NAK));
        con.raw_write(&[EOT]);
        assert_eq!(read_one(&mut con), None);
        con.on_event(TX_READY);
        assert_eq!(read_one(&mut con), Some(ACK));
        assert!(!con.xmodem_active());
        con.raw_write(b"ok");
        con.close_log();

        // Bytes following the end of the transfer go to the host and the log.
        assert_eq!(std::fs::read(&log_path).unwrap(), b"ok");
        assert_eq!(host.borrow().output(), b"ok");
    }

    #[test]
    fn starting_xmodem_cancels_text_send() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("t.txt");
        std::fs::write(&text, b"hello").unwrap();
        let (mut con, _host) = smart();
        con.send_text(&text).unwrap();
        con.receive_file(dir.path().join("r.bin")).unwrap();
        assert!(!con.text_active());
        assert!(con.xmodem_active());
        con.send_text(&text).unwrap();
        assert!(!con.xmodem_active());
        assert!(matches!(con.take_xmodem_result(), Some(Err(XmodemError::Aborted))));
    }
}
