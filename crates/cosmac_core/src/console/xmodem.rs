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

//! Classic XMODEM: 128 byte blocks with an 8-bit additive checksum.
//!
//! The engine is a pure state machine with no notion of time. Bytes travelling towards the
//! emulated program are pulled with [Xmodem::next_output] and bytes coming from it are pushed
//! with [Xmodem::receive]. There are no timeouts; a protocol error aborts the transfer.

use std::{
    fmt,
    io::{self, Read, Write},
};

use thiserror::Error;

pub const SOH: u8 = 0x01;
pub const EOT: u8 = 0x04;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const CAN: u8 = 0x18;
pub const SUB: u8 = 0x1A;

pub const BLOCK_SIZE: usize = 128;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum XmodemState {
    Idle,
    // Receiving a file from the emulated program
    SendNakStart,
    WaitBlock,
    WaitBlockNumber1,
    WaitBlockNumber2,
    WaitData,
    WaitChecksum,
    SendAck,
    SendFinalAck,
    // Sending a file to the emulated program
    WaitNakStart,
    SendBlock,
    SendBlockNumber1,
    SendBlockNumber2,
    SendData,
    SendChecksum,
    WaitAckNak,
    SendEot,
    WaitAckFinish,
}

#[derive(Debug, Error)]
pub enum XmodemError {
    #[error("checksum mismatch in block {block}: expected {expected:02X}, received {received:02X}")]
    Checksum { block: u8, expected: u8, received: u8 },
    #[error("block number {received} out of sequence, expected {expected}")]
    Sequence { expected: u8, received: u8 },
    #[error("block number {block:02X} does not match its complement {complement:02X}")]
    Complement { block: u8, complement: u8 },
    #[error("unexpected byte {0:02X}")]
    Unexpected(u8),
    #[error("transfer cancelled by the remote end")]
    Cancelled,
    #[error("transfer aborted by the user")]
    Aborted,
    #[error("file error: {0}")]
    Io(#[from] io::Error),
}

enum Transfer {
    None,
    Send(Box<dyn Read>),
    Receive {
        writer: Box<dyn Write>,
        held: Option<Box<[u8; BLOCK_SIZE]>>,
    },
}

pub struct Xmodem {
    state: XmodemState,
    transfer: Transfer,
    block: [u8; BLOCK_SIZE],
    block_len: usize,
    block_number: u8,
    received_number: u8,
    index: usize,
    checksum: u8,
    bytes: u64,
    result: Option<Result<u64, XmodemError>>,
}

impl Default for Xmodem {
    fn default() -> Self {
        Self {
            state: XmodemState::Idle,
            transfer: Transfer::None,
            block: [0; BLOCK_SIZE],
            block_len: 0,
            block_number: 1,
            received_number: 0,
            index: 0,
            checksum: 0,
            bytes: 0,
            result: None,
        }
    }
}

impl fmt::Debug for Xmodem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Xmodem")
            .field("state", &self.state)
            .field("block_number", &self.block_number)
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl Xmodem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin sending `reader` to the emulated program. Any transfer in progress is dropped.
    pub fn start_send(&mut self, reader: impl Read + 'static) {
        *self = Self {
            state: XmodemState::WaitNakStart,
            transfer: Transfer::Send(Box::new(reader)),
            ..Default::default()
        };
    }

    /// Begin receiving a file from the emulated program into `writer`.
    pub fn start_receive(&mut self, writer: impl Write + 'static) {
        *self = Self {
            state: XmodemState::SendNakStart,
            transfer: Transfer::Receive {
                writer: Box::new(writer),
                held: None,
            },
            ..Default::default()
        };
    }

    pub fn state(&self) -> XmodemState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != XmodemState::Idle
    }

    pub fn is_sending(&self) -> bool {
        matches!(self.transfer, Transfer::Send(_))
    }

    /// Data bytes transferred so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// The outcome of the last finished transfer, if not yet collected.
    pub fn take_result(&mut self) -> Option<Result<u64, XmodemError>> {
        self.result.take()
    }

    /// Whether the engine has a byte ready for the emulated program.
    pub fn has_output(&self) -> bool {
        use XmodemState::*;
        matches!(
            self.state,
            SendNakStart
                | SendAck
                | SendFinalAck
                | SendBlock
                | SendBlockNumber1
                | SendBlockNumber2
                | SendData
                | SendChecksum
                | SendEot
        )
    }

    /// Produce the next byte for the emulated program.
    pub fn next_output(&mut self) -> Option<u8> {
        use XmodemState::*;
        let (byte, next) = match self.state {
            SendNakStart => (NAK, WaitBlock),
            SendAck => (ACK, WaitBlock),
            SendFinalAck => {
                self.finish(Ok(()));
                return Some(ACK);
            }
            SendBlock => (SOH, SendBlockNumber1),
            SendBlockNumber1 => (self.block_number, SendBlockNumber2),
            SendBlockNumber2 => (!self.block_number, SendData),
            SendData => {
                let b = self.block[self.index];
                self.checksum = self.checksum.wrapping_add(b);
                self.index += 1;
                (b, if self.index == BLOCK_SIZE { SendChecksum } else { SendData })
            }
            SendChecksum => (self.checksum, WaitAckNak),
            SendEot => (EOT, WaitAckFinish),
            _ => return None,
        };
        self.state = next;
        Some(byte)
    }

    /// Accept a byte from the emulated program.
    pub fn receive(&mut self, byte: u8) {
        use XmodemState::*;
        match self.state {
            WaitBlock => match byte {
                SOH => self.state = WaitBlockNumber1,
                EOT => match self.flush_final() {
                    Ok(()) => self.state = SendFinalAck,
                    Err(e) => self.abort(e),
                },
                CAN => self.abort(XmodemError::Cancelled),
                other => self.abort(XmodemError::Unexpected(other)),
            },
            WaitBlockNumber1 => {
                self.received_number = byte;
                self.state = WaitBlockNumber2;
            }
            WaitBlockNumber2 => {
                if byte != !self.received_number {
                    self.abort(XmodemError::Complement {
                        block: self.received_number,
                        complement: byte,
                    });
                }
                else if self.received_number != self.block_number {
                    self.abort(XmodemError::Sequence {
                        expected: self.block_number,
                        received: self.received_number,
                    });
                }
                else {
                    self.index = 0;
                    self.checksum = 0;
                    self.state = WaitData;
                }
            }
            WaitData => {
                self.block[self.index] = byte;
                self.checksum = self.checksum.wrapping_add(byte);
                self.index += 1;
                if self.index == BLOCK_SIZE {
                    self.state = WaitChecksum;
                }
            }
            WaitChecksum => {
                if byte != self.checksum {
                    self.abort(XmodemError::Checksum {
                        block: self.block_number,
                        expected: self.checksum,
                        received: byte,
                    });
                    return;
                }
                match self.hold_block() {
                    Ok(()) => {
                        log::trace!("XMODEM received block {}", self.block_number);
                        self.block_number = self.block_number.wrapping_add(1);
                        self.bytes += BLOCK_SIZE as u64;
                        self.state = SendAck;
                    }
                    Err(e) => self.abort(e),
                }
            }
            WaitNakStart => match byte {
                NAK => self.load_next_block(),
                CAN => self.abort(XmodemError::Cancelled),
                // The receiving program may print a banner before it is ready.
                _ => {}
            },
            WaitAckNak => match byte {
                ACK => {
                    log::trace!("XMODEM block {} acknowledged", self.block_number);
                    self.bytes += self.block_len as u64;
                    self.block_number = self.block_number.wrapping_add(1);
                    self.load_next_block();
                }
                NAK => {
                    log::debug!("XMODEM block {} rejected, resending", self.block_number);
                    self.rewind_block();
                }
                CAN => self.abort(XmodemError::Cancelled),
                other => self.abort(XmodemError::Unexpected(other)),
            },
            WaitAckFinish => match byte {
                ACK => self.finish(Ok(())),
                NAK => self.state = SendEot,
                CAN => self.abort(XmodemError::Cancelled),
                other => self.abort(XmodemError::Unexpected(other)),
            },
            _ => {
                log::trace!("XMODEM ignoring {:02X} in state {:?}", byte, self.state);
            }
        }
    }

    /// Abandon the transfer at the user's request. A partially received file is kept.
    pub fn cancel(&mut self) {
        if self.is_active() {
            self.abort(XmodemError::Aborted);
        }
    }

    fn rewind_block(&mut self) {
        self.index = 0;
        self.checksum = 0;
        self.state = XmodemState::SendBlock;
    }

    fn load_next_block(&mut self) {
        let Transfer::Send(reader) = &mut self.transfer
        else {
            return;
        };
        match read_block(reader.as_mut(), &mut self.block) {
            Ok(0) => {
                self.block_len = 0;
                self.state = XmodemState::SendEot;
            }
            Ok(n) => {
                self.block[n..].fill(SUB);
                self.block_len = n;
                self.rewind_block();
            }
            Err(e) => self.abort(e.into()),
        }
    }

    // A block is held back until the next one arrives, so that SUB padding can be trimmed from
    // the final block once EOT is seen.
    fn hold_block(&mut self) -> Result<(), XmodemError> {
        if let Transfer::Receive { writer, held } = &mut self.transfer {
            if let Some(prev) = held.take() {
                writer.write_all(&prev[..])?;
            }
            *held = Some(Box::new(self.block));
        }
        Ok(())
    }

    fn flush_final(&mut self) -> Result<(), XmodemError> {
        if let Transfer::Receive { writer, held } = &mut self.transfer {
            if let Some(last) = held.take() {
                let len = last.iter().rposition(|b| *b != SUB).map(|p| p + 1).unwrap_or(0);
                self.bytes -= (BLOCK_SIZE - len) as u64;
                writer.write_all(&last[..len])?;
            }
            writer.flush()?;
        }
        Ok(())
    }

    fn finish(&mut self, mut result: Result<(), XmodemError>) {
        if let Transfer::Receive { writer, .. } = &mut self.transfer {
            if let Err(e) = writer.flush() {
                if result.is_ok() {
                    result = Err(e.into());
                }
                else {
                    log::error!("XMODEM failed to flush the received file: {}", e);
                }
            }
        }
        match &result {
            Ok(()) => log::info!("XMODEM transfer complete, {} bytes", self.bytes),
            Err(e) => log::error!("XMODEM transfer aborted: {}", e),
        }
        self.result = Some(result.map(|_| self.bytes));
        self.state = XmodemState::Idle;
        // Dropping the transfer closes the file.
        self.transfer = Transfer::None;
    }

    fn abort(&mut self, error: XmodemError) {
        self.finish(Err(error));
    }
}

fn read_block(reader: &mut dyn Read, block: &mut [u8; BLOCK_SIZE]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < BLOCK_SIZE {
        match reader.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
