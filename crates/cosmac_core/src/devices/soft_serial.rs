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

//! A software ("bit-banged") serial port.
//!
//! The emulated program receives serial data by sampling an EF input and transmits by toggling
//! the Q output. This device turns console keystrokes into a timed bit stream on the EF input,
//! and decodes bits written to Q back into bytes for the console.
//!
//! Transmitted frames are a start bit, eight data bits LSB first and two stop bits, so back to
//! back characters are always separated by two bit times of MARK. The receiver needs only one stop
//! bit. Logical MARK is 1; the invert options model external inverters on either line.

use std::fmt;

use crate::{
    config::SerialConfig,
    device::{Device, DeviceContext},
    events::EventParam,
    port_map::PortDirection,
    time::{hz_to_ns, us_to_ns, SimTime},
};

const EVENT_POLL: EventParam = 1;
const EVENT_TX_BIT: EventParam = 2;
const EVENT_RX_SAMPLE: EventParam = 3;

const FRAME_BITS: u8 = 11;
const DATA_BITS: u8 = 8;

const MARK: bool = true;
const SPACE: bool = false;

/// The CPU flag output used for transmit data.
pub const Q_FLAG: usize = 0;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum RxState {
    Idle,
    Data(u8),
    Stop,
}

pub struct SoftSerial {
    baud: u32,
    bit_time: SimTime,
    poll_interval: SimTime,
    invert_tx: bool,
    invert_rx: bool,
    sense_index: usize,
    flag_index: usize,

    tx_shift: u16,
    tx_bits_left: u8,
    tx_active: bool,
    tx_line: bool,
    tx_count: u64,

    rx_state: RxState,
    rx_shift: u8,
    rx_line: bool,
    rx_count: u64,
    framing_errors: u64,
}

impl SoftSerial {
    pub fn new(config: &SerialConfig) -> Self {
        let baud = config.baud.max(1);
        Self {
            baud,
            bit_time: hz_to_ns(baud as u64),
            poll_interval: us_to_ns(config.poll_us.max(1)),
            invert_tx: config.invert_tx,
            invert_rx: config.invert_rx,
            sense_index: (config.ef.clamp(1, 4) - 1) as usize,
            flag_index: Q_FLAG,
            tx_shift: 0,
            tx_bits_left: 0,
            tx_active: false,
            tx_line: MARK,
            tx_count: 0,
            rx_state: RxState::Idle,
            rx_shift: 0,
            rx_line: MARK,
            rx_count: 0,
            framing_errors: 0,
        }
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Change the bit rate. Takes effect from the next bit.
    pub fn set_baud(&mut self, baud: u32) {
        self.baud = baud.max(1);
        self.bit_time = hz_to_ns(self.baud as u64);
    }

    pub fn bit_time(&self) -> SimTime {
        self.bit_time
    }

    /// The EF input carrying transmitted data, zero based.
    pub fn sense_index(&self) -> usize {
        self.sense_index
    }

    pub fn tx_busy(&self) -> bool {
        self.tx_active
    }

    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }

    fn shift_out(&mut self) {
        self.tx_line = self.tx_shift & 1 != 0;
        self.tx_shift >>= 1;
        self.tx_bits_left -= 1;
    }

    // Load the next keystroke into the shift register and start sending it. Returns false if no
    // keystroke is waiting.
    fn start_frame(&mut self, ctx: &mut DeviceContext<'_>) -> bool {
        let mut byte = [0u8; 1];
        if ctx.console_read(&mut byte) == 0 {
            return false;
        }
        log::trace!("SoftSerial: sending {:02X}", byte[0]);
        // Start bit in bit 0, stop bits in bits 9 and 10.
        self.tx_shift = (0b11 << 9) | ((byte[0] as u16) << 1);
        self.tx_bits_left = FRAME_BITS;
        self.tx_active = true;
        self.shift_out();
        self.tx_count += 1;
        ctx.schedule(EVENT_TX_BIT, self.bit_time);
        true
    }

    fn on_poll(&mut self, ctx: &mut DeviceContext<'_>) {
        if self.tx_busy() || !self.start_frame(ctx) {
            ctx.schedule(EVENT_POLL, self.poll_interval);
        }
    }

    fn on_tx_bit(&mut self, ctx: &mut DeviceContext<'_>) {
        if self.tx_bits_left > 0 {
            self.shift_out();
            ctx.schedule(EVENT_TX_BIT, self.bit_time);
            return;
        }
        // The second stop bit has been on the line for a full bit time.
        self.tx_line = MARK;
        self.tx_active = false;
        if !self.start_frame(ctx) {
            ctx.schedule(EVENT_POLL, self.poll_interval);
        }
    }

    fn on_rx_sample(&mut self, ctx: &mut DeviceContext<'_>) {
        match self.rx_state {
            RxState::Data(bit) => {
                if self.rx_line {
                    self.rx_shift |= 1 << bit;
                }
                self.rx_state = if bit + 1 == DATA_BITS {
                    RxState::Stop
                }
                else {
                    RxState::Data(bit + 1)
                };
                ctx.schedule(EVENT_RX_SAMPLE, self.bit_time);
            }
            RxState::Stop => {
                if self.rx_line == MARK {
                    log::trace!("SoftSerial: received {:02X}", self.rx_shift);
                    self.rx_count += 1;
                    ctx.console_write(&[self.rx_shift]);
                }
                else {
                    self.framing_errors += 1;
                    log::warn!("SoftSerial: framing error, dropping {:02X}", self.rx_shift);
                }
                self.rx_state = RxState::Idle;
            }
            RxState::Idle => {}
        }
    }
}

impl Device for SoftSerial {
    fn name(&self) -> &str {
        "SERIAL"
    }

    fn description(&self) -> String {
        format!("Software serial, {} baud on Q/EF{}", self.baud, self.sense_index + 1)
    }

    fn base_port(&self) -> u16 {
        0
    }

    fn port_count(&self) -> u16 {
        0
    }

    fn direction(&self) -> PortDirection {
        PortDirection::InOut
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        ctx.cancel_all();
        self.tx_shift = 0;
        self.tx_bits_left = 0;
        self.tx_active = false;
        self.tx_line = MARK;
        self.rx_state = RxState::Idle;
        self.rx_shift = 0;
        self.rx_line = MARK;
        ctx.schedule(EVENT_POLL, self.poll_interval);
    }

    fn set_flag(&mut self, index: usize, bit: bool, ctx: &mut DeviceContext<'_>) {
        if index != self.flag_index {
            return;
        }
        let level = bit ^ self.invert_rx;
        if self.rx_state == RxState::Idle && self.rx_line == MARK && level == SPACE {
            // Start bit. Sample each data bit in the middle of its cell.
            self.rx_state = RxState::Data(0);
            self.rx_shift = 0;
            ctx.schedule(EVENT_RX_SAMPLE, self.bit_time + self.bit_time / 2);
        }
        self.rx_line = level;
    }

    fn get_sense(&self, index: usize, default: bool) -> bool {
        if index == self.sense_index {
            self.tx_line ^ self.invert_tx
        }
        else {
            default
        }
    }

    fn on_event(&mut self, param: EventParam, ctx: &mut DeviceContext<'_>) {
        match param {
            EVENT_POLL => self.on_poll(ctx),
            EVENT_TX_BIT => self.on_tx_bit(ctx),
            EVENT_RX_SAMPLE => self.on_rx_sample(ctx),
            _ => log::warn!("SoftSerial: unknown event {}", param),
        }
    }

    fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{}", self.description())?;
        writeln!(
            out,
            "  bit time {} ns, poll {} ns, invert tx {} rx {}",
            self.bit_time, self.poll_interval, self.invert_tx, self.invert_rx
        )?;
        writeln!(
            out,
            "  transmitter {} ({} sent), receiver {:?} ({} received, {} framing errors)",
            if self.tx_busy() { "busy" } else { "idle" },
            self.tx_count,
            self.rx_state,
            self.rx_count,
            self.framing_errors
        )
    }
}
