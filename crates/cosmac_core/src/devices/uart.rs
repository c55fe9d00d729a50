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

//! INS8250 / 16450 class UART.
//!
//! Eight registers are exposed. With LCR.DLAB set, registers 0 and 1 access the baud rate divisor
//! latch instead of RBR/THR and IER.
//!
//! Transmission takes one character time per byte, derived from the input clock and the divisor.
//! The transmitter holds up to two bytes, modelling the holding and shift registers. Received
//! bytes are queued in a small FIFO so that back-to-back loopback characters are not lost.
//!
//! In loopback mode (MCR.LOOP) transmitted bytes are returned to the receiver instead of the
//! console, and the modem control outputs are fed back to the modem status inputs.

use std::{collections::VecDeque, fmt};

use crate::{
    config::UartConfig,
    device::{Device, DeviceContext},
    events::EventParam,
    interrupt::IrqId,
    port_map::PortDirection,
    time::{us_to_ns, SimTime, NS_PER_SEC},
};

pub const UART_PORT_COUNT: u16 = 8;

const EVENT_TX_DONE: EventParam = 1;
const EVENT_RX_POLL: EventParam = 2;

const RX_FIFO_LEN: usize = 16;
const TX_QUEUE_LEN: usize = 2;
const DEFAULT_DIVISOR: u16 = 12;

// Register offsets
pub const REG_RBR_THR: u8 = 0;
pub const REG_IER: u8 = 1;
pub const REG_IIR: u8 = 2;
pub const REG_LCR: u8 = 3;
pub const REG_MCR: u8 = 4;
pub const REG_LSR: u8 = 5;
pub const REG_MSR: u8 = 6;
pub const REG_SCR: u8 = 7;

// Line Control Register bits
const WORD_LENGTH_SELECT_MASK: u8 = 0b0000_0011;
const DIVISOR_LATCH_ACCESS_BIT: u8 = 0b1000_0000;

// Line Status Register bits
pub const STATUS_DATA_READY: u8 = 0b0000_0001;
pub const STATUS_OVERRUN_ERROR: u8 = 0b0000_0010;
pub const STATUS_PARITY_ERROR: u8 = 0b0000_0100;
pub const STATUS_FRAMING_ERROR: u8 = 0b0000_1000;
pub const STATUS_BREAK_INTERRUPT: u8 = 0b0001_0000;
pub const STATUS_TRANSMIT_EMPTY: u8 = 0b0010_0000;
pub const STATUS_TX_SHIFT_EMPTY: u8 = 0b0100_0000;
const STATUS_ERROR_MASK: u8 =
    STATUS_OVERRUN_ERROR | STATUS_PARITY_ERROR | STATUS_FRAMING_ERROR | STATUS_BREAK_INTERRUPT;

// Interrupt Enable Register bits
pub const INTERRUPT_DATA_AVAIL: u8 = 0b0000_0001;
pub const INTERRUPT_TX_EMPTY: u8 = 0b0000_0010;
pub const INTERRUPT_RX_LINE_STATUS: u8 = 0b0000_0100;
pub const INTERRUPT_MODEM_STATUS: u8 = 0b0000_1000;

// Modem Control Register bits
pub const MODEM_CONTROL_DTR: u8 = 0b0000_0001;
pub const MODEM_CONTROL_RTS: u8 = 0b0000_0010;
pub const MODEM_CONTROL_OUT1: u8 = 0b0000_0100;
pub const MODEM_CONTROL_OUT2: u8 = 0b0000_1000;
pub const MODEM_CONTROL_LOOP: u8 = 0b0001_0000;

// Modem Status Register bits
pub const MODEM_STATUS_DCTS: u8 = 0b0000_0001;
pub const MODEM_STATUS_DDSR: u8 = 0b0000_0010;
pub const MODEM_STATUS_TERI: u8 = 0b0000_0100;
pub const MODEM_STATUS_DDCD: u8 = 0b0000_1000;
pub const MODEM_STATUS_CTS: u8 = 0b0001_0000;
pub const MODEM_STATUS_DSR: u8 = 0b0010_0000;
pub const MODEM_STATUS_RI: u8 = 0b0100_0000;
pub const MODEM_STATUS_DCD: u8 = 0b1000_0000;
const MODEM_STATUS_DELTA_MASK: u8 = 0x0F;

pub struct Uart {
    name: String,
    base_port: u16,
    clock_hz: u64,
    poll_interval: SimTime,
    irq: Option<IrqId>,
    irq_enabled: bool,
    irq_asserted: bool,

    line_control_reg: u8,
    divisor: u16,
    char_time: SimTime,
    interrupt_enable_reg: u8,
    interrupts_active: u8,
    modem_control_reg: u8,
    line_status_reg: u8,
    modem_status_reg: u8,
    scratch_reg: u8,
    rx_byte: u8,
    rx_fifo: VecDeque<u8>,
    tx_queue: VecDeque<u8>,
    rx_count: u64,
    tx_count: u64,
}

impl Uart {
    pub fn new(name: &str, base_port: u16, config: &UartConfig) -> Self {
        let mut uart = Self {
            name: name.to_string(),
            base_port,
            clock_hz: config.clock_hz.max(1),
            poll_interval: us_to_ns(config.poll_us.max(1)),
            irq: None,
            irq_enabled: config.irq,
            irq_asserted: false,
            line_control_reg: 0,
            divisor: DEFAULT_DIVISOR,
            char_time: 0,
            interrupt_enable_reg: 0,
            interrupts_active: 0,
            modem_control_reg: 0,
            line_status_reg: STATUS_TRANSMIT_EMPTY | STATUS_TX_SHIFT_EMPTY,
            modem_status_reg: MODEM_STATUS_CTS | MODEM_STATUS_DSR | MODEM_STATUS_DCD,
            scratch_reg: 0,
            rx_byte: 0,
            rx_fifo: VecDeque::with_capacity(RX_FIFO_LEN),
            tx_queue: VecDeque::with_capacity(TX_QUEUE_LEN),
            rx_count: 0,
            tx_count: 0,
        };
        uart.set_timing();
        uart
    }

    /// Connect the UART's interrupt output to an interrupt line.
    pub fn set_irq_line(&mut self, irq: Option<IrqId>) {
        self.irq = irq;
    }

    pub fn irq_line(&self) -> Option<IrqId> {
        self.irq
    }

    pub fn divisor(&self) -> u16 {
        self.divisor
    }

    pub fn baud(&self) -> u64 {
        self.clock_hz / (16 * self.divisor.max(1) as u64)
    }

    /// Time to shift one ten-bit character.
    pub fn char_time(&self) -> SimTime {
        self.char_time
    }

    pub fn loopback(&self) -> bool {
        self.modem_control_reg & MODEM_CONTROL_LOOP != 0
    }

    /// Whether an interrupt condition is pending, independent of the interrupt line.
    pub fn interrupt_pending(&self) -> bool {
        self.interrupts_active != 0
    }

    fn set_timing(&mut self) {
        let divisor = self.divisor.max(1) as u128;
        let ns = 10 * 16 * divisor * NS_PER_SEC as u128 / self.clock_hz as u128;
        self.char_time = (ns as SimTime).max(1);
    }

    fn divisor_latch_access(&self) -> bool {
        self.line_control_reg & DIVISOR_LATCH_ACCESS_BIT != 0
    }

    /// Read register `reg` (0-7).
    pub fn read_register(&mut self, reg: u8, ctx: &mut DeviceContext<'_>) -> u8 {
        let byte = match reg & 0x07 {
            REG_RBR_THR => self.rx_buffer_read(),
            REG_IER => self.interrupt_enable_read(),
            REG_IIR => self.interrupt_id_read(),
            REG_LCR => self.line_control_reg,
            REG_MCR => self.modem_control_reg,
            REG_LSR => self.line_status_read(),
            REG_MSR => self.modem_status_read(),
            _ => self.scratch_reg,
        };
        self.update_irq(ctx);
        byte
    }

    /// Write register `reg` (0-7).
    pub fn write_register(&mut self, reg: u8, byte: u8, ctx: &mut DeviceContext<'_>) {
        match reg & 0x07 {
            REG_RBR_THR => self.tx_buffer_write(byte, ctx),
            REG_IER => self.interrupt_enable_write(byte),
            REG_IIR => {}
            REG_LCR => self.line_control_write(byte),
            REG_MCR => self.modem_control_write(byte),
            REG_LSR | REG_MSR => {
                log::debug!("{}: write to read-only register {}: {:02X}", self.name, reg, byte);
            }
            _ => self.scratch_reg = byte,
        }
        self.update_irq(ctx);
    }

    /// Handle a read of the RX buffer register, or if DLAB is set, the divisor latch LSB.
    fn rx_buffer_read(&mut self) -> u8 {
        if self.divisor_latch_access() {
            return (self.divisor & 0xFF) as u8;
        }
        if let Some(byte) = self.rx_fifo.pop_front() {
            self.rx_byte = byte;
        }
        if self.rx_fifo.is_empty() {
            self.line_status_reg &= !STATUS_DATA_READY;
            self.lower_interrupt_type(INTERRUPT_DATA_AVAIL);
        }
        self.rx_byte
    }

    fn tx_buffer_write(&mut self, byte: u8, ctx: &mut DeviceContext<'_>) {
        if self.divisor_latch_access() {
            self.divisor = (self.divisor & 0xFF00) | byte as u16;
            self.set_timing();
            log::trace!("{}: Divisor LSB set. Divisor: {} Baud: {}", self.name, self.divisor, self.baud());
            return;
        }
        if self.tx_queue.len() >= TX_QUEUE_LEN {
            log::debug!("{}: Tx overrun, byte {:02X} dropped", self.name, byte);
            return;
        }
        log::trace!("{}: Tx buffer write: {:02X}", self.name, byte);
        self.tx_queue.push_back(byte);
        self.line_status_reg &= !(STATUS_TRANSMIT_EMPTY | STATUS_TX_SHIFT_EMPTY);
        self.lower_interrupt_type(INTERRUPT_TX_EMPTY);
        if !ctx.is_scheduled(EVENT_TX_DONE) {
            ctx.schedule(EVENT_TX_DONE, self.char_time);
        }
    }

    fn interrupt_enable_read(&self) -> u8 {
        if self.divisor_latch_access() {
            return (self.divisor >> 8) as u8;
        }
        self.interrupt_enable_reg
    }

    fn interrupt_enable_write(&mut self, byte: u8) {
        if self.divisor_latch_access() {
            self.divisor = (self.divisor & 0x00FF) | ((byte as u16) << 8);
            self.set_timing();
            log::trace!("{}: Divisor MSB set. Divisor: {} Baud: {}", self.name, self.divisor, self.baud());
            return;
        }
        log::trace!("{}: Write to Interrupt Enable Register: {:04b}", self.name, byte & 0x0F);
        let old_enable_reg = self.interrupt_enable_reg;
        self.interrupt_enable_reg = byte & 0x0F;

        // Enabling the THRE interrupt while the holding register is empty raises it at once.
        if byte & INTERRUPT_TX_EMPTY != 0
            && old_enable_reg & INTERRUPT_TX_EMPTY == 0
            && self.line_status_reg & STATUS_TRANSMIT_EMPTY != 0
        {
            self.raise_interrupt_type(INTERRUPT_TX_EMPTY);
        }
        if self.line_status_reg & STATUS_DATA_READY != 0 {
            self.raise_interrupt_type(INTERRUPT_DATA_AVAIL);
        }
        self.interrupts_active &= self.interrupt_enable_reg;
    }

    /// The interrupt identification register reports the highest priority pending interrupt:
    /// line status, then received data, then THR empty, then modem status.
    fn calc_iir(&self) -> u8 {
        let active = self.interrupts_active;
        if active & INTERRUPT_RX_LINE_STATUS != 0 {
            0b110
        }
        else if active & INTERRUPT_DATA_AVAIL != 0 {
            0b100
        }
        else if active & INTERRUPT_TX_EMPTY != 0 {
            0b010
        }
        else if active & INTERRUPT_MODEM_STATUS != 0 {
            0b000
        }
        else {
            0b001
        }
    }

    fn interrupt_id_read(&mut self) -> u8 {
        let byte = self.calc_iir();
        // Reading IIR clears a THRE interrupt, but only when it is the one being reported.
        if byte == 0b010 {
            self.lower_interrupt_type(INTERRUPT_TX_EMPTY);
        }
        byte
    }

    fn line_control_write(&mut self, byte: u8) {
        self.line_control_reg = byte;
        log::trace!(
            "{}: Write to Line Control Register: {:02X} Word Length: {} DLAB: {}",
            self.name,
            byte,
            5 + (byte & WORD_LENGTH_SELECT_MASK),
            self.divisor_latch_access()
        );
    }

    fn line_status_read(&mut self) -> u8 {
        let byte = self.line_status_reg;
        self.line_status_reg &= !STATUS_ERROR_MASK;
        self.lower_interrupt_type(INTERRUPT_RX_LINE_STATUS);
        byte
    }

    fn modem_status_read(&mut self) -> u8 {
        let byte = self.modem_status_reg;
        self.modem_status_reg &= !MODEM_STATUS_DELTA_MASK;
        self.lower_interrupt_type(INTERRUPT_MODEM_STATUS);
        byte
    }

    fn modem_control_write(&mut self, byte: u8) {
        log::trace!("{}: Write to Modem Control Register: {:05b}", self.name, byte & 0x1F);
        self.modem_control_reg = byte & 0x1F;
        self.update_modem_inputs();
    }

    // In loopback the four modem control outputs drive the four modem status inputs. Otherwise
    // the console is permanently connected.
    fn update_modem_inputs(&mut self) {
        let inputs = if self.loopback() {
            let mcr = self.modem_control_reg;
            let mut inputs = 0;
            if mcr & MODEM_CONTROL_RTS != 0 {
                inputs |= MODEM_STATUS_CTS;
            }
            if mcr & MODEM_CONTROL_DTR != 0 {
                inputs |= MODEM_STATUS_DSR;
            }
            if mcr & MODEM_CONTROL_OUT1 != 0 {
                inputs |= MODEM_STATUS_RI;
            }
            if mcr & MODEM_CONTROL_OUT2 != 0 {
                inputs |= MODEM_STATUS_DCD;
            }
            inputs
        }
        else {
            MODEM_STATUS_CTS | MODEM_STATUS_DSR | MODEM_STATUS_DCD
        };
        let changed = (self.modem_status_reg ^ inputs) & !MODEM_STATUS_DELTA_MASK;
        // Each input occupies the bit four above its delta bit.
        let deltas = changed >> 4;
        self.modem_status_reg = (self.modem_status_reg & MODEM_STATUS_DELTA_MASK) | deltas | inputs;
        if deltas != 0 {
            self.raise_interrupt_type(INTERRUPT_MODEM_STATUS);
        }
    }

    fn raise_interrupt_type(&mut self, interrupt_flag: u8) {
        if interrupt_flag & self.interrupt_enable_reg != 0 {
            self.interrupts_active |= interrupt_flag;
        }
    }

    fn lower_interrupt_type(&mut self, interrupt_flag: u8) {
        self.interrupts_active &= !interrupt_flag;
    }

    fn update_irq(&mut self, ctx: &mut DeviceContext<'_>) {
        let level = self.irq_enabled && self.interrupts_active != 0;
        if level != self.irq_asserted {
            self.irq_asserted = level;
            ctx.set_irq(self.irq, level);
        }
    }

    fn receive_byte(&mut self, byte: u8) {
        if self.rx_fifo.len() >= RX_FIFO_LEN {
            log::debug!("{}: Rx overrun, byte {:02X} lost", self.name, byte);
            self.line_status_reg |= STATUS_OVERRUN_ERROR;
            self.raise_interrupt_type(INTERRUPT_RX_LINE_STATUS);
            return;
        }
        self.rx_fifo.push_back(byte);
        self.rx_count += 1;
        self.line_status_reg |= STATUS_DATA_READY;
        self.raise_interrupt_type(INTERRUPT_DATA_AVAIL);
    }

    fn on_tx_done(&mut self, ctx: &mut DeviceContext<'_>) {
        if let Some(byte) = self.tx_queue.pop_front() {
            self.tx_count += 1;
            if self.loopback() {
                self.receive_byte(byte);
            }
            else {
                ctx.console_write(&[byte]);
            }
        }
        if self.tx_queue.is_empty() {
            self.line_status_reg |= STATUS_TRANSMIT_EMPTY | STATUS_TX_SHIFT_EMPTY;
            self.raise_interrupt_type(INTERRUPT_TX_EMPTY);
        }
        else {
            ctx.schedule(EVENT_TX_DONE, self.char_time);
        }
    }

    fn on_rx_poll(&mut self, ctx: &mut DeviceContext<'_>) {
        if !self.loopback() && self.rx_fifo.is_empty() {
            let mut byte = [0u8; 1];
            if ctx.console_read(&mut byte) > 0 {
                self.receive_byte(byte[0]);
            }
        }
        ctx.schedule(EVENT_RX_POLL, self.poll_interval);
    }
}

impl Device for Uart {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("INS8250 UART at port {}, {} baud", self.base_port, self.baud())
    }

    fn base_port(&self) -> u16 {
        self.base_port
    }

    fn port_count(&self) -> u16 {
        UART_PORT_COUNT
    }

    fn direction(&self) -> PortDirection {
        PortDirection::InOut
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        ctx.cancel_all();
        self.line_control_reg = 0;
        self.divisor = DEFAULT_DIVISOR;
        self.set_timing();
        self.interrupt_enable_reg = 0;
        self.interrupts_active = 0;
        self.modem_control_reg = 0;
        self.line_status_reg = STATUS_TRANSMIT_EMPTY | STATUS_TX_SHIFT_EMPTY;
        self.modem_status_reg = MODEM_STATUS_CTS | MODEM_STATUS_DSR | MODEM_STATUS_DCD;
        self.scratch_reg = 0;
        self.rx_byte = 0;
        self.rx_fifo.clear();
        self.tx_queue.clear();
        self.update_irq(ctx);
        ctx.schedule(EVENT_RX_POLL, self.poll_interval);
    }

    fn read(&mut self, port: u16, ctx: &mut DeviceContext<'_>) -> u8 {
        self.read_register(port.wrapping_sub(self.base_port) as u8, ctx)
    }

    fn write(&mut self, port: u16, data: u8, ctx: &mut DeviceContext<'_>) {
        self.write_register(port.wrapping_sub(self.base_port) as u8, data, ctx)
    }

    fn on_event(&mut self, param: EventParam, ctx: &mut DeviceContext<'_>) {
        match param {
            EVENT_TX_DONE => self.on_tx_done(ctx),
            EVENT_RX_POLL => self.on_rx_poll(ctx),
            _ => log::warn!("{}: unknown event {}", self.name, param),
        }
        self.update_irq(ctx);
    }

    fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{}", self.description())?;
        writeln!(
            out,
            "  LCR {:02X} IER {:02X} IIR {:02X} MCR {:02X} LSR {:02X} MSR {:02X} SCR {:02X} DIV {:04X}",
            self.line_control_reg,
            self.interrupt_enable_reg,
            self.calc_iir(),
            self.modem_control_reg,
            self.line_status_reg,
            self.modem_status_reg,
            self.scratch_reg,
            self.divisor
        )?;
        writeln!(
            out,
            "  rx fifo {} tx queue {}, {} received, {} sent{}",
            self.rx_fifo.len(),
            self.tx_queue.len(),
            self.rx_count,
            self.tx_count,
            if self.loopback() { ", loopback" } else { "" }
        )
    }
}
