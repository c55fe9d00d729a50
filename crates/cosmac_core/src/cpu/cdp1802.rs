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

//! RCA CDP1802 interpreter.
//!
//! Every instruction takes two machine cycles except the long branches and skips (0xC0-0xCF),
//! which take three. An interrupt acknowledge takes one. At eight clocks per machine cycle the
//! caller converts cycles to time with [crate::time::CpuClock].

use std::fmt;

use crate::{
    cpu::{CpuBus, StopCode, REGISTER_NAMES},
    devices::soft_serial::Q_FLAG,
    error::CoreError,
};

const SHORT_CYCLES: u32 = 2;
const LONG_CYCLES: u32 = 3;
const INTERRUPT_CYCLES: u32 = 1;

/// The one opcode the base 1802 leaves undefined.
pub const ILLEGAL_OPCODE: u8 = 0x68;

pub struct Cdp1802 {
    r: [u16; 16],
    d: u8,
    df: bool,
    p: u8,
    x: u8,
    t: u8,
    ie: bool,
    q: bool,
    idle: bool,

    stop_on_illegal_io: bool,
    stop_on_endless_loop: bool,
    instruction_count: u64,
    interrupt_count: u64,
}

impl Default for Cdp1802 {
    fn default() -> Self {
        Self::new()
    }
}

impl Cdp1802 {
    pub fn new() -> Self {
        Self {
            r: [0; 16],
            d: 0,
            df: false,
            p: 0,
            x: 0,
            t: 0,
            ie: true,
            q: false,
            idle: false,
            stop_on_illegal_io: true,
            stop_on_endless_loop: true,
            instruction_count: 0,
            interrupt_count: 0,
        }
    }

    pub fn set_stop_on_illegal_io(&mut self, on: bool) {
        self.stop_on_illegal_io = on;
    }

    pub fn set_stop_on_endless_loop(&mut self, on: bool) {
        self.stop_on_endless_loop = on;
    }

    /// Hardware reset: X, P, Q and R0 are cleared and interrupts enabled.
    pub fn reset(&mut self, bus: &mut impl CpuBus) {
        self.x = 0;
        self.p = 0;
        self.r[0] = 0;
        self.ie = true;
        self.idle = false;
        self.q = false;
        bus.set_flag(Q_FLAG, false);
        self.instruction_count = 0;
        self.interrupt_count = 0;
    }

    #[inline]
    pub fn pc(&self) -> u16 {
        self.r[self.p as usize]
    }

    pub fn set_pc(&mut self, address: u16) {
        self.r[self.p as usize] = address;
    }

    pub fn r(&self, n: usize) -> u16 {
        self.r[n & 0x0F]
    }

    pub fn d(&self) -> u8 {
        self.d
    }

    pub fn df(&self) -> bool {
        self.df
    }

    pub fn p(&self) -> u8 {
        self.p
    }

    pub fn x(&self) -> u8 {
        self.x
    }

    pub fn q(&self) -> bool {
        self.q
    }

    pub fn ie(&self) -> bool {
        self.ie
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    pub fn interrupt_count(&self) -> u64 {
        self.interrupt_count
    }

    /// Look up a register by name, case-insensitively. `PC` names the current program counter.
    pub fn register(&self, name: &str) -> Option<u16> {
        let name = name.to_ascii_uppercase();
        Some(match name.as_str() {
            "D" => self.d as u16,
            "DF" => self.df as u16,
            "P" => self.p as u16,
            "X" => self.x as u16,
            "T" => self.t as u16,
            "IE" => self.ie as u16,
            "Q" => self.q as u16,
            "PC" => self.pc(),
            _ => self.r[Self::r_index(&name)?],
        })
    }

    /// Deposit into a register by name. Values are truncated to the width of the register.
    /// Returns the new value of Q if it changed.
    pub fn set_register(&mut self, name: &str, value: u16) -> Result<Option<bool>, CoreError> {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "D" => self.d = value as u8,
            "DF" => self.df = value & 1 != 0,
            "P" => self.p = (value & 0x0F) as u8,
            "X" => self.x = (value & 0x0F) as u8,
            "T" => self.t = value as u8,
            "IE" => self.ie = value & 1 != 0,
            "Q" => {
                let q = value & 1 != 0;
                let changed = q != self.q;
                self.q = q;
                return Ok(changed.then_some(q));
            }
            "PC" => self.set_pc(value),
            _ => {
                let index = Self::r_index(&upper).ok_or_else(|| CoreError::UnknownRegister(name.to_string()))?;
                self.r[index] = value;
            }
        }
        Ok(None)
    }

    fn r_index(name: &str) -> Option<usize> {
        let digit = name.strip_prefix('R')?;
        if digit.len() != 1 {
            return None;
        }
        usize::from_str_radix(digit, 16).ok()
    }

    #[inline]
    fn fetch(&mut self, bus: &mut impl CpuBus) -> u8 {
        let p = self.p as usize;
        let byte = bus.mem_read(self.r[p]);
        self.r[p] = self.r[p].wrapping_add(1);
        byte
    }

    #[inline]
    fn mrx(&self, bus: &mut impl CpuBus) -> u8 {
        bus.mem_read(self.r[self.x as usize])
    }

    #[inline]
    fn inc_rx(&mut self) {
        let x = self.x as usize;
        self.r[x] = self.r[x].wrapping_add(1);
    }

    fn set_q(&mut self, q: bool, bus: &mut impl CpuBus) {
        if q != self.q {
            self.q = q;
            bus.set_flag(Q_FLAG, q);
        }
    }

    fn add(&mut self, a: u8, b: u8, carry: bool) {
        let sum = a as u16 + b as u16 + carry as u16;
        self.d = sum as u8;
        self.df = sum > 0xFF;
    }

    /// `a - b - borrow`. DF is set when no borrow occurs.
    fn sub(&mut self, a: u8, b: u8, borrow: bool) {
        let diff = a as i16 - b as i16 - borrow as i16;
        self.d = diff as u8;
        self.df = diff >= 0;
    }

    /// Short branch to the operand byte if `cond`, else skip it.
    fn short_branch(&mut self, cond: bool, bus: &mut impl CpuBus) {
        let p = self.p as usize;
        if cond {
            let low = bus.mem_read(self.r[p]);
            self.r[p] = (self.r[p] & 0xFF00) | low as u16;
        }
        else {
            self.r[p] = self.r[p].wrapping_add(1);
        }
    }

    fn long_branch(&mut self, cond: bool, bus: &mut impl CpuBus) {
        let p = self.p as usize;
        if cond {
            let hi = bus.mem_read(self.r[p]);
            let lo = bus.mem_read(self.r[p].wrapping_add(1));
            self.r[p] = u16::from_be_bytes([hi, lo]);
        }
        else {
            self.r[p] = self.r[p].wrapping_add(2);
        }
    }

    fn long_skip(&mut self, cond: bool) {
        if cond {
            let p = self.p as usize;
            self.r[p] = self.r[p].wrapping_add(2);
        }
    }

    fn interrupt(&mut self) {
        self.t = (self.x << 4) | self.p;
        self.x = 2;
        self.p = 1;
        self.ie = false;
        self.idle = false;
        self.interrupt_count += 1;
    }

    /// Execute one instruction, or acknowledge one interrupt. Returns the machine cycles used.
    ///
    /// A breakpoint on the opcode address stops before anything executes unless `skip_break` is
    /// set. On any stop, the program counter is left at the instruction that caused it.
    pub fn step(&mut self, bus: &mut impl CpuBus, skip_break: bool) -> Result<u32, StopCode> {
        if self.ie && bus.interrupt_pending() {
            log::trace!("Interrupt acknowledged at {:04X}", self.pc());
            self.interrupt();
            return Ok(INTERRUPT_CYCLES);
        }
        if self.idle {
            return Ok(SHORT_CYCLES);
        }

        let address = self.pc();
        bus.take_break();
        let opcode = self.fetch(bus);
        if let Some(bp) = bus.take_break() {
            if !skip_break && bp == address {
                self.set_pc(address);
                return Err(StopCode::Breakpoint(address));
            }
        }

        let cycles = self.execute(opcode, address, bus)?;
        self.instruction_count += 1;
        Ok(cycles)
    }

    fn execute(&mut self, opcode: u8, address: u16, bus: &mut impl CpuBus) -> Result<u32, StopCode> {
        let n = (opcode & 0x0F) as usize;
        match opcode >> 4 {
            0x0 => {
                if n == 0 {
                    // IDL
                    if !self.ie {
                        self.set_pc(address);
                        return Err(StopCode::Halt(address));
                    }
                    self.idle = true;
                }
                else {
                    self.d = bus.mem_read(self.r[n]);
                }
            }
            0x1 => self.r[n] = self.r[n].wrapping_add(1),
            0x2 => self.r[n] = self.r[n].wrapping_sub(1),
            0x3 => {
                if opcode == 0x30 && self.stop_on_endless_loop && !self.ie {
                    let target = (self.pc() & 0xFF00) | bus.mem_read(self.pc()) as u16;
                    if target == address {
                        self.set_pc(address);
                        return Err(StopCode::EndlessLoop(address));
                    }
                }
                let cond = match n & 0x07 {
                    0 => true,
                    1 => self.q,
                    2 => self.d == 0,
                    3 => self.df,
                    ef => bus.sense(ef - 4),
                };
                if opcode == 0x38 {
                    // SKP
                    self.r[self.p as usize] = self.pc().wrapping_add(1);
                }
                else {
                    self.short_branch(cond != (n & 0x08 != 0), bus);
                }
            }
            0x4 => {
                self.d = bus.mem_read(self.r[n]);
                self.r[n] = self.r[n].wrapping_add(1);
            }
            0x5 => bus.mem_write(self.r[n], self.d),
            0x6 => match n {
                0 => self.inc_rx(),
                1..=7 => {
                    let byte = self.mrx(bus);
                    if !bus.io_write(n as u16, byte) && self.stop_on_illegal_io {
                        self.set_pc(address);
                        return Err(StopCode::IllegalIo { port: n as u16, address });
                    }
                    self.inc_rx();
                }
                8 => {
                    self.set_pc(address);
                    return Err(StopCode::IllegalOpcode { opcode, address });
                }
                _ => {
                    let port = (n & 0x07) as u16;
                    let byte = match bus.io_read(port) {
                        Some(byte) => byte,
                        None if self.stop_on_illegal_io => {
                            self.set_pc(address);
                            return Err(StopCode::IllegalIo { port, address });
                        }
                        None => 0xFF,
                    };
                    bus.mem_write(self.r[self.x as usize], byte);
                    self.d = byte;
                }
            },
            0x7 => self.execute_7x(n, bus),
            0x8 => self.d = self.r[n] as u8,
            0x9 => self.d = (self.r[n] >> 8) as u8,
            0xA => self.r[n] = (self.r[n] & 0xFF00) | self.d as u16,
            0xB => self.r[n] = (self.r[n] & 0x00FF) | (self.d as u16) << 8,
            0xC => {
                if opcode == 0xC0 && self.stop_on_endless_loop && !self.ie {
                    let hi = bus.mem_read(self.pc());
                    let lo = bus.mem_read(self.pc().wrapping_add(1));
                    if u16::from_be_bytes([hi, lo]) == address {
                        self.set_pc(address);
                        return Err(StopCode::EndlessLoop(address));
                    }
                }
                self.execute_cx(n, bus);
                return Ok(LONG_CYCLES);
            }
            0xD => self.p = n as u8,
            0xE => self.x = n as u8,
            _ => self.execute_fx(n, bus),
        }
        Ok(SHORT_CYCLES)
    }

    fn execute_7x(&mut self, n: usize, bus: &mut impl CpuBus) {
        match n {
            0x0 | 0x1 => {
                // RET, DIS
                let xp = self.mrx(bus);
                self.inc_rx();
                self.x = xp >> 4;
                self.p = xp & 0x0F;
                self.ie = n == 0;
            }
            0x2 => {
                self.d = self.mrx(bus);
                self.inc_rx();
            }
            0x3 => {
                let x = self.x as usize;
                bus.mem_write(self.r[x], self.d);
                self.r[x] = self.r[x].wrapping_sub(1);
            }
            0x4 => {
                let m = self.mrx(bus);
                self.add(m, self.d, self.df);
            }
            0x5 => {
                let m = self.mrx(bus);
                self.sub(m, self.d, !self.df);
            }
            0x6 => {
                let carry = self.df;
                self.df = self.d & 0x01 != 0;
                self.d = (self.d >> 1) | if carry { 0x80 } else { 0 };
            }
            0x7 => {
                let m = self.mrx(bus);
                self.sub(self.d, m, !self.df);
            }
            0x8 => bus.mem_write(self.r[self.x as usize], self.t),
            0x9 => {
                // MARK
                self.t = (self.x << 4) | self.p;
                bus.mem_write(self.r[2], self.t);
                self.x = self.p;
                self.r[2] = self.r[2].wrapping_sub(1);
            }
            0xA => self.set_q(false, bus),
            0xB => self.set_q(true, bus),
            0xC => {
                let m = self.fetch(bus);
                self.add(m, self.d, self.df);
            }
            0xD => {
                let m = self.fetch(bus);
                self.sub(m, self.d, !self.df);
            }
            0xE => {
                let carry = self.df;
                self.df = self.d & 0x80 != 0;
                self.d = (self.d << 1) | carry as u8;
            }
            _ => {
                let m = self.fetch(bus);
                self.sub(self.d, m, !self.df);
            }
        }
    }

    fn execute_cx(&mut self, n: usize, bus: &mut impl CpuBus) {
        match n {
            0x0 => self.long_branch(true, bus),
            0x1 => self.long_branch(self.q, bus),
            0x2 => self.long_branch(self.d == 0, bus),
            0x3 => self.long_branch(self.df, bus),
            0x4 => {}
            0x5 => self.long_skip(!self.q),
            0x6 => self.long_skip(self.d != 0),
            0x7 => self.long_skip(!self.df),
            0x8 => self.long_skip(true),
            0x9 => self.long_branch(!self.q, bus),
            0xA => self.long_branch(self.d != 0, bus),
            0xB => self.long_branch(!self.df, bus),
            0xC => self.long_skip(self.ie),
            0xD => self.long_skip(self.q),
            0xE => self.long_skip(self.d == 0),
            _ => self.long_skip(self.df),
        }
    }

    fn execute_fx(&mut self, n: usize, bus: &mut impl CpuBus) {
        // F0-F7 take the operand from M(R(X)), F8-FF from the immediate byte.
        let m = if n == 0x0 || n == 0x6 || n == 0xE {
            0
        }
        else if n < 8 {
            self.mrx(bus)
        }
        else {
            self.fetch(bus)
        };
        match n {
            0x0 => self.d = self.mrx(bus),
            0x8 => self.d = m,
            0x1 | 0x9 => self.d |= m,
            0x2 | 0xA => self.d &= m,
            0x3 | 0xB => self.d ^= m,
            0x4 | 0xC => self.add(m, self.d, false),
            0x5 | 0xD => self.sub(m, self.d, false),
            0x6 => {
                self.df = self.d & 0x01 != 0;
                self.d >>= 1;
            }
            0xE => {
                self.df = self.d & 0x80 != 0;
                self.d <<= 1;
            }
            _ => self.sub(self.d, m, false),
        }
    }
}

impl fmt::Display for Cdp1802 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "D={:02X} DF={} P={:X} X={:X} T={:02X} IE={} Q={}{}",
            self.d,
            self.df as u8,
            self.p,
            self.x,
            self.t,
            self.ie as u8,
            self.q as u8,
            if self.idle { " IDLE" } else { "" }
        )?;
        for (i, name) in REGISTER_NAMES[7..].iter().enumerate() {
            write!(f, "{}={:04X}", name, self.r[i])?;
            f.write_str(if i % 8 == 7 { "\n" } else { " " })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBus {
        mem: Vec<u8>,
        ports: [Option<u8>; 8],
        outputs: Vec<(u16, u8)>,
        ef: [bool; 4],
        q_changes: Vec<bool>,
        irq: bool,
        breaks: Vec<u16>,
        pending_break: Option<u16>,
    }

    impl TestBus {
        fn new(program: &[u8]) -> Self {
            let mut mem = vec![0; 0x10000];
            mem[..program.len()].copy_from_slice(program);
            Self {
                mem,
                ports: [None; 8],
                outputs: Vec::new(),
                ef: [false; 4],
                q_changes: Vec::new(),
                irq: false,
                breaks: Vec::new(),
                pending_break: None,
            }
        }
    }

    impl CpuBus for TestBus {
        fn mem_read(&mut self, address: u16) -> u8 {
            if self.breaks.contains(&address) {
                self.pending_break = Some(address);
            }
            self.mem[address as usize]
        }
        fn mem_write(&mut self, address: u16, byte: u8) {
            self.mem[address as usize] = byte;
        }
        fn io_read(&mut self, port: u16) -> Option<u8> {
            self.ports[port as usize]
        }
        fn io_write(&mut self, port: u16, byte: u8) -> bool {
            if self.ports[port as usize].is_none() {
                return false;
            }
            self.outputs.push((port, byte));
            true
        }
        fn sense(&mut self, index: usize) -> bool {
            self.ef[index]
        }
        fn set_flag(&mut self, _index: usize, bit: bool) {
            self.q_changes.push(bit);
        }
        fn interrupt_pending(&self) -> bool {
            self.irq
        }
        fn take_break(&mut self) -> Option<u16> {
            self.pending_break.take()
        }
    }

    fn run(cpu: &mut Cdp1802, bus: &mut TestBus, n: usize) -> u32 {
        (0..n).map(|_| cpu.step(bus, false).unwrap()).sum()
    }

    #[test]
    fn load_immediate_and_arithmetic() {
        // LDI 0x80; ADI 0x90; (DF=1, D=0x10) ADCI 0x01 (D=0x12); SMI 0x13 (D=FF, DF=0)
        let mut bus = TestBus::new(&[0xF8, 0x80, 0xFC, 0x90, 0x7C, 0x01, 0xFF, 0x13]);
        let mut cpu = Cdp1802::new();
        run(&mut cpu, &mut bus, 2);
        assert_eq!((cpu.d(), cpu.df()), (0x10, true));
        run(&mut cpu, &mut bus, 1);
        assert_eq!(cpu.d(), 0x12);
        run(&mut cpu, &mut bus, 1);
        assert_eq!((cpu.d(), cpu.df()), (0xFF, false));
    }

    #[test]
    fn subtract_sets_df_when_no_borrow() {
        // LDI 5; SDI 7 (7-5=2, DF=1); SMI 3 (2-3=FF, DF=0); SMBI 0 (FF-0-1=FE, DF=1)
        let mut bus = TestBus::new(&[0xF8, 0x05, 0xFD, 0x07, 0xFF, 0x03, 0x7F, 0x00]);
        let mut cpu = Cdp1802::new();
        run(&mut cpu, &mut bus, 2);
        assert_eq!((cpu.d(), cpu.df()), (0x02, true));
        run(&mut cpu, &mut bus, 1);
        assert_eq!((cpu.d(), cpu.df()), (0xFF, false));
        run(&mut cpu, &mut bus, 1);
        assert_eq!((cpu.d(), cpu.df()), (0xFE, true));
    }

    #[test]
    fn register_transfers_and_memory_reference() {
        // LDI 12; PHI 3; LDI 34; PLO 3; LDI AA; STR 3; LDN 3 -> D=AA; INC 3; GLO 3
        let program = [0xF8, 0x12, 0xB3, 0xF8, 0x34, 0xA3, 0xF8, 0xAA, 0x53, 0xF8, 0x00, 0x03, 0x13, 0x83];
        let mut bus = TestBus::new(&program);
        let mut cpu = Cdp1802::new();
        run(&mut cpu, &mut bus, 6);
        assert_eq!(cpu.r(3), 0x1234);
        assert_eq!(bus.mem[0x1234], 0xAA);
        run(&mut cpu, &mut bus, 3);
        assert_eq!(cpu.d(), 0xAA);
        run(&mut cpu, &mut bus, 1);
        assert_eq!(cpu.d(), 0x35);
    }

    #[test]
    fn branches_and_long_branch_cycles() {
        // 0000: LDI 0; BZ 06; ... 0006: LBR 0100 ; 0100: SEQ; LSQ ; (skip) ; NOP
        let mut program = vec![0xF8, 0x00, 0x32, 0x06, 0x00, 0x00, 0xC0, 0x01, 0x00];
        program.resize(0x100, 0);
        program.extend_from_slice(&[0x7B, 0xCD, 0xF8, 0x11, 0xC4]);
        let mut bus = TestBus::new(&program);
        let mut cpu = Cdp1802::new();

        assert_eq!(run(&mut cpu, &mut bus, 2), 4);
        assert_eq!(cpu.pc(), 0x0006);
        assert_eq!(cpu.step(&mut bus, false), Ok(3));
        assert_eq!(cpu.pc(), 0x0100);
        run(&mut cpu, &mut bus, 1);
        assert_eq!(bus.q_changes, vec![true]);
        assert_eq!(cpu.step(&mut bus, false), Ok(3));
        assert_eq!(cpu.pc(), 0x0104);
        assert_eq!(cpu.step(&mut bus, false), Ok(3));
    }

    #[test]
    fn ef_inputs_drive_branches() {
        // B3 10; BN3 20
        let mut bus = TestBus::new(&[0x36, 0x10]);
        bus.mem[0x10] = 0x3E;
        bus.mem[0x11] = 0x20;
        let mut cpu = Cdp1802::new();
        bus.ef[2] = true;
        run(&mut cpu, &mut bus, 1);
        assert_eq!(cpu.pc(), 0x10);
        run(&mut cpu, &mut bus, 1);
        assert_eq!(cpu.pc(), 0x12);
    }

    #[test]
    fn shifts_through_df() {
        // LDI 81; SHR (D=40 DF=1); SHRC (D=A0 DF=0); SHL (D=40 DF=1); SHLC (D=81 DF=0)
        let mut bus = TestBus::new(&[0xF8, 0x81, 0xF6, 0x76, 0xFE, 0x7E]);
        let mut cpu = Cdp1802::new();
        run(&mut cpu, &mut bus, 2);
        assert_eq!((cpu.d(), cpu.df()), (0x40, true));
        run(&mut cpu, &mut bus, 1);
        assert_eq!((cpu.d(), cpu.df()), (0xA0, false));
        run(&mut cpu, &mut bus, 1);
        assert_eq!((cpu.d(), cpu.df()), (0x40, true));
        run(&mut cpu, &mut bus, 1);
        assert_eq!((cpu.d(), cpu.df()), (0x81, false));
    }

    #[test]
    fn input_output_and_illegal_io() {
        // SEX 3 (R3=0); OUT 4 (M(0)=E3); INP 5 -> M(R3), D
        let mut bus = TestBus::new(&[0xE3, 0x64, 0x6D, 0x66]);
        bus.ports[4] = Some(0);
        bus.ports[5] = Some(0x5A);
        let mut cpu = Cdp1802::new();
        run(&mut cpu, &mut bus, 3);
        assert_eq!(bus.outputs, vec![(4, 0xE3)]);
        assert_eq!(cpu.d(), 0x5A);
        assert_eq!(bus.mem[1], 0x5A);
        assert_eq!(cpu.step(&mut bus, false), Err(StopCode::IllegalIo { port: 6, address: 3 }));
        assert_eq!(cpu.pc(), 3);

        cpu.set_stop_on_illegal_io(false);
        assert_eq!(cpu.step(&mut bus, false), Ok(2));
    }

    #[test]
    fn illegal_opcode_stops_before_execution() {
        let mut bus = TestBus::new(&[0xC4, 0x68]);
        let mut cpu = Cdp1802::new();
        run(&mut cpu, &mut bus, 1);
        assert_eq!(
            cpu.step(&mut bus, false),
            Err(StopCode::IllegalOpcode { opcode: 0x68, address: 1 })
        );
        assert_eq!(cpu.pc(), 1);
    }

    #[test]
    fn idle_halts_with_interrupts_disabled() {
        // DIS (M(R0)... ) uses X=0: byte at R0 after fetch is 0x00 -> X=0 P=0
        let mut bus = TestBus::new(&[0x71, 0x00, 0x00]);
        let mut cpu = Cdp1802::new();
        run(&mut cpu, &mut bus, 1);
        assert!(!cpu.ie());
        assert_eq!(cpu.step(&mut bus, false), Err(StopCode::Halt(2)));
    }

    #[test]
    fn idle_waits_for_interrupt() {
        let mut bus = TestBus::new(&[0x00, 0xC4]);
        let mut cpu = Cdp1802::new();
        run(&mut cpu, &mut bus, 3);
        assert!(cpu.is_idle());
        assert_eq!(cpu.pc(), 1);

        bus.irq = true;
        assert_eq!(cpu.step(&mut bus, false), Ok(1));
        assert!(!cpu.is_idle());
        assert_eq!((cpu.p(), cpu.x(), cpu.ie()), (1, 2, false));
        assert_eq!(cpu.register("T"), Some(0x00));
        assert_eq!(cpu.interrupt_count(), 1);
    }

    #[test]
    fn interrupt_return_restores_xp() {
        // Main at R0: SEX 2 is not needed; the handler in R1 does RET via R2 stack.
        let mut bus = TestBus::new(&[0xC4, 0xC4]);
        bus.mem[0x200] = 0x70; // RET at R1
        bus.mem[0x300] = 0x00; // XP = 00
        let mut cpu = Cdp1802::new();
        cpu.set_register("R1", 0x200).unwrap();
        cpu.set_register("R2", 0x300).unwrap();
        bus.irq = true;
        cpu.step(&mut bus, false).unwrap();
        bus.irq = false;
        cpu.step(&mut bus, false).unwrap();
        assert_eq!((cpu.p(), cpu.x(), cpu.ie()), (0, 0, true));
        assert_eq!(cpu.r(2), 0x301);
    }

    #[test]
    fn mark_saves_xp_on_stack() {
        // SEX 5; MARK
        let mut bus = TestBus::new(&[0xE5, 0x79]);
        let mut cpu = Cdp1802::new();
        cpu.set_register("R2", 0x400).unwrap();
        run(&mut cpu, &mut bus, 2);
        assert_eq!(bus.mem[0x400], 0x50);
        assert_eq!(cpu.r(2), 0x3FF);
        assert_eq!(cpu.x(), 0);
    }

    #[test]
    fn branch_to_self_is_endless_loop() {
        // DIS with M(R0)=00; then BR to self at 0002
        let mut bus = TestBus::new(&[0x71, 0x00, 0x30, 0x02]);
        let mut cpu = Cdp1802::new();
        run(&mut cpu, &mut bus, 1);
        assert_eq!(cpu.step(&mut bus, false), Err(StopCode::EndlessLoop(2)));

        cpu.set_stop_on_endless_loop(false);
        assert_eq!(cpu.step(&mut bus, false), Ok(2));
        assert_eq!(cpu.pc(), 2);
    }

    #[test]
    fn breakpoint_stops_before_fetch_executes() {
        let mut bus = TestBus::new(&[0xC4, 0xF8, 0x42]);
        bus.breaks.push(1);
        let mut cpu = Cdp1802::new();
        run(&mut cpu, &mut bus, 1);
        assert_eq!(cpu.step(&mut bus, false), Err(StopCode::Breakpoint(1)));
        assert_eq!(cpu.pc(), 1);
        assert_eq!(cpu.instruction_count(), 1);
        assert_eq!(cpu.step(&mut bus, true), Ok(2));
        assert_eq!(cpu.d(), 0x42);
    }

    #[test]
    fn registers_by_name() {
        let mut cpu = Cdp1802::new();
        cpu.set_register("ra", 0xBEEF).unwrap();
        assert_eq!(cpu.register("RA"), Some(0xBEEF));
        assert_eq!(cpu.set_register("q", 1).unwrap(), Some(true));
        assert_eq!(cpu.set_register("q", 1).unwrap(), None);
        assert!(matches!(cpu.set_register("RG", 0), Err(CoreError::UnknownRegister(_))));
        assert_eq!(cpu.register("R10"), None);
        for name in REGISTER_NAMES {
            assert!(cpu.register(name).is_some());
        }
    }

    #[test]
    fn reset_clears_xp_and_q() {
        let mut bus = TestBus::new(&[0x7B, 0xE4, 0xD3]);
        let mut cpu = Cdp1802::new();
        run(&mut cpu, &mut bus, 3);
        assert_eq!((cpu.p(), cpu.x(), cpu.q()), (3, 4, true));
        cpu.reset(&mut bus);
        assert_eq!((cpu.p(), cpu.x(), cpu.q(), cpu.r(0)), (0, 0, false, 0));
        assert_eq!(bus.q_changes.last(), Some(&false));
    }
}
