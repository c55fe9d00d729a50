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

//! The CPU contract: the bus a CPU executes against, the reasons it stops, and the register names
//! the user interface may examine and deposit.

pub mod cdp1802;
pub mod disassembler;

use std::fmt;

pub use cdp1802::Cdp1802;

/// Everything the CPU reaches outside of itself.
pub trait CpuBus {
    fn mem_read(&mut self, address: u16) -> u8;
    fn mem_write(&mut self, address: u16, byte: u8);

    /// Read input port `port`, or None if no device answers.
    fn io_read(&mut self, port: u16) -> Option<u8>;

    /// Write output port `port`. Returns false if no device answers.
    fn io_write(&mut self, port: u16, byte: u8) -> bool;

    /// The level of EF input `index` (0-3).
    fn sense(&mut self, index: usize) -> bool;

    /// Called whenever a flag output changes. The 1802 has one, Q, at index 0.
    fn set_flag(&mut self, index: usize, bit: bool);

    fn interrupt_pending(&self) -> bool;

    /// Take the address of a breakpoint raised by a memory read since the last call.
    fn take_break(&mut self) -> Option<u16>;
}

/// Why the CPU stopped executing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopCode {
    IllegalOpcode { opcode: u8, address: u16 },
    IllegalIo { port: u16, address: u16 },
    Breakpoint(u16),
    Halt(u16),
    EndlessLoop(u16),
    UserBreak,
    StepComplete,
}

impl fmt::Display for StopCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopCode::IllegalOpcode { opcode, address } => {
                write!(f, "Illegal opcode {:02X} at {:04X}", opcode, address)
            }
            StopCode::IllegalIo { port, address } => {
                write!(f, "Illegal I/O to port {} at {:04X}", port, address)
            }
            StopCode::Breakpoint(address) => write!(f, "Breakpoint at {:04X}", address),
            StopCode::Halt(address) => write!(f, "Halt at {:04X}", address),
            StopCode::EndlessLoop(address) => write!(f, "Endless loop at {:04X}", address),
            StopCode::UserBreak => write!(f, "User break"),
            StopCode::StepComplete => write!(f, "Step complete"),
        }
    }
}

/// Register names accepted by examine and deposit, in display order.
pub const REGISTER_NAMES: [&str; 23] = [
    "D", "DF", "P", "X", "T", "IE", "Q", "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "R9",
    "RA", "RB", "RC", "RD", "RE", "RF",
];
