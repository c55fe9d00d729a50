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

//! The front panel: an output latch driving a two digit hexadecimal POST display, and an input
//! latch reading a bank of eight DIP switches.

use std::fmt;

use crate::{
    device::{Device, DeviceContext},
    port_map::PortDirection,
};

pub struct PostDisplay {
    port: u16,
    value: u8,
    writes: u64,
}

impl PostDisplay {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            value: 0,
            writes: 0,
        }
    }

    pub fn value(&self) -> u8 {
        self.value
    }
}

impl Device for PostDisplay {
    fn name(&self) -> &str {
        "POST"
    }

    fn description(&self) -> String {
        format!("POST display at port {}", self.port)
    }

    fn base_port(&self) -> u16 {
        self.port
    }

    fn port_count(&self) -> u16 {
        1
    }

    fn direction(&self) -> PortDirection {
        PortDirection::Output
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        ctx.cancel_all();
        self.value = 0;
    }

    fn write(&mut self, _port: u16, data: u8, _ctx: &mut DeviceContext<'_>) {
        self.writes += 1;
        if data != self.value {
            log::debug!("POST code {:02X}", data);
        }
        self.value = data;
    }

    fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{}: {:02X} ({} writes)", self.description(), self.value, self.writes)
    }
}

pub struct DipSwitches {
    port: u16,
    value: u8,
}

impl DipSwitches {
    pub fn new(port: u16, value: u8) -> Self {
        Self { port, value }
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn set_value(&mut self, value: u8) {
        self.value = value;
    }
}

impl Device for DipSwitches {
    fn name(&self) -> &str {
        "SWITCHES"
    }

    fn description(&self) -> String {
        format!("DIP switches at port {}", self.port)
    }

    fn base_port(&self) -> u16 {
        self.port
    }

    fn port_count(&self) -> u16 {
        1
    }

    fn direction(&self) -> PortDirection {
        PortDirection::Input
    }

    // Switch positions survive a reset.
    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        ctx.cancel_all();
    }

    fn read(&mut self, _port: u16, _ctx: &mut DeviceContext<'_>) -> u8 {
        self.value
    }

    fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{}: {:02X} ({:08b})", self.description(), self.value, self.value)
    }
}
