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

//! The device contract shared by every peripheral, and the context through which devices reach the
//! machine state they do not own: the event queue, the console and the interrupt lines.

use std::fmt;

use enum_dispatch::enum_dispatch;

use crate::{
    console::{smart::TX_READY, Console, SmartConsole},
    devices::{
        combo::ComboCard,
        post::{DipSwitches, PostDisplay},
        soft_serial::SoftSerial,
    },
    events::{DeviceId, EventKey, EventParam, EventQueue, EventTarget},
    interrupt::{InterruptLines, IrqId},
    port_map::PortDirection,
    time::SimTime,
};

/// The byte read from an I/O port nothing drives.
pub const NO_IO_BYTE: u8 = 0xFF;

/// Composite devices route events to sub-devices by the high bits of the event parameter.
pub const SUB_DEVICE_MASK: EventParam = !0xFF;

/// Everything a device may touch while handling a port access, a flag change or an event.
pub struct DeviceContext<'a> {
    target: EventTarget,
    param_base: EventParam,
    events: &'a mut EventQueue,
    console: &'a mut SmartConsole,
    interrupts: &'a mut InterruptLines,
}

impl<'a> DeviceContext<'a> {
    pub fn new(
        id: DeviceId,
        events: &'a mut EventQueue,
        console: &'a mut SmartConsole,
        interrupts: &'a mut InterruptLines,
    ) -> Self {
        Self {
            target: EventTarget::Device(id),
            param_base: 0,
            events,
            console,
            interrupts,
        }
    }

    /// A context for a sub-device whose event parameters live at `base`.
    pub fn sub(&mut self, base: EventParam) -> DeviceContext<'_> {
        DeviceContext {
            target: self.target,
            param_base: base,
            events: &mut *self.events,
            console: &mut *self.console,
            interrupts: &mut *self.interrupts,
        }
    }

    #[inline]
    pub fn now(&self) -> SimTime {
        self.events.now()
    }

    fn key(&self, param: EventParam) -> EventKey {
        EventKey::new(self.target, self.param_base | param)
    }

    /// Schedule `param` to fire after `delay` ns, replacing any pending instance.
    pub fn schedule(&mut self, param: EventParam, delay: SimTime) {
        let key = self.key(param);
        if let Err(e) = self.events.schedule(key, delay) {
            log::error!("Failed to schedule event {:?}: {}", key, e);
        }
    }

    pub fn cancel(&mut self, param: EventParam) {
        let key = self.key(param);
        self.events.cancel(key);
    }

    pub fn is_scheduled(&self, param: EventParam) -> bool {
        self.events.is_scheduled(self.key(param))
    }

    pub fn deadline(&self, param: EventParam) -> Option<SimTime> {
        self.events.deadline(self.key(param))
    }

    /// Cancel every pending event belonging to this device or sub-device.
    pub fn cancel_all(&mut self) {
        let base = self.param_base;
        if base == 0 {
            self.events.cancel_where(self.target, |_| true);
        }
        else {
            self.events.cancel_where(self.target, |p| p & SUB_DEVICE_MASK == base);
        }
    }

    pub fn set_irq(&mut self, irq: Option<IrqId>, level: bool) {
        if let Some(id) = irq {
            self.interrupts.set(id, level);
        }
    }

    /// Read input for the emulated program. Bytes injected by the smart console are paced through
    /// the event queue.
    pub fn console_read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.console.raw_read(buf, 0);
        if let Some(delay) = self.console.take_pacing() {
            if let Err(e) = self
                .events
                .schedule(EventKey::new(EventTarget::Console, TX_READY), delay.max(1))
            {
                log::error!("Failed to schedule console pacing: {}", e);
            }
        }
        n
    }

    pub fn console_write(&mut self, bytes: &[u8]) {
        self.console.raw_write(bytes);
    }
}

/// Devices installed directly in the port map. The UART, IDE controller and RTC are reached
/// through the [ComboCard] that carries them.
#[enum_dispatch]
pub enum DeviceDispatch {
    SoftSerial,
    ComboCard,
    PostDisplay,
    DipSwitches,
}

/// The capability set every peripheral exposes. Ports passed to [Device::read] and
/// [Device::write] are absolute CPU port numbers.
#[enum_dispatch(DeviceDispatch)]
pub trait Device {
    fn name(&self) -> &str;
    fn description(&self) -> String;
    fn base_port(&self) -> u16;
    fn port_count(&self) -> u16;
    fn direction(&self) -> PortDirection;

    /// Return to the power-on state. Pending events are cancelled first.
    fn reset(&mut self, ctx: &mut DeviceContext<'_>);

    fn read(&mut self, _port: u16, _ctx: &mut DeviceContext<'_>) -> u8 {
        NO_IO_BYTE
    }

    fn write(&mut self, _port: u16, _data: u8, _ctx: &mut DeviceContext<'_>) {}

    /// Called when CPU flag output `index` changes.
    fn set_flag(&mut self, _index: usize, _bit: bool, _ctx: &mut DeviceContext<'_>) {}

    /// The level of EF input `index`, or `default` if this device does not drive it.
    fn get_sense(&self, _index: usize, default: bool) -> bool {
        default
    }

    fn on_event(&mut self, _param: EventParam, _ctx: &mut DeviceContext<'_>) {}

    fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result;
}
