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

//! The disk/UART/RTC combo card.
//!
//! The card occupies two ports. Writing the first port loads the select latch; reading it returns
//! the card status. The second port is the data path to the register chosen by the latch:
//!
//! | latch       | register                     |
//! |-------------|------------------------------|
//! | `1aaa aaaa` | RTC/NVR address `aaa aaaa`   |
//! | `0001 0rrr` | UART register `rrr`          |
//! | `0000 rrrr` | IDE register `rrrr`          |
//!
//! Each of the three sub-devices is optional. Their events are kept apart by the high byte of the
//! event parameter.

use std::fmt;

use crate::{
    device::{Device, DeviceContext, NO_IO_BYTE, SUB_DEVICE_MASK},
    error::CoreError,
    events::EventParam,
    port_map::PortDirection,
};

use super::{ide::IdeController, rtc::Rtc, uart::Uart};

pub const COMBO_PORT_COUNT: u16 = 2;

pub const IDE_EVENT_BASE: EventParam = 0x100;
pub const UART_EVENT_BASE: EventParam = 0x200;
pub const RTC_EVENT_BASE: EventParam = 0x300;

const SELECT_RTC: u8 = 0x80;
const SELECT_GROUP_MASK: u8 = 0x70;
const SELECT_IDE_GROUP: u8 = 0x00;
const SELECT_UART_GROUP: u8 = 0x10;

pub const CARD_STATUS_UART_IRQ: u8 = 0x01;
pub const CARD_STATUS_IDE: u8 = 0x20;
pub const CARD_STATUS_UART: u8 = 0x40;
pub const CARD_STATUS_RTC: u8 = 0x80;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Selected {
    Ide(u8),
    Uart(u8),
    Rtc(u8),
    Nothing,
}

pub struct ComboCard {
    name: String,
    base_port: u16,
    latch: u8,
    ide: Option<IdeController>,
    uart: Option<Uart>,
    rtc: Option<Rtc>,
}

impl ComboCard {
    pub fn new(name: &str, base_port: u16) -> Self {
        Self {
            name: name.to_string(),
            base_port,
            latch: 0,
            ide: None,
            uart: None,
            rtc: None,
        }
    }

    pub fn ide(&self) -> Option<&IdeController> {
        self.ide.as_ref()
    }

    pub fn ide_mut(&mut self) -> Option<&mut IdeController> {
        self.ide.as_mut()
    }

    pub fn uart(&self) -> Option<&Uart> {
        self.uart.as_ref()
    }

    pub fn uart_mut(&mut self) -> Option<&mut Uart> {
        self.uart.as_mut()
    }

    pub fn rtc(&self) -> Option<&Rtc> {
        self.rtc.as_ref()
    }

    pub fn rtc_mut(&mut self) -> Option<&mut Rtc> {
        self.rtc.as_mut()
    }

    /// True when no sub-device remains and the card can be removed.
    pub fn is_empty(&self) -> bool {
        self.ide.is_none() && self.uart.is_none() && self.rtc.is_none()
    }

    /// Install an IDE controller and bring it to its reset state.
    pub fn insert_ide(&mut self, mut ide: IdeController, ctx: &mut DeviceContext<'_>) -> Result<(), CoreError> {
        if self.ide.is_some() {
            return Err(CoreError::AlreadyAttached(format!("{} IDE", self.name)));
        }
        ide.reset(&mut ctx.sub(IDE_EVENT_BASE));
        self.ide = Some(ide);
        Ok(())
    }

    pub fn insert_uart(&mut self, mut uart: Uart, ctx: &mut DeviceContext<'_>) -> Result<(), CoreError> {
        if self.uart.is_some() {
            return Err(CoreError::AlreadyAttached(format!("{} UART", self.name)));
        }
        uart.reset(&mut ctx.sub(UART_EVENT_BASE));
        self.uart = Some(uart);
        Ok(())
    }

    pub fn insert_rtc(&mut self, mut rtc: Rtc, ctx: &mut DeviceContext<'_>) -> Result<(), CoreError> {
        if self.rtc.is_some() {
            return Err(CoreError::AlreadyAttached(format!("{} RTC", self.name)));
        }
        rtc.reset(&mut ctx.sub(RTC_EVENT_BASE));
        self.rtc = Some(rtc);
        Ok(())
    }

    /// Remove the IDE controller, cancelling its pending events and releasing its interrupt.
    pub fn remove_ide(&mut self, ctx: &mut DeviceContext<'_>) -> Option<IdeController> {
        let mut sub = ctx.sub(IDE_EVENT_BASE);
        sub.cancel_all();
        let ide = self.ide.take();
        if let Some(ide) = &ide {
            sub.set_irq(ide.irq_line(), false);
        }
        ide
    }

    pub fn remove_uart(&mut self, ctx: &mut DeviceContext<'_>) -> Option<Uart> {
        let mut sub = ctx.sub(UART_EVENT_BASE);
        sub.cancel_all();
        let uart = self.uart.take();
        if let Some(uart) = &uart {
            sub.set_irq(uart.irq_line(), false);
        }
        uart
    }

    pub fn remove_rtc(&mut self, ctx: &mut DeviceContext<'_>) -> Option<Rtc> {
        ctx.sub(RTC_EVENT_BASE).cancel_all();
        self.rtc.take()
    }

    fn selected(&self) -> Selected {
        if self.latch & SELECT_RTC != 0 {
            return Selected::Rtc(self.latch & !SELECT_RTC);
        }
        match self.latch & SELECT_GROUP_MASK {
            SELECT_IDE_GROUP => Selected::Ide(self.latch & 0x0F),
            SELECT_UART_GROUP if self.latch & 0x08 == 0 => Selected::Uart(self.latch & 0x07),
            _ => Selected::Nothing,
        }
    }

    fn card_status(&self) -> u8 {
        let mut status = 0;
        if self.uart.as_ref().is_some_and(|u| u.interrupt_pending()) {
            status |= CARD_STATUS_UART_IRQ;
        }
        if self.ide.is_some() {
            status |= CARD_STATUS_IDE;
        }
        if self.uart.is_some() {
            status |= CARD_STATUS_UART;
        }
        if self.rtc.is_some() {
            status |= CARD_STATUS_RTC;
        }
        status
    }

    fn data_read(&mut self, ctx: &mut DeviceContext<'_>) -> u8 {
        match self.selected() {
            Selected::Ide(reg) => match self.ide.as_mut() {
                Some(ide) => ide.read_register(reg, &mut ctx.sub(IDE_EVENT_BASE)),
                None => NO_IO_BYTE,
            },
            Selected::Uart(reg) => match self.uart.as_mut() {
                Some(uart) => uart.read_register(reg, &mut ctx.sub(UART_EVENT_BASE)),
                None => NO_IO_BYTE,
            },
            Selected::Rtc(addr) => match self.rtc.as_mut() {
                Some(rtc) => rtc.read_register(addr, &mut ctx.sub(RTC_EVENT_BASE)),
                None => NO_IO_BYTE,
            },
            Selected::Nothing => NO_IO_BYTE,
        }
    }

    fn data_write(&mut self, byte: u8, ctx: &mut DeviceContext<'_>) {
        match self.selected() {
            Selected::Ide(reg) => {
                if let Some(ide) = self.ide.as_mut() {
                    ide.write_register(reg, byte, &mut ctx.sub(IDE_EVENT_BASE));
                }
            }
            Selected::Uart(reg) => {
                if let Some(uart) = self.uart.as_mut() {
                    uart.write_register(reg, byte, &mut ctx.sub(UART_EVENT_BASE));
                }
            }
            Selected::Rtc(addr) => {
                if let Some(rtc) = self.rtc.as_mut() {
                    rtc.write_register(addr, byte, &mut ctx.sub(RTC_EVENT_BASE));
                }
            }
            Selected::Nothing => log::trace!("{}: write {:02X} with latch {:02X}", self.name, byte, self.latch),
        }
    }
}

impl Device for ComboCard {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        let mut parts = Vec::new();
        if self.ide.is_some() {
            parts.push("IDE");
        }
        if self.uart.is_some() {
            parts.push("UART");
        }
        if self.rtc.is_some() {
            parts.push("RTC");
        }
        format!("Combo card at ports {}-{} ({})", self.base_port, self.base_port + 1, parts.join(", "))
    }

    fn base_port(&self) -> u16 {
        self.base_port
    }

    fn port_count(&self) -> u16 {
        COMBO_PORT_COUNT
    }

    fn direction(&self) -> PortDirection {
        PortDirection::InOut
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        ctx.cancel_all();
        self.latch = 0;
        if let Some(ide) = self.ide.as_mut() {
            ide.reset(&mut ctx.sub(IDE_EVENT_BASE));
        }
        if let Some(uart) = self.uart.as_mut() {
            uart.reset(&mut ctx.sub(UART_EVENT_BASE));
        }
        if let Some(rtc) = self.rtc.as_mut() {
            rtc.reset(&mut ctx.sub(RTC_EVENT_BASE));
        }
    }

    fn read(&mut self, port: u16, ctx: &mut DeviceContext<'_>) -> u8 {
        match port.wrapping_sub(self.base_port) {
            0 => self.card_status(),
            _ => self.data_read(ctx),
        }
    }

    fn write(&mut self, port: u16, data: u8, ctx: &mut DeviceContext<'_>) {
        match port.wrapping_sub(self.base_port) {
            0 => self.latch = data,
            _ => self.data_write(data, ctx),
        }
    }

    fn on_event(&mut self, param: EventParam, ctx: &mut DeviceContext<'_>) {
        let base = param & SUB_DEVICE_MASK;
        let sub_param = param & !SUB_DEVICE_MASK;
        match base {
            IDE_EVENT_BASE => {
                if let Some(ide) = self.ide.as_mut() {
                    ide.on_event(sub_param, &mut ctx.sub(base));
                }
            }
            UART_EVENT_BASE => {
                if let Some(uart) = self.uart.as_mut() {
                    uart.on_event(sub_param, &mut ctx.sub(base));
                }
            }
            RTC_EVENT_BASE => {
                if let Some(rtc) = self.rtc.as_mut() {
                    rtc.on_event(sub_param, &mut ctx.sub(base));
                }
            }
            _ => log::warn!("{}: unknown event {:X}", self.name, param),
        }
    }

    fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{}", self.description())?;
        writeln!(out, "  select latch {:02X}, status {:02X}", self.latch, self.card_status())?;
        if let Some(ide) = &self.ide {
            ide.show(out)?;
        }
        if let Some(uart) = &self.uart {
            uart.show(out)?;
        }
        if let Some(rtc) = &self.rtc {
            rtc.show(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::NamedTempFile;

    use super::*;
    use crate::{
        config::{IdeConfig, RtcConfig, UartConfig},
        devices::{ide, rtc, uart},
    };
    use crate::device::testing::Bench;

    const BASE: u16 = 2;
    const SELECT: u16 = BASE;
    const DATA: u16 = BASE + 1;

    fn full_card() -> (Bench<ComboCard>, NamedTempFile) {
        let image = NamedTempFile::new().unwrap();
        image.as_file().set_len(64 * 512).unwrap();
        let mut b = Bench::new(ComboCard::new("COMBO", BASE));

        let mut ide = IdeController::new("IDE", 0, &IdeConfig::default());
        ide.attach(0, image.path()).unwrap();
        b.with(|card, ctx| card.insert_ide(ide, ctx)).unwrap();
        let uart = Uart::new("UART", 0, &UartConfig::default());
        b.with(|card, ctx| card.insert_uart(uart, ctx)).unwrap();
        let rtc = Rtc::new("RTC", 0, &RtcConfig::default());
        b.with(|card, ctx| card.insert_rtc(rtc, ctx)).unwrap();
        (b, image)
    }

    #[test]
    fn select_latch_routes_to_uart() {
        let (mut b, _image) = full_card();
        b.write(SELECT, 0x10 | uart::REG_MCR);
        b.write(DATA, uart::MODEM_CONTROL_LOOP);
        b.write(SELECT, 0x10 | uart::REG_RBR_THR);
        b.write(DATA, 0x55);

        let char_time = b.device.uart().unwrap().char_time();
        b.advance(char_time);
        b.write(SELECT, 0x10 | uart::REG_LSR);
        assert_ne!(b.read(DATA) & uart::STATUS_DATA_READY, 0);
        b.write(SELECT, 0x10 | uart::REG_RBR_THR);
        assert_eq!(b.read(DATA), 0x55);
    }

    #[test]
    fn select_latch_routes_to_ide() {
        let (mut b, _image) = full_card();
        b.write(SELECT, ide::REG_ERROR_FEATURES);
        b.write(DATA, ide::FEATURE_ENABLE_8BIT);
        b.write(SELECT, ide::REG_STATUS_COMMAND);
        b.write(DATA, 0xEF);
        b.advance(IdeConfig::default().short_delay());
        b.write(DATA, 0xEC);
        assert_ne!(b.read(DATA) & ide::STATUS_BUSY, 0);
        b.advance(IdeConfig::default().short_delay());
        assert_ne!(b.read(DATA) & ide::STATUS_DRQ, 0);
        b.write(SELECT, ide::REG_DATA);
        let block: Vec<u8> = (0..512).map(|_| b.read(DATA)).collect();
        assert_eq!(u32::from_le_bytes([block[120], block[121], block[122], block[123]]), 64);
    }

    #[test]
    fn select_latch_routes_to_rtc() {
        let (mut b, _image) = full_card();
        b.write(SELECT, 0x80 | 0x40);
        b.write(DATA, 0x99);
        b.write(SELECT, 0x80 | 0x40);
        assert_eq!(b.read(DATA), 0x99);
        assert_eq!(b.device.rtc().unwrap().nvr()[0x40], 0x99);

        b.write(SELECT, 0x80 | rtc::REG_A);
        b.write(DATA, 0x2F);
        assert!(!b.device_idle());
    }

    #[test]
    fn status_reports_installed_devices() {
        let (mut b, _image) = full_card();
        assert_eq!(b.read(SELECT), CARD_STATUS_IDE | CARD_STATUS_UART | CARD_STATUS_RTC);

        b.with(|card, ctx| card.remove_uart(ctx));
        b.write(SELECT, 0x10 | uart::REG_LSR);
        assert_eq!(b.read(DATA), NO_IO_BYTE);
        b.with(|card, ctx| card.remove_ide(ctx));
        assert!(!b.device.is_empty());
        b.with(|card, ctx| card.remove_rtc(ctx));
        assert!(b.device.is_empty());
    }

    #[test]
    fn removing_ide_releases_its_interrupt() {
        let image = NamedTempFile::new().unwrap();
        image.as_file().set_len(64 * 512).unwrap();
        let mut b = Bench::new(ComboCard::new("COMBO", BASE));
        let irq = b.interrupts.register("IDE");
        let mut ide = IdeController::new("IDE", 0, &IdeConfig::default());
        ide.set_irq_line(Some(irq));
        ide.attach(0, image.path()).unwrap();
        b.with(|card, ctx| card.insert_ide(ide, ctx)).unwrap();

        b.write(SELECT, ide::REG_STATUS_COMMAND);
        b.write(DATA, 0xE1);
        b.advance(IdeConfig::default().short_delay());
        assert!(b.interrupts.is_asserted(irq));

        b.with(|card, ctx| card.remove_ide(ctx));
        assert!(!b.interrupts.is_asserted(irq));
    }

    #[test]
    fn sub_device_events_are_isolated() {
        let (mut b, _image) = full_card();
        b.write(SELECT, 0x80 | rtc::REG_A);
        b.write(DATA, 0x2F);
        b.write(SELECT, ide::REG_STATUS_COMMAND);
        b.write(DATA, 0xEC);

        // Removing the IDE leaves the square wave and the UART poll running.
        b.with(|card, ctx| card.remove_ide(ctx));
        b.advance(IdeConfig::default().short_delay());
        assert!(!b.device_idle());
        let edges_before = b.device.rtc().unwrap().pf_rising_edges();
        b.advance(1_000_000_000);
        assert!(b.device.rtc().unwrap().pf_rising_edges() > edges_before);

        b.reset();
        b.reset();
        assert_eq!(b.device.rtc().unwrap().half_period(), Some(250_000_000));
    }

    #[test]
    fn double_insert_is_refused() {
        let (mut b, _image) = full_card();
        let rtc = Rtc::new("RTC", 0, &RtcConfig::default());
        assert!(matches!(
            b.with(|card, ctx| card.insert_rtc(rtc, ctx)),
            Err(CoreError::AlreadyAttached(_))
        ));
    }
}
