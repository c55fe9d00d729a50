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

//! DS12887 / MC146818 class real time clock with 128 bytes of non-volatile RAM.
//!
//! The first fourteen bytes are the clock and control registers. The time registers are refreshed
//! from the host wall clock each time the update-in-progress bit in register A falls, which the
//! emulated program observes by polling register A.

use std::{
    fmt,
    fs::File,
    io::{Read, Write},
    path::Path,
};

use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time};

use crate::{
    config::RtcConfig,
    device::{Device, DeviceContext},
    error::CoreError,
    events::EventParam,
    port_map::PortDirection,
    time::{SimTime, NS_PER_SEC},
};

pub const NVR_SIZE: usize = 128;
pub const RTC_PORT_COUNT: u16 = 2;

pub const REG_SECONDS: u8 = 0x00;
pub const REG_SECONDS_ALARM: u8 = 0x01;
pub const REG_MINUTES: u8 = 0x02;
pub const REG_MINUTES_ALARM: u8 = 0x03;
pub const REG_HOURS: u8 = 0x04;
pub const REG_HOURS_ALARM: u8 = 0x05;
pub const REG_WEEKDAY: u8 = 0x06;
pub const REG_DAY: u8 = 0x07;
pub const REG_MONTH: u8 = 0x08;
pub const REG_YEAR: u8 = 0x09;
pub const REG_A: u8 = 0x0A;
pub const REG_B: u8 = 0x0B;
pub const REG_C: u8 = 0x0C;
pub const REG_D: u8 = 0x0D;

pub const REG_A_UIP: u8 = 0x80;
const REG_A_DV_MASK: u8 = 0x70;
const REG_A_RATE_MASK: u8 = 0x0F;
const REG_A_POWER_ON: u8 = 0x20;

pub const REG_B_SET: u8 = 0x80;
pub const REG_B_SQWE: u8 = 0x08;
pub const REG_B_BINARY: u8 = 0x04;
pub const REG_B_24HOUR: u8 = 0x02;
pub const REG_B_DSE: u8 = 0x01;
const REG_B_WRITE_MASK: u8 = REG_B_SET | REG_B_SQWE | REG_B_BINARY | REG_B_24HOUR | REG_B_DSE;

pub const REG_C_PF: u8 = 0x40;
pub const REG_D_VRT: u8 = 0x80;

const HOURS_PM: u8 = 0x80;

/// ElfOS stores the year as an offset from this year.
pub const ELFOS_EPOCH: i32 = 1972;

const EVENT_PERIODIC: EventParam = 1;

/// Periodic interrupt frequency for each rate select value. Rate 0 disables the square wave.
const RATE_HZ: [u64; 16] = [0, 256, 128, 8192, 4096, 2048, 1024, 512, 256, 128, 64, 32, 16, 8, 4, 2];

pub struct Rtc {
    name: String,
    base_port: u16,
    nvr: [u8; NVR_SIZE],
    elfos_mode: bool,
    /// Difference between the emulated clock and the host clock, set by the emulated program.
    offset: Duration,
    pf_rising_edges: u64,
}

impl Rtc {
    pub fn new(name: &str, base_port: u16, config: &RtcConfig) -> Self {
        let mut nvr = [0; NVR_SIZE];
        nvr[REG_A as usize] = REG_A_POWER_ON;
        nvr[REG_B as usize] = REG_B_24HOUR;
        nvr[REG_D as usize] = REG_D_VRT;
        let mut rtc = Self {
            name: name.to_string(),
            base_port,
            nvr,
            elfos_mode: config.elfos_mode,
            offset: Duration::ZERO,
            pf_rising_edges: 0,
        };
        rtc.refresh_time();
        rtc
    }

    pub fn elfos_mode(&self) -> bool {
        self.elfos_mode
    }

    pub fn set_elfos_mode(&mut self, on: bool) {
        self.elfos_mode = on;
    }

    /// Number of times REG_C.PF has been set by the square wave.
    pub fn pf_rising_edges(&self) -> u64 {
        self.pf_rising_edges
    }

    /// Contents of the whole register file, without side effects.
    pub fn nvr(&self) -> &[u8; NVR_SIZE] {
        &self.nvr
    }

    pub fn save_nvr(&self, path: &Path) -> Result<(), CoreError> {
        let mut file = File::create(path)?;
        file.write_all(&self.nvr)?;
        log::debug!("{}: saved NVR to {}", self.name, path.display());
        Ok(())
    }

    /// Replace the register file with the contents of `path`, which must be exactly one NVR image.
    pub fn load_nvr(&mut self, path: &Path) -> Result<(), CoreError> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if len != NVR_SIZE as u64 {
            return Err(CoreError::ImageSize {
                path: path.to_path_buf(),
                len,
                sector_size: NVR_SIZE,
            });
        }
        let mut data = [0u8; NVR_SIZE];
        file.read_exact(&mut data)?;
        self.nvr = data;
        self.nvr[REG_D as usize] = REG_D_VRT;
        log::debug!("{}: loaded NVR from {}", self.name, path.display());
        Ok(())
    }

    #[inline]
    fn reg(&self, reg: u8) -> u8 {
        self.nvr[reg as usize]
    }

    #[inline]
    fn binary_mode(&self) -> bool {
        self.reg(REG_B) & REG_B_BINARY != 0
    }

    fn encode(&self, value: u8) -> u8 {
        if self.binary_mode() {
            value
        }
        else {
            ((value / 10) << 4) | (value % 10)
        }
    }

    fn decode(&self, value: u8) -> u8 {
        if self.binary_mode() {
            value
        }
        else {
            (value >> 4) * 10 + (value & 0x0F)
        }
    }

    fn host_now(&self) -> PrimitiveDateTime {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let now = PrimitiveDateTime::new(now.date(), now.time());
        now.checked_add(self.offset).unwrap_or(now)
    }

    fn refresh_time(&mut self) {
        if self.reg(REG_B) & REG_B_SET != 0 {
            return;
        }
        let now = self.host_now();
        self.store_time(now);
    }

    /// Encode `dt` into the time registers using the current data mode.
    fn store_time(&mut self, dt: PrimitiveDateTime) {
        let hour = dt.hour();
        let hours = if self.reg(REG_B) & REG_B_24HOUR != 0 {
            self.encode(hour)
        }
        else {
            let h12 = match hour % 12 {
                0 => 12,
                h => h,
            };
            self.encode(h12) | if hour >= 12 { HOURS_PM } else { 0 }
        };
        let year = if self.elfos_mode {
            (dt.year() - ELFOS_EPOCH).clamp(0, 99) as u8
        }
        else {
            dt.year().rem_euclid(100) as u8
        };

        self.nvr[REG_SECONDS as usize] = self.encode(dt.second());
        self.nvr[REG_MINUTES as usize] = self.encode(dt.minute());
        self.nvr[REG_HOURS as usize] = hours;
        self.nvr[REG_WEEKDAY as usize] = self.encode(dt.weekday().number_from_sunday());
        self.nvr[REG_DAY as usize] = self.encode(dt.day());
        self.nvr[REG_MONTH as usize] = self.encode(dt.month() as u8);
        self.nvr[REG_YEAR as usize] = self.encode(year);
    }

    /// Decode the time registers, as left by the emulated program.
    fn load_time(&self) -> Option<PrimitiveDateTime> {
        let raw_hours = self.reg(REG_HOURS);
        let hour = if self.reg(REG_B) & REG_B_24HOUR != 0 {
            self.decode(raw_hours)
        }
        else {
            let h12 = self.decode(raw_hours & !HOURS_PM) % 12;
            if raw_hours & HOURS_PM != 0 {
                h12 + 12
            }
            else {
                h12
            }
        };
        let year = self.decode(self.reg(REG_YEAR)) as i32;
        let year = if self.elfos_mode { ELFOS_EPOCH + year } else { 2000 + year };
        let month = Month::try_from(self.decode(self.reg(REG_MONTH))).ok()?;
        let date = Date::from_calendar_date(year, month, self.decode(self.reg(REG_DAY))).ok()?;
        let time = Time::from_hms(
            hour,
            self.decode(self.reg(REG_MINUTES)),
            self.decode(self.reg(REG_SECONDS)),
        )
        .ok()?;
        Some(PrimitiveDateTime::new(date, time))
    }

    /// The program has released SET. Later refreshes continue from the time it wrote.
    fn commit_set_time(&mut self) {
        self.offset = Duration::ZERO;
        match self.load_time() {
            Some(set) => {
                self.offset = set - self.host_now();
                log::debug!("{}: clock set to {}, offset {}", self.name, set, self.offset);
            }
            None => log::warn!("{}: invalid time written to clock registers", self.name),
        }
    }

    fn schedule_square_wave(&mut self, ctx: &mut DeviceContext<'_>) {
        match RATE_HZ[(self.reg(REG_A) & REG_A_RATE_MASK) as usize] {
            0 => ctx.cancel(EVENT_PERIODIC),
            hz => ctx.schedule(EVENT_PERIODIC, (NS_PER_SEC / (2 * hz)).max(1)),
        }
    }

    /// The half period of the square wave in ns, or None if it is disabled.
    pub fn half_period(&self) -> Option<SimTime> {
        match RATE_HZ[(self.reg(REG_A) & REG_A_RATE_MASK) as usize] {
            0 => None,
            hz => Some(NS_PER_SEC / (2 * hz)),
        }
    }

    pub fn read_register(&mut self, reg: u8, _ctx: &mut DeviceContext<'_>) -> u8 {
        let reg = reg & (NVR_SIZE as u8 - 1);
        match reg {
            REG_A => {
                let byte = self.reg(REG_A);
                self.nvr[REG_A as usize] ^= REG_A_UIP;
                if byte & REG_A_UIP != 0 {
                    self.refresh_time();
                }
                byte
            }
            REG_D => REG_D_VRT,
            _ => self.reg(reg),
        }
    }

    pub fn write_register(&mut self, reg: u8, byte: u8, ctx: &mut DeviceContext<'_>) {
        let reg = reg & (NVR_SIZE as u8 - 1);
        match reg {
            REG_A => {
                let old_rate = self.reg(REG_A) & REG_A_RATE_MASK;
                self.nvr[REG_A as usize] = (self.reg(REG_A) & REG_A_UIP) | (byte & (REG_A_DV_MASK | REG_A_RATE_MASK));
                if byte & REG_A_RATE_MASK != old_rate {
                    log::trace!("{}: rate select {:X}", self.name, byte & REG_A_RATE_MASK);
                    self.schedule_square_wave(ctx);
                }
            }
            REG_B => {
                let was_set = self.reg(REG_B) & REG_B_SET != 0;
                self.nvr[REG_B as usize] = byte & REG_B_WRITE_MASK;
                if was_set && byte & REG_B_SET == 0 {
                    self.commit_set_time();
                }
            }
            REG_C | REG_D => {}
            _ => self.nvr[reg as usize] = byte,
        }
    }
}

impl Device for Rtc {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!(
            "DS12887 real time clock{}",
            if self.elfos_mode { ", ElfOS year" } else { "" }
        )
    }

    fn base_port(&self) -> u16 {
        self.base_port
    }

    fn port_count(&self) -> u16 {
        RTC_PORT_COUNT
    }

    fn direction(&self) -> PortDirection {
        PortDirection::InOut
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        ctx.cancel_all();
        self.nvr[REG_C as usize] = 0;
        self.nvr[REG_D as usize] = REG_D_VRT;
        self.schedule_square_wave(ctx);
    }

    fn on_event(&mut self, param: EventParam, ctx: &mut DeviceContext<'_>) {
        if param != EVENT_PERIODIC {
            log::warn!("{}: unknown event {}", self.name, param);
            return;
        }
        self.nvr[REG_C as usize] ^= REG_C_PF;
        if self.reg(REG_C) & REG_C_PF != 0 {
            self.pf_rising_edges += 1;
        }
        self.schedule_square_wave(ctx);
    }

    fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{}", self.description())?;
        writeln!(
            out,
            "  time {:02X}:{:02X}:{:02X} date {:02X}/{:02X}/{:02X} A {:02X} B {:02X} C {:02X} D {:02X}",
            self.reg(REG_HOURS),
            self.reg(REG_MINUTES),
            self.reg(REG_SECONDS),
            self.reg(REG_MONTH),
            self.reg(REG_DAY),
            self.reg(REG_YEAR),
            self.reg(REG_A),
            self.reg(REG_B),
            self.reg(REG_C),
            self.reg(REG_D)
        )?;
        match self.half_period() {
            Some(ns) => writeln!(out, "  square wave half period {} ns", ns),
            None => writeln!(out, "  square wave off"),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::device::testing::Bench;

    const BASE: u16 = 0x20;

    fn bench() -> Bench<Rtc> {
        Bench::new(Rtc::new("RTC", BASE, &RtcConfig::default()))
    }

    fn read_reg(b: &mut Bench<Rtc>, reg: u8) -> u8 {
        b.with(|rtc, ctx| rtc.read_register(reg, ctx))
    }

    fn write_reg(b: &mut Bench<Rtc>, reg: u8, byte: u8) {
        b.with(|rtc, ctx| rtc.write_register(reg, byte, ctx));
    }

    #[test]
    fn square_wave_at_2hz() {
        let mut b = bench();
        write_reg(&mut b, REG_A, REG_A_POWER_ON | 0x0F);
        assert_eq!(b.device.half_period(), Some(250_000_000));

        let mut rising = 0;
        let mut last = read_reg(&mut b, REG_C) & REG_C_PF;
        for _ in 0..16 {
            b.advance(125_000_000);
            let pf = read_reg(&mut b, REG_C) & REG_C_PF;
            if pf != 0 && last == 0 {
                rising += 1;
            }
            last = pf;
        }
        assert_eq!(rising, 4);
        assert_eq!(b.device.pf_rising_edges(), 4);

        write_reg(&mut b, REG_A, REG_A_POWER_ON);
        assert!(b.device_idle());
    }

    #[test]
    fn uip_toggles_on_each_read() {
        let mut b = bench();
        let first = read_reg(&mut b, REG_A);
        let second = read_reg(&mut b, REG_A);
        assert_eq!((first ^ second) & REG_A_UIP, REG_A_UIP);
        assert_eq!(read_reg(&mut b, REG_D), REG_D_VRT);
    }

    #[test]
    fn bcd_and_12_hour_encoding() {
        let mut b = bench();
        b.device.nvr[REG_B as usize] = 0;
        b.device.store_time(datetime!(2024-07-04 15:09:30));
        assert_eq!(b.device.nvr[REG_HOURS as usize], HOURS_PM | 0x03);
        assert_eq!(b.device.nvr[REG_MINUTES as usize], 0x09);
        assert_eq!(b.device.nvr[REG_SECONDS as usize], 0x30);
        assert_eq!(b.device.nvr[REG_YEAR as usize], 0x24);
        assert_eq!(b.device.nvr[REG_WEEKDAY as usize], 5);
        assert_eq!(b.device.load_time(), Some(datetime!(2024-07-04 15:09:30)));

        b.device.nvr[REG_B as usize] = REG_B_BINARY | REG_B_24HOUR;
        b.device.store_time(datetime!(2024-07-04 00:45:00));
        assert_eq!(b.device.nvr[REG_HOURS as usize], 0);
        assert_eq!(b.device.nvr[REG_MINUTES as usize], 45);
    }

    #[test]
    fn elfos_year_is_biased() {
        let mut b = bench();
        b.device.set_elfos_mode(true);
        b.device.nvr[REG_B as usize] = REG_B_BINARY | REG_B_24HOUR;
        b.device.store_time(datetime!(2026-01-01 00:00:00));
        assert_eq!(b.device.nvr[REG_YEAR as usize], 54);
        assert_eq!(b.device.load_time().map(|t| t.year()), Some(2026));
    }

    #[test]
    fn register_b_masks_interrupt_enables() {
        let mut b = bench();
        write_reg(&mut b, REG_B, 0xFF);
        assert_eq!(read_reg(&mut b, REG_B), REG_B_WRITE_MASK);
    }

    #[test]
    fn set_time_survives_refresh() {
        let mut b = bench();
        write_reg(&mut b, REG_B, REG_B_SET | REG_B_24HOUR | REG_B_BINARY);
        write_reg(&mut b, REG_YEAR, 30);
        write_reg(&mut b, REG_MONTH, 3);
        write_reg(&mut b, REG_DAY, 15);
        write_reg(&mut b, REG_HOURS, 10);
        write_reg(&mut b, REG_MINUTES, 20);
        write_reg(&mut b, REG_SECONDS, 0);
        write_reg(&mut b, REG_B, REG_B_24HOUR | REG_B_BINARY);

        // Two reads of A give one falling edge of UIP, whichever phase it started in.
        read_reg(&mut b, REG_A);
        read_reg(&mut b, REG_A);
        assert_eq!(read_reg(&mut b, REG_YEAR), 30);
        assert_eq!(read_reg(&mut b, REG_MONTH), 3);
        assert_eq!(read_reg(&mut b, REG_HOURS), 10);
        assert_eq!(read_reg(&mut b, REG_MINUTES), 20);
    }

    #[test]
    fn nvr_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtc.nvr");
        let mut b = bench();
        for addr in 14..NVR_SIZE as u8 {
            write_reg(&mut b, addr, addr.wrapping_mul(3));
        }
        b.device.save_nvr(&path).unwrap();
        let before = *b.device.nvr();
        b.device.load_nvr(&path).unwrap();
        assert_eq!(*b.device.nvr(), before);

        let mut other = Rtc::new("RTC", BASE, &RtcConfig::default());
        other.load_nvr(&path).unwrap();
        assert_eq!(other.nvr()[14..], before[14..]);

        std::fs::write(&path, [0u8; 10]).unwrap();
        assert!(other.load_nvr(&path).is_err());
    }

    #[test]
    fn reset_is_idempotent() {
        let mut b = bench();
        write_reg(&mut b, REG_A, REG_A_POWER_ON | 0x06);
        b.reset();
        let after_one = (*b.device.nvr(), b.device_idle());
        b.reset();
        assert_eq!((*b.device.nvr(), b.device_idle()), after_one);
        assert!(!b.device_idle());
    }
}
