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

//! The emulated machine: CPU, memory, event queue and the installed devices, wired together the
//! way the configured board wires them.
//!
//! Time is kept in two places that always agree between instructions: the CPU clock counts
//! machine cycles, and the event queue holds the current simulated time. After each instruction
//! the queue is advanced to the time at the new cycle total, dispatching every event that came due
//! during the instruction.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::{
    board::BoardLayout,
    config::{MachineConfig, RtcConfig, SerialConfig},
    console::{Console, SmartConsole, SmartConsoleConfig},
    cpu::{Cdp1802, CpuBus, StopCode},
    device::{Device, DeviceContext, DeviceDispatch},
    devices::{
        combo::ComboCard,
        ide::IdeController,
        post::{DipSwitches, PostDisplay},
        rtc::Rtc,
        soft_serial::{SoftSerial, Q_FLAG},
        uart::Uart,
    },
    error::{CoreError, CoreResult},
    events::{DeviceId, EventKey, EventQueue, EventSink, EventTarget},
    interrupt::InterruptLines,
    memory::Memory,
    port_map::{PortMap, PortRoute},
    time::{CpuClock, SimTime},
};

/// Instructions executed between polls of the console for the break character.
pub const CONSOLE_POLL_INSTRUCTIONS: u64 = 1024;

/// Everything the CPU reaches through its I/O pins.
pub struct Hardware {
    devices: Vec<Option<DeviceDispatch>>,
    port_map: PortMap,
    interrupts: InterruptLines,
    console: SmartConsole,
}

impl Hardware {
    fn new(console: SmartConsole) -> Self {
        Self {
            devices: Vec::new(),
            port_map: PortMap::new(),
            interrupts: InterruptLines::new(),
            console,
        }
    }

    fn with_device<R>(
        &mut self,
        id: DeviceId,
        events: &mut EventQueue,
        f: impl FnOnce(&mut DeviceDispatch, &mut DeviceContext<'_>) -> R,
    ) -> Option<R> {
        let device = self.devices.get_mut(id.0)?.as_mut()?;
        let mut ctx = DeviceContext::new(id, events, &mut self.console, &mut self.interrupts);
        Some(f(device, &mut ctx))
    }

    fn io_read(&mut self, port: u16, events: &mut EventQueue) -> Option<u8> {
        match self.port_map.route_input(port) {
            PortRoute::Device(id) => self.with_device(id, events, |d, ctx| d.read(port, ctx)),
            _ => None,
        }
    }

    fn io_write(&mut self, port: u16, byte: u8, events: &mut EventQueue) -> bool {
        match self.port_map.route_output(port) {
            PortRoute::Device(id) => self.with_device(id, events, |d, ctx| d.write(port, byte, ctx)).is_some(),
            PortRoute::GroupSelect => {
                self.port_map.set_group(byte);
                true
            }
            PortRoute::Unmapped => false,
        }
    }

    fn sense(&self, index: usize) -> bool {
        self.devices
            .iter()
            .flatten()
            .fold(false, |level, d| d.get_sense(index, level))
    }

    fn set_flag(&mut self, index: usize, bit: bool, events: &mut EventQueue) {
        for (idx, slot) in self.devices.iter_mut().enumerate() {
            if let Some(device) = slot {
                let mut ctx = DeviceContext::new(DeviceId(idx), events, &mut self.console, &mut self.interrupts);
                device.set_flag(index, bit, &mut ctx);
            }
        }
    }

    fn device_name(&self, id: DeviceId) -> String {
        match self.devices.get(id.0) {
            Some(Some(device)) => device.name().to_string(),
            _ => id.to_string(),
        }
    }
}

impl EventSink for Hardware {
    fn on_event(&mut self, key: EventKey, events: &mut EventQueue) {
        match key.target {
            EventTarget::Console => self.console.on_event(key.param),
            EventTarget::Device(id) => {
                if self.with_device(id, events, |d, ctx| d.on_event(key.param, ctx)).is_none() {
                    log::warn!("Dropped event {:?} for a device that is not installed", key);
                }
            }
        }
    }
}

struct MachineBus<'a> {
    memory: &'a mut Memory,
    events: &'a mut EventQueue,
    hw: &'a mut Hardware,
}

impl CpuBus for MachineBus<'_> {
    #[inline]
    fn mem_read(&mut self, address: u16) -> u8 {
        self.memory.cpu_read(address)
    }

    #[inline]
    fn mem_write(&mut self, address: u16, byte: u8) {
        self.memory.cpu_write(address, byte)
    }

    fn io_read(&mut self, port: u16) -> Option<u8> {
        self.hw.io_read(port, self.events)
    }

    fn io_write(&mut self, port: u16, byte: u8) -> bool {
        self.hw.io_write(port, byte, self.events)
    }

    fn sense(&mut self, index: usize) -> bool {
        self.hw.sense(index)
    }

    fn set_flag(&mut self, index: usize, bit: bool) {
        self.hw.set_flag(index, bit, self.events)
    }

    fn interrupt_pending(&self) -> bool {
        self.hw.interrupts.any_asserted()
    }

    fn take_break(&mut self) -> Option<u16> {
        self.memory.take_break_pending()
    }
}

pub struct Machine {
    config: MachineConfig,
    layout: BoardLayout,
    memory: Memory,
    events: EventQueue,
    cpu: Cdp1802,
    clock: CpuClock,
    // Simulated time not accounted for by CPU cycles, from advancing the queue directly.
    time_base: SimTime,
    hw: Hardware,
    serial: Option<DeviceId>,
    post: Option<DeviceId>,
    switches: Option<DeviceId>,
    combos: Vec<Option<DeviceId>>,
    rtc_nvr: Option<PathBuf>,
}

impl Machine {
    /// Build the configured board around `host`, attach the configured devices and reset.
    pub fn new(config: MachineConfig, mut host: Box<dyn Console>) -> CoreResult<Self> {
        let layout = BoardLayout::for_board(config.board).with_rom_base(config.rom_base);
        log::debug!(
            "Creating {} machine: RAM {:04X}-{:04X}, ROM {:04X}-{:04X}",
            layout.name,
            layout.ram.start,
            layout.ram.end.saturating_sub(1),
            layout.rom.start,
            layout.rom.end.saturating_sub(1)
        );

        let mut memory = Memory::new();
        memory.map_ram(layout.ram.clone());
        memory.map_rom(layout.rom.clone());

        host.set_console_break(config.console_break);
        let console = SmartConsole::new(host, SmartConsoleConfig::from(&config.console));

        let mut cpu = Cdp1802::new();
        cpu.set_stop_on_illegal_io(config.stop_on_illegal_io);
        cpu.set_stop_on_endless_loop(config.stop_on_endless_loop);

        let mut hw = Hardware::new(console);
        if let Some(port) = layout.group_port {
            hw.port_map.enable_groups(port)?;
        }
        if layout.interrupt_controller {
            hw.interrupts.enable_controller();
        }

        let mut machine = Self {
            clock: CpuClock::new(config.clock_hz.unwrap_or(layout.clock_hz)),
            combos: vec![None; layout.combo_slots.len()],
            config,
            layout,
            memory,
            events: EventQueue::new(),
            cpu,
            time_base: 0,
            hw,
            serial: None,
            post: None,
            switches: None,
            rtc_nvr: None,
        };

        if let Some(port) = machine.layout.post_port {
            machine.post = Some(machine.install(PostDisplay::new(port).into(), None)?);
            machine.switches = Some(machine.install(DipSwitches::new(port, 0).into(), None)?);
        }
        if machine.config.serial.attach {
            let serial = machine.config.serial.clone();
            machine.attach_serial(&serial)?;
        }
        if machine.config.uart.attach {
            machine.attach_uart(0)?;
        }
        for image in machine.config.ide.images.clone() {
            machine.attach_ide(image.drive, &image.path)?;
        }
        if machine.config.rtc.attach {
            let nvr = machine.config.rtc.nvr_file.clone();
            machine.attach_rtc(nvr)?;
        }
        machine.reset();
        Ok(machine)
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn layout(&self) -> &BoardLayout {
        &self.layout
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn cpu(&self) -> &Cdp1802 {
        &self.cpu
    }

    pub fn clock(&self) -> &CpuClock {
        &self.clock
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn console_mut(&mut self) -> &mut SmartConsole {
        &mut self.hw.console
    }

    pub fn interrupts(&self) -> &InterruptLines {
        &self.hw.interrupts
    }

    pub fn interrupts_mut(&mut self) -> &mut InterruptLines {
        &mut self.hw.interrupts
    }

    /// Current simulated time in nanoseconds.
    pub fn now(&self) -> SimTime {
        self.events.now()
    }

    // Device table management

    fn install(&mut self, device: DeviceDispatch, group: Option<u8>) -> CoreResult<DeviceId> {
        let slot = self
            .hw
            .devices
            .iter()
            .position(|d| d.is_none())
            .unwrap_or(self.hw.devices.len());
        let id = DeviceId(slot);
        if device.port_count() > 0 {
            let hw = &mut self.hw;
            let devices = &hw.devices;
            hw.port_map.install(
                id,
                device.base_port(),
                device.port_count(),
                device.direction(),
                group,
                |other| match devices.get(other.0) {
                    Some(Some(d)) => d.name().to_string(),
                    _ => other.to_string(),
                },
            )?;
        }
        log::debug!("Installed {} as {}: {}", device.name(), id, device.description());
        if slot == self.hw.devices.len() {
            self.hw.devices.push(None);
        }
        self.hw.devices[slot] = Some(device);
        self.hw.with_device(id, &mut self.events, |d, ctx| d.reset(ctx));
        Ok(id)
    }

    fn remove(&mut self, id: DeviceId) -> Option<DeviceDispatch> {
        self.hw.port_map.remove(id);
        self.events.cancel_where(EventTarget::Device(id), |_| true);
        let device = self.hw.devices.get_mut(id.0).and_then(Option::take);
        if let Some(device) = &device {
            log::debug!("Removed {} ({})", device.name(), id);
        }
        device
    }

    pub fn combo(&self, slot: usize) -> Option<&ComboCard> {
        let id = self.combos.get(slot).copied().flatten()?;
        match self.hw.devices.get(id.0)?.as_ref()? {
            DeviceDispatch::ComboCard(card) => Some(card),
            _ => None,
        }
    }

    fn with_combo<R>(
        &mut self,
        slot: usize,
        f: impl FnOnce(&mut ComboCard, &mut DeviceContext<'_>) -> R,
    ) -> CoreResult<R> {
        let id = self
            .combos
            .get(slot)
            .copied()
            .flatten()
            .ok_or_else(|| CoreError::NoSuchDevice(format!("combo card {}", slot)))?;
        self.hw
            .with_device(id, &mut self.events, |d, ctx| match d {
                DeviceDispatch::ComboCard(card) => Some(f(card, ctx)),
                _ => None,
            })
            .flatten()
            .ok_or_else(|| CoreError::NoSuchDevice(format!("combo card {}", slot)))
    }

    fn ensure_combo(&mut self, slot: usize) -> CoreResult<()> {
        let info = self
            .layout
            .combo_slots
            .get(slot)
            .copied()
            .ok_or_else(|| CoreError::NoSuchDevice(format!("combo card {}", slot)))?;
        if self.combos[slot].is_none() {
            let id = self.install(ComboCard::new(info.name, info.base_port).into(), info.group)?;
            self.combos[slot] = Some(id);
        }
        Ok(())
    }

    // Drop an IDE controller with no drives, then the card itself once nothing is left on it.
    fn tidy_combo(&mut self, slot: usize) {
        let Some(card) = self.combo(slot)
        else {
            return;
        };
        if card.ide().is_some_and(|ide| ide.attached_count() == 0) {
            _ = self.with_combo(slot, |card, ctx| card.remove_ide(ctx));
        }
        if self.combo(slot).is_some_and(|card| card.is_empty()) {
            if let Some(id) = self.combos[slot].take() {
                self.remove(id);
            }
        }
    }

    fn combo_base(&self, slot: usize) -> u16 {
        self.layout.combo_slots.get(slot).map(|s| s.base_port).unwrap_or(0)
    }

    // Attach and detach

    pub fn serial_attached(&self) -> bool {
        self.serial.is_some()
    }

    pub fn attach_serial(&mut self, config: &SerialConfig) -> CoreResult<()> {
        if self.serial.is_some() {
            return Err(CoreError::AlreadyAttached("SERIAL".to_string()));
        }
        self.serial = Some(self.install(SoftSerial::new(config).into(), None)?);
        Ok(())
    }

    pub fn detach_serial(&mut self) -> CoreResult<()> {
        let id = self
            .serial
            .take()
            .ok_or_else(|| CoreError::NoSuchDevice("SERIAL".to_string()))?;
        self.remove(id);
        Ok(())
    }

    pub fn set_serial_baud(&mut self, baud: u32) -> CoreResult<()> {
        let id = self
            .serial
            .ok_or_else(|| CoreError::NoSuchDevice("SERIAL".to_string()))?;
        match self.hw.devices.get_mut(id.0) {
            Some(Some(DeviceDispatch::SoftSerial(serial))) => {
                serial.set_baud(baud);
                Ok(())
            }
            _ => Err(CoreError::NoSuchDevice("SERIAL".to_string())),
        }
    }

    /// Put a UART on the combo card in `slot`. Slot 1 exists only on boards with two-level I/O.
    pub fn attach_uart(&mut self, slot: usize) -> CoreResult<()> {
        self.ensure_combo(slot)?;
        let name = match slot {
            0 => "UART".to_string(),
            n => format!("UART{}", n),
        };
        let mut uart = Uart::new(&name, self.combo_base(slot), &self.config.uart);
        uart.set_irq_line(Some(self.hw.interrupts.register(&name)));
        let result = self.with_combo(slot, |card, ctx| card.insert_uart(uart, ctx));
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) | Err(e) => {
                self.tidy_combo(slot);
                Err(e)
            }
        }
    }

    pub fn detach_uart(&mut self, slot: usize) -> CoreResult<()> {
        self.with_combo(slot, |card, ctx| card.remove_uart(ctx))?
            .ok_or_else(|| CoreError::NoSuchDevice("UART".to_string()))?;
        self.tidy_combo(slot);
        Ok(())
    }

    /// Attach a disk image to IDE drive `unit`, installing the controller on first use.
    pub fn attach_ide(&mut self, unit: usize, path: &Path) -> CoreResult<()> {
        self.ensure_combo(0)?;
        if self.combo(0).is_some_and(|card| card.ide().is_none()) {
            let mut ide = IdeController::new("IDE", self.combo_base(0), &self.config.ide);
            if self.hw.interrupts.has_controller() {
                ide.set_irq_line(Some(self.hw.interrupts.register("IDE")));
            }
            if let Err(e) = self.with_combo(0, |card, ctx| card.insert_ide(ide, ctx))? {
                self.tidy_combo(0);
                return Err(e);
            }
        }
        let result = self
            .with_combo(0, |card, _| card.ide_mut().map(|ide| ide.attach(unit, path)))?
            .unwrap_or_else(|| Err(CoreError::NoSuchDevice("IDE".to_string())));
        if result.is_err() {
            self.tidy_combo(0);
        }
        result
    }

    pub fn detach_ide(&mut self, unit: usize) -> CoreResult<()> {
        self.with_combo(0, |card, ctx| card.ide_mut().map(|ide| ide.detach(unit, ctx)))?
            .ok_or_else(|| CoreError::NoSuchDevice("IDE".to_string()))??;
        self.tidy_combo(0);
        Ok(())
    }

    /// Attach the RTC. If `nvr_file` exists its contents are loaded, and the register file is
    /// written back to it when the RTC is detached.
    pub fn attach_rtc(&mut self, nvr_file: Option<PathBuf>) -> CoreResult<()> {
        let config = RtcConfig {
            nvr_file: nvr_file.clone(),
            ..self.config.rtc.clone()
        };
        let mut rtc = Rtc::new("RTC", self.combo_base(0), &config);
        if let Some(path) = nvr_file.as_deref().filter(|p| p.exists()) {
            rtc.load_nvr(path)?;
        }
        self.ensure_combo(0)?;
        if let Err(e) = self.with_combo(0, |card, ctx| card.insert_rtc(rtc, ctx))? {
            self.tidy_combo(0);
            return Err(e);
        }
        self.rtc_nvr = nvr_file;
        Ok(())
    }

    pub fn detach_rtc(&mut self) -> CoreResult<()> {
        let rtc = self
            .with_combo(0, |card, ctx| card.remove_rtc(ctx))?
            .ok_or_else(|| CoreError::NoSuchDevice("RTC".to_string()))?;
        self.tidy_combo(0);
        if let Some(path) = self.rtc_nvr.take() {
            rtc.save_nvr(&path)?;
        }
        Ok(())
    }

    /// Write back what outlives the session: the RTC's NVR file, and the console log.
    pub fn shutdown(&mut self) -> CoreResult<()> {
        self.hw.console.close_log();
        match self.rtc_nvr.as_deref() {
            Some(path) => self.save_nvr(path),
            None => Ok(()),
        }
    }

    pub fn set_rtc_elfos_mode(&mut self, on: bool) -> CoreResult<()> {
        self.with_combo(0, |card, _| card.rtc_mut().map(|rtc| rtc.set_elfos_mode(on)))?
            .ok_or_else(|| CoreError::NoSuchDevice("RTC".to_string()))
    }

    pub fn save_nvr(&self, path: &Path) -> CoreResult<()> {
        self.combo(0)
            .and_then(|card| card.rtc())
            .ok_or_else(|| CoreError::NoSuchDevice("RTC".to_string()))?
            .save_nvr(path)
    }

    pub fn load_nvr(&mut self, path: &Path) -> CoreResult<()> {
        self.with_combo(0, |card, _| card.rtc_mut().map(|rtc| rtc.load_nvr(path)))?
            .ok_or_else(|| CoreError::NoSuchDevice("RTC".to_string()))?
    }

    pub fn set_switches(&mut self, value: u8) -> CoreResult<()> {
        match self.switches.and_then(|id| self.hw.devices.get_mut(id.0)) {
            Some(Some(DeviceDispatch::DipSwitches(switches))) => {
                switches.set_value(value);
                Ok(())
            }
            _ => Err(CoreError::NoSuchDevice("SWITCHES".to_string())),
        }
    }

    pub fn post_value(&self) -> Option<u8> {
        match self.post.and_then(|id| self.hw.devices.get(id.0)) {
            Some(Some(DeviceDispatch::PostDisplay(post))) => Some(post.value()),
            _ => None,
        }
    }

    // CPU-side access, also used by the user interface

    pub fn io_read(&mut self, port: u16) -> Option<u8> {
        self.hw.io_read(port, &mut self.events)
    }

    pub fn io_write(&mut self, port: u16, byte: u8) -> bool {
        self.hw.io_write(port, byte, &mut self.events)
    }

    pub fn sense(&self, index: usize) -> bool {
        self.hw.sense(index)
    }

    pub fn set_flag(&mut self, index: usize, bit: bool) {
        self.hw.set_flag(index, bit, &mut self.events)
    }

    /// Advance simulated time by `ns` without executing instructions.
    pub fn advance(&mut self, ns: SimTime) {
        self.time_base += ns;
        let t = self.time_base + self.clock.cycles_to_ns(self.clock.cycles());
        self.events.advance_to(t, &mut self.hw);
    }

    // Execution

    /// Reset the CPU, every device and the event queue. Memory and breakpoints are kept.
    pub fn reset(&mut self) {
        self.events.reset();
        self.hw.console.reset_pacing();
        self.clock.reset();
        self.time_base = 0;
        self.hw.interrupts.reset();
        self.hw.port_map.set_group(0);
        {
            let mut bus = MachineBus {
                memory: &mut self.memory,
                events: &mut self.events,
                hw: &mut self.hw,
            };
            self.cpu.reset(&mut bus);
        }
        // Devices come out of reset with an idle line regardless of how the CPU reset left Q.
        for idx in 0..self.hw.devices.len() {
            self.hw.with_device(DeviceId(idx), &mut self.events, |d, ctx| d.reset(ctx));
        }
        self.memory.take_break_pending();
        log::debug!("Machine reset");
    }

    fn execute_one(&mut self, skip_break: bool) -> Result<(), StopCode> {
        let mut bus = MachineBus {
            memory: &mut self.memory,
            events: &mut self.events,
            hw: &mut self.hw,
        };
        let cycles = self.cpu.step(&mut bus, skip_break)?;
        let t = self.time_base + self.clock.add_cycles(cycles);
        self.events.advance_to(t, &mut self.hw);
        Ok(())
    }

    fn execute(&mut self, limit: Option<u64>, skip_break: bool) -> StopCode {
        let mut executed = 0u64;
        let mut skip = skip_break;
        loop {
            if limit.is_some_and(|n| executed >= n) {
                return StopCode::StepComplete;
            }
            if executed % CONSOLE_POLL_INSTRUCTIONS == CONSOLE_POLL_INSTRUCTIONS - 1
                && self.hw.console.is_console_break(0)
            {
                log::debug!("Console break at {:04X}", self.cpu.pc());
                return StopCode::UserBreak;
            }
            if let Err(code) = self.execute_one(skip) {
                log::debug!("CPU stopped: {}", code);
                return code;
            }
            skip = false;
            executed += 1;
        }
    }

    /// Run until something stops the CPU.
    pub fn run(&mut self) -> StopCode {
        self.execute(None, false)
    }

    /// Run from `address`.
    pub fn run_from(&mut self, address: u16) -> StopCode {
        self.cpu.set_pc(address);
        self.execute(None, false)
    }

    /// Resume after a stop. A breakpoint at the current PC is passed over once.
    pub fn continue_run(&mut self) -> StopCode {
        self.execute(None, true)
    }

    /// Execute `n` instructions. A breakpoint at the current PC is passed over.
    pub fn step(&mut self, n: u64) -> StopCode {
        self.execute(Some(n), true)
    }

    // Registers

    pub fn register(&self, name: &str) -> Option<u16> {
        self.cpu.register(name)
    }

    pub fn set_register(&mut self, name: &str, value: u16) -> CoreResult<()> {
        if let Some(q) = self.cpu.set_register(name, value)? {
            self.hw.set_flag(Q_FLAG, q, &mut self.events);
        }
        Ok(())
    }

    // Display

    pub fn show_devices(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{} at {} Hz", self.layout.name, self.clock.crystal_hz())?;
        if let Some(port) = self.hw.port_map.group_port() {
            writeln!(
                out,
                "Two-level I/O select on port {}, group {:02X}",
                port,
                self.hw.port_map.group()
            )?;
        }
        for (idx, device) in self.hw.devices.iter().enumerate() {
            let Some(device) = device
            else {
                continue;
            };
            if device.port_count() > 0 {
                writeln!(
                    out,
                    "{:<3} {:<9} {} port {}-{}",
                    DeviceId(idx),
                    device.name(),
                    device.direction(),
                    device.base_port(),
                    device.base_port() + device.port_count() - 1
                )?;
            }
            else {
                writeln!(out, "{:<3} {:<9} no ports", DeviceId(idx), device.name())?;
            }
        }
        write!(out, "{}", self.hw.interrupts)?;
        self.hw.console.show(out)
    }

    /// Show the state of the device called `name`, including devices on a combo card.
    pub fn show_device(&self, name: &str, out: &mut dyn fmt::Write) -> CoreResult<()> {
        let not_found = || CoreError::NoSuchDevice(name.to_string());
        let found = self
            .hw
            .devices
            .iter()
            .flatten()
            .find(|d| d.name().eq_ignore_ascii_case(name));
        let result = match found {
            Some(device) => device.show(out),
            None => {
                let mut sub = None;
                for card in (0..self.combos.len()).filter_map(|slot| self.combo(slot)) {
                    if let Some(uart) = card.uart().filter(|u| u.name().eq_ignore_ascii_case(name)) {
                        sub = Some(uart.show(out));
                    }
                    else if let Some(ide) = card.ide().filter(|i| i.name().eq_ignore_ascii_case(name)) {
                        sub = Some(ide.show(out));
                    }
                    else if let Some(rtc) = card.rtc().filter(|r| r.name().eq_ignore_ascii_case(name)) {
                        sub = Some(rtc.show(out));
                    }
                    if sub.is_some() {
                        break;
                    }
                }
                sub.ok_or_else(not_found)?
            }
        };
        result.map_err(|_| CoreError::Unsupported("formatting error".to_string()))
    }

    pub fn show_time(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let now = self.now();
        writeln!(
            out,
            "Simulated time {}.{:09} s, {} machine cycles, {} instructions, {} interrupts",
            now / 1_000_000_000,
            now % 1_000_000_000,
            self.clock.cycles(),
            self.cpu.instruction_count(),
            self.cpu.interrupt_count()
        )?;
        writeln!(
            out,
            "{} events pending, {} dispatched",
            self.events.len(),
            self.events.dispatched()
        )
    }

    /// Name of the device with handle `id`, for diagnostics.
    pub fn device_name(&self, id: DeviceId) -> String {
        self.hw.device_name(id)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::VecDeque, fs::File, rc::Rc};

    use super::*;
    use crate::{
        config::{BoardType, ConsoleConfig, UartConfig},
        console::BufferConsole,
        devices::{
            combo::CARD_STATUS_UART,
            ide::{
                FEATURE_ENABLE_8BIT, REG_DATA, REG_DRIVE_HEAD, REG_ERROR_FEATURES, REG_LBA0, REG_LBA1, REG_LBA2,
                REG_SECTOR_COUNT, REG_STATUS_COMMAND,
            },
            ide::{STATUS_DRQ, STATUS_DSC, STATUS_READY},
            rtc::REG_A,
            uart::{
                INTERRUPT_TX_EMPTY, MODEM_CONTROL_LOOP, REG_IER, REG_LSR, REG_MCR, REG_RBR_THR, REG_SCR,
                STATUS_DATA_READY, STATUS_TRANSMIT_EMPTY,
            },
        },
        time::{ms_to_ns, us_to_ns, NS_PER_SEC},
    };

    const SELECT_UART: u8 = 0x10;
    const SELECT_RTC: u8 = 0x80;

    fn build(config: MachineConfig) -> (Machine, Rc<RefCell<BufferConsole>>) {
        let host = Rc::new(RefCell::new(BufferConsole::new()));
        let machine = Machine::new(config, Box::new(host.clone())).unwrap();
        (machine, host)
    }

    fn bare(board: BoardType) -> (Machine, Rc<RefCell<BufferConsole>>) {
        build(MachineConfig {
            board,
            serial: SerialConfig {
                attach: false,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn select_write(m: &mut Machine, select: u8, byte: u8) {
        assert!(m.io_write(2, select));
        assert!(m.io_write(3, byte));
    }

    fn select_read(m: &mut Machine, select: u8) -> u8 {
        assert!(m.io_write(2, select));
        m.io_read(3).unwrap()
    }

    fn uart_write(m: &mut Machine, reg: u8, byte: u8) {
        select_write(m, SELECT_UART | reg, byte);
    }

    fn uart_read(m: &mut Machine, reg: u8) -> u8 {
        select_read(m, SELECT_UART | reg)
    }

    #[test]
    fn uart_loopback_echo() {
        let (mut m, _) = bare(BoardType::Elf2k);
        m.attach_uart(0).unwrap();
        uart_write(&mut m, REG_MCR, MODEM_CONTROL_LOOP);
        uart_write(&mut m, REG_RBR_THR, 0x48);
        uart_write(&mut m, REG_RBR_THR, 0x69);
        let char_time = m.combo(0).unwrap().uart().unwrap().char_time();
        m.advance(2 * char_time);

        assert_eq!(uart_read(&mut m, REG_RBR_THR), 0x48);
        assert_eq!(uart_read(&mut m, REG_RBR_THR), 0x69);
        assert_eq!(uart_read(&mut m, REG_LSR) & STATUS_DATA_READY, 0);
    }

    #[test]
    fn bit_banged_serial_frames_keystrokes_on_ef3() {
        let (mut m, host) = build(MachineConfig::default());
        assert!(m.serial_attached());
        host.borrow_mut().push_input(b"Hi\r");
        let bit = NS_PER_SEC / 1200;

        let mut received = Vec::new();
        for _ in 0..3 {
            let mut guard = 0;
            while m.sense(2) {
                m.advance(1_000);
                guard += 1;
                assert!(guard < 100_000, "no start bit");
            }
            m.advance(bit / 2);
            let mut byte = 0u8;
            for i in 0..8 {
                m.advance(bit);
                if m.sense(2) {
                    byte |= 1 << i;
                }
            }
            m.advance(bit);
            assert!(m.sense(2), "missing stop bit");
            received.push(byte);
        }
        assert_eq!(received, [0x48, 0x69, 0x0D]);
    }

    #[test]
    fn bit_banged_serial_receives_from_q() {
        let (mut m, host) = build(MachineConfig::default());
        let bit = NS_PER_SEC / 1200;
        m.set_flag(Q_FLAG, true);
        m.advance(bit);
        // Start bit, 0x41 lsb first, stop bit.
        m.set_flag(Q_FLAG, false);
        m.advance(bit);
        for i in 0..8 {
            m.set_flag(Q_FLAG, 0x41 & (1 << i) != 0);
            m.advance(bit);
        }
        m.set_flag(Q_FLAG, true);
        m.advance(2 * bit);
        assert_eq!(host.borrow().output(), b"A");
    }

    #[test]
    fn ide_identify_through_combo_card() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        File::create(&path).unwrap().set_len(32 * 1024 * 1024).unwrap();
        let (mut m, _) = bare(BoardType::Elf2k);
        m.attach_ide(0, &path).unwrap();

        for reg in [REG_LBA0, REG_LBA1, REG_LBA2] {
            select_write(&mut m, reg, 0);
        }
        select_write(&mut m, REG_DRIVE_HEAD, 0xE0);
        select_write(&mut m, REG_ERROR_FEATURES, FEATURE_ENABLE_8BIT);
        select_write(&mut m, REG_STATUS_COMMAND, 0xEF);
        m.advance(us_to_ns(10));
        select_write(&mut m, REG_SECTOR_COUNT, 0);
        select_write(&mut m, REG_STATUS_COMMAND, 0xEC);
        m.advance(us_to_ns(10));

        let ready = STATUS_READY | STATUS_DSC | STATUS_DRQ;
        assert_eq!(select_read(&mut m, REG_STATUS_COMMAND) & ready, ready);
        assert!(m.io_write(2, REG_DATA));
        let block: Vec<u8> = (0..512).map(|_| m.io_read(3).unwrap()).collect();
        let sectors = u32::from_le_bytes([block[120], block[121], block[122], block[123]]);
        assert_eq!(sectors, 65536);
    }

    fn xmodem_machine() -> (Machine, Rc<RefCell<BufferConsole>>) {
        build(MachineConfig {
            serial: SerialConfig {
                attach: false,
                ..Default::default()
            },
            uart: UartConfig {
                attach: true,
                ..Default::default()
            },
            console: ConsoleConfig {
                xmodem_cps: 100_000,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    // Move bytes received by one machine's UART out through the other machine's UART, the way a
    // null modem cable would.
    fn relay(from: &mut Machine, to: &mut Machine, pending: &mut VecDeque<u8>) {
        while uart_read(from, REG_LSR) & STATUS_DATA_READY != 0 {
            pending.push_back(uart_read(from, REG_RBR_THR));
        }
        if !pending.is_empty() && uart_read(to, REG_LSR) & STATUS_TRANSMIT_EMPTY != 0 {
            if let Some(byte) = pending.pop_front() {
                uart_write(to, REG_RBR_THR, byte);
            }
        }
    }

    #[test]
    fn xmodem_round_trip_through_uarts() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.bin");
        let output = dir.path().join("output.bin");
        let payload: Vec<u8> = (0..300u32).map(|i| (i * 13 + 1) as u8).collect();
        std::fs::write(&input, &payload).unwrap();

        let (mut a, _) = xmodem_machine();
        let (mut b, _) = xmodem_machine();
        a.console_mut().send_file(&input).unwrap();
        b.console_mut().receive_file(&output).unwrap();

        let mut a_to_b = VecDeque::new();
        let mut b_to_a = VecDeque::new();
        let mut guard = 0;
        while a.console_mut().xmodem_active() || b.console_mut().xmodem_active() {
            a.advance(us_to_ns(100));
            b.advance(us_to_ns(100));
            relay(&mut a, &mut b, &mut a_to_b);
            relay(&mut b, &mut a, &mut b_to_a);
            guard += 1;
            assert!(guard < 200_000, "transfer did not finish");
        }

        assert_eq!(a.console_mut().take_xmodem_result().unwrap().unwrap(), 300);
        assert_eq!(b.console_mut().take_xmodem_result().unwrap().unwrap(), 300);
        assert_eq!(std::fs::read(&output).unwrap(), payload);
    }

    #[test]
    fn rtc_square_wave_through_combo_card() {
        let (mut m, _) = bare(BoardType::Elf2k);
        m.attach_rtc(None).unwrap();
        select_write(&mut m, SELECT_RTC | REG_A, 0x2F);
        m.advance(2 * NS_PER_SEC);
        assert_eq!(m.combo(0).unwrap().rtc().unwrap().pf_rising_edges(), 4);
    }

    fn load(m: &mut Machine, address: u16, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            m.memory_mut().ui_write(address + i as u16, *b);
        }
    }

    #[test]
    fn breakpoint_stops_before_fetch_completes() {
        let (mut m, _) = bare(BoardType::Elf2k);
        // LDI 12; LBR 8100
        load(&mut m, 0x8000, &[0xF8, 0x12, 0xC0, 0x81, 0x00]);
        // LDI 34; illegal
        load(&mut m, 0x8100, &[0xF8, 0x34, 0x68]);
        m.memory_mut().set_break(0x8100, true);
        m.set_register("R0", 0x8000).unwrap();

        assert_eq!(m.run(), StopCode::Breakpoint(0x8100));
        assert_eq!(m.now(), CpuClock::new(1_790_000).cycles_to_ns(5));
        assert_eq!(m.cpu().d(), 0x12);
        assert_eq!(m.cpu().instruction_count(), 2);
        assert_eq!(m.cpu().pc(), 0x8100);

        // Running again stops at the same place; continuing passes over it.
        assert_eq!(m.run(), StopCode::Breakpoint(0x8100));
        assert_eq!(
            m.continue_run(),
            StopCode::IllegalOpcode {
                opcode: 0x68,
                address: 0x8102
            }
        );
        assert_eq!(m.cpu().d(), 0x34);
    }

    #[test]
    fn step_counts_instructions() {
        let (mut m, _) = bare(BoardType::Elf2k);
        // INC R5 x3
        load(&mut m, 0, &[0x15, 0x15, 0x15]);
        assert_eq!(m.step(2), StopCode::StepComplete);
        assert_eq!(m.register("R5"), Some(2));
        assert_eq!(m.register("PC"), Some(2));
    }

    #[test]
    fn console_break_stops_a_running_loop() {
        let (mut m, host) = bare(BoardType::Elf2k);
        // BR 00 with interrupts enabled is not an endless loop stop.
        load(&mut m, 0, &[0x30, 0x00]);
        host.borrow_mut().push_input(&[0x05]);
        assert_eq!(m.run(), StopCode::UserBreak);
        assert_eq!(m.cpu().instruction_count(), CONSOLE_POLL_INSTRUCTIONS - 1);
    }

    #[test]
    fn endless_loop_and_illegal_io() {
        let (mut m, _) = bare(BoardType::Elf2k);
        load(&mut m, 0, &[0x30, 0x00]);
        m.set_register("IE", 0).unwrap();
        assert_eq!(m.run(), StopCode::EndlessLoop(0));

        let (mut m, _) = bare(BoardType::Elf2k);
        // OUT 6: nothing answers on port 6.
        load(&mut m, 0, &[0x66]);
        assert_eq!(m.run(), StopCode::IllegalIo { port: 6, address: 0 });
    }

    #[test]
    fn post_and_switches_share_port_4() {
        let (mut m, _) = bare(BoardType::Elf2k);
        m.set_switches(0xA5).unwrap();
        // With X = P = 0, OUT takes its data from the byte after the opcode.
        // 0: 64 5A  OUT 4
        // 2: 6C     INP 4
        load(&mut m, 0, &[0x64, 0x5A, 0x6C]);
        assert_eq!(m.step(2), StopCode::StepComplete);
        assert_eq!(m.post_value(), Some(0x5A));
        assert_eq!(m.cpu().d(), 0xA5);
    }

    #[test]
    fn uart_interrupt_reaches_cpu() {
        let (mut m, _) = bare(BoardType::Elf2k);
        m.attach_uart(0).unwrap();
        uart_write(&mut m, REG_IER, INTERRUPT_TX_EMPTY);
        assert!(m.interrupts().any_asserted());
        assert_eq!(m.step(1), StopCode::StepComplete);
        assert_eq!(m.cpu().p(), 1);
        assert_eq!(m.cpu().x(), 2);
        assert!(!m.cpu().ie());
    }

    #[test]
    fn interrupt_controller_masks_lines() {
        let (mut m, _) = bare(BoardType::Sbc1802);
        m.attach_uart(0).unwrap();
        uart_write(&mut m, REG_IER, INTERRUPT_TX_EMPTY);
        let irq = m.interrupts().find("UART").unwrap();
        assert_eq!(m.interrupts().highest_pending(), Some(irq));
        m.interrupts_mut().set_mask(1 << irq.index());
        assert!(!m.interrupts().any_asserted());
    }

    #[test]
    fn two_level_io_selects_the_second_card() {
        let (mut m, _) = bare(BoardType::Pev2);
        m.attach_uart(1).unwrap();

        assert!(m.io_write(1, 1));
        uart_write(&mut m, REG_SCR, 0x5A);
        assert_eq!(uart_read(&mut m, REG_SCR), 0x5A);
        assert_ne!(m.io_read(2).unwrap() & CARD_STATUS_UART, 0);

        // Group 0 has no card at all until something is attached there.
        assert!(m.io_write(1, 0));
        assert_eq!(m.io_read(2), None);
        m.attach_rtc(None).unwrap();
        assert_eq!(m.io_read(2).unwrap() & CARD_STATUS_UART, 0);
    }

    #[test]
    fn second_uart_needs_a_second_slot() {
        let (mut m, _) = bare(BoardType::Elf2k);
        assert!(matches!(m.attach_uart(1), Err(CoreError::NoSuchDevice(_))));
        m.attach_uart(0).unwrap();
        assert!(matches!(m.attach_uart(0), Err(CoreError::AlreadyAttached(_))));
    }

    #[test]
    fn combo_card_is_removed_with_its_last_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        File::create(&path).unwrap().set_len(512 * 64).unwrap();
        let (mut m, _) = bare(BoardType::Elf2k);

        m.attach_uart(0).unwrap();
        m.attach_ide(1, &path).unwrap();
        m.detach_uart(0).unwrap();
        assert!(m.combo(0).is_some());
        m.detach_ide(1).unwrap();
        assert!(m.combo(0).is_none());
        assert_eq!(m.io_read(2), None);
        assert!(matches!(m.detach_ide(0), Err(CoreError::NoSuchDevice(_))));
    }

    #[test]
    fn detaching_ide_drops_its_pending_interrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        File::create(&path).unwrap().set_len(512 * 64).unwrap();
        let (mut m, _) = bare(BoardType::Sbc1802);
        m.attach_ide(0, &path).unwrap();
        m.attach_ide(1, &path).unwrap();

        select_write(&mut m, REG_STATUS_COMMAND, 0xE1);
        m.advance(ms_to_ns(1));
        assert!(m.interrupts().any_asserted());
        m.detach_ide(0).unwrap();
        assert!(!m.interrupts().any_asserted());

        select_write(&mut m, REG_DRIVE_HEAD, 0xF0);
        select_write(&mut m, REG_STATUS_COMMAND, 0xE1);
        m.advance(ms_to_ns(1));
        assert!(m.interrupts().any_asserted());
        m.detach_ide(1).unwrap();
        assert!(m.combo(0).is_none());
        assert!(!m.interrupts().any_asserted());
    }

    #[test]
    fn failed_ide_attach_leaves_no_card() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.img");
        std::fs::write(&path, [0u8; 700]).unwrap();
        let (mut m, _) = bare(BoardType::Elf2k);
        assert!(matches!(m.attach_ide(0, &path), Err(CoreError::ImageSize { .. })));
        assert!(m.combo(0).is_none());
    }

    #[test]
    fn rtc_nvr_is_saved_on_detach_and_loaded_on_attach() {
        let dir = tempfile::tempdir().unwrap();
        let nvr = dir.path().join("rtc.nvr");
        let (mut m, _) = bare(BoardType::Elf2k);
        m.attach_rtc(Some(nvr.clone())).unwrap();
        select_write(&mut m, SELECT_RTC | 0x20, 0x77);
        m.detach_rtc().unwrap();
        assert_eq!(std::fs::read(&nvr).unwrap()[0x20], 0x77);

        m.attach_rtc(Some(nvr)).unwrap();
        assert_eq!(select_read(&mut m, SELECT_RTC | 0x20), 0x77);
    }

    #[test]
    fn shutdown_saves_the_nvr() {
        let dir = tempfile::tempdir().unwrap();
        let nvr = dir.path().join("shutdown.nvr");
        let (mut m, _) = bare(BoardType::Elf2k);
        m.attach_rtc(Some(nvr.clone())).unwrap();
        select_write(&mut m, SELECT_RTC | 0x30, 0x42);
        m.shutdown().unwrap();
        assert_eq!(std::fs::read(&nvr).unwrap()[0x30], 0x42);
    }

    #[test]
    fn reset_is_idempotent() {
        let (mut m, _) = build(MachineConfig {
            uart: UartConfig {
                attach: true,
                ..Default::default()
            },
            ..Default::default()
        });
        m.attach_rtc(None).unwrap();
        select_write(&mut m, SELECT_RTC | REG_A, 0x2F);
        m.advance(ms_to_ns(300));
        m.reset();
        let pending = m.events().len();
        let pc = m.cpu().pc();
        m.reset();
        assert_eq!(m.events().len(), pending);
        assert_eq!(m.cpu().pc(), pc);
        assert_eq!(m.now(), 0);
    }

    #[test]
    fn q_deposit_reaches_devices() {
        let (mut m, host) = build(MachineConfig::default());
        let bit = NS_PER_SEC / 1200;
        m.set_register("Q", 1).unwrap();
        m.advance(bit);
        // A start bit that never ends is a framing error, and nothing is printed.
        m.set_register("Q", 0).unwrap();
        m.advance(12 * bit);
        assert_eq!(m.register("Q"), Some(0));
        assert!(host.borrow().output().is_empty());
    }

    #[test]
    fn show_devices_lists_installed_devices() {
        let (mut m, _) = bare(BoardType::Elf2k);
        m.attach_uart(0).unwrap();
        let mut text = String::new();
        m.show_devices(&mut text).unwrap();
        assert!(text.contains("ELF2K"));
        assert!(text.contains("COMBO"));
        assert!(text.contains("POST"));
        let mut uart = String::new();
        m.show_device("uart", &mut uart).unwrap();
        assert!(!uart.is_empty());
        assert!(m.show_device("nothing", &mut uart).is_err());
    }
}
