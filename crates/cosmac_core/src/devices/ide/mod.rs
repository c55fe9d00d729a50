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

//! An IDE/ATA controller with up to two drives (master and slave) in PIO mode.
//!
//! The task file registers are shared by both drives; status, error and the 512-byte sector
//! buffer belong to each drive. A command sets BUSY and completes when its delay event fires.
//! The host bus is eight bits wide. In the power-on 16-bit mode each data register access moves
//! a whole word: a read returns the low byte and the high byte is lost, and a write stores the
//! byte as the low half with a zero high half. SET FEATURES 01 selects 8-bit mode, where each
//! access moves one byte of the sector buffer.
//!
//! Register indices follow the ATA command block (0-7) with the device control / alternate
//! status register at index 0x0E.

pub mod ata_string;
pub mod disk;
pub mod identify;

use std::{fmt, io::Cursor, path::Path};

use binrw::BinWrite;
use modular_bitfield::bitfield;

use crate::{
    config::IdeConfig,
    device::{Device, DeviceContext},
    error::CoreError,
    events::EventParam,
    interrupt::IrqId,
    port_map::PortDirection,
    time::SimTime,
};
use disk::{DiskImage, SECTOR_SIZE};
use identify::AtaDriveIdentification;

pub const IDE_PORT_COUNT: u16 = 16;
pub const DRIVE_COUNT: usize = 2;

pub const REG_DATA: u8 = 0x00;
pub const REG_ERROR_FEATURES: u8 = 0x01;
pub const REG_SECTOR_COUNT: u8 = 0x02;
pub const REG_LBA0: u8 = 0x03;
pub const REG_LBA1: u8 = 0x04;
pub const REG_LBA2: u8 = 0x05;
pub const REG_DRIVE_HEAD: u8 = 0x06;
pub const REG_STATUS_COMMAND: u8 = 0x07;
pub const REG_ALT_STATUS_CONTROL: u8 = 0x0E;

pub const STATUS_ERR: u8 = 0x01;
pub const STATUS_DRQ: u8 = 0x08;
pub const STATUS_DSC: u8 = 0x10;
pub const STATUS_READY: u8 = 0x40;
pub const STATUS_BUSY: u8 = 0x80;

pub const ERROR_ABRT: u8 = 0x04;
pub const ERROR_IDNF: u8 = 0x10;

/// Diagnostic code reported after EXECUTE DEVICE DIAGNOSTIC and reset: no error detected.
const DIAGNOSTIC_PASSED: u8 = 0x01;

pub const DRIVE_HEAD_LBA_BIT: u8 = 0x40;
pub const DRIVE_HEAD_SLAVE_BIT: u8 = 0x10;
const DRIVE_HEAD_BITS_ON: u8 = 0xA0;

pub const CONTROL_NIEN: u8 = 0x02;
pub const CONTROL_SRST: u8 = 0x04;

pub const FEATURE_ENABLE_8BIT: u8 = 0x01;
pub const FEATURE_DISABLE_8BIT: u8 = 0x81;

/// Event parameters. The low bit selects the drive.
const EVENT_DRIVE_BASE: EventParam = 0x10;

#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct AtaStatusRegister {
    pub err:   bool, // Error
    pub idx:   bool, // Index
    pub corr:  bool, // Corrected Data
    pub drq:   bool, // Data Request
    pub dsc:   bool, // Disk Seek Complete
    pub dwf:   bool, // Drive Write Failure
    pub ready: bool, // Drive Ready
    pub busy:  bool, // Drive Busy
}

#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct AtaErrorRegister {
    pub amnf: bool, // Address Mark Not Found
    pub tk0:  bool, // Track 0 Not Found
    pub abrt: bool, // Aborted Command
    pub mcr:  bool, // Media Change Requested
    pub idnf: bool, // ID Not Found
    pub mc:   bool, // Media Changed
    pub unc:  bool, // Uncorrectable Data Error
    pub bbk:  bool, // Bad Block
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AtaCommand {
    Recalibrate = 0x10,
    ReadSectors = 0x20,
    WriteSectors = 0x30,
    Diagnose = 0x90,
    InitializeParameters = 0x91,
    SpinDown = 0xE0,
    SpinUp = 0xE1,
    ReadBuffer = 0xE4,
    WriteBuffer = 0xE8,
    IdentifyDrive = 0xEC,
    SetFeatures = 0xEF,
}

impl TryFrom<u8> for AtaCommand {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        Ok(match byte {
            0x10 => AtaCommand::Recalibrate,
            0x20 => AtaCommand::ReadSectors,
            0x30 => AtaCommand::WriteSectors,
            0x90 => AtaCommand::Diagnose,
            0x91 => AtaCommand::InitializeParameters,
            0xE0 => AtaCommand::SpinDown,
            0xE1 => AtaCommand::SpinUp,
            0xE4 => AtaCommand::ReadBuffer,
            0xE8 => AtaCommand::WriteBuffer,
            0xEC => AtaCommand::IdentifyDrive,
            0xEF => AtaCommand::SetFeatures,
            _ => return Err(byte),
        })
    }
}

/// What the drive does when its delay event fires.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Command(AtaCommand),
    /// The next sector of a multi-sector read is due.
    NextSector,
    /// A full sector buffer is being written to the image.
    Flush,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Transfer {
    None,
    ToHost,
    FromHost,
}

struct AtaDrive {
    image: Option<DiskImage>,
    status: AtaStatusRegister,
    error: AtaErrorRegister,
    buffer: Box<[u8; SECTOR_SIZE]>,
    buffer_pos: usize,
    transfer: Transfer,
    phase: Phase,
    command: Option<AtaCommand>,
    lba: u32,
    remaining: u32,
    eight_bit: bool,
    irq_pending: bool,
    sectors_read: u64,
    sectors_written: u64,
}

impl AtaDrive {
    fn new() -> Self {
        Self {
            image: None,
            status: AtaStatusRegister::new(),
            error: AtaErrorRegister::new(),
            buffer: Box::new([0; SECTOR_SIZE]),
            buffer_pos: 0,
            transfer: Transfer::None,
            phase: Phase::Idle,
            command: None,
            lba: 0,
            remaining: 0,
            eight_bit: false,
            irq_pending: false,
            sectors_read: 0,
            sectors_written: 0,
        }
    }

    fn reset(&mut self) {
        self.status = AtaStatusRegister::new();
        if self.image.is_some() {
            self.status.set_ready(true);
            self.status.set_dsc(true);
        }
        self.error = AtaErrorRegister::from_bytes([DIAGNOSTIC_PASSED]);
        self.buffer_pos = 0;
        self.transfer = Transfer::None;
        self.phase = Phase::Idle;
        self.command = None;
        self.remaining = 0;
        self.eight_bit = false;
        self.irq_pending = false;
    }

    /// Sector buffer bytes moved by one data register access.
    #[inline]
    fn access_width(&self) -> usize {
        if self.eight_bit {
            1
        }
        else {
            2
        }
    }

    fn status_byte(&self) -> u8 {
        self.status.into_bytes()[0]
    }

    fn error_byte(&self) -> u8 {
        self.error.into_bytes()[0]
    }

    fn sectors(&self) -> u64 {
        self.image.as_ref().map(|i| i.sectors()).unwrap_or(0)
    }

    /// Finish the current command successfully.
    fn complete(&mut self) {
        self.status.set_busy(false);
        self.status.set_drq(false);
        self.status.set_ready(true);
        self.status.set_dsc(true);
        self.transfer = Transfer::None;
        self.phase = Phase::Idle;
        self.command = None;
        self.irq_pending = true;
    }

    /// Finish the current command with an error.
    fn fail(&mut self, error: AtaErrorRegister) {
        self.error = error;
        self.status.set_busy(false);
        self.status.set_drq(false);
        self.status.set_ready(true);
        self.status.set_err(true);
        self.transfer = Transfer::None;
        self.phase = Phase::Idle;
        self.command = None;
        self.remaining = 0;
        self.irq_pending = true;
    }

    fn abort(&mut self) {
        self.fail(AtaErrorRegister::new().with_abrt(true));
    }

    fn id_not_found(&mut self) {
        self.fail(AtaErrorRegister::new().with_idnf(true));
    }

    /// Hand the sector buffer to the host.
    fn start_transfer(&mut self, transfer: Transfer) {
        self.buffer_pos = 0;
        self.transfer = transfer;
        self.status.set_busy(false);
        self.status.set_drq(true);
        self.status.set_ready(true);
        self.status.set_dsc(true);
        self.irq_pending = true;
    }

    fn load_sector(&mut self) -> bool {
        if self.lba as u64 >= self.sectors() {
            log::debug!("LBA {} beyond capacity of {} sectors", self.lba, self.sectors());
            self.id_not_found();
            return false;
        }
        let result = match self.image.as_mut() {
            Some(image) => image.read_sector(self.lba, &mut self.buffer),
            None => {
                self.abort();
                return false;
            }
        };
        match result {
            Ok(()) => {
                self.sectors_read += 1;
                true
            }
            Err(e) => {
                log::error!("Error reading sector {}: {}. Detaching image.", self.lba, e);
                self.image = None;
                self.abort();
                false
            }
        }
    }

    fn store_sector(&mut self) -> bool {
        if self.lba as u64 >= self.sectors() {
            self.id_not_found();
            return false;
        }
        let result = match self.image.as_mut() {
            Some(image) => image.write_sector(self.lba, &self.buffer),
            None => {
                self.abort();
                return false;
            }
        };
        match result {
            Ok(()) => {
                self.sectors_written += 1;
                true
            }
            Err(e) => {
                log::error!("Error writing sector {}: {}. Detaching image.", self.lba, e);
                self.image = None;
                self.abort();
                false
            }
        }
    }
}

pub struct IdeController {
    name: String,
    base_port: u16,
    short_delay: SimTime,
    long_delay: SimTime,
    irq: Option<IrqId>,
    drives: [AtaDrive; DRIVE_COUNT],

    features_reg: u8,
    sector_count_reg: u8,
    lba0_reg: u8,
    lba1_reg: u8,
    lba2_reg: u8,
    drive_head_reg: u8,
    device_control_reg: u8,
}

impl IdeController {
    pub fn new(name: &str, base_port: u16, config: &IdeConfig) -> Self {
        let mut ide = Self {
            name: name.to_string(),
            base_port,
            short_delay: config.short_delay(),
            long_delay: config.long_delay(),
            irq: None,
            drives: [AtaDrive::new(), AtaDrive::new()],
            features_reg: 0,
            sector_count_reg: 0,
            lba0_reg: 0,
            lba1_reg: 0,
            lba2_reg: 0,
            drive_head_reg: DRIVE_HEAD_BITS_ON,
            device_control_reg: 0,
        };
        ide.reset_registers();
        ide
    }

    pub fn set_irq_line(&mut self, irq: Option<IrqId>) {
        self.irq = irq;
    }

    pub fn irq_line(&self) -> Option<IrqId> {
        self.irq
    }

    /// Attach a raw image file to drive `unit`.
    pub fn attach(&mut self, unit: usize, path: &Path) -> Result<(), CoreError> {
        let drive = self.drives.get_mut(unit).ok_or(CoreError::InvalidUnit(unit))?;
        if drive.image.is_some() {
            return Err(CoreError::AlreadyAttached(format!("IDE{}", unit)));
        }
        let image = DiskImage::open(path)?;
        log::info!(
            "IDE{}: attached {} ({} sectors)",
            unit,
            path.display(),
            image.sectors()
        );
        drive.image = Some(image);
        drive.reset();
        Ok(())
    }

    /// Detach drive `unit`. A pending interrupt of the drive is dropped with it.
    pub fn detach(&mut self, unit: usize, ctx: &mut DeviceContext<'_>) -> Result<(), CoreError> {
        let drive = self.drives.get_mut(unit).ok_or(CoreError::InvalidUnit(unit))?;
        match drive.image.take() {
            Some(image) => {
                log::info!("IDE{}: detached {}", unit, image.path().display());
                drive.reset();
                self.update_irq(ctx);
                Ok(())
            }
            None => Err(CoreError::NoSuchDevice(format!("IDE{}", unit))),
        }
    }

    pub fn is_attached(&self, unit: usize) -> bool {
        self.drives.get(unit).is_some_and(|d| d.image.is_some())
    }

    pub fn attached_count(&self) -> usize {
        self.drives.iter().filter(|d| d.image.is_some()).count()
    }

    pub fn image_path(&self, unit: usize) -> Option<&Path> {
        self.drives.get(unit)?.image.as_ref().map(|i| i.path())
    }

    /// Whether drive `unit` is in 8-bit transfer mode.
    pub fn eight_bit(&self, unit: usize) -> bool {
        self.drives.get(unit).is_some_and(|d| d.eight_bit)
    }

    #[inline]
    fn selected(&self) -> usize {
        ((self.drive_head_reg & DRIVE_HEAD_SLAVE_BIT) != 0) as usize
    }

    fn reset_registers(&mut self) {
        self.features_reg = 0;
        self.sector_count_reg = 1;
        self.lba0_reg = 1;
        self.lba1_reg = 0;
        self.lba2_reg = 0;
        self.drive_head_reg = DRIVE_HEAD_BITS_ON;
        for drive in self.drives.iter_mut() {
            drive.reset();
        }
    }

    fn update_irq(&mut self, ctx: &mut DeviceContext<'_>) {
        let level = self.device_control_reg & CONTROL_NIEN == 0 && self.drives[self.selected()].irq_pending;
        ctx.set_irq(self.irq, level);
    }

    /// The block address selected by the task file, from either the LBA or CHS registers.
    fn command_lba(&self, unit: usize) -> Option<u32> {
        if self.drive_head_reg & DRIVE_HEAD_LBA_BIT != 0 {
            let mut lba = self.lba0_reg as u32;
            lba |= (self.lba1_reg as u32) << 8;
            lba |= (self.lba2_reg as u32) << 16;
            lba |= ((self.drive_head_reg & 0x0F) as u32) << 24;
            Some(lba)
        }
        else {
            let geometry = self.drives[unit].image.as_ref()?.geometry();
            let cylinder = (self.lba2_reg as u16) << 8 | self.lba1_reg as u16;
            geometry.chs_to_lba(cylinder, self.drive_head_reg & 0x0F, self.lba0_reg)
        }
    }

    /// Write the address of the last sector transferred back to the task file.
    fn distribute_lba(&mut self, unit: usize) {
        let drive = &self.drives[unit];
        let lba = drive.lba;
        self.sector_count_reg = drive.remaining as u8;
        if self.drive_head_reg & DRIVE_HEAD_LBA_BIT != 0 {
            self.lba0_reg = lba as u8;
            self.lba1_reg = (lba >> 8) as u8;
            self.lba2_reg = (lba >> 16) as u8;
            self.drive_head_reg = (self.drive_head_reg & 0xF0) | ((lba >> 24) & 0x0F) as u8;
        }
        else if let Some((c, h, s)) = drive.image.as_ref().and_then(|i| i.geometry().lba_to_chs(lba)) {
            self.lba0_reg = s;
            self.lba1_reg = c as u8;
            self.lba2_reg = (c >> 8) as u8;
            self.drive_head_reg = (self.drive_head_reg & 0xF0) | (h & 0x0F);
        }
    }

    /// Read register `reg` (0-7, or 0x0E).
    pub fn read_register(&mut self, reg: u8, ctx: &mut DeviceContext<'_>) -> u8 {
        let unit = self.selected();
        match reg & 0x0F {
            REG_DATA => self.data_register_read(unit, ctx),
            REG_ERROR_FEATURES => self.drives[unit].error_byte(),
            REG_SECTOR_COUNT => self.sector_count_reg,
            REG_LBA0 => self.lba0_reg,
            REG_LBA1 => self.lba1_reg,
            REG_LBA2 => self.lba2_reg,
            REG_DRIVE_HEAD => self.drive_head_reg,
            REG_STATUS_COMMAND => {
                self.drives[unit].irq_pending = false;
                self.update_irq(ctx);
                self.drives[unit].status_byte()
            }
            REG_ALT_STATUS_CONTROL => self.drives[unit].status_byte(),
            _ => {
                log::trace!("{}: read of unused register {:02X}", self.name, reg);
                0xFF
            }
        }
    }

    /// Write register `reg` (0-7, or 0x0E).
    pub fn write_register(&mut self, reg: u8, byte: u8, ctx: &mut DeviceContext<'_>) {
        match reg & 0x0F {
            REG_DATA => {
                let unit = self.selected();
                self.data_register_write(unit, byte, ctx);
            }
            REG_ERROR_FEATURES => self.features_reg = byte,
            REG_SECTOR_COUNT => self.sector_count_reg = byte,
            REG_LBA0 => self.lba0_reg = byte,
            REG_LBA1 => self.lba1_reg = byte,
            REG_LBA2 => self.lba2_reg = byte,
            REG_DRIVE_HEAD => {
                self.drive_head_reg = byte | DRIVE_HEAD_BITS_ON;
                self.update_irq(ctx);
            }
            REG_STATUS_COMMAND => self.command_register_write(byte, ctx),
            REG_ALT_STATUS_CONTROL => self.device_control_write(byte, ctx),
            _ => log::trace!("{}: write of unused register {:02X}", self.name, reg),
        }
    }

    fn device_control_write(&mut self, byte: u8, ctx: &mut DeviceContext<'_>) {
        let srst_rising = byte & CONTROL_SRST != 0 && self.device_control_reg & CONTROL_SRST == 0;
        self.device_control_reg = byte;
        if srst_rising {
            log::debug!("{}: software reset", self.name);
            ctx.cancel_all();
            self.reset_registers();
        }
        self.update_irq(ctx);
    }

    fn data_register_read(&mut self, unit: usize, ctx: &mut DeviceContext<'_>) -> u8 {
        let drive = &mut self.drives[unit];
        if drive.transfer != Transfer::ToHost || !drive.status.drq() {
            log::warn!("{}: data register read with DRQ not set", self.name);
            return 0;
        }

        let byte = drive.buffer[drive.buffer_pos];
        drive.buffer_pos += drive.access_width();
        if drive.buffer_pos >= SECTOR_SIZE {
            log::trace!("{}: sector buffer read complete", self.name);
            self.buffer_drained(unit, ctx);
        }
        byte
    }

    fn data_register_write(&mut self, unit: usize, byte: u8, ctx: &mut DeviceContext<'_>) {
        let drive = &mut self.drives[unit];
        if drive.transfer != Transfer::FromHost || !drive.status.drq() {
            log::warn!("{}: data register written with DRQ not set", self.name);
            return;
        }

        let width = drive.access_width();
        drive.buffer[drive.buffer_pos] = byte;
        drive.buffer[drive.buffer_pos + 1..drive.buffer_pos + width].fill(0);
        drive.buffer_pos += width;

        if drive.buffer_pos >= SECTOR_SIZE {
            log::trace!("{}: sector buffer write complete", self.name);
            self.buffer_filled(unit, ctx);
        }
    }

    /// The host has read the last byte of the sector buffer.
    fn buffer_drained(&mut self, unit: usize, ctx: &mut DeviceContext<'_>) {
        let long_delay = self.long_delay;
        let drive = &mut self.drives[unit];
        drive.status.set_drq(false);
        drive.transfer = Transfer::None;

        if drive.command == Some(AtaCommand::ReadSectors) && drive.remaining > 1 {
            drive.remaining -= 1;
            drive.lba += 1;
            drive.status.set_busy(true);
            drive.phase = Phase::NextSector;
            ctx.schedule(EVENT_DRIVE_BASE + unit as EventParam, long_delay);
        }
        else {
            if drive.command == Some(AtaCommand::ReadSectors) {
                drive.remaining = 0;
                self.distribute_lba(unit);
            }
            let drive = &mut self.drives[unit];
            drive.phase = Phase::Idle;
            drive.command = None;
        }
    }

    /// The host has written a full sector buffer.
    fn buffer_filled(&mut self, unit: usize, ctx: &mut DeviceContext<'_>) {
        let long_delay = self.long_delay;
        let drive = &mut self.drives[unit];
        drive.status.set_drq(false);
        drive.transfer = Transfer::None;

        match drive.command {
            Some(AtaCommand::WriteSectors) => {
                drive.status.set_busy(true);
                drive.phase = Phase::Flush;
                ctx.schedule(EVENT_DRIVE_BASE + unit as EventParam, long_delay);
            }
            _ => {
                drive.complete();
                self.update_irq(ctx);
            }
        }
    }

    fn command_register_write(&mut self, byte: u8, ctx: &mut DeviceContext<'_>) {
        let unit = self.selected();
        let short_delay = self.short_delay;
        let long_delay = self.long_delay;

        if self.drives[unit].status.busy() {
            log::warn!("{}: command {:02X} ignored while drive {} is busy", self.name, byte, unit);
            return;
        }

        let command = match AtaCommand::try_from(byte) {
            Ok(command) => command,
            Err(byte) => {
                log::debug!("{}: unsupported command {:02X}", self.name, byte);
                self.drives[unit].abort();
                self.update_irq(ctx);
                return;
            }
        };
        log::debug!("{}: drive {} command {:?}", self.name, unit, command);

        if self.drives[unit].image.is_none() {
            log::debug!("{}: command {:?} to drive {} with no image", self.name, command, unit);
            self.drives[unit].abort();
            self.update_irq(ctx);
            return;
        }

        let mut delay = short_delay;
        if matches!(command, AtaCommand::ReadSectors | AtaCommand::WriteSectors) {
            let count = match self.sector_count_reg {
                0 => 256,
                n => n as u32,
            };
            let lba = self.command_lba(unit);
            let drive = &mut self.drives[unit];
            match lba {
                Some(lba) if (lba as u64) < drive.sectors() => {
                    drive.lba = lba;
                    drive.remaining = count;
                }
                _ => {
                    drive.id_not_found();
                    self.update_irq(ctx);
                    return;
                }
            }
            if command == AtaCommand::ReadSectors {
                delay = long_delay;
            }
        }

        let drive = &mut self.drives[unit];
        drive.status.set_err(false);
        drive.status.set_drq(false);
        drive.status.set_busy(true);
        drive.error = AtaErrorRegister::new();
        drive.transfer = Transfer::None;
        drive.command = Some(command);
        drive.phase = Phase::Command(command);
        drive.irq_pending = false;
        self.update_irq(ctx);
        ctx.schedule(EVENT_DRIVE_BASE + unit as EventParam, delay);
    }

    /// The delay for the drive's current phase has elapsed.
    fn drive_event(&mut self, unit: usize) {
        let features = self.features_reg;
        let drive = &mut self.drives[unit];
        let phase = std::mem::replace(&mut drive.phase, Phase::Idle);

        if drive.image.is_none() && phase != Phase::Idle {
            drive.abort();
            return;
        }

        match phase {
            Phase::Idle => {}
            Phase::Command(AtaCommand::IdentifyDrive) => {
                let Some(image) = drive.image.as_ref() else { return };
                let id = AtaDriveIdentification::new(&image.geometry(), image.sectors(), SECTOR_SIZE);
                let mut cursor = Cursor::new(vec![0u8; SECTOR_SIZE]);
                match id.write(&mut cursor) {
                    Ok(()) => {
                        drive.buffer.copy_from_slice(cursor.get_ref());
                        drive.remaining = 1;
                        drive.start_transfer(Transfer::ToHost);
                    }
                    Err(e) => {
                        log::error!("Error writing drive identification block: {}", e);
                        drive.abort();
                    }
                }
            }
            Phase::Command(AtaCommand::ReadSectors) | Phase::NextSector => {
                if drive.load_sector() {
                    drive.start_transfer(Transfer::ToHost);
                }
            }
            Phase::Command(AtaCommand::WriteSectors) => {
                drive.buffer.fill(0);
                drive.start_transfer(Transfer::FromHost);
            }
            Phase::Flush => {
                if drive.store_sector() {
                    drive.remaining -= 1;
                    if drive.remaining > 0 {
                        drive.lba += 1;
                        drive.buffer.fill(0);
                        drive.start_transfer(Transfer::FromHost);
                    }
                    else {
                        drive.complete();
                        self.distribute_lba(unit);
                    }
                }
            }
            Phase::Command(AtaCommand::ReadBuffer) => {
                drive.remaining = 1;
                drive.start_transfer(Transfer::ToHost);
            }
            Phase::Command(AtaCommand::WriteBuffer) => {
                drive.start_transfer(Transfer::FromHost);
            }
            Phase::Command(AtaCommand::SetFeatures) => match features {
                FEATURE_ENABLE_8BIT => {
                    drive.eight_bit = true;
                    drive.complete();
                }
                FEATURE_DISABLE_8BIT => {
                    drive.eight_bit = false;
                    drive.complete();
                }
                _ => {
                    log::debug!("Unsupported feature {:02X}", features);
                    drive.abort();
                }
            },
            Phase::Command(AtaCommand::Diagnose) => {
                drive.complete();
                drive.error = AtaErrorRegister::from_bytes([DIAGNOSTIC_PASSED]);
            }
            Phase::Command(
                AtaCommand::Recalibrate
                | AtaCommand::InitializeParameters
                | AtaCommand::SpinUp
                | AtaCommand::SpinDown,
            ) => {
                drive.complete();
            }
        }
    }
}

impl Device for IdeController {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("IDE controller, {} of {} drives attached", self.attached_count(), DRIVE_COUNT)
    }

    fn base_port(&self) -> u16 {
        self.base_port
    }

    fn port_count(&self) -> u16 {
        IDE_PORT_COUNT
    }

    fn direction(&self) -> PortDirection {
        PortDirection::InOut
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        ctx.cancel_all();
        self.device_control_reg = 0;
        self.reset_registers();
        self.update_irq(ctx);
    }

    fn read(&mut self, port: u16, ctx: &mut DeviceContext<'_>) -> u8 {
        self.read_register(port.wrapping_sub(self.base_port) as u8, ctx)
    }

    fn write(&mut self, port: u16, data: u8, ctx: &mut DeviceContext<'_>) {
        self.write_register(port.wrapping_sub(self.base_port) as u8, data, ctx)
    }

    fn on_event(&mut self, param: EventParam, ctx: &mut DeviceContext<'_>) {
        if param & !1 != EVENT_DRIVE_BASE {
            log::warn!("{}: unknown event {}", self.name, param);
            return;
        }
        self.drive_event((param & 1) as usize);
        self.update_irq(ctx);
    }

    fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{}", self.description())?;
        writeln!(
            out,
            "  FEAT {:02X} COUNT {:02X} LBA {:02X} {:02X} {:02X} DH {:02X} CTL {:02X}",
            self.features_reg,
            self.sector_count_reg,
            self.lba0_reg,
            self.lba1_reg,
            self.lba2_reg,
            self.drive_head_reg,
            self.device_control_reg
        )?;
        for (unit, drive) in self.drives.iter().enumerate() {
            match &drive.image {
                Some(image) => writeln!(
                    out,
                    "  drive {}: {} {} sectors {} STATUS {:02X} ERROR {:02X}{} ({} read, {} written)",
                    unit,
                    image.path().display(),
                    image.sectors(),
                    image.geometry(),
                    drive.status_byte(),
                    drive.error_byte(),
                    if drive.eight_bit { " 8-bit" } else { "" },
                    drive.sectors_read,
                    drive.sectors_written
                )?,
                None => writeln!(out, "  drive {}: not attached", unit)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom};

    use tempfile::NamedTempFile;

    use super::*;
    use crate::device::testing::Bench;

    const BASE: u16 = 0x10;

    fn reg(r: u8) -> u16 {
        BASE + r as u16
    }

    fn image(sectors: u64) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len(sectors * SECTOR_SIZE as u64).unwrap();
        file
    }

    // A controller with drive 0 attached and switched to 8-bit mode, as the boot firmware does.
    fn bench_with(file: &NamedTempFile) -> Bench<IdeController> {
        let mut b = bench_16bit(file);
        b.write(reg(REG_ERROR_FEATURES), FEATURE_ENABLE_8BIT);
        b.write(reg(REG_STATUS_COMMAND), 0xEF);
        b.advance(IdeConfig::default().short_delay());
        assert_eq!(b.read(reg(REG_STATUS_COMMAND)), STATUS_READY | STATUS_DSC);
        b
    }

    fn bench_16bit(file: &NamedTempFile) -> Bench<IdeController> {
        let mut b = Bench::new(IdeController::new("IDE", BASE, &IdeConfig::default()));
        b.device.attach(0, file.path()).unwrap();
        b.reset();
        b
    }

    fn set_lba(b: &mut Bench<IdeController>, lba: u32, count: u8) {
        b.write(reg(REG_SECTOR_COUNT), count);
        b.write(reg(REG_LBA0), lba as u8);
        b.write(reg(REG_LBA1), (lba >> 8) as u8);
        b.write(reg(REG_LBA2), (lba >> 16) as u8);
        b.write(reg(REG_DRIVE_HEAD), DRIVE_HEAD_LBA_BIT | ((lba >> 24) as u8 & 0x0F));
    }

    fn read_block(b: &mut Bench<IdeController>) -> Vec<u8> {
        (0..SECTOR_SIZE).map(|_| b.read(reg(REG_DATA))).collect()
    }

    #[test]
    fn identify_reports_capacity() {
        let file = image(65536);
        let mut b = bench_with(&file);
        let short = IdeConfig::default().short_delay();

        for r in [REG_LBA0, REG_LBA1, REG_LBA2, REG_DRIVE_HEAD, REG_SECTOR_COUNT] {
            b.write(reg(r), 0);
        }
        b.write(reg(REG_STATUS_COMMAND), 0xEC);
        assert_ne!(b.read(reg(REG_STATUS_COMMAND)) & STATUS_BUSY, 0);

        b.advance(short);
        let status = b.read(reg(REG_STATUS_COMMAND));
        assert_eq!(status, STATUS_READY | STATUS_DSC | STATUS_DRQ);

        let block = read_block(&mut b);
        assert_eq!(u32::from_le_bytes([block[120], block[121], block[122], block[123]]), 65536);
        assert_eq!(u16::from_le_bytes([block[2], block[3]]), 65);
        assert_eq!(b.read(reg(REG_STATUS_COMMAND)) & STATUS_DRQ, 0);
    }

    #[test]
    fn write_then_read_sector() {
        let mut file = image(16);
        let mut b = bench_with(&file);
        let config = IdeConfig::default();
        let data: Vec<u8> = (0..SECTOR_SIZE).map(|i| (i * 7) as u8).collect();

        set_lba(&mut b, 5, 1);
        b.write(reg(REG_STATUS_COMMAND), 0x30);
        b.advance(config.short_delay());
        assert_ne!(b.read(reg(REG_STATUS_COMMAND)) & STATUS_DRQ, 0);
        for &byte in &data {
            b.write(reg(REG_DATA), byte);
        }
        assert_ne!(b.read(reg(REG_STATUS_COMMAND)) & STATUS_BUSY, 0);
        b.advance(config.long_delay());
        assert_eq!(b.read(reg(REG_STATUS_COMMAND)), STATUS_READY | STATUS_DSC);

        set_lba(&mut b, 5, 1);
        b.write(reg(REG_STATUS_COMMAND), 0x20);
        b.advance(config.long_delay());
        assert_ne!(b.read(reg(REG_STATUS_COMMAND)) & STATUS_DRQ, 0);
        assert_eq!(read_block(&mut b), data);

        let mut on_disk = vec![0u8; SECTOR_SIZE];
        file.seek(SeekFrom::Start(5 * SECTOR_SIZE as u64)).unwrap();
        file.read_exact(&mut on_disk).unwrap();
        assert_eq!(on_disk, data);
    }

    #[test]
    fn multi_sector_read_refills_buffer() {
        let file = image(8);
        let mut b = bench_with(&file);
        let long = IdeConfig::default().long_delay();

        set_lba(&mut b, 6, 2);
        b.write(reg(REG_STATUS_COMMAND), 0x20);
        b.advance(long);
        read_block(&mut b);
        assert_eq!(b.read(reg(REG_STATUS_COMMAND)) & (STATUS_BUSY | STATUS_DRQ), STATUS_BUSY);
        b.advance(long);
        assert_ne!(b.read(reg(REG_STATUS_COMMAND)) & STATUS_DRQ, 0);
        read_block(&mut b);
        assert_eq!(b.read(reg(REG_STATUS_COMMAND)) & (STATUS_BUSY | STATUS_DRQ), 0);
        assert_eq!(b.read(reg(REG_LBA0)), 7);
    }

    #[test]
    fn chs_addressing_translates_through_geometry() {
        let file = image(2 * 16 * 63);
        let mut b = bench_with(&file);
        let long = IdeConfig::default().long_delay();

        // Cylinder 1, head 0, sector 1 is LBA 1008.
        b.write(reg(REG_SECTOR_COUNT), 1);
        b.write(reg(REG_LBA0), 1);
        b.write(reg(REG_LBA1), 1);
        b.write(reg(REG_LBA2), 0);
        b.write(reg(REG_DRIVE_HEAD), 0);
        b.write(reg(REG_STATUS_COMMAND), 0x20);
        b.advance(long);
        assert_eq!(b.read(reg(REG_STATUS_COMMAND)) & STATUS_ERR, 0);
        assert_eq!(b.device.drives[0].lba, 1008);
    }

    #[test]
    fn lba_beyond_capacity_sets_idnf() {
        let file = image(4);
        let mut b = bench_with(&file);
        set_lba(&mut b, 4, 1);
        b.write(reg(REG_STATUS_COMMAND), 0x20);
        assert_ne!(b.read(reg(REG_STATUS_COMMAND)) & STATUS_ERR, 0);
        assert_eq!(b.read(reg(REG_ERROR_FEATURES)), ERROR_IDNF);
    }

    #[test]
    fn unknown_command_and_missing_image_abort() {
        let file = image(4);
        let mut b = bench_with(&file);
        b.write(reg(REG_STATUS_COMMAND), 0x50);
        assert_ne!(b.read(reg(REG_STATUS_COMMAND)) & STATUS_ERR, 0);
        assert_eq!(b.read(reg(REG_ERROR_FEATURES)), ERROR_ABRT);

        b.write(reg(REG_DRIVE_HEAD), DRIVE_HEAD_SLAVE_BIT);
        b.write(reg(REG_STATUS_COMMAND), 0xEC);
        assert_ne!(b.read(reg(REG_STATUS_COMMAND)) & STATUS_ERR, 0);
        assert_eq!(b.read(reg(REG_ERROR_FEATURES)), ERROR_ABRT);
        assert!(b.device_idle());
    }

    #[test]
    fn set_features_toggles_eight_bit_mode() {
        let file = image(4);
        let mut b = bench_with(&file);
        let short = IdeConfig::default().short_delay();

        b.write(reg(REG_ERROR_FEATURES), FEATURE_ENABLE_8BIT);
        b.write(reg(REG_STATUS_COMMAND), 0xEF);
        b.advance(short);
        assert!(b.device.eight_bit(0));

        b.write(reg(REG_ERROR_FEATURES), FEATURE_DISABLE_8BIT);
        b.write(reg(REG_STATUS_COMMAND), 0xEF);
        b.advance(short);
        assert!(!b.device.eight_bit(0));

        b.write(reg(REG_ERROR_FEATURES), 0x55);
        b.write(reg(REG_STATUS_COMMAND), 0xEF);
        b.advance(short);
        assert_eq!(b.read(reg(REG_ERROR_FEATURES)), ERROR_ABRT);
    }

    #[test]
    fn sixteen_bit_mode_moves_a_word_per_access() {
        let file = image(4);
        let mut b = bench_16bit(&file);
        let short = IdeConfig::default().short_delay();
        assert!(!b.device.eight_bit(0));

        b.write(reg(REG_STATUS_COMMAND), 0xE8);
        b.advance(short);
        for i in 0..SECTOR_SIZE / 2 {
            b.write(reg(REG_DATA), i as u8);
        }
        assert_eq!(b.read(reg(REG_STATUS_COMMAND)) & STATUS_DRQ, 0);

        b.write(reg(REG_STATUS_COMMAND), 0xE4);
        b.advance(short);
        let words: Vec<u8> = (0..SECTOR_SIZE / 2).map(|_| b.read(reg(REG_DATA))).collect();
        assert_eq!(words, (0..SECTOR_SIZE / 2).map(|i| i as u8).collect::<Vec<u8>>());
        assert_eq!(b.read(reg(REG_STATUS_COMMAND)) & STATUS_DRQ, 0);

        // The same buffer read a byte at a time shows the zero high halves.
        b.write(reg(REG_ERROR_FEATURES), FEATURE_ENABLE_8BIT);
        b.write(reg(REG_STATUS_COMMAND), 0xEF);
        b.advance(short);
        b.write(reg(REG_STATUS_COMMAND), 0xE4);
        b.advance(short);
        let block = read_block(&mut b);
        assert_eq!(&block[..6], &[0, 0, 1, 0, 2, 0]);
    }

    #[test]
    fn identify_in_sixteen_bit_mode_returns_low_bytes() {
        let file = image(65536);
        let mut b = bench_16bit(&file);
        b.write(reg(REG_STATUS_COMMAND), 0xEC);
        b.advance(IdeConfig::default().short_delay());
        let words: Vec<u8> = (0..SECTOR_SIZE / 2).map(|_| b.read(reg(REG_DATA))).collect();
        // Words 60 and 61 hold the sector count 0x0001_0000.
        assert_eq!((words[60], words[61]), (0x00, 0x01));
        assert_eq!(b.read(reg(REG_STATUS_COMMAND)) & STATUS_DRQ, 0);
    }

    #[test]
    fn buffer_commands_match_sector_read() {
        let file = image(4);
        let mut b = bench_with(&file);
        let config = IdeConfig::default();
        let data: Vec<u8> = (0..SECTOR_SIZE).map(|i| (i ^ 0x5A) as u8).collect();

        b.write(reg(REG_ERROR_FEATURES), FEATURE_ENABLE_8BIT);
        b.write(reg(REG_STATUS_COMMAND), 0xEF);
        b.advance(config.short_delay());

        b.write(reg(REG_STATUS_COMMAND), 0xE8);
        b.advance(config.short_delay());
        for &byte in &data {
            b.write(reg(REG_DATA), byte);
        }
        assert_eq!(b.read(reg(REG_STATUS_COMMAND)), STATUS_READY | STATUS_DSC);

        b.write(reg(REG_STATUS_COMMAND), 0xE4);
        b.advance(config.short_delay());
        assert_eq!(read_block(&mut b), data);
    }

    #[test]
    fn status_read_clears_interrupt() {
        let file = image(4);
        let mut b = bench_with(&file);
        let irq = b.interrupts.register("IDE");
        b.device.set_irq_line(Some(irq));

        b.write(reg(REG_STATUS_COMMAND), 0xE1);
        b.advance(IdeConfig::default().short_delay());
        assert!(b.interrupts.is_asserted(irq));
        b.read(reg(REG_ALT_STATUS_CONTROL));
        assert!(b.interrupts.is_asserted(irq));
        b.read(reg(REG_STATUS_COMMAND));
        assert!(!b.interrupts.is_asserted(irq));

        b.write(reg(REG_ALT_STATUS_CONTROL), CONTROL_NIEN);
        b.write(reg(REG_STATUS_COMMAND), 0xE1);
        b.advance(IdeConfig::default().short_delay());
        assert!(!b.interrupts.is_asserted(irq));
    }

    #[test]
    fn reset_cancels_pending_command() {
        let file = image(4);
        let mut b = bench_with(&file);
        b.write(reg(REG_STATUS_COMMAND), 0xEC);
        assert!(!b.device_idle());
        b.reset();
        assert!(b.device_idle());
        assert_eq!(b.read(reg(REG_STATUS_COMMAND)), STATUS_READY | STATUS_DSC);
        b.reset();
        assert_eq!(b.read(reg(REG_STATUS_COMMAND)), STATUS_READY | STATUS_DSC);
    }

    #[test]
    fn software_reset_through_device_control() {
        let file = image(4);
        let mut b = bench_with(&file);
        b.write(reg(REG_STATUS_COMMAND), 0xEC);
        b.write(reg(REG_ALT_STATUS_CONTROL), CONTROL_SRST);
        b.write(reg(REG_ALT_STATUS_CONTROL), 0);
        assert!(b.device_idle());
        assert_eq!(b.read(reg(REG_ERROR_FEATURES)), DIAGNOSTIC_PASSED);
    }

    #[test]
    fn attach_rules() {
        let file = image(4);
        let mut ide = IdeController::new("IDE", BASE, &IdeConfig::default());
        assert!(matches!(ide.attach(2, file.path()), Err(CoreError::InvalidUnit(2))));
        ide.attach(1, file.path()).unwrap();
        assert!(matches!(ide.attach(1, file.path()), Err(CoreError::AlreadyAttached(_))));
        assert_eq!(ide.attached_count(), 1);
        let mut b = Bench::new(ide);
        b.with(|ide, ctx| ide.detach(1, ctx)).unwrap();
        assert!(b.with(|ide, ctx| ide.detach(1, ctx)).is_err());
    }

    #[test]
    fn detach_releases_interrupt() {
        let file = image(4);
        let mut b = bench_with(&file);
        let irq = b.interrupts.register("IDE");
        b.device.set_irq_line(Some(irq));

        b.write(reg(REG_STATUS_COMMAND), 0xE1);
        b.advance(IdeConfig::default().short_delay());
        assert!(b.interrupts.is_asserted(irq));
        b.with(|ide, ctx| ide.detach(0, ctx)).unwrap();
        assert!(!b.interrupts.is_asserted(irq));
    }
}
