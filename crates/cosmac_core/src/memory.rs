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

//! The 1802's flat 64K address space.
//!
//! Each byte has a companion attribute byte in a parallel mask array. The CPU accesses memory
//! through [Memory::cpu_read] and [Memory::cpu_write], which honor the attributes. The user
//! interface uses [Memory::ui_read] and [Memory::ui_write], which ignore them, so that ROM can be
//! loaded and examined.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Read, Write},
    ops::Range,
    path::Path,
};

use crate::error::{CoreError, CoreResult};

pub const ADDRESS_SPACE: usize = 0x1_0000;

pub const MEM_RD_BIT: u8 = 0b0000_0001; // Cell is readable
pub const MEM_WR_BIT: u8 = 0b0000_0010; // Cell is writable
pub const MEM_BP_BIT: u8 = 0b0000_0100; // Reading this cell raises a breakpoint
pub const MEM_NXM_BIT: u8 = 0b0000_1000; // Cell does not exist

pub const MEM_RAM: u8 = MEM_RD_BIT | MEM_WR_BIT;
pub const MEM_ROM: u8 = MEM_RD_BIT;

/// The byte read from a non-existent cell.
pub const OPEN_BUS_BYTE: u8 = 0xFF;

const HEX_RECORD_LEN: usize = 16;

pub struct Memory {
    data: Box<[u8]>,
    mask: Box<[u8]>,
    break_pending: Option<u16>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    /// Create an address space in which every cell is non-existent.
    pub fn new() -> Self {
        Self {
            data: vec![OPEN_BUS_BYTE; ADDRESS_SPACE].into_boxed_slice(),
            mask: vec![MEM_NXM_BIT; ADDRESS_SPACE].into_boxed_slice(),
            break_pending: None,
        }
    }

    /// Read a byte on behalf of the CPU. Non-existent and unreadable cells return
    /// [OPEN_BUS_BYTE]. A breakpoint cell latches the breakpoint-pending condition.
    #[inline]
    pub fn cpu_read(&mut self, address: u16) -> u8 {
        let a = address as usize;
        let mask = self.mask[a];
        if mask & MEM_BP_BIT != 0 && self.break_pending.is_none() {
            self.break_pending = Some(address);
        }
        if mask & MEM_NXM_BIT != 0 || mask & MEM_RD_BIT == 0 {
            return OPEN_BUS_BYTE;
        }
        self.data[a]
    }

    /// Write a byte on behalf of the CPU. Writes to read-only or non-existent cells are dropped.
    #[inline]
    pub fn cpu_write(&mut self, address: u16, byte: u8) {
        let a = address as usize;
        let mask = self.mask[a];
        if mask & MEM_NXM_BIT == 0 && mask & MEM_WR_BIT != 0 {
            self.data[a] = byte;
        }
    }

    #[inline]
    pub fn ui_read(&self, address: u16) -> u8 {
        self.data[address as usize]
    }

    #[inline]
    pub fn ui_write(&mut self, address: u16, byte: u8) {
        self.data[address as usize] = byte;
    }

    pub fn flags(&self, address: u16) -> u8 {
        self.mask[address as usize]
    }

    /// Set then clear attribute bits over `range`.
    pub fn set_flags(&mut self, range: Range<usize>, set_mask: u8, clear_mask: u8) {
        let end = range.end.min(ADDRESS_SPACE);
        for m in &mut self.mask[range.start.min(end)..end] {
            *m = (*m | set_mask) & !clear_mask;
        }
    }

    /// Mark `range` as RAM.
    pub fn map_ram(&mut self, range: Range<usize>) {
        self.set_flags(range, MEM_RAM, MEM_NXM_BIT);
    }

    /// Mark `range` as ROM.
    pub fn map_rom(&mut self, range: Range<usize>) {
        self.set_flags(range, MEM_ROM, MEM_NXM_BIT | MEM_WR_BIT);
    }

    /// Mark `range` as non-existent. Breakpoints within the range survive.
    pub fn unmap(&mut self, range: Range<usize>) {
        self.set_flags(range, MEM_NXM_BIT, MEM_RD_BIT | MEM_WR_BIT);
    }

    /// Fill all existing memory with zero.
    pub fn clear(&mut self) {
        for (byte, mask) in self.data.iter_mut().zip(self.mask.iter()) {
            if mask & MEM_NXM_BIT == 0 {
                *byte = 0;
            }
        }
    }

    pub fn set_break(&mut self, address: u16, on: bool) {
        let m = &mut self.mask[address as usize];
        if on {
            *m |= MEM_BP_BIT;
        }
        else {
            *m &= !MEM_BP_BIT;
        }
    }

    pub fn find_break(&self, address: u16) -> bool {
        self.mask[address as usize] & MEM_BP_BIT != 0
    }

    pub fn clear_all_breaks(&mut self) {
        for m in self.mask.iter_mut() {
            *m &= !MEM_BP_BIT;
        }
        self.break_pending = None;
    }

    /// Return all addresses with a breakpoint set, in ascending order.
    pub fn breakpoints(&self) -> Vec<u16> {
        self.mask
            .iter()
            .enumerate()
            .filter(|(_, m)| *m & MEM_BP_BIT != 0)
            .map(|(a, _)| a as u16)
            .collect()
    }

    #[inline]
    pub fn break_pending(&self) -> Option<u16> {
        self.break_pending
    }

    #[inline]
    pub fn take_break_pending(&mut self) -> Option<u16> {
        self.break_pending.take()
    }

    /// Load a raw binary image at `base`. The image may not extend to or past `limit`.
    /// Returns the number of bytes loaded.
    pub fn load_binary(&mut self, path: impl AsRef<Path>, base: u16, limit: u32) -> CoreResult<usize> {
        let mut buf = Vec::new();
        File::open(path.as_ref())?.read_to_end(&mut buf)?;
        let end = base as u32 + buf.len() as u32;
        if end > limit.min(ADDRESS_SPACE as u32) {
            return Err(CoreError::AddressRange {
                addr: end.saturating_sub(1),
                start: base as u32,
                end: limit.saturating_sub(1),
            });
        }
        for (i, byte) in buf.iter().enumerate() {
            self.ui_write(base.wrapping_add(i as u16), *byte);
        }
        log::debug!("Loaded {} bytes at {:04X} from {:?}", buf.len(), base, path.as_ref());
        Ok(buf.len())
    }

    /// Save `len` bytes starting at `base` as a raw binary image.
    pub fn save_binary(&self, path: impl AsRef<Path>, base: u16, len: usize) -> CoreResult<()> {
        let end = base as usize + len;
        if end > ADDRESS_SPACE {
            return Err(CoreError::AddressRange {
                addr: end as u32 - 1,
                start: 0,
                end: ADDRESS_SPACE as u32 - 1,
            });
        }
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&self.data[base as usize..end])?;
        writer.flush()?;
        Ok(())
    }

    /// Load an Intel hex file. `base` is added to every record address; the resulting addresses
    /// must lie below `limit`. Returns the number of bytes loaded.
    pub fn load_intel_hex(&mut self, path: impl AsRef<Path>, base: u16, limit: u32) -> CoreResult<usize> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let mut upper: u32 = 0;
        let mut count = 0;

        for (n, line) in reader.lines().enumerate() {
            let line_no = n + 1;
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record = parse_hex_record(line).map_err(|msg| CoreError::IntelHex { line: line_no, msg })?;
            match record.kind {
                0x00 => {
                    for (i, byte) in record.data.iter().enumerate() {
                        let address = upper + record.address as u32 + i as u32 + base as u32;
                        if address >= limit.min(ADDRESS_SPACE as u32) {
                            return Err(CoreError::AddressRange {
                                addr: address,
                                start: base as u32,
                                end: limit.saturating_sub(1),
                            });
                        }
                        self.ui_write(address as u16, *byte);
                        count += 1;
                    }
                }
                0x01 => break,
                0x02 | 0x04 => {
                    let word = record.word().map_err(|msg| CoreError::IntelHex { line: line_no, msg })? as u32;
                    upper = if record.kind == 0x02 { word << 4 } else { word << 16 };
                }
                0x03 | 0x05 => {
                    // Start address records have no meaning here.
                }
                other => {
                    return Err(CoreError::IntelHex {
                        line: line_no,
                        msg: format!("unsupported record type {:02X}", other),
                    });
                }
            }
        }
        log::debug!("Loaded {} bytes from hex file {:?}", count, path.as_ref());
        Ok(count)
    }

    /// Save `len` bytes starting at `base` as Intel hex, 16 bytes per record.
    pub fn save_intel_hex(&self, path: impl AsRef<Path>, base: u16, len: usize) -> CoreResult<()> {
        let end = base as usize + len;
        if end > ADDRESS_SPACE {
            return Err(CoreError::AddressRange {
                addr: end as u32 - 1,
                start: 0,
                end: ADDRESS_SPACE as u32 - 1,
            });
        }
        let mut writer = BufWriter::new(File::create(path)?);
        let mut address = base as usize;
        while address < end {
            let chunk = &self.data[address..(address + HEX_RECORD_LEN).min(end)];
            writeln!(writer, "{}", format_hex_record(address as u16, 0x00, chunk))?;
            address += chunk.len();
        }
        writeln!(writer, "{}", format_hex_record(0, 0x01, &[]))?;
        writer.flush()?;
        Ok(())
    }
}

struct HexRecord {
    address: u16,
    kind: u8,
    data: Vec<u8>,
}

impl HexRecord {
    fn word(&self) -> Result<u16, String> {
        match self.data.as_slice() {
            [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err("address record must carry two bytes".to_string()),
        }
    }
}

fn parse_hex_record(line: &str) -> Result<HexRecord, String> {
    let body = line.strip_prefix(':').ok_or("record does not start with ':'")?;
    if body.len() % 2 != 0 || body.len() < 10 {
        return Err("record has invalid length".to_string());
    }
    let bytes = body
        .as_bytes()
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => Some((hex_digit(*hi)? << 4) | hex_digit(*lo)?),
            _ => None,
        })
        .collect::<Option<Vec<u8>>>()
        .ok_or("invalid hex digit")?;

    let count = bytes[0] as usize;
    if bytes.len() != count + 5 {
        return Err(format!("byte count {} does not match record length", count));
    }
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != 0 {
        return Err("checksum mismatch".to_string());
    }
    Ok(HexRecord {
        address: u16::from_be_bytes([bytes[1], bytes[2]]),
        kind: bytes[3],
        data: bytes[4..4 + count].to_vec(),
    })
}

fn hex_digit(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

fn format_hex_record(address: u16, kind: u8, data: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(data.len() + 5);
    bytes.push(data.len() as u8);
    bytes.extend_from_slice(&address.to_be_bytes());
    bytes.push(kind);
    bytes.extend_from_slice(data);
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    bytes.push(sum.wrapping_neg());

    let mut out = String::with_capacity(bytes.len() * 2 + 1);
    out.push(':');
    for b in bytes {
        out.push_str(&format!("{:02X}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn elf2k_memory() -> Memory {
        let mut mem = Memory::new();
        mem.map_ram(0x0000..0x8000);
        mem.map_rom(0x8000..0x10000);
        mem
    }

    #[test]
    fn attributes_are_honored_by_cpu_access() {
        let mut mem = elf2k_memory();
        mem.cpu_write(0x1000, 0x55);
        assert_eq!(mem.cpu_read(0x1000), 0x55);

        mem.ui_write(0x8000, 0xC0);
        mem.cpu_write(0x8000, 0x00);
        assert_eq!(mem.cpu_read(0x8000), 0xC0);

        mem.unmap(0x4000..0x5000);
        mem.ui_write(0x4000, 0x12);
        mem.cpu_write(0x4000, 0x34);
        assert_eq!(mem.cpu_read(0x4000), OPEN_BUS_BYTE);
        assert_eq!(mem.ui_read(0x4000), 0x12);
    }

    #[test]
    fn ui_read_matches_cpu_read_for_readable_cells() {
        let mut mem = elf2k_memory();
        for a in (0..ADDRESS_SPACE).step_by(97) {
            mem.ui_write(a as u16, (a * 7) as u8);
        }
        for a in (0..ADDRESS_SPACE).step_by(97) {
            let ui = mem.ui_read(a as u16);
            assert_eq!(mem.cpu_read(a as u16), ui);
        }
    }

    #[test]
    fn breakpoint_latches_pending_without_mutating() {
        let mut mem = elf2k_memory();
        mem.ui_write(0x8100, 0x7B);
        mem.set_break(0x8100, true);
        assert!(mem.find_break(0x8100));
        assert_eq!(mem.cpu_read(0x80FF), 0x00);
        assert_eq!(mem.break_pending(), None);
        assert_eq!(mem.cpu_read(0x8100), 0x7B);
        assert_eq!(mem.take_break_pending(), Some(0x8100));
        assert_eq!(mem.ui_read(0x8100), 0x7B);
        assert_eq!(mem.breakpoints(), vec![0x8100]);
        mem.clear_all_breaks();
        assert!(!mem.find_break(0x8100));
    }

    #[test]
    fn binary_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.bin");
        let out = dir.path().join("out.bin");
        let payload: Vec<u8> = (0..300u32).map(|i| (i * 13) as u8).collect();
        std::fs::write(&src, &payload).unwrap();

        let mut mem = elf2k_memory();
        assert_eq!(mem.load_binary(&src, 0x8000, 0x10000).unwrap(), 300);
        mem.save_binary(&out, 0x8000, 300).unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), payload);
    }

    #[test]
    fn binary_load_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("big.bin");
        std::fs::write(&src, vec![0u8; 0x100]).unwrap();
        let mut mem = elf2k_memory();
        assert!(mem.load_binary(&src, 0x7F80, 0x8000).is_err());
        assert!(mem.load_binary(&src, 0x7F00, 0x8000).is_ok());
    }

    #[test]
    fn intel_hex_round_trip_with_base() {
        let dir = tempfile::tempdir().unwrap();
        let hex = dir.path().join("prog.hex");

        let mut mem = elf2k_memory();
        for i in 0..40u16 {
            mem.ui_write(0x0010 + i, i as u8 ^ 0xA5);
        }
        mem.save_intel_hex(&hex, 0x0010, 40).unwrap();

        let mut other = elf2k_memory();
        assert_eq!(other.load_intel_hex(&hex, 0x8000, 0x10000).unwrap(), 40);
        for i in 0..40u16 {
            assert_eq!(other.ui_read(0x8010 + i), i as u8 ^ 0xA5);
        }
    }

    #[test]
    fn intel_hex_rejects_bad_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let hex = dir.path().join("bad.hex");
        let mut f = File::create(&hex).unwrap();
        writeln!(f, ":0300000001020300").unwrap();
        writeln!(f, ":00000001FF").unwrap();
        drop(f);

        let mut mem = elf2k_memory();
        match mem.load_intel_hex(&hex, 0, 0x10000) {
            Err(CoreError::IntelHex { line, .. }) => assert_eq!(line, 1),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn intel_hex_rejects_non_ascii_record() {
        let dir = tempfile::tempdir().unwrap();
        let hex = dir.path().join("utf8.hex");
        let mut f = File::create(&hex).unwrap();
        writeln!(f, ":0\u{e9}00000000000").unwrap();
        drop(f);

        let mut mem = elf2k_memory();
        match mem.load_intel_hex(&hex, 0, 0x10000) {
            Err(CoreError::IntelHex { line, .. }) => assert_eq!(line, 1),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert!(parse_hex_record(":0G00000001FF").is_err());
    }

    #[test]
    fn hex_record_format() {
        assert_eq!(format_hex_record(0, 0x01, &[]), ":00000001FF");
        assert_eq!(format_hex_record(0x0100, 0x00, &[0x7B, 0x30, 0x00]), ":030100007B300051");
    }
}
