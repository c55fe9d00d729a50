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

//! Board compositions: memory layout, clock and the port assignments of the standard devices.

use std::ops::Range;

use crate::config::BoardType;

/// Where a combo card sits in the I/O space.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ComboSlot {
    pub name: &'static str,
    pub base_port: u16,
    pub group: Option<u8>,
}

#[derive(Clone, Debug)]
pub struct BoardLayout {
    pub name: &'static str,
    pub ram: Range<usize>,
    pub rom: Range<usize>,
    pub clock_hz: u64,
    /// Output port of the two-level I/O group select register.
    pub group_port: Option<u16>,
    pub interrupt_controller: bool,
    /// POST display (output) and DIP switches (input) share this port.
    pub post_port: Option<u16>,
    /// Slot 0 carries the IDE drives, the first UART and the RTC. Slot 1, when present, carries a
    /// second UART.
    pub combo_slots: Vec<ComboSlot>,
}

const ELF2K_CLOCK_HZ: u64 = 1_790_000;
const SBC1802_CLOCK_HZ: u64 = 2_457_600;

impl BoardLayout {
    pub fn for_board(board: BoardType) -> Self {
        match board {
            BoardType::Elf2k => BoardLayout {
                name: "ELF2K",
                ram: 0x0000..0x8000,
                rom: 0x8000..0x1_0000,
                clock_hz: ELF2K_CLOCK_HZ,
                group_port: None,
                interrupt_controller: false,
                post_port: Some(4),
                combo_slots: vec![ComboSlot {
                    name: "COMBO",
                    base_port: 2,
                    group: None,
                }],
            },
            BoardType::Pev2 => BoardLayout {
                name: "PEV2",
                ram: 0x0000..0x8000,
                rom: 0x8000..0x1_0000,
                clock_hz: ELF2K_CLOCK_HZ,
                group_port: Some(1),
                interrupt_controller: false,
                post_port: Some(4),
                combo_slots: vec![
                    ComboSlot {
                        name: "COMBO",
                        base_port: 2,
                        group: Some(0),
                    },
                    ComboSlot {
                        name: "COMBO1",
                        base_port: 2,
                        group: Some(1),
                    },
                ],
            },
            BoardType::Sbc1802 => BoardLayout {
                name: "SBC1802",
                ram: 0x0000..0xE000,
                rom: 0xE000..0x1_0000,
                clock_hz: SBC1802_CLOCK_HZ,
                group_port: Some(1),
                interrupt_controller: true,
                post_port: Some(4),
                combo_slots: vec![
                    ComboSlot {
                        name: "COMBO",
                        base_port: 2,
                        group: Some(0),
                    },
                    ComboSlot {
                        name: "COMBO1",
                        base_port: 2,
                        group: Some(1),
                    },
                ],
            },
        }
    }

    /// Move the RAM/ROM boundary.
    pub fn with_rom_base(mut self, rom_base: Option<u16>) -> Self {
        if let Some(base) = rom_base {
            let base = base as usize;
            self.ram = 0..base;
            self.rom = base..0x1_0000;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_cover_the_address_space() {
        for board in [BoardType::Elf2k, BoardType::Pev2, BoardType::Sbc1802] {
            let layout = BoardLayout::for_board(board);
            assert_eq!(layout.ram.start, 0);
            assert_eq!(layout.ram.end, layout.rom.start);
            assert_eq!(layout.rom.end, 0x1_0000);
        }
    }

    #[test]
    fn rom_base_override() {
        let layout = BoardLayout::for_board(BoardType::Sbc1802).with_rom_base(Some(0xF000));
        assert_eq!(layout.ram, 0..0xF000);
        assert_eq!(layout.rom, 0xF000..0x1_0000);
    }
}
