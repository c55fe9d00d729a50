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

//! Settings structures consumed by the machine and its devices. These deserialize directly from
//! the corresponding tables of the configuration file; every field has a default.

use std::{path::PathBuf, str::FromStr};

use serde_derive::Deserialize;

use crate::{
    console::{SmartConsoleConfig, DEFAULT_CONSOLE_BREAK},
    time::{cps_to_ns, ms_to_ns, us_to_ns},
};

#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BoardType {
    #[default]
    Elf2k,
    Pev2,
    Sbc1802,
}

impl FromStr for BoardType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "elf2k" | "elf2000" => Ok(BoardType::Elf2k),
            "pev2" => Ok(BoardType::Pev2),
            "sbc1802" => Ok(BoardType::Sbc1802),
            _ => Err(format!("Bad value for board: {}", s)),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub attach: bool,
    pub baud: u32,
    pub poll_us: u64,
    pub invert_tx: bool,
    pub invert_rx: bool,
    /// The EF input carrying received data, numbered 1-4 as in the 1802 mnemonics.
    pub ef: u8,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            attach: true,
            baud: 1200,
            poll_us: 100,
            invert_tx: false,
            invert_rx: false,
            ef: 3,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct UartConfig {
    pub attach: bool,
    pub clock_hz: u64,
    /// Drive the interrupt line from the UART's interrupt identification logic.
    pub irq: bool,
    /// Interval at which the receiver polls the console.
    pub poll_us: u64,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            attach: false,
            clock_hz: 1_843_200,
            irq: true,
            poll_us: 100,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct IdeImage {
    pub drive: usize,
    pub path:  PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct IdeConfig {
    pub short_delay_us: u64,
    pub long_delay_us: u64,
    pub images: Vec<IdeImage>,
}

impl Default for IdeConfig {
    fn default() -> Self {
        Self {
            short_delay_us: 10,
            long_delay_us: 500,
            images: Vec::new(),
        }
    }
}

impl IdeConfig {
    pub fn short_delay(&self) -> u64 {
        us_to_ns(self.short_delay_us.max(1))
    }
    pub fn long_delay(&self) -> u64 {
        us_to_ns(self.long_delay_us.max(1))
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RtcConfig {
    pub attach: bool,
    /// Store the year as an offset from 1972.
    pub elfos_mode: bool,
    pub nvr_file: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub text_cps: u64,
    pub eol_delay_ms: u64,
    pub xmodem_cps: u64,
    pub fold_crlf: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            text_cps: 500,
            eol_delay_ms: 25,
            xmodem_cps: 50,
            fold_crlf: true,
        }
    }
}

impl From<&ConsoleConfig> for SmartConsoleConfig {
    fn from(c: &ConsoleConfig) -> Self {
        SmartConsoleConfig {
            char_delay: cps_to_ns(c.text_cps),
            eol_delay: ms_to_ns(c.eol_delay_ms.max(1)),
            xmodem_delay: cps_to_ns(c.xmodem_cps),
            fold_crlf: c.fold_crlf,
        }
    }
}

/// Everything needed to construct a [crate::machine::Machine].
#[derive(Clone, Debug)]
pub struct MachineConfig {
    pub board: BoardType,
    /// Crystal frequency override. The board's default is used when absent.
    pub clock_hz: Option<u64>,
    /// First ROM address override.
    pub rom_base: Option<u16>,
    pub console_break: u8,
    pub stop_on_illegal_io: bool,
    pub stop_on_endless_loop: bool,
    pub serial: SerialConfig,
    pub uart: UartConfig,
    pub ide: IdeConfig,
    pub rtc: RtcConfig,
    pub console: ConsoleConfig,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            board: BoardType::Elf2k,
            clock_hz: None,
            rom_base: None,
            console_break: DEFAULT_CONSOLE_BREAK,
            stop_on_illegal_io: true,
            stop_on_endless_loop: true,
            serial: SerialConfig::default(),
            uart: UartConfig::default(),
            ide: IdeConfig::default(),
            rtc: RtcConfig::default(),
            console: ConsoleConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_names_parse() {
        assert_eq!("ELF2K".parse::<BoardType>().unwrap(), BoardType::Elf2k);
        assert_eq!("sbc1802".parse::<BoardType>().unwrap(), BoardType::Sbc1802);
        assert!("vip".parse::<BoardType>().is_err());
    }

    #[test]
    fn console_rates_convert_to_delays() {
        let smart = SmartConsoleConfig::from(&ConsoleConfig::default());
        assert_eq!(smart.char_delay, 2_000_000);
        assert_eq!(smart.eol_delay, 25_000_000);
        assert_eq!(smart.xmodem_delay, 20_000_000);
    }
}
