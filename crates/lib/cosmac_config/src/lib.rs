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

//! The `cosmac_config` crate parses Cosmac's configuration file and overlays command line
//! arguments on top of it. Command line arguments always take priority over the configuration
//! file.
//!
//! Features:
//! - `use_bpaf`: Enable BPAF support for command line argument parsing.

mod bpaf_config;

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;
use cfg_if::cfg_if;
use serde_derive::Deserialize;

use cosmac_core::config::{
    BoardType,
    ConsoleConfig,
    IdeConfig,
    IdeImage,
    MachineConfig,
    RtcConfig,
    SerialConfig,
    UartConfig,
};

#[cfg(feature = "use_bpaf")]
pub use bpaf_config::cli_args;
pub use bpaf_config::CmdLineArgs;

pub const DEFAULT_CONFIG_FILE: &str = "cosmac.toml";

const fn _default_true() -> bool {
    true
}

const fn _default_console_break() -> u8 {
    cosmac_core::console::DEFAULT_CONSOLE_BREAK
}

#[derive(Debug, Deserialize)]
pub struct Emulator {
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default = "_default_console_break")]
    pub console_break: u8,
    #[serde(default = "_default_true")]
    pub stop_on_illegal_io: bool,
    #[serde(default = "_default_true")]
    pub stop_on_endless_loop: bool,
    #[serde(default)]
    pub startup_script: Option<PathBuf>,
}

impl Default for Emulator {
    fn default() -> Self {
        Self {
            log_level: None,
            console_break: _default_console_break(),
            stop_on_illegal_io: true,
            stop_on_endless_loop: true,
            startup_script: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Machine {
    #[serde(default)]
    pub board: BoardType,
    #[serde(default)]
    pub clock_hz: Option<u64>,
    #[serde(default)]
    pub rom_file: Option<PathBuf>,
    /// First ROM address. Everything below it is RAM.
    #[serde(default)]
    pub rom_base: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFileParams {
    pub emulator: Emulator,
    pub machine: Machine,
    pub serial: SerialConfig,
    pub uart: UartConfig,
    pub ide: IdeConfig,
    pub rtc: RtcConfig,
    pub console: ConsoleConfig,
}

impl ConfigFileParams {
    pub fn overlay(&mut self, shell_args: CmdLineArgs) {
        if let Some(board) = shell_args.board {
            self.machine.board = board;
        }
        if let Some(rom) = shell_args.rom {
            self.machine.rom_file = Some(rom);
        }
        if let Some(script) = shell_args.script {
            self.emulator.startup_script = Some(script);
        }
        if let Some(log_level) = shell_args.log_level {
            self.emulator.log_level = Some(log_level);
        }
        self.serial.attach &= !shell_args.no_serial;

        for (drive, path) in [(0, shell_args.ide0), (1, shell_args.ide1)] {
            if let Some(path) = path {
                self.ide.images.retain(|i| i.drive != drive);
                self.ide.images.push(IdeImage { drive, path });
            }
        }
    }

    /// The settings the core needs to build a machine.
    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            board: self.machine.board,
            clock_hz: self.machine.clock_hz,
            rom_base: self.machine.rom_base,
            console_break: self.emulator.console_break,
            stop_on_illegal_io: self.emulator.stop_on_illegal_io,
            stop_on_endless_loop: self.emulator.stop_on_endless_loop,
            serial: self.serial.clone(),
            uart: self.uart.clone(),
            ide: self.ide.clone(),
            rtc: self.rtc.clone(),
            console: self.console.clone(),
        }
    }
}

pub fn read_config(toml_string: impl AsRef<str>, shell_args: CmdLineArgs) -> Result<ConfigFileParams, anyhow::Error> {
    let mut toml_args: ConfigFileParams = toml::from_str(toml_string.as_ref())?;

    // Command line arguments override config file arguments
    toml_args.overlay(shell_args);
    Ok(toml_args)
}

/// Read the TOML configuration from a file path, parse and overlay command line arguments.
/// A missing default configuration file is not an error; a missing file named on the command
/// line is.
pub fn read_config_file<P>(default_path: P) -> Result<ConfigFileParams, anyhow::Error>
where
    P: AsRef<Path>,
{
    let shell_args: CmdLineArgs;

    cfg_if! {
        if #[cfg(feature = "use_bpaf")] {
            log::debug!("Reading command line arguments...");
            shell_args = cli_args().run();
        } else {
            log::debug!("Argument reading disabled...");
            shell_args = CmdLineArgs::default();
        }
    }

    // Allow configuration file path to be overridden by command line argument 'config_file'
    let (path, explicit) = match shell_args.config_file.as_ref() {
        Some(path) => (path.clone(), true),
        None => (default_path.as_ref().to_path_buf(), false),
    };

    let toml_string = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound && !explicit => {
            log::debug!("No configuration file at {}, using defaults", path.display());
            String::new()
        }
        Err(e) => return Err(e).with_context(|| format!("Reading configuration file {}", path.display())),
    };

    read_config(toml_string, shell_args)
}
