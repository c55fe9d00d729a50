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

use std::path::PathBuf;

use cosmac_core::config::BoardType;

#[cfg(feature = "use_bpaf")]
use bpaf::Bpaf;

#[cfg_attr(feature = "use_bpaf", derive(Bpaf))]
#[cfg_attr(feature = "use_bpaf", bpaf(options, version, generate(cli_args)))]
#[derive(Debug, Default)]
pub struct CmdLineArgs {
    #[cfg_attr(feature = "use_bpaf", bpaf(long("config_file"), long("configfile")))]
    pub config_file: Option<PathBuf>,

    /// Board to emulate: elf2k, pev2 or sbc1802
    #[cfg_attr(feature = "use_bpaf", bpaf(long))]
    pub board: Option<BoardType>,

    /// ROM image to load at startup, Intel hex or raw binary
    #[cfg_attr(feature = "use_bpaf", bpaf(long))]
    pub rom: Option<PathBuf>,

    /// File of commands to execute at startup
    #[cfg_attr(feature = "use_bpaf", bpaf(long))]
    pub script: Option<PathBuf>,

    #[cfg_attr(feature = "use_bpaf", bpaf(long("log_level"), long("loglevel")))]
    pub log_level: Option<String>,

    /// Do not attach the bit-banged serial port
    #[cfg_attr(feature = "use_bpaf", bpaf(long("no_serial"), long("noserial"), switch))]
    pub no_serial: bool,

    /// Disk image for IDE drive 0
    #[cfg_attr(feature = "use_bpaf", bpaf(long))]
    pub ide0: Option<PathBuf>,

    /// Disk image for IDE drive 1
    #[cfg_attr(feature = "use_bpaf", bpaf(long))]
    pub ide1: Option<PathBuf>,
}
