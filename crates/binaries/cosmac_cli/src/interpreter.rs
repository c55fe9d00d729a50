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

//! Executes command lines against a [Machine]. Output is collected into a string so that the
//! caller decides where it goes.

use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};

use cosmac_core::{
    console::Console,
    cpu::{disassembler::disassemble, StopCode, REGISTER_NAMES},
    memory::ADDRESS_SPACE,
    Machine,
};

use crate::{
    command::{
        keyword,
        parse_address,
        parse_byte,
        parse_char,
        parse_decimal,
        parse_hex,
        parse_range,
        Args,
        ClearItem,
        DeviceKind,
        Modifier,
        SetItem,
        ShowItem,
        Transfer,
        Verb,
    },
    host_console::RawModeGuard,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

const HELP: &[(Verb, &str)] = &[
    (Verb::Load, "LOAD file [base] [/HEX|/BINARY]     load a memory image\nLOAD file /NVR                      load RTC non-volatile RAM"),
    (Verb::Save, "SAVE file start-end [/HEX|/BINARY]  save a memory image\nSAVE file /NVR                      save RTC non-volatile RAM"),
    (Verb::Attach, "ATTACH IDE unit file | UART [slot] | RTC [nvr-file] | SERIAL [baud]"),
    (Verb::Detach, "DETACH IDE unit | UART [slot] | RTC | SERIAL"),
    (Verb::Examine, "EXAMINE addr[-addr] | register | /REGISTERS"),
    (Verb::Deposit, "DEPOSIT addr byte... | register value"),
    (Verb::Run, "RUN [addr]                          run from addr, or from the current PC"),
    (Verb::Continue, "CONTINUE                            resume, passing over a breakpoint"),
    (Verb::Step, "STEP [count]                        execute count instructions"),
    (Verb::Reset, "RESET                               reset the CPU and every device"),
    (Verb::Set, "SET BREAKPOINT addr | BREAK char | LOG file [/APPEND] | SWITCHES byte\n    MEMORY start-end /ROM|/RAM|/NXM | SERIAL BAUD rate | RTC /ELFOS|/STANDARD"),
    (Verb::Show, "SHOW BREAKPOINTS | DEVICES | TIME | CPU | CONFIG | device"),
    (Verb::Clear, "CLEAR BREAKPOINT addr|ALL | LOG | MEMORY"),
    (Verb::Send, "SEND TEXT file [/NOCRLF] | XMODEM file | /ABORT"),
    (Verb::Receive, "RECEIVE XMODEM file | /CLOSE"),
    (Verb::Help, "HELP [command]"),
    (Verb::Exit, "EXIT or QUIT                        leave the emulator"),
];

pub struct Interpreter {
    machine: Machine,
    /// Put the terminal into raw mode while the CPU runs.
    interactive: bool,
}

impl Interpreter {
    pub fn new(machine: Machine, interactive: bool) -> Self {
        Self { machine, interactive }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// Execute one command line.
    pub fn execute(&mut self, line: &str, out: &mut String) -> Result<Flow> {
        let mut args = Args::parse(line)?;
        if args.is_empty() {
            return Ok(Flow::Continue);
        }
        let verb: Verb = args.keyword("command")?;
        log::trace!("Executing {:?}: {}", verb, line.trim());
        match verb {
            Verb::Load => self.load(&mut args, out)?,
            Verb::Save => self.save(&mut args, out)?,
            Verb::Attach => self.attach(&mut args, out)?,
            Verb::Detach => self.detach(&mut args, out)?,
            Verb::Examine => self.examine(&mut args, out)?,
            Verb::Deposit => self.deposit(&mut args)?,
            Verb::Run => {
                args.allow(&[])?;
                let address = args.next().map(|w| parse_address(&w)).transpose()?;
                args.finish()?;
                let code = self.with_terminal(|m| match address {
                    Some(a) => m.run_from(a),
                    None => m.run(),
                });
                self.report_stop(code, out)?;
            }
            Verb::Continue => {
                args.allow(&[])?;
                args.finish()?;
                let code = self.with_terminal(|m| m.continue_run());
                self.report_stop(code, out)?;
            }
            Verb::Step => {
                args.allow(&[])?;
                let count = args.next().map(|w| parse_decimal(&w)).transpose()?.unwrap_or(1);
                args.finish()?;
                let code = self.with_terminal(|m| m.step(count));
                if code == StopCode::StepComplete {
                    write!(out, "{}", self.machine.cpu())?;
                }
                self.report_stop(code, out)?;
            }
            Verb::Reset => {
                args.allow(&[])?;
                args.finish()?;
                self.machine.reset();
            }
            Verb::Set => self.set(&mut args, out)?,
            Verb::Show => self.show(&mut args, out)?,
            Verb::Clear => self.clear(&mut args)?,
            Verb::Send => self.send(&mut args, out)?,
            Verb::Receive => self.receive(&mut args, out)?,
            Verb::Help => {
                args.allow(&[])?;
                let topic = args.next().map(|w| keyword::<Verb>(&w, "command")).transpose()?;
                args.finish()?;
                help(topic, out)?;
            }
            Verb::Exit | Verb::Quit => {
                args.finish()?;
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    /// Execute every line of a command file. Failing lines are reported and skipped.
    pub fn run_script(&mut self, path: &Path, out: &mut String) -> Result<Flow> {
        let text = std::fs::read_to_string(path).with_context(|| format!("Reading script {}", path.display()))?;
        log::debug!("Running script {}", path.display());
        for (n, line) in text.lines().enumerate() {
            match self.execute(line, out) {
                Ok(Flow::Exit) => return Ok(Flow::Exit),
                Ok(Flow::Continue) => {}
                Err(e) => writeln!(out, "{}:{}: {:#}", path.display(), n + 1, e)?,
            }
        }
        Ok(Flow::Continue)
    }

    /// Load a memory image. Hex records carry their own addresses and `base` is added to them;
    /// a binary image is placed at `base`.
    pub fn load_image(&mut self, path: &Path, base: u16, format: Option<Modifier>) -> Result<usize> {
        let hex = match format {
            Some(Modifier::Hex) => true,
            Some(_) => false,
            None => is_hex_file(path),
        };
        let memory = self.machine.memory_mut();
        let loaded = if hex {
            memory.load_intel_hex(path, base, ADDRESS_SPACE as u32)
        }
        else {
            memory.load_binary(path, base, ADDRESS_SPACE as u32)
        };
        loaded.with_context(|| format!("Loading {}", path.display()))
    }

    /// Load the boot ROM. A binary image goes at the start of ROM.
    pub fn load_rom(&mut self, path: &Path) -> Result<usize> {
        let base = if is_hex_file(path) {
            0
        }
        else {
            u16::try_from(self.machine.layout().rom.start)?
        };
        self.load_image(path, base, None)
    }

    fn with_terminal<F>(&mut self, f: F) -> StopCode
    where
        F: FnOnce(&mut Machine) -> StopCode,
    {
        let _raw = if self.interactive {
            match RawModeGuard::enable() {
                Ok(guard) => Some(guard),
                Err(e) => {
                    log::warn!("Unable to put the terminal in raw mode: {}", e);
                    None
                }
            }
        }
        else {
            None
        };
        f(&mut self.machine)
    }

    fn report_stop(&mut self, code: StopCode, out: &mut String) -> Result<()> {
        if code != StopCode::StepComplete {
            writeln!(out, "{}", code)?;
        }
        self.show_next(out)?;
        if let Some(result) = self.machine.console_mut().take_xmodem_result() {
            match result {
                Ok(bytes) => writeln!(out, "XMODEM transfer complete, {} bytes", bytes)?,
                Err(e) => writeln!(out, "XMODEM transfer failed: {}", e)?,
            }
        }
        Ok(())
    }

    /// Disassemble the instruction at PC.
    fn show_next(&self, out: &mut String) -> Result<()> {
        let pc = self.machine.cpu().pc();
        let memory = self.machine.memory();
        let bytes = [
            memory.ui_read(pc),
            memory.ui_read(pc.wrapping_add(1)),
            memory.ui_read(pc.wrapping_add(2)),
        ];
        let (text, len) = disassemble(bytes, pc);
        let raw: Vec<String> = bytes[..len].iter().map(|b| format!("{:02X}", b)).collect();
        writeln!(out, "{:04X}: {:<9} {}", pc, raw.join(" "), text)?;
        Ok(())
    }

    fn load(&mut self, args: &mut Args, out: &mut String) -> Result<()> {
        args.allow(&[Modifier::Hex, Modifier::Binary, Modifier::Nvr])?;
        let path = PathBuf::from(args.required("file name")?);
        if args.has(Modifier::Nvr) {
            args.finish()?;
            self.machine.load_nvr(&path)?;
            writeln!(out, "NVR loaded from {}", path.display())?;
            return Ok(());
        }
        let base = args.next().map(|w| parse_address(&w)).transpose()?.unwrap_or(0);
        args.finish()?;
        let format = args.one_of(&[Modifier::Hex, Modifier::Binary])?;
        let count = self.load_image(&path, base, format)?;
        writeln!(out, "{} bytes loaded", count)?;
        Ok(())
    }

    fn save(&mut self, args: &mut Args, out: &mut String) -> Result<()> {
        args.allow(&[Modifier::Hex, Modifier::Binary, Modifier::Nvr])?;
        let path = PathBuf::from(args.required("file name")?);
        if args.has(Modifier::Nvr) {
            args.finish()?;
            self.machine.save_nvr(&path)?;
            writeln!(out, "NVR saved to {}", path.display())?;
            return Ok(());
        }
        let first = args.required("address range")?;
        let (start, end) = match args.next() {
            Some(second) => (parse_address(&first)?, parse_address(&second)?),
            None => parse_range(&first)?,
        };
        if end < start {
            bail!("End address {:04X} is below start address {:04X}", end, start);
        }
        args.finish()?;
        let len = (end - start) as usize + 1;
        let hex = match args.one_of(&[Modifier::Hex, Modifier::Binary])? {
            Some(m) => m == Modifier::Hex,
            None => is_hex_file(&path),
        };
        let memory = self.machine.memory();
        let saved = if hex {
            memory.save_intel_hex(&path, start, len)
        }
        else {
            memory.save_binary(&path, start, len)
        };
        saved.with_context(|| format!("Saving {}", path.display()))?;
        writeln!(out, "{} bytes saved", len)?;
        Ok(())
    }

    fn attach(&mut self, args: &mut Args, out: &mut String) -> Result<()> {
        args.allow(&[])?;
        let kind: DeviceKind = args.keyword("device")?;
        match kind {
            DeviceKind::Ide => {
                let unit = usize::try_from(parse_decimal(&args.required("drive unit")?)?)?;
                let path = PathBuf::from(args.required("image file")?);
                args.finish()?;
                self.machine.attach_ide(unit, &path)?;
                writeln!(out, "IDE drive {} attached to {}", unit, path.display())?;
            }
            DeviceKind::Uart => {
                let slot = optional_slot(args)?;
                args.finish()?;
                self.machine.attach_uart(slot)?;
            }
            DeviceKind::Rtc => {
                let nvr = args.next().map(PathBuf::from);
                args.finish()?;
                self.machine.attach_rtc(nvr)?;
            }
            DeviceKind::Serial => {
                let mut serial = self.machine.config().serial.clone();
                if let Some(word) = args.next() {
                    serial.baud = u32::try_from(parse_decimal(&word)?)?;
                }
                args.finish()?;
                self.machine.attach_serial(&serial)?;
            }
        }
        Ok(())
    }

    fn detach(&mut self, args: &mut Args, out: &mut String) -> Result<()> {
        args.allow(&[])?;
        let kind: DeviceKind = args.keyword("device")?;
        match kind {
            DeviceKind::Ide => {
                let unit = usize::try_from(parse_decimal(&args.required("drive unit")?)?)?;
                args.finish()?;
                self.machine.detach_ide(unit)?;
                writeln!(out, "IDE drive {} detached", unit)?;
            }
            DeviceKind::Uart => {
                let slot = optional_slot(args)?;
                args.finish()?;
                self.machine.detach_uart(slot)?;
            }
            DeviceKind::Rtc => {
                args.finish()?;
                self.machine.detach_rtc()?;
            }
            DeviceKind::Serial => {
                args.finish()?;
                self.machine.detach_serial()?;
            }
        }
        Ok(())
    }

    fn examine(&mut self, args: &mut Args, out: &mut String) -> Result<()> {
        args.allow(&[Modifier::Registers])?;
        if args.has(Modifier::Registers) {
            args.finish()?;
            write!(out, "{}", self.machine.cpu())?;
            return Ok(());
        }
        if args.peek().is_none() {
            bail!("Missing address or register");
        }
        while let Some(word) = args.next() {
            if is_register(&word) {
                let name = word.to_ascii_uppercase();
                let value = self
                    .machine
                    .register(&name)
                    .ok_or_else(|| anyhow!("Unknown register '{}'", word))?;
                writeln!(out, "{}={:0width$X}", name, value, width = register_width(&name))?;
                continue;
            }
            let (start, end) = parse_range(&word)?;
            let memory = self.machine.memory();
            if start == end {
                let bytes = [
                    memory.ui_read(start),
                    memory.ui_read(start.wrapping_add(1)),
                    memory.ui_read(start.wrapping_add(2)),
                ];
                let (text, _) = disassemble(bytes, start);
                writeln!(out, "{:04X}: {:02X}  {}", start, bytes[0], text)?;
                continue;
            }
            let mut line_start = start as usize;
            while line_start <= end as usize {
                let line_end = (line_start | 0x0F).min(end as usize);
                write!(out, "{:04X}:", line_start)?;
                for a in line_start..=line_end {
                    write!(out, " {:02X}", memory.ui_read(a as u16))?;
                }
                writeln!(out)?;
                line_start = line_end + 1;
            }
        }
        Ok(())
    }

    fn deposit(&mut self, args: &mut Args) -> Result<()> {
        args.allow(&[])?;
        let target = args.required("address or register")?;
        if is_register(&target) {
            let value = parse_hex(&args.required("value")?, 0xFFFF)? as u16;
            args.finish()?;
            self.machine.set_register(&target.to_ascii_uppercase(), value)?;
            return Ok(());
        }
        let address = parse_address(&target)?;
        let mut bytes = Vec::new();
        while let Some(word) = args.next() {
            bytes.push(parse_byte(&word)?);
        }
        if bytes.is_empty() {
            bail!("Missing data");
        }
        let memory = self.machine.memory_mut();
        for (i, byte) in bytes.into_iter().enumerate() {
            memory.ui_write(address.wrapping_add(i as u16), byte);
        }
        Ok(())
    }

    fn set(&mut self, args: &mut Args, out: &mut String) -> Result<()> {
        let item: SetItem = args.keyword("item")?;
        match item {
            SetItem::Breakpoint => {
                args.allow(&[])?;
                let address = parse_address(&args.required("address")?)?;
                args.finish()?;
                self.machine.memory_mut().set_break(address, true);
            }
            SetItem::Break => {
                args.allow(&[])?;
                let ch = parse_char(&args.required("character")?)?;
                args.finish()?;
                self.machine.console_mut().set_console_break(ch);
                writeln!(out, "Console break is {}", char_name(ch))?;
            }
            SetItem::Log => {
                args.allow(&[Modifier::Append])?;
                let path = PathBuf::from(args.required("file name")?);
                args.finish()?;
                self.machine.console_mut().open_log(&path, args.has(Modifier::Append))?;
            }
            SetItem::Switches => {
                args.allow(&[])?;
                let value = parse_byte(&args.required("switch value")?)?;
                args.finish()?;
                self.machine.set_switches(value)?;
            }
            SetItem::Memory => {
                args.allow(&[Modifier::Rom, Modifier::Ram, Modifier::Nxm])?;
                let (start, end) = parse_range(&args.required("address range")?)?;
                args.finish()?;
                let range = start as usize..end as usize + 1;
                let memory = self.machine.memory_mut();
                match args.one_of(&[Modifier::Rom, Modifier::Ram, Modifier::Nxm])? {
                    Some(Modifier::Rom) => memory.map_rom(range),
                    Some(Modifier::Ram) => memory.map_ram(range),
                    Some(_) => memory.unmap(range),
                    None => bail!("Specify /ROM, /RAM or /NXM"),
                }
            }
            SetItem::Serial => {
                args.allow(&[])?;
                let what = args.required("BAUD")?;
                if what.is_empty() || !"BAUD".starts_with(&what.to_ascii_uppercase()) {
                    bail!("Unknown serial setting '{}'", what);
                }
                let baud = u32::try_from(parse_decimal(&args.required("baud rate")?)?)?;
                args.finish()?;
                self.machine.set_serial_baud(baud)?;
            }
            SetItem::Rtc => {
                args.allow(&[Modifier::Elfos, Modifier::Standard])?;
                args.finish()?;
                match args.one_of(&[Modifier::Elfos, Modifier::Standard])? {
                    Some(m) => self.machine.set_rtc_elfos_mode(m == Modifier::Elfos)?,
                    None => bail!("Specify /ELFOS or /STANDARD"),
                }
            }
        }
        Ok(())
    }

    fn show(&mut self, args: &mut Args, out: &mut String) -> Result<()> {
        args.allow(&[])?;
        let word = args.required("item")?;
        args.finish()?;
        match keyword::<ShowItem>(&word, "item") {
            Ok(ShowItem::Breakpoints) => {
                let breakpoints = self.machine.memory().breakpoints();
                if breakpoints.is_empty() {
                    writeln!(out, "No breakpoints")?;
                }
                for address in breakpoints {
                    writeln!(out, "Breakpoint at {:04X}", address)?;
                }
            }
            Ok(ShowItem::Devices) => self.machine.show_devices(out)?,
            Ok(ShowItem::Time) => self.machine.show_time(out)?,
            Ok(ShowItem::Cpu) => {
                write!(out, "{}", self.machine.cpu())?;
                self.show_next(out)?;
            }
            Ok(ShowItem::Config) => self.show_config(out)?,
            Err(e) => {
                if self.machine.show_device(&word, out).is_err() {
                    bail!("{}, and no device has that name", e);
                }
            }
        }
        Ok(())
    }

    fn show_config(&mut self, out: &mut String) -> Result<()> {
        let layout = self.machine.layout();
        writeln!(out, "Board                {}", layout.name)?;
        writeln!(out, "Clock                {} Hz", self.machine.clock().crystal_hz())?;
        writeln!(
            out,
            "RAM                  {:04X}-{:04X}",
            layout.ram.start,
            layout.ram.end.saturating_sub(1)
        )?;
        writeln!(
            out,
            "ROM                  {:04X}-{:04X}",
            layout.rom.start,
            layout.rom.end.saturating_sub(1)
        )?;
        let config = self.machine.config();
        writeln!(out, "Stop on illegal I/O  {}", yes_no(config.stop_on_illegal_io))?;
        writeln!(out, "Stop on endless loop {}", yes_no(config.stop_on_endless_loop))?;
        writeln!(
            out,
            "Text send            {} cps, {} ms end of line delay, CR/LF folding {}",
            config.console.text_cps,
            config.console.eol_delay_ms,
            if config.console.fold_crlf { "on" } else { "off" }
        )?;
        writeln!(out, "XMODEM               {} cps", config.console.xmodem_cps)?;
        let console = self.machine.console_mut();
        writeln!(out, "Console break        {}", char_name(console.console_break()))?;
        match console.log_path() {
            Some(path) => writeln!(out, "Console log          {}", path.display())?,
            None => writeln!(out, "Console log          none")?,
        }
        Ok(())
    }

    fn clear(&mut self, args: &mut Args) -> Result<()> {
        args.allow(&[])?;
        let item: ClearItem = args.keyword("item")?;
        match item {
            ClearItem::Breakpoint => {
                let word = args.required("address or ALL")?;
                args.finish()?;
                if word.eq_ignore_ascii_case("ALL") {
                    self.machine.memory_mut().clear_all_breaks();
                }
                else {
                    let address = parse_address(&word)?;
                    if !self.machine.memory().find_break(address) {
                        bail!("No breakpoint at {:04X}", address);
                    }
                    self.machine.memory_mut().set_break(address, false);
                }
            }
            ClearItem::Log => {
                args.finish()?;
                self.machine.console_mut().close_log();
            }
            ClearItem::Memory => {
                args.finish()?;
                self.machine.memory_mut().clear();
            }
        }
        Ok(())
    }

    fn send(&mut self, args: &mut Args, out: &mut String) -> Result<()> {
        args.allow(&[Modifier::NoCrlf, Modifier::Abort])?;
        if args.has(Modifier::Abort) {
            args.finish()?;
            let console = self.machine.console_mut();
            if console.text_active() {
                console.abort_text();
                writeln!(out, "Text send aborted")?;
            }
            else if console.xmodem_active() {
                console.cancel_xmodem();
                writeln!(out, "XMODEM transfer aborted")?;
            }
            else {
                writeln!(out, "Nothing is being sent")?;
            }
            return Ok(());
        }
        let transfer: Transfer = args.keyword("TEXT or XMODEM")?;
        let path = PathBuf::from(args.required("file name")?);
        args.finish()?;
        match transfer {
            Transfer::Text => {
                let fold = self.machine.config().console.fold_crlf && !args.has(Modifier::NoCrlf);
                self.machine.console_mut().send_text_with(&path, fold)?;
            }
            Transfer::Xmodem => {
                if args.has(Modifier::NoCrlf) {
                    bail!("/NOCRLF applies to text files only");
                }
                self.machine.console_mut().send_file(&path)?;
            }
        }
        writeln!(out, "Sending {}", path.display())?;
        Ok(())
    }

    fn receive(&mut self, args: &mut Args, out: &mut String) -> Result<()> {
        args.allow(&[Modifier::Close])?;
        if args.has(Modifier::Close) {
            args.finish()?;
            let console = self.machine.console_mut();
            if console.xmodem_active() {
                console.cancel_xmodem();
                writeln!(out, "XMODEM transfer closed")?;
            }
            else {
                writeln!(out, "Nothing is being received")?;
            }
            return Ok(());
        }
        if args.keyword::<Transfer>("XMODEM")? != Transfer::Xmodem {
            bail!("Files can only be received by XMODEM");
        }
        let path = PathBuf::from(args.required("file name")?);
        args.finish()?;
        self.machine.console_mut().receive_file(&path)?;
        writeln!(out, "Receiving {}", path.display())?;
        Ok(())
    }
}

fn help(topic: Option<Verb>, out: &mut String) -> Result<()> {
    let topic = match topic {
        Some(Verb::Quit) => Some(Verb::Exit),
        t => t,
    };
    for (_, text) in HELP.iter().filter(|(v, _)| topic.map_or(true, |t| t == *v)) {
        writeln!(out, "{}", text)?;
    }
    if topic.is_none() {
        writeln!(out)?;
        writeln!(out, "Commands may be abbreviated. Addresses and data are hex, counts and rates decimal;")?;
        writeln!(out, "a trailing '.' makes a number decimal. Text after ';' is ignored.")?;
    }
    Ok(())
}

fn optional_slot(args: &mut Args) -> Result<usize> {
    match args.next() {
        Some(word) => Ok(usize::try_from(parse_decimal(&word)?)?),
        None => Ok(0),
    }
}

fn is_hex_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| ["hex", "ihx", "ihex"].iter().any(|h| e.eq_ignore_ascii_case(h)))
}

/// Register names take precedence over hex addresses, so address D must be written 0D.
fn is_register(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    upper == "PC" || REGISTER_NAMES.contains(&upper.as_str())
}

fn register_width(name: &str) -> usize {
    match name {
        "D" | "T" => 2,
        "DF" | "P" | "X" | "IE" | "Q" => 1,
        _ => 4,
    }
}

fn char_name(ch: u8) -> String {
    match ch {
        0x00..=0x1F => format!("^{}", (ch + 0x40) as char),
        _ => format!("{:02X}", ch),
    }
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    }
    else {
        "no"
    }
}
