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

//! Cosmac's interactive front end: reads the configuration, builds the machine on the user's
//! terminal and runs the command interpreter.

#![forbid(unsafe_code)]

pub mod command;
pub mod host_console;
pub mod interpreter;

use std::io::{self, BufRead, Write};

use cosmac_config::{ConfigFileParams, DEFAULT_CONFIG_FILE};
use cosmac_core::Machine;

use crate::{
    host_console::HostConsole,
    interpreter::{Flow, Interpreter},
};

const PROMPT: &str = "COSMAC> ";
const DEFAULT_LOG_LEVEL: &str = "warn";

pub fn run() {
    // Command line arguments are merged over the configuration file by the config crate.
    let config = match cosmac_config::read_config_file(DEFAULT_CONFIG_FILE) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to read configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // RUST_LOG, when set, overrides the configured level.
    let level = config.emulator.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut interpreter = match build(&config) {
        Ok(interpreter) => interpreter,
        Err(e) => {
            log::error!("Failed to build machine: {:#}", e);
            eprintln!("Failed to build machine: {:#}", e);
            std::process::exit(1);
        }
    };

    println!(
        "Cosmac {} emulating {}. Type HELP for a list of commands.",
        env!("CARGO_PKG_VERSION"),
        interpreter.machine().layout().name
    );

    let mut flow = Flow::Continue;
    if let Some(script) = &config.emulator.startup_script {
        let mut out = String::new();
        match interpreter.run_script(script, &mut out) {
            Ok(f) => flow = f,
            Err(e) => eprintln!("{:#}", e),
        }
        print!("{}", out);
    }
    if flow == Flow::Continue {
        command_loop(&mut interpreter);
    }

    if let Err(e) = interpreter.machine_mut().shutdown() {
        log::error!("Error during shutdown: {}", e);
        eprintln!("Error during shutdown: {}", e);
    }
}

fn build(config: &ConfigFileParams) -> anyhow::Result<Interpreter> {
    let machine = Machine::new(config.machine_config(), Box::new(HostConsole::new()))?;
    let mut interpreter = Interpreter::new(machine, true);
    if let Some(rom) = &config.machine.rom_file {
        let count = interpreter.load_rom(rom)?;
        log::info!("Loaded {} bytes of ROM from {}", count, rom.display());
    }
    Ok(interpreter)
}

fn command_loop(interpreter: &mut Interpreter) {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("{}", PROMPT);
        _ = io::stdout().flush();

        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                log::error!("Failed to read command: {}", e);
                break;
            }
        }

        let mut out = String::new();
        let result = interpreter.execute(&line, &mut out);
        print!("{}", out);
        match result {
            Ok(Flow::Exit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => println!("?{:#}", e),
        }
    }
}
