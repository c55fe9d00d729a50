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

//! Error types shared across the core library.

use std::path::PathBuf;

use thiserror::Error;

use crate::port_map::PortDirection;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{direction} port {port} (group {group:?}) is already in use by {owner}")]
    PortConflict {
        port: u16,
        group: Option<u8>,
        direction: PortDirection,
        owner: String,
    },
    #[error("No device named '{0}' is installed")]
    NoSuchDevice(String),
    #[error("Device '{0}' is already attached")]
    AlreadyAttached(String),
    #[error("Invalid drive unit {0}, expected 0 or 1")]
    InvalidUnit(usize),
    #[error("Image {path:?} has length {len}, which is not a multiple of {sector_size} bytes")]
    ImageSize {
        path: PathBuf,
        len: u64,
        sector_size: usize,
    },
    #[error("Image {path:?} is empty")]
    EmptyImage { path: PathBuf },
    #[error("Intel hex error on line {line}: {msg}")]
    IntelHex { line: usize, msg: String },
    #[error("Address {addr:#06X} is outside of the permitted range {start:#06X}-{end:#06X}")]
    AddressRange { addr: u32, start: u32, end: u32 },
    #[error("Event scheduled with zero delay")]
    ZeroDelay,
    #[error("Unknown register '{0}'")]
    UnknownRegister(String),
    #[error("{0}")]
    Unsupported(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
