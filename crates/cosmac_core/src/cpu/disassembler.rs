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

//! A one-instruction disassembler for the trace log and the EXAMINE command.

use super::cdp1802::ILLEGAL_OPCODE;

const OP_3X: [&str; 16] = [
    "BR", "BQ", "BZ", "BDF", "B1", "B2", "B3", "B4", "SKP", "BNQ", "BNZ", "BNF", "BN1", "BN2", "BN3", "BN4",
];
const OP_7X: [&str; 16] = [
    "RET", "DIS", "LDXA", "STXD", "ADC", "SDB", "SHRC", "SMB", "SAV", "MARK", "REQ", "SEQ", "ADCI", "SDBI", "SHLC",
    "SMBI",
];
const OP_CX: [&str; 16] = [
    "LBR", "LBQ", "LBZ", "LBDF", "NOP", "LSNQ", "LSNZ", "LSNF", "LSKP", "LBNQ", "LBNZ", "LBNF", "LSIE", "LSQ", "LSZ",
    "LSDF",
];
const OP_FX: [&str; 16] = [
    "LDX", "OR", "AND", "XOR", "ADD", "SD", "SHR", "SM", "LDI", "ORI", "ANI", "XRI", "ADI", "SDI", "SHL", "SMI",
];

/// Length in bytes of the instruction starting with `opcode`.
pub fn instruction_len(opcode: u8) -> usize {
    match opcode {
        0x30..=0x37 | 0x39..=0x3F => 2,
        0x7C | 0x7D | 0x7F => 2,
        0xF8..=0xFD | 0xFF => 2,
        0xC0..=0xC3 | 0xC9..=0xCB => 3,
        _ => 1,
    }
}

/// Disassemble the instruction in `bytes`, located at `address`. Returns the text and length.
pub fn disassemble(bytes: [u8; 3], address: u16) -> (String, usize) {
    let [opcode, b1, b2] = bytes;
    let n = opcode & 0x0F;
    let len = instruction_len(opcode);
    let text = match opcode >> 4 {
        0x0 if n == 0 => "IDL".to_string(),
        0x0 => format!("LDN R{:X}", n),
        0x1 => format!("INC R{:X}", n),
        0x2 => format!("DEC R{:X}", n),
        0x3 if opcode == 0x38 => OP_3X[8].to_string(),
        0x3 => {
            let target = (address.wrapping_add(1) & 0xFF00) | b1 as u16;
            format!("{} {:04X}", OP_3X[n as usize], target)
        }
        0x4 => format!("LDA R{:X}", n),
        0x5 => format!("STR R{:X}", n),
        0x6 => match n {
            0 => "IRX".to_string(),
            1..=7 => format!("OUT {}", n),
            _ if opcode == ILLEGAL_OPCODE => format!("DB {:02X}", opcode),
            _ => format!("INP {}", n & 0x07),
        },
        0x7 if len == 2 => format!("{} {:02X}", OP_7X[n as usize], b1),
        0x7 => OP_7X[n as usize].to_string(),
        0x8 => format!("GLO R{:X}", n),
        0x9 => format!("GHI R{:X}", n),
        0xA => format!("PLO R{:X}", n),
        0xB => format!("PHI R{:X}", n),
        0xC if len == 3 => format!("{} {:04X}", OP_CX[n as usize], u16::from_be_bytes([b1, b2])),
        0xC => OP_CX[n as usize].to_string(),
        0xD => format!("SEP R{:X}", n),
        0xE => format!("SEX R{:X}", n),
        _ if len == 2 => format!("{} {:02X}", OP_FX[n as usize], b1),
        _ => OP_FX[n as usize].to_string(),
    };
    (text, len)
}
