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

//! Command line parsing.
//!
//! A command is a verb followed by words and slash modifiers. Keywords may be abbreviated to
//! any unique prefix. Addresses and data are hexadecimal; counts and rates are decimal. Anything
//! after a `;` is a comment.

use anyhow::{anyhow, bail, Result};
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, EnumIter};

#[derive(Copy, Clone, Debug, PartialEq, Eq, AsRefStr, EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Verb {
    Load,
    Save,
    Attach,
    Detach,
    Examine,
    Deposit,
    Run,
    Continue,
    Step,
    Reset,
    Set,
    Show,
    Clear,
    Send,
    Receive,
    Help,
    Exit,
    Quit,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, AsRefStr, EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
pub enum DeviceKind {
    Ide,
    Uart,
    Rtc,
    Serial,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, AsRefStr, EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SetItem {
    Breakpoint,
    Break,
    Log,
    Switches,
    Memory,
    Serial,
    Rtc,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, AsRefStr, EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ShowItem {
    Breakpoints,
    Devices,
    Time,
    Cpu,
    Config,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, AsRefStr, EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ClearItem {
    Breakpoint,
    Log,
    Memory,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, AsRefStr, EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Transfer {
    Text,
    Xmodem,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, AsRefStr, EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Modifier {
    Hex,
    Binary,
    Append,
    Rom,
    Ram,
    Nxm,
    Elfos,
    Standard,
    #[strum(to_string = "NOCRLF")]
    NoCrlf,
    Abort,
    Close,
    Registers,
    Nvr,
}

/// Match `word` against the keywords of `T`. An exact match wins, otherwise the word must be a
/// prefix of exactly one keyword.
pub fn keyword<T>(word: &str, what: &str) -> Result<T>
where
    T: IntoEnumIterator + AsRef<str> + Copy,
{
    let upper = word.to_ascii_uppercase();
    if upper.is_empty() {
        bail!("Missing {}", what);
    }
    let mut found: Option<T> = None;
    let mut ambiguous = false;
    for candidate in T::iter() {
        let name = candidate.as_ref().to_ascii_uppercase();
        if name == upper {
            return Ok(candidate);
        }
        if name.starts_with(&upper) {
            ambiguous |= found.is_some();
            found = Some(candidate);
        }
    }
    match found {
        Some(_) if ambiguous => Err(anyhow!("Ambiguous {} '{}'", what, word)),
        Some(t) => Ok(t),
        None => Err(anyhow!("Unknown {} '{}'", what, word)),
    }
}

/// A tokenized command line.
#[derive(Debug, Default)]
pub struct Args {
    words: Vec<String>,
    modifiers: Vec<Modifier>,
    pos: usize,
}

impl Args {
    pub fn parse(line: &str) -> Result<Self> {
        let line = match line.find(';') {
            Some(i) => &line[..i],
            None => line,
        };
        let mut args = Args::default();
        for token in line.split_whitespace() {
            match token.strip_prefix('/') {
                // A path such as /tmp/image.bin is an argument, not a modifier.
                Some(name) if !name.contains('/') && !name.is_empty() => match keyword::<Modifier>(name, "modifier") {
                    Ok(m) => args.modifiers.push(m),
                    Err(_) if name.contains('.') => args.words.push(token.to_string()),
                    Err(e) => return Err(e),
                },
                _ => args.words.push(token.to_string()),
            }
        }
        Ok(args)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty() && self.modifiers.is_empty()
    }

    pub fn has(&self, m: Modifier) -> bool {
        self.modifiers.contains(&m)
    }

    /// The first of `choices` present, if any. More than one is an error.
    pub fn one_of(&self, choices: &[Modifier]) -> Result<Option<Modifier>> {
        let mut present = choices.iter().copied().filter(|m| self.has(*m));
        let first = present.next();
        if let (Some(a), Some(b)) = (first, present.next()) {
            bail!("/{} and /{} are mutually exclusive", a.as_ref(), b.as_ref());
        }
        Ok(first)
    }

    /// Reject modifiers not in `allowed`.
    pub fn allow(&self, allowed: &[Modifier]) -> Result<()> {
        match self.modifiers.iter().find(|m| !allowed.contains(m)) {
            Some(m) => Err(anyhow!("/{} is not valid here", m.as_ref())),
            None => Ok(()),
        }
    }

    pub fn peek(&self) -> Option<&str> {
        self.words.get(self.pos).map(|s| s.as_str())
    }

    pub fn next(&mut self) -> Option<String> {
        let word = self.words.get(self.pos).cloned();
        if word.is_some() {
            self.pos += 1;
        }
        word
    }

    pub fn required(&mut self, what: &str) -> Result<String> {
        self.next().ok_or_else(|| anyhow!("Missing {}", what))
    }

    pub fn keyword<T>(&mut self, what: &str) -> Result<T>
    where
        T: IntoEnumIterator + AsRef<str> + Copy,
    {
        let word = self.required(what)?;
        keyword(&word, what)
    }

    pub fn remaining(&self) -> usize {
        self.words.len() - self.pos
    }

    /// Fail if any words are left over.
    pub fn finish(&self) -> Result<()> {
        match self.peek() {
            Some(word) => Err(anyhow!("Unexpected argument '{}'", word)),
            None => Ok(()),
        }
    }
}

/// Parse a hexadecimal number. A trailing `.` marks a decimal number instead.
pub fn parse_hex(word: &str, max: u32) -> Result<u32> {
    let value = match word.strip_suffix('.') {
        Some(dec) => dec.parse::<u32>().ok(),
        None => {
            let digits = word
                .strip_prefix("0x")
                .or_else(|| word.strip_prefix("0X"))
                .unwrap_or(word);
            u32::from_str_radix(digits, 16).ok()
        }
    };
    match value {
        Some(v) if v <= max => Ok(v),
        Some(_) => Err(anyhow!("{} is out of range (maximum {:X})", word, max)),
        None => Err(anyhow!("Bad number '{}'", word)),
    }
}

/// Parse a decimal number. A `0x` prefix selects hexadecimal.
pub fn parse_decimal(word: &str) -> Result<u64> {
    let value = match word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => word.trim_end_matches('.').parse::<u64>().ok(),
    };
    value.ok_or_else(|| anyhow!("Bad number '{}'", word))
}

pub fn parse_address(word: &str) -> Result<u16> {
    Ok(parse_hex(word, 0xFFFF)? as u16)
}

pub fn parse_byte(word: &str) -> Result<u8> {
    Ok(parse_hex(word, 0xFF)? as u8)
}

/// Parse `start-end` or a lone address, both ends inclusive.
pub fn parse_range(word: &str) -> Result<(u16, u16)> {
    let (start, end) = match word.split_once('-') {
        Some((a, b)) => (parse_address(a)?, parse_address(b)?),
        None => {
            let a = parse_address(word)?;
            (a, a)
        }
    };
    if end < start {
        bail!("Bad range {}: end is below start", word);
    }
    Ok((start, end))
}

/// Parse a character: `^X` for a control character, or a hex byte.
pub fn parse_char(word: &str) -> Result<u8> {
    match word.strip_prefix('^') {
        Some(c) if c.len() == 1 => {
            let c = c.as_bytes()[0].to_ascii_uppercase();
            match c {
                b'@'..=b'_' => Ok(c & 0x1F),
                _ => Err(anyhow!("Bad control character '{}'", word)),
            }
        }
        _ => parse_byte(word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_abbreviate_to_unique_prefixes() {
        assert_eq!(keyword::<Verb>("exa", "command").unwrap(), Verb::Examine);
        assert_eq!(keyword::<Verb>("DEP", "command").unwrap(), Verb::Deposit);
        assert_eq!(keyword::<Verb>("q", "command").unwrap(), Verb::Quit);
        assert_eq!(keyword::<Verb>("co", "command").unwrap(), Verb::Continue);
        assert!(keyword::<Verb>("e", "command").is_err());
        assert!(keyword::<Verb>("s", "command").is_err());
        assert!(keyword::<Verb>("frobnicate", "command").is_err());
    }

    #[test]
    fn exact_match_beats_longer_keyword() {
        assert_eq!(keyword::<SetItem>("BREAK", "item").unwrap(), SetItem::Break);
        assert_eq!(keyword::<SetItem>("breakp", "item").unwrap(), SetItem::Breakpoint);
        assert!(keyword::<SetItem>("b", "item").is_err());
    }

    #[test]
    fn modifiers_and_comments() {
        let mut args = Args::parse("load /tmp/rom.hex 8000 /HEX ; the monitor").unwrap();
        assert!(args.has(Modifier::Hex));
        assert!(!args.has(Modifier::Binary));
        assert_eq!(args.next().as_deref(), Some("load"));
        assert_eq!(args.next().as_deref(), Some("/tmp/rom.hex"));
        assert_eq!(args.next().as_deref(), Some("8000"));
        args.finish().unwrap();

        let args = Args::parse("   ; nothing here").unwrap();
        assert!(args.is_empty());

        let args = Args::parse("save x 0-10 /hex /bin").unwrap();
        assert!(args.one_of(&[Modifier::Hex, Modifier::Binary]).is_err());
        assert!(Args::parse("run /bogus").is_err());
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_address("80ff").unwrap(), 0x80FF);
        assert_eq!(parse_address("0x10").unwrap(), 0x10);
        assert_eq!(parse_address("10.").unwrap(), 10);
        assert!(parse_address("10000").is_err());
        assert!(parse_byte("100").is_err());
        assert!(parse_byte("zz").is_err());
        assert_eq!(parse_decimal("9600").unwrap(), 9600);
        assert_eq!(parse_decimal("0x10").unwrap(), 16);
        assert_eq!(parse_range("100-1FF").unwrap(), (0x100, 0x1FF));
        assert_eq!(parse_range("42").unwrap(), (0x42, 0x42));
        assert!(parse_range("200-100").is_err());
        assert_eq!(parse_char("^E").unwrap(), 5);
        assert_eq!(parse_char("^c").unwrap(), 3);
        assert_eq!(parse_char("1B").unwrap(), 0x1B);
    }
}
