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

//! [AtaString] formats the space-padded, byte-swapped strings of the IDENTIFY block.

use std::{convert::Infallible, str::FromStr};

use binrw::binrw;

#[binrw]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AtaString<const N: usize> {
    #[br(count = N)]
    #[bw(assert(raw.len() == N, "raw length must be N"))]
    raw: Vec<u8>,
}

impl<const N: usize> AtaString<N> {
    /// Build a string of exactly `N` bytes, truncating or padding `s` with spaces.
    pub fn new(s: &str) -> Self {
        let mut buf = vec![b' '; N];
        let bytes = s.as_bytes();
        let len = bytes.len().min(N);
        buf[..len].copy_from_slice(&bytes[..len]);

        // ATA stores each pair of characters big-endian within its 16-bit word.
        for chunk in buf.chunks_mut(2) {
            chunk.reverse();
        }
        Self { raw: buf }
    }

    /// The string with byte order restored and trailing padding removed.
    pub fn as_str(&self) -> String {
        let mut unswapped = self.raw.clone();
        for chunk in unswapped.chunks_mut(2) {
            chunk.reverse();
        }
        String::from_utf8_lossy(&unswapped).trim_end().to_string()
    }
}

impl<const N: usize> FromStr for AtaString<N> {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_byte_swapped() {
        let s = AtaString::<8>::new("ABCDE");
        assert_eq!(s.raw, b"BADC E  ".to_vec());
        assert_eq!(s.as_str(), "ABCDE");
    }

    #[test]
    fn long_strings_are_truncated() {
        let s: AtaString<4> = "COSMAC".parse().unwrap();
        assert_eq!(s.as_str(), "COSM");
    }
}
