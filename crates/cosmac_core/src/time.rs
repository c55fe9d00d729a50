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

//! Simulated time is a 64-bit nanosecond count. These helpers convert the
//! units used by device configuration into nanoseconds.

pub type SimTime = u64;

pub const NS_PER_US: u64 = 1_000;
pub const NS_PER_MS: u64 = 1_000_000;
pub const NS_PER_SEC: u64 = 1_000_000_000;

/// Period of a frequency given in Hz. Zero is treated as 1 Hz.
#[inline]
pub const fn hz_to_ns(hz: u64) -> u64 {
    let hz = if hz == 0 { 1 } else { hz };
    NS_PER_SEC / hz
}

/// Delay between characters at a rate of `cps` characters per second.
#[inline]
pub const fn cps_to_ns(cps: u64) -> u64 {
    hz_to_ns(cps)
}

#[inline]
pub const fn us_to_ns(us: u64) -> u64 {
    us * NS_PER_US
}

#[inline]
pub const fn ms_to_ns(ms: u64) -> u64 {
    ms * NS_PER_MS
}

/// Converts CPU machine cycles into elapsed nanoseconds.
///
/// The 1802 divides its crystal by eight to produce one machine cycle. Conversions are done on the
/// running cycle total rather than per instruction so that rounding never accumulates drift.
#[derive(Copy, Clone, Debug)]
pub struct CpuClock {
    crystal_hz: u64,
    clocks_per_cycle: u64,
    cycles: u64,
}

impl CpuClock {
    pub const CDP1802_CLOCKS_PER_CYCLE: u64 = 8;

    pub fn new(crystal_hz: u64) -> Self {
        Self {
            crystal_hz: crystal_hz.max(1),
            clocks_per_cycle: Self::CDP1802_CLOCKS_PER_CYCLE,
            cycles: 0,
        }
    }

    pub fn crystal_hz(&self) -> u64 {
        self.crystal_hz
    }

    pub fn set_crystal_hz(&mut self, hz: u64) {
        self.crystal_hz = hz.max(1);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn reset(&mut self) {
        self.cycles = 0;
    }

    /// Add `cycles` machine cycles and return the simulated time at the new total.
    pub fn add_cycles(&mut self, cycles: u32) -> SimTime {
        self.cycles += cycles as u64;
        self.cycles_to_ns(self.cycles)
    }

    pub fn cycles_to_ns(&self, cycles: u64) -> SimTime {
        let clocks = cycles as u128 * self.clocks_per_cycle as u128;
        (clocks * NS_PER_SEC as u128 / self.crystal_hz as u128) as SimTime
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_helpers() {
        assert_eq!(hz_to_ns(2), 500_000_000);
        assert_eq!(cps_to_ns(500), 2_000_000);
        assert_eq!(us_to_ns(100), 100_000);
        assert_eq!(ms_to_ns(25), 25_000_000);
        assert_eq!(hz_to_ns(0), NS_PER_SEC);
    }

    #[test]
    fn cycle_conversion_does_not_drift() {
        // 1.79 MHz crystal: one machine cycle is 4469.27 ns.
        let mut clock = CpuClock::new(1_790_000);
        let mut last = 0;
        for _ in 0..1_790_000 / 8 {
            last = clock.add_cycles(1);
        }
        assert_eq!(last, NS_PER_SEC);
    }
}
