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

//! Named interrupt request lines.
//!
//! Devices hold an [IrqId] handle to the line they drive and raise or lower it through their
//! device context. The CPU samples [InterruptLines::any_asserted] at each instruction boundary.
//! Without a controller the lines are simply OR'd together. With a controller, lines can be
//! masked and the lowest numbered asserted line is reported as the active source.

use std::fmt;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct IrqId(usize);

impl IrqId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Debug)]
struct InterruptLine {
    name: String,
    asserted: bool,
    requests: u64,
}

#[derive(Copy, Clone, Debug, Default)]
struct Controller {
    mask: u8,
}

#[derive(Default)]
pub struct InterruptLines {
    lines: Vec<InterruptLine>,
    controller: Option<Controller>,
}

impl InterruptLines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle of the line called `name`, creating it if needed.
    pub fn register(&mut self, name: &str) -> IrqId {
        if let Some(idx) = self.lines.iter().position(|l| l.name.eq_ignore_ascii_case(name)) {
            return IrqId(idx);
        }
        self.lines.push(InterruptLine {
            name: name.to_string(),
            asserted: false,
            requests: 0,
        });
        IrqId(self.lines.len() - 1)
    }

    pub fn find(&self, name: &str) -> Option<IrqId> {
        self.lines
            .iter()
            .position(|l| l.name.eq_ignore_ascii_case(name))
            .map(IrqId)
    }

    pub fn name(&self, id: IrqId) -> &str {
        self.lines.get(id.0).map(|l| l.name.as_str()).unwrap_or("?")
    }

    /// Drive a line. A 0 to 1 transition counts as a new request.
    pub fn set(&mut self, id: IrqId, level: bool) {
        if let Some(line) = self.lines.get_mut(id.0) {
            if level && !line.asserted {
                line.requests += 1;
                log::trace!("Interrupt request on {}", line.name);
            }
            line.asserted = level;
        }
    }

    pub fn is_asserted(&self, id: IrqId) -> bool {
        self.lines.get(id.0).is_some_and(|l| l.asserted)
    }

    /// Install a priority controller. Only the first eight lines can be masked.
    pub fn enable_controller(&mut self) {
        self.controller = Some(Controller::default());
    }

    pub fn has_controller(&self) -> bool {
        self.controller.is_some()
    }

    /// Set the controller mask. A set bit disables the corresponding line.
    pub fn set_mask(&mut self, mask: u8) {
        if let Some(c) = self.controller.as_mut() {
            c.mask = mask;
        }
    }

    pub fn mask(&self) -> u8 {
        self.controller.map(|c| c.mask).unwrap_or(0)
    }

    fn unmasked(&self, idx: usize) -> bool {
        match self.controller {
            Some(c) if idx < 8 => c.mask & (1 << idx) == 0,
            _ => true,
        }
    }

    pub fn any_asserted(&self) -> bool {
        self.lines
            .iter()
            .enumerate()
            .any(|(idx, l)| l.asserted && self.unmasked(idx))
    }

    /// The highest priority pending line, if any.
    pub fn highest_pending(&self) -> Option<IrqId> {
        self.lines
            .iter()
            .enumerate()
            .find(|(idx, l)| l.asserted && self.unmasked(*idx))
            .map(|(idx, _)| IrqId(idx))
    }

    /// Deassert every line.
    pub fn reset(&mut self) {
        for line in &mut self.lines {
            line.asserted = false;
        }
    }
}

impl fmt::Display for InterruptLines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(c) = self.controller {
            writeln!(f, "Interrupt controller mask: {:02X}", c.mask)?;
        }
        for (idx, line) in self.lines.iter().enumerate() {
            writeln!(
                f,
                "  IRQ{} {:<8} {} ({} requests)",
                idx,
                line.name,
                if line.asserted { "ASSERTED" } else { "idle" },
                line.requests
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_ored_without_controller() {
        let mut irq = InterruptLines::new();
        let uart = irq.register("UART");
        let ide = irq.register("IDE");
        assert_eq!(irq.register("uart"), uart);
        assert!(!irq.any_asserted());
        irq.set(ide, true);
        assert!(irq.any_asserted());
        irq.set(uart, true);
        irq.set(ide, false);
        assert!(irq.any_asserted());
        irq.set(uart, false);
        assert!(!irq.any_asserted());
    }

    #[test]
    fn controller_masks_and_prioritizes() {
        let mut irq = InterruptLines::new();
        let a = irq.register("A");
        let b = irq.register("B");
        irq.enable_controller();
        irq.set(a, true);
        irq.set(b, true);
        assert_eq!(irq.highest_pending(), Some(a));
        irq.set_mask(0b01);
        assert_eq!(irq.highest_pending(), Some(b));
        irq.set_mask(0b11);
        assert!(!irq.any_asserted());
    }
}
