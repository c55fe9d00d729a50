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

//! Dispatch of CPU I/O ports to installed devices.
//!
//! Input and output ports are separate spaces: a device may own input port 4 while another owns
//! output port 4. An optional group-select register implements two-level I/O. When configured,
//! a write to the group port selects the active group, and devices installed into a group are
//! only visible while that group is selected. Ungrouped devices are always visible unless a
//! grouped device in the active group shadows them.

use std::fmt;

use fxhash::FxHashMap;
use strum_macros::Display;

use crate::{
    error::{CoreError, CoreResult},
    events::DeviceId,
};

#[derive(Copy, Clone, Debug, Display, Eq, PartialEq)]
pub enum PortDirection {
    #[strum(to_string = "input")]
    Input,
    #[strum(to_string = "output")]
    Output,
    #[strum(to_string = "in/out")]
    InOut,
}

impl PortDirection {
    pub fn has_input(&self) -> bool {
        matches!(self, PortDirection::Input | PortDirection::InOut)
    }
    pub fn has_output(&self) -> bool {
        matches!(self, PortDirection::Output | PortDirection::InOut)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
struct PortKey {
    group: Option<u8>,
    port:  u16,
}

#[derive(Default)]
pub struct PortMap {
    inputs: FxHashMap<PortKey, DeviceId>,
    outputs: FxHashMap<PortKey, DeviceId>,
    group_port: Option<u16>,
    group: u8,
}

/// The outcome of routing a port access.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PortRoute {
    Device(DeviceId),
    GroupSelect,
    Unmapped,
}

impl PortMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable two-level I/O with the group-select register on output `port`.
    pub fn enable_groups(&mut self, port: u16) -> CoreResult<()> {
        if let Some(id) = self.outputs.get(&PortKey { group: None, port }) {
            return Err(CoreError::PortConflict {
                port,
                group: None,
                direction: PortDirection::Output,
                owner: id.to_string(),
            });
        }
        self.group_port = Some(port);
        Ok(())
    }

    pub fn group_port(&self) -> Option<u16> {
        self.group_port
    }

    pub fn group(&self) -> u8 {
        self.group
    }

    pub fn set_group(&mut self, group: u8) {
        log::trace!("I/O group select: {:02X}", group);
        self.group = group;
    }

    /// Claim `count` ports starting at `base` for `id`. Nothing is claimed if any port overlaps
    /// an existing install in the same group and direction.
    pub fn install(
        &mut self,
        id: DeviceId,
        base: u16,
        count: u16,
        direction: PortDirection,
        group: Option<u8>,
        owner_name: impl Fn(DeviceId) -> String,
    ) -> CoreResult<()> {
        for port in base..base.saturating_add(count) {
            let key = PortKey { group, port };
            if direction.has_input() {
                if let Some(other) = self.inputs.get(&key) {
                    return Err(CoreError::PortConflict {
                        port,
                        group,
                        direction: PortDirection::Input,
                        owner: owner_name(*other),
                    });
                }
            }
            if direction.has_output() {
                if let Some(other) = self.outputs.get(&key) {
                    return Err(CoreError::PortConflict {
                        port,
                        group,
                        direction: PortDirection::Output,
                        owner: owner_name(*other),
                    });
                }
                if group.is_none() && self.group_port == Some(port) {
                    return Err(CoreError::PortConflict {
                        port,
                        group,
                        direction: PortDirection::Output,
                        owner: "group select".to_string(),
                    });
                }
            }
        }
        for port in base..base.saturating_add(count) {
            let key = PortKey { group, port };
            if direction.has_input() {
                self.inputs.insert(key, id);
            }
            if direction.has_output() {
                self.outputs.insert(key, id);
            }
        }
        Ok(())
    }

    /// Release every port owned by `id`.
    pub fn remove(&mut self, id: DeviceId) {
        self.inputs.retain(|_, v| *v != id);
        self.outputs.retain(|_, v| *v != id);
    }

    pub fn route_input(&self, port: u16) -> PortRoute {
        Self::lookup(&self.inputs, self.group, port)
    }

    pub fn route_output(&self, port: u16) -> PortRoute {
        if self.group_port == Some(port) {
            return PortRoute::GroupSelect;
        }
        Self::lookup(&self.outputs, self.group, port)
    }

    fn lookup(map: &FxHashMap<PortKey, DeviceId>, group: u8, port: u16) -> PortRoute {
        map.get(&PortKey {
            group: Some(group),
            port,
        })
        .or_else(|| map.get(&PortKey { group: None, port }))
        .map(|id| PortRoute::Device(*id))
        .unwrap_or(PortRoute::Unmapped)
    }
}

impl fmt::Debug for PortMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortMap")
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("group_port", &self.group_port)
            .field("group", &self.group)
            .finish()
    }
}
