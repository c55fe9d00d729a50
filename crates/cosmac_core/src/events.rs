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

//! The discrete event queue that drives all peripheral timing.
//!
//! Every pending event is identified by an [EventKey], a (target, param) pair. At most one event
//! per key is pending at any time: scheduling an event replaces any previous event with the same
//! key. Replaced and cancelled events are left in the heap and discarded lazily when they reach
//! the top, which keeps both schedule and cancel cheap.

use std::{cmp::Ordering, collections::BinaryHeap, fmt};

use fxhash::FxHashMap;

use crate::{error::CoreError, time::SimTime};

/// Index of an installed device in the machine's device table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DeviceId(pub(crate) usize);

impl DeviceId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The owner of an event. Devices are addressed by handle; the smart console is a singleton.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum EventTarget {
    Device(DeviceId),
    Console,
}

/// A device-private event discriminator. Composite devices reserve the high byte to route events
/// to their sub-devices.
pub type EventParam = u32;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct EventKey {
    pub target: EventTarget,
    pub param:  EventParam,
}

impl EventKey {
    pub fn new(target: EventTarget, param: EventParam) -> Self {
        Self { target, param }
    }
}

#[derive(Copy, Clone, Debug)]
struct Event {
    deadline: SimTime,
    seq: u64,
    key: EventKey,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    // Reversed so that BinaryHeap behaves as a min-heap on (deadline, seq).
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Receives events as they come due. The queue passes itself back in so that handlers can
/// schedule follow-up events.
pub trait EventSink {
    fn on_event(&mut self, key: EventKey, events: &mut EventQueue);
}

#[derive(Default)]
pub struct EventQueue {
    now: SimTime,
    next_seq: u64,
    heap: BinaryHeap<Event>,
    // The sequence number of the live event for each key.
    live: FxHashMap<EventKey, (u64, SimTime)>,
    dispatched: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Total number of events dispatched since the last reset.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Schedule `key` to fire `delay` nanoseconds from now, replacing any pending event with the
    /// same key.
    pub fn schedule(&mut self, key: EventKey, delay: SimTime) -> Result<SimTime, CoreError> {
        if delay == 0 {
            return Err(CoreError::ZeroDelay);
        }
        let deadline = self.now.saturating_add(delay);
        let seq = self.next_seq;
        self.next_seq += 1;
        let replaced = self.live.insert(key, (seq, deadline)).is_some();
        self.heap.push(Event { deadline, seq, key });
        if replaced {
            self.compact();
        }
        Ok(deadline)
    }

    /// Cancel the pending event for `key`, if any.
    pub fn cancel(&mut self, key: EventKey) {
        self.live.remove(&key);
        self.compact();
    }

    /// Cancel every pending event of `target` whose param satisfies `filter`.
    pub fn cancel_where(&mut self, target: EventTarget, filter: impl Fn(EventParam) -> bool) {
        self.live.retain(|key, _| !(key.target == target && filter(key.param)));
        self.compact();
    }

    pub fn is_scheduled(&self, key: EventKey) -> bool {
        self.live.contains_key(&key)
    }

    /// The deadline of the pending event for `key`.
    pub fn deadline(&self, key: EventKey) -> Option<SimTime> {
        self.live.get(&key).map(|(_, deadline)| *deadline)
    }

    /// The earliest pending deadline.
    pub fn next_deadline(&mut self) -> Option<SimTime> {
        self.discard_stale();
        self.heap.peek().map(|e| e.deadline)
    }

    /// Dispatch every event with a deadline at or before `t`, in deadline then scheduling order,
    /// then set the current time to `t`. While an event is being handled, `now()` reports that
    /// event's deadline, so follow-up events are scheduled relative to it.
    pub fn advance_to(&mut self, t: SimTime, sink: &mut impl EventSink) {
        loop {
            self.discard_stale();
            let Some(top) = self.heap.peek()
            else {
                break;
            };
            if top.deadline > t {
                break;
            }
            let Some(event) = self.heap.pop()
            else {
                break;
            };
            self.live.remove(&event.key);
            if event.deadline > self.now {
                self.now = event.deadline;
            }
            self.dispatched += 1;
            sink.on_event(event.key, self);
        }
        if t > self.now {
            self.now = t;
        }
    }

    /// Drop all events and rewind the clock to zero.
    pub fn reset(&mut self) {
        self.now = 0;
        self.next_seq = 0;
        self.dispatched = 0;
        self.heap.clear();
        self.live.clear();
    }

    fn is_live(&self, event: &Event) -> bool {
        matches!(self.live.get(&event.key), Some((seq, _)) if *seq == event.seq)
    }

    fn discard_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }

    // Rebuild the heap when stale entries dominate it. Periodic devices that keep rescheduling
    // would otherwise grow it without bound between dispatches.
    fn compact(&mut self) {
        if self.heap.len() > 64 && self.heap.len() > self.live.len() * 4 {
            let live = &self.live;
            self.heap
                .retain(|e| matches!(live.get(&e.key), Some((seq, _)) if *seq == e.seq));
        }
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("now", &self.now)
            .field("pending", &self.live.len())
            .finish()
    }
}
