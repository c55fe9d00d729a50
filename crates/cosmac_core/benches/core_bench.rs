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

//! Benchmarks for the event queue and CPU stepping.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cosmac_core::{
    config::{MachineConfig, SerialConfig},
    console::BufferConsole,
    events::{EventKey, EventQueue, EventSink, EventTarget},
    Machine,
};

struct Rearm {
    fired: u64,
}

impl EventSink for Rearm {
    fn on_event(&mut self, key: EventKey, events: &mut EventQueue) {
        self.fired += 1;
        _ = events.schedule(key, 1_000 + key.param as u64 * 37);
    }
}

pub fn event_queue_bench(c: &mut Criterion) {
    c.bench_function("event_queue_bench", |b| {
        let mut queue = EventQueue::new();
        for param in 0..16 {
            _ = queue.schedule(EventKey::new(EventTarget::Console, param), 1 + param as u64);
        }
        let mut sink = Rearm { fired: 0 };
        b.iter(|| {
            let t = queue.now() + 100_000;
            queue.advance_to(black_box(t), &mut sink);
        });
        black_box(sink.fired);
    });
}

pub fn cpu_step_bench(c: &mut Criterion) {
    let config = MachineConfig {
        serial: SerialConfig {
            attach: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut machine = match Machine::new(config, Box::new(BufferConsole::new())) {
        Ok(m) => m,
        Err(e) => panic!("machine setup failed: {}", e),
    };
    // A counting loop: INC R5; GLO R5; BNZ 00; BR 00
    for (i, byte) in [0x15u8, 0x85, 0x3A, 0x00, 0x30, 0x00].iter().enumerate() {
        machine.memory_mut().ui_write(i as u16, *byte);
    }

    c.bench_function("cpu_step_bench", |b| {
        b.iter(|| black_box(machine.step(black_box(1000))));
    });
}

criterion_group!(benches, event_queue_bench, cpu_step_bench);
criterion_main!(benches);
