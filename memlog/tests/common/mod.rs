#![allow(dead_code)]

use std::alloc::{GlobalAlloc, Layout, System};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use memlog::*;

pub const PREFIX: &str = "proj";

pub fn layout(size: usize) -> Layout {
    Layout::from_size_align(size, 8).unwrap()
}

/// A symbolizer that replays a fixed trace and symbol table. Entries
/// sharing an address form its inline chain, innermost first.
pub struct Scripted {
    trace:      Mutex<Vec<usize>>,
    frames:     HashMap<usize, Vec<Frame>>,
    pub captures:   AtomicUsize,
    pub resolves:   AtomicUsize,
}

impl Scripted {
    pub fn new(trace: &[usize], entries: &[(usize, &str, u32, &str)]) -> Self {
        let mut frames: HashMap<usize, Vec<Frame>> = HashMap::new();
        for &(address, file, line, symbol) in entries {
            frames.entry(address)
                .or_default()
                .push(Frame { file: file.to_string(), line, symbol: symbol.to_string() });
        }

        Self {
            trace:      Mutex::new(trace.to_vec()),
            frames,
            captures:   AtomicUsize::new(0),
            resolves:   AtomicUsize::new(0),
        }
    }

    /// Frame 0 is the logger, frame 2 the first one under [`PREFIX`].
    pub fn app() -> Self {
        Self::new(
            &[0x10, 0x20, 0x30, 0x40],
            &[
                (0x10, "proj/memlog.rs", 1, "operator_new"),
                (0x20, "lib/helper.c", 7, "helper"),
                (0x30, "proj/app.c", 42, "doWork"),
                (0x40, "proj/main.c", 3, "main"),
            ],
        )
    }

    /// The next captures return `trace`.
    pub fn set_trace(&self, trace: &[usize]) {
        *self.trace.lock().unwrap() = trace.to_vec();
    }
}

impl Symbolizer for Scripted {
    fn capture(&self, max_depth: usize) -> Vec<usize> {
        self.captures.fetch_add(1, Ordering::Relaxed);
        let trace = self.trace.lock().unwrap();
        trace.iter().copied().take(max_depth).collect()
    }

    fn resolve(&self, address: usize) -> Vec<Frame> {
        self.resolves.fetch_add(1, Ordering::Relaxed);
        self.frames.get(&address).cloned().unwrap_or_default()
    }
}

/// `System`, counting calls.
#[derive(Default)]
pub struct Counting {
    pub allocs:     AtomicUsize,
    pub deallocs:   AtomicUsize,
}

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.deallocs.fetch_add(1, Ordering::Relaxed);
        System.dealloc(ptr, layout)
    }
}

/// Always out of memory.
pub struct Exhausted;

unsafe impl GlobalAlloc for Exhausted {
    unsafe fn alloc(&self, _: Layout) -> *mut u8 {
        std::ptr::null_mut()
    }

    unsafe fn dealloc(&self, _: *mut u8, _: Layout) {}
}

pub fn scoped<A: GlobalAlloc>(raw: A, symbolizer: Scripted) -> Interceptor<A, Scripted> {
    Interceptor::new(raw, symbolizer, Config::scoped(PREFIX))
}

pub fn app_caller() -> CallerId {
    CallerId::from("proj/app.c(42):doWork")
}
