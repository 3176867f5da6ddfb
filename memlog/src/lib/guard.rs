use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::ffi::current_thread;

const NO_OWNER: usize = 0;

/// The logger will at times need to allocate its own memory dynamically
/// (trace buffers, symbol names, map nodes). Those requests must not be
/// logged, else every bookkeeping step would recurse into itself. The
/// switch below is flipped off for the whole duration of a bookkeeping
/// sequence and back on once it is complete.
///
/// Only one thread ever does bookkeeping: the first one that gets here
/// claims the switch, and every other thread is told to bypass logging
/// entirely. The flag is thus never touched concurrently.
pub struct LogSwitch {
    enabled:    Cell<bool>,
    owner:      AtomicUsize,
}

impl LogSwitch {
    pub const fn new() -> Self {
        Self {
            enabled:    Cell::new(true),
            owner:      AtomicUsize::new(NO_OWNER),
        }
    }

    /// Checks whether the calling thread is the logging thread, claiming
    /// the switch if nobody has yet.
    #[inline(always)]
    fn owned_by_caller(&self) -> bool {
        let tid = current_thread();
        match self.owner.compare_exchange(NO_OWNER, tid, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_)           => true,
            Err(current)    => current == tid,
        }
    }

    /// Turns logging off if it is currently on, returning the bracket that
    /// turns it back on. `None` means the request must not be logged.
    #[inline(always)]
    pub fn enter(&self) -> Option<Suspended<'_>> {
        if !self.owned_by_caller() || !self.enabled.get() {
            return None;
        }
        self.enabled.set(false);

        Some(Suspended { switch: self, restore: true })
    }

    /// Turns logging off regardless of its state; the previous state is
    /// restored when the bracket is dropped. Used by readers of the ledger,
    /// which may run from within a bookkeeping sequence.
    pub fn suspend(&self) -> Option<Suspended<'_>> {
        if !self.owned_by_caller() {
            return None;
        }
        let restore = self.enabled.replace(false);

        Some(Suspended { switch: self, restore })
    }

    /// True iff the calling thread owns the switch and logging is on.
    pub fn is_enabled(&self) -> bool {
        self.owner.load(Ordering::Acquire) == current_thread() && self.enabled.get()
    }
}

impl Default for LogSwitch {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging stays disabled for as long as this lives.
pub struct Suspended<'a> {
    switch:     &'a LogSwitch,
    restore:    bool,
}

impl Drop for Suspended<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.switch.enabled.set(self.restore);
    }
}
