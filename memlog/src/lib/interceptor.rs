use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::UnsafeCell;
use std::fmt;
use std::io::{self, Write};
use std::ptr::{self, NonNull};

use thiserror::Error;

use crate::attribute::{BacktraceSymbolizer, CallSiteAttributor, Symbolizer};
use crate::config::{Config, Violation};
use crate::guard::LogSwitch;
use crate::ledger::{CallerId, Ledger, LedgerError};
use crate::process::{self, ProcessLog};
use crate::report;

/// The raw allocator could not satisfy a request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("raw allocator failed to provide {size} bytes aligned to {align}")]
pub struct AllocationFailure {
    pub size:   usize,
    pub align:  usize,
}

impl AllocationFailure {
    fn of(layout: Layout) -> Self {
        Self { size: layout.size(), align: layout.align() }
    }
}

/// Everything the interceptor knows, built on first use.
struct Book {
    ledger:     Ledger,
    attributor: CallSiteAttributor,
    max_depth:  usize,
    violation:  Violation,
}

impl Book {
    fn violated(&self, e: LedgerError) {
        match self.violation {
            Violation::Ignore   => {},
            Violation::Warn     => diagnose(format_args!("memlog: {}", e)),
            Violation::Abort    => {
                diagnose(format_args!("memlog: {}, aborting", e));
                std::process::abort();
            }
        }
    }
}

/// Reports a problem of the logger itself: through `tracing` if someone
/// listens, else straight to stderr.
pub(crate) fn diagnose(args: fmt::Arguments<'_>) {
    if tracing::dispatcher::has_been_set() {
        tracing::warn!("{}", args);
    } else {
        let _ = writeln!(io::stderr(), "{}", args);
    }
}

/// Every allocation and release passes through here. Requests are served by
/// the raw allocator `A`; while logging is on, each one is also attributed
/// to its call site through `S` and recorded in the ledger.
///
/// Bookkeeping is single-threaded: the first thread that allocates through
/// an interceptor becomes its logging thread, and requests from any other
/// thread are forwarded to `A` unrecorded.
pub struct Interceptor<A, S> {
    raw:        A,
    symbolizer: S,
    config:     Config,
    switch:     LogSwitch,
    // Allocated on the heap on first use and never destroyed, since we can't
    // guarantee lifetime beyond the last call to alloc/dealloc.
    book:       UnsafeCell<Option<NonNull<Book>>>,
}

// SAFETY: `switch` and `book` are only ever touched by the logging thread,
// see `LogSwitch`.
unsafe impl<A: Sync, S: Sync> Sync for Interceptor<A, S> {}

/// The process-wide logger: `#[global_allocator] static GLOBAL: MemLog =
/// MemLog::system();`.
pub type MemLog = Interceptor<System, BacktraceSymbolizer>;

impl MemLog {
    pub const fn system() -> Self {
        Self::new(System, BacktraceSymbolizer::new(), Config::builtin())
    }
}

impl<A, S> Interceptor<A, S> {
    pub const fn new(raw: A, symbolizer: S, config: Config) -> Self {
        Self {
            raw,
            symbolizer,
            config,
            switch: LogSwitch::new(),
            book:   UnsafeCell::new(None),
        }
    }

    pub fn raw(&self) -> &A {
        &self.raw
    }

    pub fn symbolizer(&self) -> &S {
        &self.symbolizer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// True iff the calling thread is the logging thread and is not in the
    /// middle of bookkeeping.
    pub fn is_logging(&self) -> bool {
        self.switch.is_enabled()
    }
}

impl<A: GlobalAlloc, S: Symbolizer> Interceptor<A, S> {
    /// # Safety
    ///
    /// Same contract as [`GlobalAlloc::alloc`].
    pub unsafe fn acquire(&self, layout: Layout) -> Result<NonNull<u8>, AllocationFailure> {
        let ptr = NonNull::new(self.raw.alloc(layout)).ok_or(AllocationFailure::of(layout))?;
        self.record_acquire(ptr, layout.size());

        Ok(ptr)
    }

    /// # Safety
    ///
    /// Same contract as [`GlobalAlloc::alloc_zeroed`].
    pub unsafe fn acquire_zeroed(&self, layout: Layout) -> Result<NonNull<u8>, AllocationFailure> {
        let ptr = NonNull::new(self.raw.alloc_zeroed(layout)).ok_or(AllocationFailure::of(layout))?;
        self.record_acquire(ptr, layout.size());

        Ok(ptr)
    }

    /// The block is handed back to the raw allocator even if the ledger has
    /// never heard of it.
    ///
    /// # Safety
    ///
    /// Same contract as [`GlobalAlloc::dealloc`].
    pub unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        if let Some(_off) = self.switch.enter() {
            let book = self.book();
            if let Err(e) = book.ledger.remove(ptr.as_ptr() as usize) {
                book.violated(e);
            }
        }
        self.raw.dealloc(ptr.as_ptr(), layout);
    }

    /// Resizes a block. On success, the old block counts as released and
    /// the new one as acquired by the caller of this reallocation. On
    /// failure the old block stays live and nothing is recorded.
    ///
    /// # Safety
    ///
    /// Same contract as [`GlobalAlloc::realloc`].
    pub unsafe fn reacquire(&self, ptr: NonNull<u8>, layout: Layout, new_size: usize) -> Result<NonNull<u8>, AllocationFailure> {
        let moved = NonNull::new(self.raw.realloc(ptr.as_ptr(), layout, new_size))
            .ok_or(AllocationFailure { size: new_size, align: layout.align() })?;
        if let Some(_off) = self.switch.enter() {
            let book = self.book();
            if let Err(e) = book.ledger.remove(ptr.as_ptr() as usize) {
                book.violated(e);
            }
            let caller = self.attribute(book);
            if let Err(e) = book.ledger.insert(moved.as_ptr() as usize, new_size, caller) {
                book.violated(e);
            }
        }

        Ok(moved)
    }

    /// Print the current heap usage log to the given stream.
    pub fn print_log<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        // Temporarily disable logging while accessing/creating the ledger.
        let Some(_off) = self.switch.suspend() else {
            return Err(io::Error::new(io::ErrorKind::Other, "memlog: ledger belongs to another thread"));
        };
        // SAFETY: logging is off for the logging thread.
        let book = unsafe { self.book() };

        report::render(&book.ledger, out)
    }

    /// Runs `f` over the ledger with logging disabled. `None` if called from
    /// a thread other than the logging thread.
    pub fn with_ledger<R, F>(&self, f: F) -> Option<R>
    where F: FnOnce(&Ledger) -> R {
        let _off = self.switch.suspend()?;
        // SAFETY: logging is off for the logging thread.
        let book = unsafe { self.book() };

        Some(f(&book.ledger))
    }

    #[inline(always)]
    fn record_acquire(&self, ptr: NonNull<u8>, size: usize) {
        let Some(_off) = self.switch.enter() else {
            return;
        };
        // SAFETY: logging is off for the logging thread.
        let book = unsafe { self.book() };
        let caller = self.attribute(book);
        if let Err(e) = book.ledger.insert(ptr.as_ptr() as usize, size, caller) {
            book.violated(e);
        }
    }

    fn attribute(&self, book: &mut Book) -> CallerId {
        let trace = self.symbolizer.capture(book.max_depth);

        book.attributor.attribute(&trace, &self.symbolizer)
    }

    /// # Safety
    ///
    /// Only the logging thread may call this, with logging disabled, and
    /// must not hold on to the result across another call.
    #[allow(clippy::mut_from_ref)]
    unsafe fn book(&self) -> &mut Book {
        let book = match *self.book.get() {
            Some(book)  => book,
            None        => {
                let book = self.open_book();
                *self.book.get() = Some(book);
                book
            }
        };

        &mut *book.as_ptr()
    }

    #[cold]
    fn open_book(&self) -> NonNull<Book> {
        let (config, errors) = self.config.clone().resolve();
        for e in &errors {
            diagnose(format_args!("memlog: {}, keeping the default", e));
        }
        if config.process_wide {
            // SAFETY: process-wide interceptors live in a `static`.
            let log = unsafe {
                ProcessLog::new(
                    self as *const Self as *const (),
                    print_erased::<A, S>,
                    config.report_at_exit,
                    config.report_file.clone(),
                )
            };
            process::install(log);
        }
        let attributor = CallSiteAttributor::new(config.path_prefix.as_ref(), config.skip_frames)
            .with_internal(config.internal_symbols);
        tracing::debug!(prefix = attributor.path_prefix(), depth = config.max_depth, "ledger opened");
        let book = Box::new(Book {
            ledger:     Ledger::new(),
            attributor,
            max_depth:  config.max_depth,
            violation:  config.violation,
        });

        NonNull::from(Box::leak(book))
    }
}

/// # Safety
///
/// `log` must point to a live `Interceptor<A, S>`.
unsafe fn print_erased<A: GlobalAlloc, S: Symbolizer>(log: *const (), out: &mut dyn Write) -> io::Result<()> {
    let log = &*(log as *const Interceptor<A, S>);
    log.print_log(out)
}

unsafe impl<A: GlobalAlloc, S: Symbolizer> GlobalAlloc for Interceptor<A, S> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.acquire(layout).map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        self.acquire_zeroed(layout).map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            self.release(ptr, layout);
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        match NonNull::new(ptr) {
            Some(ptr)   => self.reacquire(ptr, layout, new_size).map_or(ptr::null_mut(), NonNull::as_ptr),
            None        => ptr::null_mut(),
        }
    }
}
