use std::alloc::{GlobalAlloc, Layout};
use std::io::{self, Write};
use std::ptr;

use memlog::{BacktraceSymbolizer, Config, Interceptor};

use crate::bootstrap;
use crate::ffi::*;
use crate::next::{self, NextAlloc};

/// Besides the logger's own namespaces, the interposed C entry points and
/// this library's internals never count as call sites.
const PRELOAD_INTERNAL: &[&str] = &[
    "memlog::",
    "backtrace::",
    "memlog_preload::",
    "malloc",
    "free",
    "calloc",
    "realloc",
    "aligned_alloc",
    "memalign",
    "posix_memalign",
];

static MEMLOG: Interceptor<NextAlloc, BacktraceSymbolizer> = Interceptor::new(
    NextAlloc,
    BacktraceSymbolizer::new(),
    Config::builtin_for(PRELOAD_INTERNAL),
);

fn layout(size: size_t, align: size_t) -> Option<Layout> {
    Layout::from_size_align(size, align.max(MIN_ALIGN)).ok()
}

// C callers never say how big the block they hand back is. The ledger
// remembers, and the real allocator doesn't care.
fn unsized_layout() -> Layout {
    Layout::new::<libc::max_align_t>()
}

unsafe fn aligned(alignment: size_t, size: size_t) -> *mut void {
    let Some(layout) = layout(size, alignment) else {
        set_errno(EINVAL);
        return ptr::null_mut();
    };

    allocate(layout, false)
}

unsafe fn allocate(layout: Layout, zeroed: bool) -> *mut void {
    // Lookups of the real allocator must not be logged.
    let ptr = match (next::ready(), zeroed) {
        (true, false)   => MEMLOG.alloc(layout),
        (true, true)    => MEMLOG.alloc_zeroed(layout),
        (false, false)  => NextAlloc.alloc(layout),
        (false, true)   => NextAlloc.alloc_zeroed(layout),
    };
    if ptr.is_null() {
        set_errno(ENOMEM);
    }

    ptr as *mut void
}

#[no_mangle]
/// Every dynamic memory allocation function of the C library is
/// interposed, and served by the next implementation in line (usually
/// libc's) through the logger.
///
/// Requests made while the logger does its own bookkeeping, or from any
/// thread but the first one to allocate, are served without logging.
unsafe extern "C"
fn malloc(size: size_t) -> *mut void {
    match layout(size, MIN_ALIGN) {
        Some(layout)    => allocate(layout, false),
        None            => {
            set_errno(ENOMEM);
            ptr::null_mut()
        }
    }
}

#[no_mangle]
unsafe extern "C"
fn free(p: *mut void) {
    if p.is_null() || bootstrap::owns(p as *const u8) {
        return;
    }
    if next::ready() {
        MEMLOG.dealloc(p as *mut u8, unsized_layout());
    } else {
        NextAlloc.dealloc(p as *mut u8, unsized_layout());
    }
}

#[no_mangle]
unsafe extern "C"
fn calloc(nobj: size_t, size: size_t) -> *mut void {
    match nobj.checked_mul(size).and_then(|total| layout(total, MIN_ALIGN)) {
        Some(layout)    => allocate(layout, true),
        None            => {
            set_errno(ENOMEM);
            ptr::null_mut()
        }
    }
}

#[no_mangle]
unsafe extern "C"
fn realloc(p: *mut void, size: size_t)  -> *mut void {
    if p.is_null() {
        return malloc(size);
    }
    if size == 0 {
        free(p);
        return ptr::null_mut();
    }
    if bootstrap::owns(p as *const u8) {
        // Out of the arena, into memory the ledger knows about.
        let moved = malloc(size);
        if !moved.is_null() {
            let kept = bootstrap::size_of_block(p as *const u8).min(size);
            ptr::copy_nonoverlapping(p as *const u8, moved as *mut u8, kept);
        }
        return moved;
    }
    let moved = if next::ready() {
        MEMLOG.realloc(p as *mut u8, unsized_layout(), size)
    } else {
        NextAlloc.realloc(p as *mut u8, unsized_layout(), size)
    };
    if moved.is_null() {
        set_errno(ENOMEM);
    }

    moved as *mut void
}

#[no_mangle]
unsafe extern "C"
fn aligned_alloc(alignment: size_t, size: size_t)  -> *mut void {
    aligned(alignment, size)
}

#[no_mangle]
unsafe extern "C"
fn memalign(alignment: size_t, size: size_t)  -> *mut void {
    aligned(alignment, size)
}

#[no_mangle]
unsafe extern "C"
fn posix_memalign(memptr: *mut *mut void, alignment: size_t, size: size_t)  -> int {
    if alignment % std::mem::size_of::<*mut void>() != 0 {
        return EINVAL;
    }
    let Some(layout) = layout(size, alignment) else {
        return EINVAL;
    };
    let ptr = allocate(layout, false);
    if ptr.is_null() {
        return ENOMEM;
    }
    *memptr = ptr;

    0
}

#[no_mangle]
/// Prints the current heap usage log on stdout. Returns 0 on success, -1 if
/// called from a thread other than the logging one or if writing failed.
pub extern "C"
fn memlog_print_log() -> int {
    let mut out = io::stdout().lock();
    match MEMLOG.print_log(&mut out).and_then(|_| out.flush()) {
        Ok(_)   => 0,
        Err(e)  => {
            eprintln!("memlog: {}", e);
            -1
        }
    }
}
