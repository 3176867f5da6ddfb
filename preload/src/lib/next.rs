use std::alloc::{GlobalAlloc, Layout};
use std::cell::UnsafeCell;
use std::ffi::CStr;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::bootstrap;
use crate::ffi::*;

/// The allocator functions of the next object in line, usually libc.
pub struct Real {
    malloc:         CMalloc,
    free:           CFree,
    calloc:         CCalloc,
    realloc:        CRealloc,
    posix_memalign: CPosixMemalign,
}

impl Real {
    unsafe fn resolve() -> Self {
        Self {
            malloc:         std::mem::transmute::<*mut void, CMalloc>(lookup(c"malloc")),
            free:           std::mem::transmute::<*mut void, CFree>(lookup(c"free")),
            calloc:         std::mem::transmute::<*mut void, CCalloc>(lookup(c"calloc")),
            realloc:        std::mem::transmute::<*mut void, CRealloc>(lookup(c"realloc")),
            posix_memalign: std::mem::transmute::<*mut void, CPosixMemalign>(lookup(c"posix_memalign")),
        }
    }
}

unsafe fn lookup(name: &CStr) -> *mut void {
    // Clear any stale error first.
    dlerror();
    let address = dlsym(RTLD_NEXT, name.as_ptr());
    if address.is_null() {
        die(c"memlog: could not resolve the real allocator");
    }

    address
}

const UNRESOLVED: u8    = 0;
const RESOLVING: u8     = 1;
const RESOLVED: u8      = 2;

static STATE: AtomicU8 = AtomicU8::new(UNRESOLVED);
// The thread running `dlsym`, whose requests meanwhile go to the arena.
static RESOLVER: AtomicUsize = AtomicUsize::new(0);

struct RealCell(UnsafeCell<MaybeUninit<Real>>);

// SAFETY: written once, before `STATE` turns `RESOLVED`; read only after.
unsafe impl Sync for RealCell {}

static REAL: RealCell = RealCell(UnsafeCell::new(MaybeUninit::uninit()));

/// The real allocator, looked up on first use. `None` while the calling
/// thread is the one looking it up. Other threads wait.
pub fn real() -> Option<&'static Real> {
    loop {
        match STATE.load(Ordering::Acquire) {
            RESOLVED    => {
                // SAFETY: see `RealCell`.
                return Some(unsafe { (*REAL.0.get()).assume_init_ref() });
            },
            UNRESOLVED  => {
                if STATE.compare_exchange(UNRESOLVED, RESOLVING, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                    RESOLVER.store(current_thread(), Ordering::Release);
                    // SAFETY: only this thread ever gets here.
                    unsafe {
                        (*REAL.0.get()).write(Real::resolve());
                    }
                    STATE.store(RESOLVED, Ordering::Release);
                }
            },
            _           => {
                if RESOLVER.load(Ordering::Acquire) == current_thread() {
                    return None;
                }
                std::hint::spin_loop();
            }
        }
    }
}

/// True once the real allocator is usable from this thread.
pub fn ready() -> bool {
    real().is_some()
}

/// Raw allocator handing requests over to the next `malloc` implementation
/// in line, or to the bootstrap arena while that is being looked up.
#[derive(Clone, Copy, Debug, Default)]
pub struct NextAlloc;

unsafe impl GlobalAlloc for NextAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let Some(real) = real() else {
            return bootstrap::alloc(layout.size(), layout.align());
        };
        if layout.align() <= MIN_ALIGN {
            return (real.malloc)(layout.size()) as *mut u8;
        }
        let mut out = ptr::null_mut();
        match (real.posix_memalign)(&mut out, layout.align(), layout.size()) {
            0   => out as *mut u8,
            _   => ptr::null_mut(),
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        match real() {
            Some(real) if layout.align() <= MIN_ALIGN   => (real.calloc)(1, layout.size()) as *mut u8,
            Some(_)                                     => {
                let ptr = self.alloc(layout);
                if !ptr.is_null() {
                    ptr.write_bytes(0, layout.size());
                }
                ptr
            },
            // Arena memory is never reused, thus still zero.
            None                                        => bootstrap::alloc(layout.size(), layout.align()),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if bootstrap::owns(ptr) {
            return;
        }
        if let Some(real) = real() {
            (real.free)(ptr as *mut void);
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let old_size = if bootstrap::owns(ptr) {
            bootstrap::size_of_block(ptr)
        } else {
            match real() {
                Some(real) if layout.align() <= MIN_ALIGN   => {
                    return (real.realloc)(ptr as *mut void, new_size) as *mut u8;
                },
                _                                           => layout.size(),
            }
        };
        let moved = self.alloc(Layout::from_size_align_unchecked(new_size, layout.align()));
        if !moved.is_null() {
            ptr::copy_nonoverlapping(ptr, moved, old_size.min(new_size));
            self.dealloc(ptr, layout);
        }

        moved
    }
}
