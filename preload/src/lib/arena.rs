//! Bump allocation over a fixed buffer. Blocks are never reused and carry
//! their size in a header right in front of them.

use std::cell::UnsafeCell;
use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Smallest alignment handed out, and room for the header.
pub const HEADER: usize = 16;

/// Offset of a block of `size` bytes placed after `used` bytes of a buffer
/// starting at `base`, and the buffer's fill afterwards. `None` if it does
/// not fit in `capacity`.
pub fn place(base: usize, used: usize, size: usize, align: usize, capacity: usize) -> Option<(usize, usize)> {
    let start = base.checked_add(used + HEADER)?.checked_next_multiple_of(align)? - base;
    let end = start.checked_add(size)?;

    (end <= capacity).then_some((start, end))
}

#[repr(C, align(16))]
pub struct Arena<const N: usize> {
    bytes:  UnsafeCell<[u8; N]>,
    used:   AtomicUsize,
}

// SAFETY: every byte range is handed out once, see `used`.
unsafe impl<const N: usize> Sync for Arena<N> {}

impl<const N: usize> Arena<N> {
    pub const fn new() -> Self {
        Self {
            bytes:  UnsafeCell::new([0; N]),
            used:   AtomicUsize::new(0),
        }
    }

    fn base(&self) -> usize {
        self.bytes.get() as usize
    }

    /// A zeroed block, or null once the arena is exhausted. `align` must be
    /// a power of two.
    pub fn alloc(&self, size: usize, align: usize) -> *mut u8 {
        let align = align.max(HEADER);
        let base = self.base();
        let claimed = self.used.fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
            place(base, used, size, align, N).map(|(_, end)| end)
        });
        let Ok(used) = claimed else {
            return ptr::null_mut();
        };
        let Some((start, _)) = place(base, used, size, align, N) else {
            return ptr::null_mut();
        };
        let block = (base + start) as *mut u8;
        // SAFETY: the header lies within the range claimed above.
        unsafe { block.sub(size_of::<usize>()).cast::<usize>().write(size) };

        block
    }

    pub fn owns(&self, ptr: *const u8) -> bool {
        (self.base()..self.base() + N).contains(&(ptr as usize))
    }

    /// # Safety
    ///
    /// `ptr` must have been returned by [`Arena::alloc`] of this arena.
    pub unsafe fn size_of_block(&self, ptr: *const u8) -> usize {
        ptr.sub(size_of::<usize>()).cast::<usize>().read()
    }
}
