//! `dlsym` allocates behind the scenes, so while the real allocator is
//! being looked up, requests are served from a static arena instead.
//! Arena blocks are never reused: freeing one is a no-op.

use crate::arena::Arena;

static ARENA: Arena<{ 64 * 1024 }> = Arena::new();

/// A zeroed block, or null once the arena is exhausted.
pub fn alloc(size: usize, align: usize) -> *mut u8 {
    ARENA.alloc(size, align)
}

pub fn owns(ptr: *const u8) -> bool {
    ARENA.owns(ptr)
}

/// # Safety
///
/// `ptr` must have been returned by [`alloc`].
pub unsafe fn size_of_block(ptr: *const u8) -> usize {
    ARENA.size_of_block(ptr)
}
