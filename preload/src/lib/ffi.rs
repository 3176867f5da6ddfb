use std::ffi::CStr;

// C-reminiscent types.
pub type size_t     = libc::size_t;
pub type void       = libc::c_void;
pub type int        = libc::c_int;

// Linux utils.
pub use libc::{
    RTLD_NEXT,
    EINVAL,
    ENOMEM,
    dlsym,
    dlerror,
    fputs,
    _exit,
    pthread_self,
};

/// What the real `malloc` guarantees for every block.
pub const MIN_ALIGN: usize = std::mem::align_of::<libc::max_align_t>();

// Type aliases for the functions resolved from the next object in line.
pub type CMalloc        = unsafe extern "C" fn(size_t)                              -> *mut void;
pub type CFree          = unsafe extern "C" fn(*mut void);
pub type CCalloc        = unsafe extern "C" fn(nobj: size_t, size: size_t)          -> *mut void;
pub type CRealloc       = unsafe extern "C" fn(p: *mut void, size: size_t)          -> *mut void;
pub type CPosixMemalign = unsafe extern "C" fn( memptr: *mut *mut void,
                                                align:  size_t,
                                                size:   size_t)                     -> int;

/// Identifies the calling thread without allocating.
pub fn current_thread() -> usize {
    // SAFETY: always safe to call.
    unsafe { pthread_self() as usize }
}

/// Prints `msg` and whatever `dlerror` has to say on stderr, then exits
/// with non-zero code. Nothing here allocates.
pub unsafe fn die(msg: &CStr) -> ! {
    use libc_stdhandle::stderr;

    fputs(msg.as_ptr(), stderr());
    let eptr = dlerror();
    if !eptr.is_null() {
        fputs(c": ".as_ptr(), stderr());
        fputs(eptr, stderr());
    }
    fputs(c"\n".as_ptr(), stderr());
    // Exit handlers would allocate.
    _exit(1);
}

/// Writes `code` to the calling thread's `errno`.
pub unsafe fn set_errno(code: int) {
    *libc::__errno_location() = code;
}
