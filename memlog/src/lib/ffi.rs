// C-reminiscent types.
pub type int        = libc::c_int;

// Linux utils.
pub use libc::{
    atexit,
    fcntl,
    pthread_self,
    F_GETFD,
    STDOUT_FILENO,
};

/// Handler type accepted by `atexit`.
pub type CExitHandler = extern "C" fn();

/// Identifies the calling thread without touching the heap, unlike
/// `std::thread::current`. Zero is reserved for "no thread".
#[inline(always)]
pub fn current_thread() -> usize {
    // SAFETY: `pthread_self` has no preconditions and never fails.
    let tid = unsafe { pthread_self() } as usize;
    if tid == 0 { usize::MAX } else { tid }
}

/// Registers `handler` to run when the process exits normally.
pub fn register_at_exit(handler: CExitHandler) -> bool {
    // SAFETY: `handler` is a plain `extern "C"` function with no captured state.
    let res: int = unsafe { atexit(handler) };

    res == 0
}

/// False if the program already closed its stdout descriptor.
pub fn stdout_is_open() -> bool {
    // SAFETY: `F_GETFD` only queries the descriptor table.
    let res: int = unsafe { fcntl(STDOUT_FILENO, F_GETFD) };

    res != -1
}
