//! The process log: the one interceptor whose report is reachable without
//! a handle to it, and printed automatically at exit.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use once_cell::sync::OnceCell;

use crate::ffi::{register_at_exit, stdout_is_open};

/// Type-erased printer of a `'static` interceptor.
pub(crate) struct ProcessLog {
    log:            *const (),
    print:          unsafe fn(*const (), &mut dyn Write) -> io::Result<()>,
    at_exit:        bool,
    report_file:    Option<PathBuf>,
}

// SAFETY: `log` points to an interceptor in a `static`, which is itself
// `Sync`; the printer only touches it through its own guard.
unsafe impl Send for ProcessLog {}
unsafe impl Sync for ProcessLog {}

impl ProcessLog {
    /// # Safety
    ///
    /// `log` must stay valid for the rest of the process, and `print` must
    /// accept it.
    pub(crate) unsafe fn new(
        log:            *const (),
        print:          unsafe fn(*const (), &mut dyn Write) -> io::Result<()>,
        at_exit:        bool,
        report_file:    Option<PathBuf>,
    ) -> Self {
        Self { log, print, at_exit, report_file }
    }

    fn print(&self, out: &mut dyn Write) -> io::Result<()> {
        // SAFETY: upheld by `new`'s contract.
        unsafe { (self.print)(self.log, out) }
    }
}

static PROCESS_LOG: OnceCell<ProcessLog> = OnceCell::new();

/// Installs the process log. Only the first call has any effect; returns
/// whether this one did.
pub(crate) fn install(log: ProcessLog) -> bool {
    let at_exit = log.at_exit;
    if PROCESS_LOG.set(log).is_err() {
        return false;
    }
    if at_exit && !register_at_exit(print_at_exit) {
        crate::interceptor::diagnose(format_args!("memlog: could not register the exit report"));
    }
    tracing::debug!(at_exit, "process log installed");

    true
}

/// Print the current heap usage log of the process-wide logger to the
/// given stream. Does nothing if no allocation went through it yet.
pub fn print_log<W: Write>(out: &mut W) -> io::Result<()> {
    match PROCESS_LOG.get() {
        Some(log)   => log.print(out),
        None        => Ok(()),
    }
}

// Make a best effort to automate printing the "final" heap usage log,
// although later teardown may still allocate and release.
extern "C" fn print_at_exit() {
    let Some(log) = PROCESS_LOG.get() else {
        return;
    };
    let res = match &log.report_file {
        Some(path)  => File::create(path).and_then(|mut f| {
            log.print(&mut f)?;
            f.flush()
        }),
        None if !stdout_is_open()   => {
            crate::interceptor::diagnose(format_args!(
                "memlog: stdout is closed, set MEM_LOG_FILE to get the exit report"
            ));
            return;
        },
        None        => {
            let mut out = io::stdout().lock();
            log.print(&mut out).and_then(|_| out.flush())
        }
    };
    if let Err(e) = res {
        crate::interceptor::diagnose(format_args!("memlog: exit report failed: {}", e));
    }
}
