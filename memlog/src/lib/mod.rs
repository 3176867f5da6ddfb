//! Heap usage logger, for debugging purposes only.
//!
//! Every allocation going through an [`Interceptor`] is tagged with a string
//! identifying the source file, line and symbol of the nearest caller in the
//! stack trace whose file name has a given case-sensitive prefix (see
//! [`config::BUILD_PATH_PREFIX`]). Per caller, the ledger keeps the live,
//! released and peak block and byte counts.
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: memlog::MemLog = memlog::MemLog::system();
//! ```
//!
//! The log is printed with [`print_log`], and automatically on normal exit.
//! Bookkeeping is not thread-safe: only the first thread to allocate is
//! logged. The ledger intentionally leaks.

/// C-side helpers: thread identity and exit hooks. Neither allocates.
#[allow(non_camel_case_types)]
mod ffi;

/// The switch that keeps bookkeeping from logging its own allocations.
mod guard;

pub mod attribute;
pub mod config;
pub mod interceptor;
pub mod ledger;
pub mod process;
pub mod report;

pub use attribute::{BacktraceSymbolizer, CallSiteAttributor, Frame, Symbolizer};
pub use config::{Config, ConfigError, Violation};
pub use interceptor::{AllocationFailure, Interceptor, MemLog};
pub use ledger::{Block, CallerId, CallerStats, Counter, Ledger, LedgerError, NOT_FOUND};
pub use process::print_log;
