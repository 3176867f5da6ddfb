//! Heap usage logging for unmodified programs:
//!
//! ```text
//! MEM_LOG_PATH=/path/to/sources LD_PRELOAD=libmemlog_preload.so ./program
//! ```
//!
//! The report is printed on stdout at exit, or on demand through
//! `memlog_print_log()`. Programs that close their stdout before exiting
//! (coreutils, for one) need `MEM_LOG_FILE=<path>` to get it. Call sites
//! are only found in objects built with debug info.

mod arena;
mod bootstrap;

#[allow(non_camel_case_types)]
mod ffi;
mod hooks;
mod next;
