use std::collections::HashMap;
use std::ffi::c_void;
use std::hash::BuildHasherDefault;

use ahash::AHasher;

use crate::ledger::CallerId;

/// Frames captured per allocation unless configured otherwise.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Symbols of the logger's own machinery. An entry ending in `::` names a
/// namespace, anything else must match a symbol exactly.
///
/// The `__rust_*` and `__rg_*` entries are the shims rustc generates for a
/// `#[global_allocator]`. Their debug info points at the `static`
/// declaration, i.e. into the user's own sources.
pub const INTERNAL_SYMBOLS: &[&str] = &[
    "memlog::",
    "backtrace::",
    "__rustc::",
    "__rust_alloc",
    "__rust_alloc_zeroed",
    "__rust_realloc",
    "__rust_dealloc",
    "__rg_alloc",
    "__rg_alloc_zeroed",
    "__rg_realloc",
    "__rg_dealloc",
];

/// A return address resolved to source code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub file:   String,
    pub line:   u32,
    pub symbol: String,
}

/// Platform stack walking and symbol lookup.
///
/// Both operations are invoked with logging disabled, so implementations
/// are free to allocate.
pub trait Symbolizer {
    /// Return addresses of the calling thread, innermost first, at most
    /// `max_depth` of them.
    fn capture(&self, max_depth: usize) -> Vec<usize>;

    /// Source locations of `address`, innermost inlined frame first. A
    /// location missing any of file, line or symbol name is left out.
    fn resolve(&self, address: usize) -> Vec<Frame>;
}

/// [`Symbolizer`] backed by the `backtrace` crate, i.e. the platform
/// unwinder plus the debug info of the loaded objects.
#[derive(Clone, Copy, Debug, Default)]
pub struct BacktraceSymbolizer;

impl BacktraceSymbolizer {
    pub const fn new() -> Self {
        Self
    }
}

impl Symbolizer for BacktraceSymbolizer {
    fn capture(&self, max_depth: usize) -> Vec<usize> {
        let mut trace = Vec::with_capacity(max_depth);
        backtrace::trace(|frame| {
            if trace.len() >= max_depth {
                return false;
            }
            trace.push(frame.ip() as usize);
            true
        });

        trace
    }

    fn resolve(&self, address: usize) -> Vec<Frame> {
        let mut frames = vec![];
        // One symbol per inlined call, innermost first.
        backtrace::resolve(address as *mut c_void, |symbol| {
            if let (Some(file), Some(line), Some(name)) = (symbol.filename(), symbol.lineno(), symbol.name()) {
                frames.push(Frame {
                    file:   file.to_string_lossy().into_owned(),
                    line,
                    // The alternate form drops the trailing `::h<hash>`.
                    symbol: format!("{:#}", name),
                });
            }
        });

        frames
    }
}

type ResolvedBook = HashMap<usize, Vec<Frame>, BuildHasherDefault<AHasher>>;

/// Maps a captured trace to the nearest caller whose source file lives
/// under a given path prefix.
///
/// Resolutions are memoized per address for the life of the attributor,
/// which assumes code is never unloaded.
pub struct CallSiteAttributor {
    path_prefix:    String,
    skip:           usize,
    internal:       &'static [&'static str],
    resolved:       ResolvedBook,
}

impl CallSiteAttributor {
    /// The first `skip` frames of every trace are never considered.
    pub fn new(path_prefix: impl Into<String>, skip: usize) -> Self {
        Self {
            path_prefix:    path_prefix.into(),
            skip,
            internal:       INTERNAL_SYMBOLS,
            resolved:       ResolvedBook::default(),
        }
    }

    pub fn with_internal(mut self, internal: &'static [&'static str]) -> Self {
        self.internal = internal;
        self
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    /// Case-sensitive prefix match on the raw path bytes.
    pub fn accepts(&self, file: &str) -> bool {
        file.starts_with(self.path_prefix.as_str())
    }

    /// Whether `symbol` belongs to the logger rather than to its caller.
    pub fn is_internal(&self, symbol: &str) -> bool {
        self.internal.iter().any(|&entry| {
            if entry.ends_with("::") {
                symbol.starts_with(entry)
                    || (symbol.starts_with('<') && symbol[1..].starts_with(entry))
            } else {
                symbol == entry
            }
        })
    }

    /// Picks the frame nearest to the original call site: the first one
    /// past the logger's own frames whose file matches the prefix.
    pub fn attribute<S: Symbolizer + ?Sized>(&mut self, trace: &[usize], symbolizer: &S) -> CallerId {
        let trace = trace.get(self.skip..).unwrap_or(&[]);
        for &address in trace {
            self.resolved
                .entry(address)
                .or_insert_with(|| symbolizer.resolve(address));
        }
        // Inlined frames are real call sites too.
        let frames: Vec<&Frame> = trace.iter()
            .filter_map(|address| self.resolved.get(address))
            .flatten()
            .collect();
        // Anything nearer than the logger's outermost frame is its own doing.
        let start = frames.iter()
            .rposition(|frame| self.is_internal(&frame.symbol))
            .map_or(0, |i| i + 1);

        frames[start..].iter()
            .find(|frame| self.accepts(&frame.file))
            .map(|frame| CallerId::new(&frame.file, frame.line, &frame.symbol))
            .unwrap_or_else(CallerId::not_found)
    }
}
