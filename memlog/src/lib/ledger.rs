use std::collections::BTreeMap;
use std::fmt;
use std::hash::BuildHasherDefault;

use ahash::AHasher;
use indexmap::IndexMap;
use thiserror::Error;

/// Identity given to allocations for which no stack frame matched the
/// configured path prefix.
pub const NOT_FOUND: &str = "NOT_FOUND";

/// Identifies a single source code line and symbol, in the form
/// `<file>(<line>):<symbol>`, or [`NOT_FOUND`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallerId(String);

impl CallerId {
    pub fn new(file: &str, line: u32, symbol: &str) -> Self {
        Self(format!("{}({}):{}", file, line, symbol))
    }

    pub fn not_found() -> Self {
        Self(NOT_FOUND.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        self.0 == NOT_FOUND
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A Block records a single allocation, and is dropped on release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub size:   usize,
    pub caller: CallerId,
}

/// How many blocks, and how many bytes in them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counter {
    pub blocks: usize,
    pub bytes:  usize,
}

impl Counter {
    pub const fn new(blocks: usize, bytes: usize) -> Self {
        Self { blocks, bytes }
    }
}

/// Heap usage history of a single caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallerStats {
    /// Currently live.
    pub heap:       Counter,
    /// Released so far. Never decreases.
    pub freed:      Counter,
    /// The `heap` count observed when its byte total was at its highest.
    pub max_alloc:  Counter,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerError {
    /// The raw allocator handed out an address that is still live.
    #[error("duplicate block at {address:#x}")]
    DuplicateBlock { address: usize },
    /// Released an address that was never recorded, or was already released.
    #[error("unknown block at {address:#x}")]
    UnknownBlock { address: usize },
}

type LiveBook = IndexMap<usize, Block, BuildHasherDefault<AHasher>>;

/// Records all currently allocated blocks, and the history of memory usage
/// of all callers. Caller entries are never evicted.
#[derive(Default)]
pub struct Ledger {
    live:   LiveBook,
    stats:  BTreeMap<CallerId, CallerStats>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: usize, size: usize, caller: CallerId) -> Result<(), LedgerError> {
        if self.live.contains_key(&address) {
            return Err(LedgerError::DuplicateBlock { address });
        }
        let usage = self.stats.entry(caller.clone()).or_default();
        usage.heap.blocks += 1;
        usage.heap.bytes += size;
        if usage.heap.bytes > usage.max_alloc.bytes {
            usage.max_alloc = usage.heap;
        }
        self.live.insert(address, Block { size, caller });

        Ok(())
    }

    pub fn remove(&mut self, address: usize) -> Result<Block, LedgerError> {
        let block = self.live
            .swap_remove(&address)
            .ok_or(LedgerError::UnknownBlock { address })?;
        // Every live block's caller has an entry.
        if let Some(usage) = self.stats.get_mut(&block.caller) {
            usage.heap.blocks -= 1;
            usage.heap.bytes -= block.size;
            usage.freed.blocks += 1;
            usage.freed.bytes += block.size;
        }

        Ok(block)
    }

    /// All callers seen so far, in ascending order.
    pub fn stats(&self) -> impl Iterator<Item = (&CallerId, &CallerStats)> {
        self.stats.iter()
    }

    pub fn caller(&self, id: &CallerId) -> Option<&CallerStats> {
        self.stats.get(id)
    }

    pub fn callers(&self) -> usize {
        self.stats.len()
    }

    pub fn block(&self, address: usize) -> Option<&Block> {
        self.live.get(&address)
    }

    pub fn live_blocks(&self) -> usize {
        self.live.len()
    }

    pub fn live_bytes(&self) -> usize {
        self.live
            .values()
            .map(|b| b.size)
            .sum()
    }
}
