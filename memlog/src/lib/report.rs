use std::io::{self, Write};

use crate::ledger::{CallerStats, Ledger};

/// Width of every numeric column.
pub const COLUMN_WIDTH: usize = 16;

const LABEL_WIDTH: usize = 8;

/// Writes the heap usage table: one header, then one entry per caller in
/// ascending order.
pub fn render<W: Write + ?Sized>(ledger: &Ledger, out: &mut W) -> io::Result<()> {
    let w = COLUMN_WIDTH;
    writeln!(out, "{:>lw$} {:>w$} {:>w$}", "Heap", "Freed", "Max. Alloc.", lw = LABEL_WIDTH + w)?;
    writeln!(out, "{}", "=".repeat(LABEL_WIDTH + 3 * w + 2))?;
    for (caller, usage) in ledger.stats() {
        writeln!(out, "Caller: {}", caller)?;
        write_rows(out, usage)?;
    }

    Ok(())
}

fn write_rows<W: Write + ?Sized>(out: &mut W, usage: &CallerStats) -> io::Result<()> {
    let w = COLUMN_WIDTH;
    writeln!(out, "Blocks: {:>w$} {:>w$} {:>w$}", usage.heap.blocks, usage.freed.blocks, usage.max_alloc.blocks)?;
    writeln!(out, "Bytes:  {:>w$} {:>w$} {:>w$}", usage.heap.bytes, usage.freed.bytes, usage.max_alloc.bytes)
}
