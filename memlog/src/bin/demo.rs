use std::collections::HashMap;
use std::io::{self, Write};

use clap::Parser;
use memlog::MemLog;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MemLog = MemLog::system();

/// Allocates in a few recognizable patterns, then prints the heap usage
/// log. Build or run with `MEM_LOG_PATH` set to this repository's path to
/// see the demo's own call sites.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Rounds of each workload
    #[arg(short, long, default_value_t = 4)]
    rounds: usize,

    /// Bytes per buffer
    #[arg(short, long, default_value_t = 1024)]
    size:   usize,

    /// Keep everything alive until exit
    #[arg(short, long)]
    leak:   bool,
}

fn buffers(rounds: usize, size: usize) -> Vec<Vec<u8>> {
    (0..rounds)
        .map(|i| vec![i as u8; size])
        .collect()
}

fn words(rounds: usize) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for i in 0..rounds * 8 {
        *counts.entry(format!("word-{}", i % (rounds + 1))).or_insert(0) += 1;
    }

    counts
}

fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();
    let args = Args::parse();

    let kept = buffers(args.rounds, args.size);
    let table = words(args.rounds);
    let mut grown: Vec<u64> = Vec::new();
    for i in 0..args.rounds * args.size / 8 {
        grown.push(i as u64);
    }
    tracing::info!(buffers = kept.len(), words = table.len(), grown = grown.len(), "workload done");

    if args.leak {
        std::mem::forget((kept, table, grown));
    } else {
        drop(kept);
        drop(table);
        drop(grown);
    }

    let mut out = io::stdout().lock();
    GLOBAL.print_log(&mut out)?;
    out.flush()?;

    Ok(())
}
