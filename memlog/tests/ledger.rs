use std::collections::HashMap;

use memlog::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn id(s: &str) -> CallerId {
    CallerId::from(s)
}

#[test]
fn three_callers_one_released() {
    let mut ledger = Ledger::new();
    let c = id("proj/app.c(42):doWork");
    ledger.insert(0x10, 10, c.clone()).unwrap();
    ledger.insert(0x20, 20, c.clone()).unwrap();
    ledger.insert(0x30, 30, c.clone()).unwrap();
    let block = ledger.remove(0x20).unwrap();

    assert_eq!(block, Block { size: 20, caller: c.clone() });
    assert_eq!(
        ledger.caller(&c),
        Some(&CallerStats {
            heap:       Counter::new(2, 40),
            freed:      Counter::new(1, 20),
            max_alloc:  Counter::new(3, 60),
        })
    );
    assert_eq!(ledger.live_blocks(), 2);
    assert_eq!(ledger.live_bytes(), 40);
}

#[test]
fn duplicate_insert_changes_nothing() {
    let mut ledger = Ledger::new();
    ledger.insert(0x10, 8, id("a.c(1):f")).unwrap();

    let e = ledger.insert(0x10, 100, id("b.c(2):g")).unwrap_err();
    assert_eq!(e, LedgerError::DuplicateBlock { address: 0x10 });
    assert_eq!(ledger.callers(), 1);
    assert_eq!(ledger.block(0x10), Some(&Block { size: 8, caller: id("a.c(1):f") }));
    assert_eq!(ledger.caller(&id("a.c(1):f")).unwrap().heap, Counter::new(1, 8));
}

#[test]
fn unknown_and_repeated_release_are_the_same_error() {
    let mut ledger = Ledger::new();
    assert_eq!(ledger.remove(0x99), Err(LedgerError::UnknownBlock { address: 0x99 }));

    ledger.insert(0x10, 8, id("a.c(1):f")).unwrap();
    ledger.remove(0x10).unwrap();
    let before = *ledger.caller(&id("a.c(1):f")).unwrap();
    assert_eq!(ledger.remove(0x10), Err(LedgerError::UnknownBlock { address: 0x10 }));
    assert_eq!(ledger.caller(&id("a.c(1):f")), Some(&before));
}

#[test]
fn peak_moves_only_on_strictly_more_bytes() {
    let mut ledger = Ledger::new();
    let c = id("a.c(1):f");
    ledger.insert(0x10, 25, c.clone()).unwrap();
    ledger.insert(0x20, 25, c.clone()).unwrap();
    ledger.remove(0x10).unwrap();
    ledger.remove(0x20).unwrap();

    // Same bytes in fewer blocks: a tie, so the old peak stays.
    ledger.insert(0x30, 50, c.clone()).unwrap();
    assert_eq!(ledger.caller(&c).unwrap().max_alloc, Counter::new(2, 50));

    ledger.insert(0x40, 1, c.clone()).unwrap();
    assert_eq!(ledger.caller(&c).unwrap().max_alloc, Counter::new(2, 51));
}

#[test]
fn callers_survive_their_blocks() {
    let mut ledger = Ledger::new();
    ledger.insert(0x10, 8, id("b.c(2):g")).unwrap();
    ledger.insert(0x20, 8, id(NOT_FOUND)).unwrap();
    ledger.insert(0x30, 8, id("a.c(1):f")).unwrap();
    for address in [0x10, 0x20, 0x30] {
        ledger.remove(address).unwrap();
    }

    let order: Vec<&str> = ledger.stats()
        .map(|(caller, _)| caller.as_str())
        .collect();
    assert_eq!(order, vec![NOT_FOUND, "a.c(1):f", "b.c(2):g"]);
    assert_eq!(ledger.live_blocks(), 0);
}

#[test]
fn random_traffic_keeps_the_books_balanced() {
    let mut rng = StdRng::seed_from_u64(0x6d656d6c6f67);
    let callers = ["a.c(1):f", "b.c(2):g", "c.c(3):h", NOT_FOUND];
    let mut ledger = Ledger::new();
    let mut live: Vec<(usize, usize)> = vec![];
    let mut next_address = 0x1000;
    let mut last_freed: HashMap<CallerId, Counter> = HashMap::new();

    for _ in 0..4000 {
        if live.is_empty() || rng.gen_bool(0.55) {
            let size = rng.gen_range(0..4096);
            let caller = id(callers[rng.gen_range(0..callers.len())]);
            ledger.insert(next_address, size, caller).unwrap();
            live.push((next_address, size));
            next_address += 16;
        } else {
            let (address, size) = live.swap_remove(rng.gen_range(0..live.len()));
            assert_eq!(ledger.remove(address).unwrap().size, size);
        }

        let heap = ledger.stats().fold(Counter::default(), |acc, (_, usage)| {
            Counter::new(acc.blocks + usage.heap.blocks, acc.bytes + usage.heap.bytes)
        });
        assert_eq!(heap.blocks, live.len());
        assert_eq!(heap.blocks, ledger.live_blocks());
        assert_eq!(heap.bytes, live.iter().map(|&(_, size)| size).sum::<usize>());
        assert_eq!(heap.bytes, ledger.live_bytes());

        for (caller, usage) in ledger.stats() {
            assert!(usage.max_alloc.bytes >= usage.heap.bytes);
            let before = last_freed.entry(caller.clone()).or_default();
            assert!(usage.freed.blocks >= before.blocks);
            assert!(usage.freed.bytes >= before.bytes);
            *before = usage.freed;
        }
    }
}
