//! The six canonical end-to-end event traces from spec §8, used both as
//! fixtures for `xtask`'s regression check and as this crate's own
//! integration tests. Each builder returns the flat [`Event`] stream a
//! real instrumentor would have emitted for the described program;
//! running it through a fresh [`Engine`] must reproduce the pinned
//! `distinct` count.
//!
//! A parallel-for is modeled as a flat fan of sibling spawns under one
//! syncregion rather than a balanced binary tree (spec §4.2 permits
//! either, "provided the parallel-relation query is preserved") — simpler
//! to generate and, for a single-threaded serial replay, observationally
//! identical: each sibling's access is only ever checked against whatever
//! a strictly earlier sibling left in shadow memory, never against a
//! later one, so the shape of the spawn tree above the leaves is
//! invisible to the race count.

use detsan_abi::{AllocKind, Event, Iid, LockId, SyncRegion};

fn spawn_sibling(events: &mut Vec<Event>, syncreg: SyncRegion, iid: Iid, mut body: impl FnMut(&mut Vec<Event>)) {
    events.push(Event::Detach { iid, syncreg });
    events.push(Event::FuncEntry { iid });
    body(events);
    events.push(Event::FuncExit { iid });
    events.push(Event::DetachContinue { iid, syncreg });
}

/// Scenario 1: a parallel-for of 1000 iterations each doing `++global`.
/// Spec §8.1 pins `distinct = 2` (one RW group, one WW group).
pub fn parallel_increment_on_global() -> Vec<Event> {
    const ITERS: u32 = 1000;
    const GLOBAL: u64 = 0x9000_0000;
    let syncreg = SyncRegion(1);
    let mut events = vec![Event::AllocBegin {
        kind: AllocKind::Global,
        addr: GLOBAL,
        size: 4,
        name_hint: Some("global".to_string()),
    }];
    for _ in 0..ITERS {
        spawn_sibling(&mut events, syncreg, Iid(2), |events| {
            events.push(Event::Load { iid: Iid(3), addr: GLOBAL, size: 4 });
            events.push(Event::Store { iid: Iid(4), addr: GLOBAL, size: 4 });
        });
    }
    events.push(Event::Sync { syncreg });
    events
}

/// A `++x` fan of `iters` siblings over `[addr, addr+size)`, load IID
/// `load_iid` and store IID `store_iid` — the building block every
/// "N-iteration racy increment" scenario below reduces to. On its own
/// this always yields exactly one RW-group and one WW-group fingerprint
/// (spec §8.1/§8.2), since every sibling after the first races the same
/// two static call sites against the same two static call sites.
fn racy_increment_fan(
    events: &mut Vec<Event>,
    syncreg: SyncRegion,
    entry_iid: Iid,
    load_iid: Iid,
    store_iid: Iid,
    addr: u64,
    size: u32,
    iters: u32,
) {
    for _ in 0..iters {
        spawn_sibling(events, syncreg, entry_iid, |events| {
            events.push(Event::Load { iid: load_iid, addr, size });
            events.push(Event::Store { iid: store_iid, addr, size });
        });
    }
}

/// Scenario 2: the same `++x` pattern applied to a stack local, a
/// malloc'd buffer, a calloc'd buffer, and a buffer that gets
/// reallocated partway through the loop. Spec §8.2 pins `distinct = 10`
/// with one report naming "Heap object z" after the realloc.
pub fn increment_across_allocation_kinds() -> Vec<Event> {
    const ITERS: u32 = 8;
    let syncreg = SyncRegion(1);
    let mut events = Vec::new();

    events.push(Event::AllocBegin {
        kind: AllocKind::Stack,
        addr: 0x7000_0000,
        size: 8,
        name_hint: Some("local".to_string()),
    });
    racy_increment_fan(&mut events, syncreg, Iid(10), Iid(11), Iid(12), 0x7000_0000, 8, ITERS);

    events.push(Event::AllocBegin {
        kind: AllocKind::Heap,
        addr: 0x8000_0000,
        size: 8,
        name_hint: Some("buf".to_string()),
    });
    racy_increment_fan(&mut events, syncreg, Iid(20), Iid(21), Iid(22), 0x8000_0000, 8, ITERS);

    events.push(Event::AllocBegin {
        kind: AllocKind::Heap,
        addr: 0x8100_0000,
        size: 8,
        name_hint: Some("c".to_string()),
    });
    racy_increment_fan(&mut events, syncreg, Iid(30), Iid(31), Iid(32), 0x8100_0000, 8, ITERS);

    // The realloc'd object: half the iterations land on the old address
    // ("y"), then a realloc moves it, and the rest land on the new one
    // ("z") — the old and new ranges are independent shadow entries, so
    // each half contributes its own RW/WW pair.
    events.push(Event::AllocBegin {
        kind: AllocKind::Heap,
        addr: 0x8200_0000,
        size: 8,
        name_hint: Some("y".to_string()),
    });
    racy_increment_fan(&mut events, syncreg, Iid(40), Iid(41), Iid(42), 0x8200_0000, 8, ITERS / 2);
    // Sync before freeing: the free must be sequenced after the old
    // buffer's accesses, not parallel to them — racing a free against a
    // live access is scenario 3's concern, not this one's.
    events.push(Event::Sync { syncreg });
    events.push(Event::Free { addr: 0x8200_0000 });
    events.push(Event::AllocBegin {
        kind: AllocKind::Heap,
        addr: 0x8300_0000,
        size: 8,
        name_hint: Some("z".to_string()),
    });
    racy_increment_fan(&mut events, syncreg, Iid(43), Iid(44), Iid(45), 0x8300_0000, 8, ITERS / 2);

    events.push(Event::Sync { syncreg });
    events
}

/// Scenario 3: a concurrent fill of a VLA races its own `free`. Spec §8.3
/// pins exactly two distinct races (W-FREE, R-FREE) on the same object.
pub fn free_races_concurrent_vla_fill() -> Vec<Event> {
    const VLA: u64 = 0x6000_0000;
    let syncreg = SyncRegion(1);
    let mut events = vec![Event::AllocBegin {
        kind: AllocKind::Vla,
        addr: VLA,
        size: 2,
        name_hint: Some("buf".to_string()),
    }];

    spawn_sibling(&mut events, syncreg, Iid(50), |events| {
        events.push(Event::Store { iid: Iid(51), addr: VLA, size: 1 });
    });
    spawn_sibling(&mut events, syncreg, Iid(52), |events| {
        events.push(Event::Load { iid: Iid(53), addr: VLA + 1, size: 1 });
    });
    spawn_sibling(&mut events, syncreg, Iid(54), |events| {
        events.push(Event::Free { addr: VLA });
    });

    events.push(Event::Sync { syncreg });
    events
}

/// Scenario 4: `cilk_spawn` with an intervening `std::call_once`. Spec
/// §8.4 pins `distinct = 0` — the once-guarded interior is an atomic
/// region and never races regardless of how many siblings touch it.
pub fn spawn_with_call_once() -> Vec<Event> {
    const FLAG: u64 = 0x5000_0000;
    let syncreg = SyncRegion(1);
    let mut events = vec![Event::AllocBegin {
        kind: AllocKind::Global,
        addr: FLAG,
        size: 1,
        name_hint: Some("once_flag".to_string()),
    }];

    for i in 0..4u32 {
        spawn_sibling(&mut events, syncreg, Iid(60 + i), |events| {
            events.push(Event::AtomicBegin);
            events.push(Event::Load { iid: Iid(70), addr: FLAG, size: 1 });
            events.push(Event::Store { iid: Iid(71), addr: FLAG, size: 1 });
            events.push(Event::AtomicEnd);
        });
    }
    events.push(Event::Sync { syncreg });
    events
}

/// Scenario 5: one parallel-for updating a reducer, a lock-protected
/// sum, and an unprotected sum. Spec §8.5 pins races on the unprotected
/// variable only. The reducer is modeled by emitting no shared-address
/// events for it at all — a hyperobject's whole point is that its
/// per-strand views never alias (spec glossary), so there is nothing for
/// shadow memory to even see.
pub fn reducer_lock_and_unprotected_sum() -> Vec<Event> {
    const ITERS: u32 = 4;
    const LOCKED_SUM: u64 = 0x4000_0000;
    const UNPROTECTED_SUM: u64 = 0x4000_1000;
    const MUTEX: LockId = LockId(1);
    let syncreg = SyncRegion(1);
    let mut events = vec![
        Event::AllocBegin {
            kind: AllocKind::Global,
            addr: LOCKED_SUM,
            size: 8,
            name_hint: Some("locked_sum".to_string()),
        },
        Event::AllocBegin {
            kind: AllocKind::Global,
            addr: UNPROTECTED_SUM,
            size: 8,
            name_hint: Some("unprotected_sum".to_string()),
        },
    ];

    for i in 0..ITERS {
        spawn_sibling(&mut events, syncreg, Iid(80 + i), |events| {
            events.push(Event::AcquireLock { lock: MUTEX });
            events.push(Event::Load { iid: Iid(90), addr: LOCKED_SUM, size: 8 });
            events.push(Event::Store { iid: Iid(91), addr: LOCKED_SUM, size: 8 });
            events.push(Event::ReleaseLock { lock: MUTEX });

            events.push(Event::Load { iid: Iid(92), addr: UNPROTECTED_SUM, size: 8 });
            events.push(Event::Store { iid: Iid(93), addr: UNPROTECTED_SUM, size: 8 });
        });
    }
    events.push(Event::Sync { syncreg });
    events
}

/// Scenario 6: eight gather intrinsics, each spawned concurrently with a
/// write into the buffer it gathers from. A gather is modeled as an
/// ordinary multi-byte load (spec §9 supplement): it has no special
/// status beyond being one static call site per lane. Spec §8.6 pins
/// `distinct = 8`, one per intrinsic, with the four lanes each gather
/// touches collapsing into that one fingerprint.
pub fn gather_intrinsics_race_writes() -> Vec<Event> {
    const LANES: u32 = 4;
    const GATHERS: u32 = 8;
    let syncreg = SyncRegion(1);
    let mut events = Vec::new();

    for i in 0..GATHERS {
        let base = 0x3000_0000u64 + (i as u64) * 0x1000;
        events.push(Event::AllocBegin {
            kind: AllocKind::Heap,
            addr: base,
            size: LANES as u64,
            name_hint: Some(format!("lane{i}")),
        });
        let writer_iid = Iid(100 + i);
        let gather_iid = Iid(200 + i);
        spawn_sibling(&mut events, syncreg, writer_iid, |events| {
            events.push(Event::Store { iid: writer_iid, addr: base, size: LANES });
        });
        spawn_sibling(&mut events, syncreg, gather_iid, |events| {
            events.push(Event::Load { iid: gather_iid, addr: base, size: LANES });
        });
    }
    events.push(Event::Sync { syncreg });
    events
}

/// Supplemental scenario (SPEC_FULL.md §9, grounded in `original_source`'s
/// `libraces.cpp::malloc_printf_test`): a heap buffer filled by a spawned
/// loop, read by an unsynced `printf`-style access before the enclosing
/// `sync` collapses the spawn's P-bag. One distinct WR race, since the
/// read runs logically parallel to the still-open spawn.
pub fn lib_string_races() -> Vec<Event> {
    const BUF: u64 = 0x2000_0000;
    const LEN: u32 = 4;
    let syncreg = SyncRegion(1);
    let mut events = vec![Event::AllocBegin {
        kind: AllocKind::Heap,
        addr: BUF,
        size: LEN as u64,
        name_hint: Some("x".to_string()),
    }];

    spawn_sibling(&mut events, syncreg, Iid(300), |events| {
        events.push(Event::Store { iid: Iid(301), addr: BUF, size: LEN });
    });
    events.push(Event::Load { iid: Iid(302), addr: BUF, size: LEN });
    events.push(Event::Sync { syncreg });
    events.push(Event::Free { addr: BUF });
    events
}
