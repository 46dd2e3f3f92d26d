//! Access Checker (spec §4.4).
//!
//! The entry points a `load`/`store`/`atomic_rmw` event resolves to. Free
//! functions rather than a struct: each check needs simultaneous mutable
//! access to the bag forest, shadow memory, call stack, lock state, and
//! allocation tracker, which the owning [`crate::engine::Engine`] holds as
//! sibling fields — a method on any one of them would just re-borrow the
//! others through `self` anyway.

use detsan_abi::Iid;

use crate::alloc::AllocTracker;
use crate::frame::CallStack;
use crate::lockset::LockState;
use crate::report::ReportStore;
use crate::shadow::{RaceHit, ShadowMemory};
use crate::spbag::SpBagForest;

/// Preconditions common to every access (spec §4.4): checking must be
/// enabled tool-wide and the current frame's suppression depth must be
/// zero. Returns `true` if the access should proceed.
fn checks_enabled(tool_enabled: bool, call_stack: &CallStack) -> bool {
    tool_enabled && !call_stack.is_suppressed()
}

fn submit_hits(
    reports: &mut ReportStore,
    alloc: &AllocTracker,
    call_stack: &CallStack,
    hits: Vec<RaceHit>,
) {
    let call_context = call_stack.call_context();
    for hit in &hits {
        let descriptor = alloc.record_at(hit.addr).map(|r| r.descriptor());
        reports.submit(hit, &call_context, descriptor);
    }
}

#[allow(clippy::too_many_arguments)]
pub fn on_load(
    tool_enabled: bool,
    forest: &mut SpBagForest,
    shadow: &mut ShadowMemory,
    call_stack: &CallStack,
    locks: &LockState,
    alloc: &AllocTracker,
    reports: &mut ReportStore,
    iid: Iid,
    addr: u64,
    size: u64,
) {
    if !checks_enabled(tool_enabled, call_stack) {
        return;
    }
    let bid = call_stack.current_bid();
    let lockset = locks.current_lockset();
    let hits = shadow.check_and_update_read(
        forest,
        addr,
        size,
        iid,
        bid,
        &lockset,
        locks.in_atomic_region(),
    );
    submit_hits(reports, alloc, call_stack, hits);
}

#[allow(clippy::too_many_arguments)]
pub fn on_store(
    tool_enabled: bool,
    forest: &mut SpBagForest,
    shadow: &mut ShadowMemory,
    call_stack: &CallStack,
    locks: &LockState,
    alloc: &AllocTracker,
    reports: &mut ReportStore,
    iid: Iid,
    addr: u64,
    size: u64,
) {
    if !checks_enabled(tool_enabled, call_stack) {
        return;
    }
    let bid = call_stack.current_bid();
    let lockset = locks.current_lockset();
    let hits = shadow.check_and_update_write(
        forest,
        addr,
        size,
        iid,
        bid,
        &lockset,
        locks.in_atomic_region(),
    );
    submit_hits(reports, alloc, call_stack, hits);
}

/// `__sync_*`/C-atomic RMW and architecture pauses are treated as
/// size-one atomic regions (spec §4.4): the access is checked and
/// recorded like a store, but only ever races against non-atomic
/// siblings, never against itself or other atomics at the same address,
/// because the caller is expected to have already bumped the atomic
/// depth around this call the same way it would around an explicit
/// `atomic_begin`/`atomic_end` pair.
#[allow(clippy::too_many_arguments)]
pub fn on_atomic_rmw(
    tool_enabled: bool,
    forest: &mut SpBagForest,
    shadow: &mut ShadowMemory,
    call_stack: &CallStack,
    locks: &LockState,
    alloc: &AllocTracker,
    reports: &mut ReportStore,
    iid: Iid,
    addr: u64,
    size: u64,
) {
    if !checks_enabled(tool_enabled, call_stack) {
        return;
    }
    let bid = call_stack.current_bid();
    let lockset = locks.current_lockset();
    let hits = shadow.check_and_update_write(forest, addr, size, iid, bid, &lockset, true);
    submit_hits(reports, alloc, call_stack, hits);
}

/// `free`/`delete`/VLA-exit: any access still in shadow memory, logically
/// parallel to the freeing strand, becomes a W-FREE/R-FREE race (spec
/// §4.3/§4.7). Allocation bookkeeping itself happens in
/// [`crate::alloc::AllocTracker`]; this just drives the shadow-memory
/// side and submits what it finds.
#[allow(clippy::too_many_arguments)]
pub fn on_free(
    forest: &mut SpBagForest,
    shadow: &mut ShadowMemory,
    call_stack: &CallStack,
    alloc: &AllocTracker,
    reports: &mut ReportStore,
    free_iid: Iid,
    addr: u64,
    size: u64,
) {
    if size == 0 {
        return;
    }
    let bid = call_stack.current_bid();
    let hits = shadow.free(forest, addr, size, free_iid, bid);
    submit_hits(reports, alloc, call_stack, hits);
}

#[cfg(test)]
mod tests {
    use super::*;
    use detsan_abi::{AllocKind, LockId, SyncRegion};

    fn dummy_bid_user() -> (SpBagForest, CallStack) {
        let mut forest = SpBagForest::new();
        let stack = CallStack::new(&mut forest);
        (forest, stack)
    }

    #[test]
    fn suppressed_frame_never_touches_shadow_memory() {
        let (mut forest, mut stack) = dummy_bid_user();
        stack.disable_checking();
        let mut shadow = ShadowMemory::new();
        let locks = LockState::new();
        let alloc = AllocTracker::new();
        let mut reports = ReportStore::new();

        on_store(
            true, &mut forest, &mut shadow, &stack, &locks, &alloc, &mut reports,
            Iid(1), 0x100, 4,
        );
        on_load(
            true, &mut forest, &mut shadow, &stack, &locks, &alloc, &mut reports,
            Iid(2), 0x100, 4,
        );
        assert_eq!(reports.distinct(), 0);
    }

    #[test]
    fn two_parallel_stores_through_separate_frames_race() {
        let mut forest = SpBagForest::new();
        let mut stack = CallStack::new(&mut forest);
        let mut shadow = ShadowMemory::new();
        let locks = LockState::new();
        let mut alloc = AllocTracker::new();
        alloc.alloc(AllocKind::Heap, 0x1000, 8, Some("z".to_string()));
        let mut reports = ReportStore::new();
        let syncreg = SyncRegion(1);

        // First spawned sibling writes, then returns into the still-open
        // P-bag (no sync has happened yet).
        stack.on_detach(&mut forest, syncreg);
        stack.on_func_entry(&mut forest, Iid(10));
        on_store(
            true, &mut forest, &mut shadow, &stack, &locks, &alloc, &mut reports,
            Iid(1), 0x1000, 4,
        );
        stack.on_func_exit(&mut forest);
        stack.on_detach_continue(syncreg);

        // A second sibling spawned under the same unsynced syncregion:
        // genuinely parallel to the first, so its write must race.
        stack.on_detach(&mut forest, syncreg);
        stack.on_func_entry(&mut forest, Iid(11));
        on_store(
            true, &mut forest, &mut shadow, &stack, &locks, &alloc, &mut reports,
            Iid(2), 0x1000, 4,
        );
        assert_eq!(reports.distinct(), 1);
    }

    #[test]
    fn shared_lock_suppresses_what_would_otherwise_race() {
        let mut forest = SpBagForest::new();
        let mut stack = CallStack::new(&mut forest);
        let mut shadow = ShadowMemory::new();
        let mut locks = LockState::new();
        locks.acquire(LockId(1));
        let alloc = AllocTracker::new();
        let mut reports = ReportStore::new();
        let syncreg = SyncRegion(1);

        stack.on_detach(&mut forest, syncreg);
        stack.on_func_entry(&mut forest, Iid(10));
        on_store(
            true, &mut forest, &mut shadow, &stack, &locks, &alloc, &mut reports,
            Iid(1), 0x2000, 1,
        );
        stack.on_func_exit(&mut forest);
        stack.on_detach_continue(syncreg);

        stack.on_detach(&mut forest, syncreg);
        stack.on_func_entry(&mut forest, Iid(11));
        on_store(
            true, &mut forest, &mut shadow, &stack, &locks, &alloc, &mut reports,
            Iid(2), 0x2000, 1,
        );
        assert_eq!(reports.distinct(), 0);
    }
}
