//! Call Stack & Frame Model (spec §4.5).
//!
//! Frames evolve strictly by well-nested entry/exit events. A spawn opens a
//! *detach*: the spawned callee's frame is logically parallel to the
//! spawner's continuation until the callee returns and is unioned into the
//! spawner's active P-bag for the syncregion it was spawned under. A
//! `sync` collapses all P-bags open for that syncregion into the enclosing
//! S-bag (spec §4.2's bag-action table).

use std::collections::HashMap;

use detsan_abi::{Iid, SyncRegion};

use crate::dsu::Bid;
use crate::spbag::{BagKind, SpBagForest};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u32);

impl FrameId {
    /// Test-only constructor for unit tests in other modules that need a
    /// `FrameId` without driving a full `CallStack`.
    pub(crate) fn for_test(n: u32) -> Self {
        FrameId(n)
    }
}

/// Why a frame was created, and what it must union its S-bag into on exit.
#[derive(Clone, Copy, Debug)]
enum Origin {
    /// The program's single root frame. Nothing to union into on exit.
    Root,
    /// An ordinary (non-spawned) call: union the callee's S-bag into the
    /// caller's S-bag on return (spec §4.2's "function exit" row).
    Called { caller: FrameId },
    /// A spawned (detached) callee: union its S-bag into the spawner's
    /// active P-bag for `syncreg` on return (spec §4.2's "spawn" row).
    Spawned { spawner: FrameId, syncreg: SyncRegion },
}

pub struct Frame {
    id: FrameId,
    origin: Origin,
    s_bag: Bid,
    /// Open P-bags, one per syncregion with at least one un-synced spawn.
    p_bags: HashMap<SyncRegion, Bid>,
    suppression_depth: u32,
    /// The IID of this frame's own entry event — one link in the call
    /// context chain the checker hashes for report fingerprinting.
    entry_iid: Iid,
}

impl Frame {
    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn s_bag(&self) -> Bid {
        self.s_bag
    }

    pub fn is_checking_suppressed(&self) -> bool {
        self.suppression_depth > 0
    }
}

/// Driving the bag forest from a well-nested event stream (spec §4.5,
/// §4.8). Owns the live frame stack; a frame is destroyed only on its
/// matching function-exit event.
pub struct CallStack {
    frames: Vec<Frame>,
    next_id: u32,
    /// Syncregion a spawner recorded at its `Detach` event, consumed by
    /// the very next `FuncEntry` — the callee created by that entry is the
    /// spawned child.
    pending_spawn: Option<(FrameId, SyncRegion)>,
}

impl CallStack {
    pub fn new(forest: &mut SpBagForest) -> Self {
        let root_id = FrameId(0);
        let s_bag = forest.make_bag(BagKind::S, root_id);
        let root = Frame {
            id: root_id,
            origin: Origin::Root,
            s_bag,
            p_bags: HashMap::new(),
            suppression_depth: 0,
            entry_iid: Iid::UNKNOWN,
        };
        Self { frames: vec![root], next_id: 1, pending_spawn: None }
    }

    pub fn current(&self) -> &Frame {
        self.frames.last().expect("call stack must never go empty while live")
    }

    fn current_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("call stack must never go empty while live")
    }

    pub fn current_bid(&self) -> Bid {
        self.current().s_bag
    }

    pub fn is_suppressed(&self) -> bool {
        self.current().is_checking_suppressed()
    }

    pub fn disable_checking(&mut self) {
        self.current_mut().suppression_depth += 1;
    }

    pub fn enable_checking(&mut self) {
        let f = self.current_mut();
        f.suppression_depth = f.suppression_depth.saturating_sub(1);
    }

    /// `Detach(syncreg)`: the spawner marks that its very next function
    /// entry is the spawned callee, and ensures a P-bag exists to collect
    /// it at `syncreg`.
    pub fn on_detach(&mut self, forest: &mut SpBagForest, syncreg: SyncRegion) {
        let spawner = self.current().id();
        self.ensure_p_bag(forest, syncreg);
        self.pending_spawn = Some((spawner, syncreg));
    }

    /// `DetachContinue(syncreg)`: the spawner resumes. In serial replay the
    /// frame stack has already popped back to the spawner by the time its
    /// continuation runs (the detached child completed first), so this is
    /// a well-formedness checkpoint rather than a bag mutation.
    ///
    /// # Panics
    /// Panics if the current frame is not the frame that issued the
    /// matching `Detach` for `syncreg` — a malformed event stream per
    /// spec §4.8 ("the dispatcher... treats violations as fatal").
    pub fn on_detach_continue(&self, syncreg: SyncRegion) {
        if !self.current().p_bags.contains_key(&syncreg) {
            crate::fatal!("detach_continue for syncregion {syncreg:?} with no open spawn (protocol violation)");
        }
    }

    /// `FuncEntry`: create a new frame. If a `Detach` is pending, this
    /// entry is the spawned callee; otherwise it is an ordinary call.
    pub fn on_func_entry(&mut self, forest: &mut SpBagForest, iid: Iid) {
        let id = FrameId(self.next_id);
        self.next_id += 1;
        let origin = match self.pending_spawn.take() {
            Some((spawner, syncreg)) => Origin::Spawned { spawner, syncreg },
            None => Origin::Called { caller: self.current().id() },
        };
        let s_bag = forest.make_bag(BagKind::S, id);
        self.frames.push(Frame {
            id,
            origin,
            s_bag,
            p_bags: HashMap::new(),
            suppression_depth: self.current().suppression_depth,
            entry_iid: iid,
        });
    }

    /// The call-context chain (spec §4.9): the live frame stack's entry
    /// IIDs from root to current, hashed by the report store into the
    /// "common calling context" fingerprint component.
    pub fn call_context(&self) -> Vec<Iid> {
        self.frames.iter().map(|f| f.entry_iid).collect()
    }

    /// `FuncExit`: destroy the current frame, unioning its S-bag into the
    /// caller's S-bag (ordinary call) or the spawner's P-bag (spawned
    /// callee), per spec §4.2's "function exit" / "spawn" rows.
    ///
    /// # Panics
    /// Panics if called on the root frame — a function exit with no
    /// matching entry is a protocol violation.
    pub fn on_func_exit(&mut self, forest: &mut SpBagForest) {
        let exiting = match self.frames.pop() {
            Some(f) => f,
            None => crate::fatal!("func_exit with empty call stack (protocol violation)"),
        };
        match exiting.origin {
            Origin::Root => crate::fatal!("func_exit on the root frame (unmatched exit)"),
            Origin::Called { caller } => {
                let caller_s_bag = self.frame_mut(caller).s_bag;
                forest.union_into(exiting.s_bag, caller_s_bag);
            }
            Origin::Spawned { spawner, syncreg } => {
                let p_bag = *self
                    .frame_mut(spawner)
                    .p_bags
                    .get(&syncreg)
                    .expect("spawned frame's syncregion P-bag missing at exit");
                forest.union_into(exiting.s_bag, p_bag);
            }
        }
    }

    /// `Sync(syncreg)`: union every P-bag open at `syncreg` in the current
    /// frame into its S-bag, then retire it — a later spawn under the same
    /// syncregion allocates a fresh P-bag (spec §4.2's "sync" row: "the
    /// P-bag set is cleared").
    pub fn on_sync(&mut self, forest: &mut SpBagForest, syncreg: SyncRegion) {
        let frame = self.current_mut();
        if let Some(p_bag) = frame.p_bags.remove(&syncreg) {
            let s_bag = frame.s_bag;
            forest.union_into(p_bag, s_bag);
        }
    }

    fn ensure_p_bag(&mut self, forest: &mut SpBagForest, syncreg: SyncRegion) {
        let frame_id = self.current().id();
        if !self.current().p_bags.contains_key(&syncreg) {
            let p_bag = forest.make_bag(BagKind::P, frame_id);
            self.current_mut().p_bags.insert(syncreg, p_bag);
        }
    }

    fn frame_mut(&mut self, id: FrameId) -> &mut Frame {
        self.frames
            .iter_mut()
            .find(|f| f.id == id)
            .expect("referenced frame is no longer live (protocol violation)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sr(n: u32) -> SyncRegion {
        SyncRegion(n)
    }

    #[test]
    fn ordinary_call_unions_into_caller_on_exit() {
        let mut forest = SpBagForest::new();
        let mut stack = CallStack::new(&mut forest);
        let root_bid = stack.current_bid();

        stack.on_func_entry(&mut forest, Iid(0));
        let callee_bid = stack.current_bid();
        // an ordinary call is never logically parallel to its own caller,
        // even while the callee is still live and hasn't returned yet.
        assert!(!forest.are_parallel(root_bid, callee_bid));

        stack.on_func_exit(&mut forest);
        assert!(!forest.are_parallel(root_bid, callee_bid));
        assert_eq!(stack.current_bid(), root_bid);
    }

    #[test]
    fn spawned_child_stays_parallel_to_continuation_until_sync() {
        let mut forest = SpBagForest::new();
        let mut stack = CallStack::new(&mut forest);
        let root_bid = stack.current_bid();

        stack.on_detach(&mut forest, sr(1));
        stack.on_func_entry(&mut forest, Iid(0));
        let child_bid = stack.current_bid();
        stack.on_func_exit(&mut forest);
        stack.on_detach_continue(sr(1));

        // continuation (root) is still parallel to the completed child
        // until the sync collapses the P-bag.
        assert!(forest.are_parallel(child_bid, root_bid));

        stack.on_sync(&mut forest, sr(1));
        assert!(!forest.are_parallel(child_bid, root_bid));
    }

    #[test]
    fn second_spawn_after_sync_gets_a_fresh_p_bag() {
        let mut forest = SpBagForest::new();
        let mut stack = CallStack::new(&mut forest);
        let root_bid = stack.current_bid();

        stack.on_detach(&mut forest, sr(1));
        stack.on_func_entry(&mut forest, Iid(0));
        let first_child = stack.current_bid();
        stack.on_func_exit(&mut forest);
        stack.on_sync(&mut forest, sr(1));

        stack.on_detach(&mut forest, sr(1));
        stack.on_func_entry(&mut forest, Iid(0));
        let second_child = stack.current_bid();
        stack.on_func_exit(&mut forest);

        // second_child hasn't synced yet: still parallel to root.
        assert!(forest.are_parallel(second_child, root_bid));
        // but the first child, already synced, stays sequenced.
        assert!(!forest.are_parallel(first_child, root_bid));

        stack.on_sync(&mut forest, sr(1));
        assert!(!forest.are_parallel(second_child, root_bid));
    }

    #[test]
    #[should_panic(expected = "unmatched exit")]
    fn exiting_root_frame_is_fatal() {
        let mut forest = SpBagForest::new();
        let mut stack = CallStack::new(&mut forest);
        stack.on_func_exit(&mut forest);
    }

    #[test]
    fn suppression_depth_is_inherited_by_children() {
        let mut forest = SpBagForest::new();
        let mut stack = CallStack::new(&mut forest);
        stack.disable_checking();
        stack.on_func_entry(&mut forest, Iid(0));
        assert!(stack.is_suppressed());
        stack.enable_checking();
        assert!(!stack.is_suppressed());
    }
}
