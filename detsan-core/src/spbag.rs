//! SP-Bag Forest — the Feng/Leiserson SP-bags algorithm.
//!
//! Each live frame owns one S-bag (the "sequenced-so-far" strand set) and a
//! growing set of P-bags (sibling spawned subcomputations not yet synced).
//! The forest is built on top of [`crate::dsu::Dsu`]; this module adds the
//! kind/frame metadata the checker needs for attribution and implements the
//! event-driven bag transitions a fork-join execution drives it through.

use crate::dsu::{Bid, Dsu};
use crate::frame::FrameId;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BagKind {
    S,
    P,
}

struct BagMeta {
    kind: BagKind,
    frame: FrameId,
}

/// Owns the DSU plus the kind/frame side table required to attribute a
/// race back to a source frame once two bags are found parallel.
pub struct SpBagForest {
    dsu: Dsu,
    meta: Vec<BagMeta>,
}

impl SpBagForest {
    pub fn new() -> Self {
        Self { dsu: Dsu::new(), meta: Vec::new() }
    }

    /// Allocate a fresh singleton bag of `kind`, owned by `frame`.
    pub fn make_bag(&mut self, kind: BagKind, frame: FrameId) -> Bid {
        let bid = self.dsu.make();
        debug_assert_eq!(bid.index(), self.meta.len());
        self.meta.push(BagMeta { kind, frame });
        bid
    }

    pub fn kind_of(&mut self, bid: Bid) -> BagKind {
        let root = self.dsu.find(bid);
        self.meta[root.index()].kind
    }

    pub fn frame_of(&mut self, bid: Bid) -> FrameId {
        let root = self.dsu.find(bid);
        self.meta[root.index()].frame
    }

    /// Union `child` into `parent`'s set — directional, so parent's
    /// root survives as representative.
    pub fn union_into(&mut self, child: Bid, parent: Bid) {
        self.dsu.union_into(child, parent);
    }

    /// Is `stored`'s recorded access logically parallel to whatever is
    /// querying it right now? `query` must be the live, currently-executing
    /// strand's own bag — shadow memory only ever passes `current_bid()`
    /// here, which is always a fresh S-bag untouched by any union until its
    /// own frame exits or returns. Given that precondition, the answer
    /// depends only on what `stored`'s root has become by now: if it is
    /// still rooted in an open P-bag (a spawned subcomputation that hasn't
    /// reached its `sync` yet), the strand that made the stored access is
    /// still logically running in parallel with everything live; once that
    /// P-bag has been absorbed into an ancestor S-bag — by `sync`, or by an
    /// ordinary call returning into its caller — the stored access is
    /// definitively sequenced before anything able to query it.
    ///
    /// Plain DSU set-disjointness (`find(a) != find(b)`) is NOT safe here:
    /// a live child frame's fresh S-bag is a distinct DSU set from its live
    /// parent's S-bag for as long as the child is running (union only
    /// happens on the child's *exit*), so disjointness alone would flag a
    /// parent's own sequenced pre-spawn (or pre-call) access as racing its
    /// own still-running child.
    pub fn are_parallel(&mut self, stored: Bid, query: Bid) -> bool {
        debug_assert_eq!(
            self.kind_of(query),
            BagKind::S,
            "are_parallel's query argument must be the live current strand's own bag"
        );
        self.kind_of(stored) == BagKind::P
    }

    pub fn find(&mut self, bid: Bid) -> Bid {
        self.dsu.find(bid)
    }
}

impl Default for SpBagForest {
    fn default() -> Self {
        Self::new()
    }
}
