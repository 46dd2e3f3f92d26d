//! Disjoint-set forest over SP-bags (spec §4.1).
//!
//! Union is directional: `union_into(child, parent)` always leaves the
//! parent's prior root as the representative, because the parent's kind
//! and frame are the semantically correct attribution for the merged set
//! (spec's invariant: "bags are never split... union always moves a child
//! P-bag into its parent S-bag, never the reverse"). Path compression is
//! mandatory; `find` on an unregistered id is a fatal invariant violation,
//! per spec §4.1's stated failure mode.

use std::fmt;

/// Opaque handle into the DSU's arena. Never reused: the arena only grows
/// for the lifetime of the detector (spec §9's "arena holding DSU nodes
/// persists... released in one step at process exit").
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bid(u32);

impl fmt::Debug for Bid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bid({})", self.0)
    }
}

impl Bid {
    /// Raw arena index, for crate-internal side tables keyed alongside the
    /// DSU (e.g. the SP-bag forest's per-node kind/frame metadata).
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

struct Node {
    parent: u32,
    rank: u32,
}

/// A disjoint-set forest keyed by [`Bid`]. Nodes are never removed; this
/// mirrors the spec's requirement that a bag whose frame has been
/// reclaimed must already have been unioned into an ancestor, not erased.
#[derive(Default)]
pub struct Dsu {
    nodes: Vec<Node>,
}

impl Dsu {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Allocate a fresh singleton set and return its id.
    pub fn make(&mut self) -> Bid {
        let id = self.nodes.len() as u32;
        self.nodes.push(Node { parent: id, rank: 0 });
        Bid(id)
    }

    /// Find the representative of `bid`'s set, compressing the path.
    ///
    /// # Panics
    /// Panics if `bid` was never returned by [`Dsu::make`] on this forest —
    /// spec §4.1 calls this a fatal invariant violation, not a recoverable
    /// error.
    pub fn find(&mut self, bid: Bid) -> Bid {
        let root = self.find_root(bid.0);
        Bid(root)
    }

    fn find_root(&mut self, mut x: u32) -> u32 {
        if x as usize >= self.nodes.len() {
            crate::fatal!("dsu: find on unknown bag id {x} (protocol violation)");
        }
        let mut root = x;
        while self.nodes[root as usize].parent != root {
            root = self.nodes[root as usize].parent;
        }
        // path compression
        while self.nodes[x as usize].parent != root {
            let next = self.nodes[x as usize].parent;
            self.nodes[x as usize].parent = root;
            x = next;
        }
        root
    }

    /// Union `child`'s set into `parent`'s set. After this call,
    /// `find(child) == find(parent)`, and the representative is always
    /// `parent`'s prior root — union is not symmetric.
    pub fn union_into(&mut self, child: Bid, parent: Bid) {
        let child_root = self.find_root(child.0);
        let parent_root = self.find_root(parent.0);
        if child_root == parent_root {
            return;
        }
        // Attach child under parent unconditionally: parent's root must
        // remain the representative regardless of rank, so we only use
        // rank to decide the attachment depth, not which side wins.
        self.nodes[child_root as usize].parent = parent_root;
        if self.nodes[parent_root as usize].rank == self.nodes[child_root as usize].rank {
            self.nodes[parent_root as usize].rank += 1;
        }
    }

    /// Are `a` and `b` currently in the same set?
    pub fn same_set(&mut self, a: Bid, b: Bid) -> bool {
        self.find(a) == self.find(b)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
