//! Shadow Memory.
//!
//! A two-level page table: an outer directory keyed by the high bits of an
//! address maps to lazily-allocated pages. Each page starts `Uniform` — one
//! access record covering every byte — and only expands to a per-byte
//! array when an access would make the page's state non-uniform. This is
//! the run-length compression a shadow table needs for hot, untouched, or
//! uniformly-accessed ranges (a whole array written once, a whole buffer
//! never revisited) to stay a single record instead of one per byte.

use std::collections::HashMap;

use detsan_abi::Iid;

use crate::dsu::Bid;
use crate::lockset::Lockset;
use crate::spbag::SpBagForest;

/// Default reader-set bound K, chosen within {2, 4} by implementer
/// benchmarking; overridable via `CILKSAN_READER_SET_K`.
pub const DEFAULT_READER_SET_K: usize = 4;

const PAGE_BITS: u32 = 12;
const PAGE_SIZE: usize = 1 << PAGE_BITS;
const PAGE_MASK: u64 = (PAGE_SIZE as u64) - 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessRecord {
    pub iid: Iid,
    pub bid: Bid,
    pub lockset: Lockset,
}

#[derive(Clone, Debug, Default)]
struct ByteState {
    writer: Option<AccessRecord>,
    readers: Vec<AccessRecord>,
}

impl ByteState {
    fn is_empty(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RaceKind {
    Rw,
    Wr,
    Ww,
    WFree,
    RFree,
}

#[derive(Clone, Debug)]
pub struct RaceHit {
    pub kind: RaceKind,
    pub addr: u64,
    /// The access already resident in shadow memory.
    pub prior: AccessRecord,
    /// The access that triggered the check.
    pub current: AccessRecord,
}

enum Page {
    Uniform(ByteState),
    Expanded(Vec<ByteState>),
}

impl Page {
    fn new() -> Self {
        Page::Uniform(ByteState::default())
    }

    /// Borrow byte `off` as a slice-of-one-reference-equivalent accessor;
    /// expansion happens through `expand_if_needed`, never here.
    fn byte(&self, off: usize) -> &ByteState {
        match self {
            Page::Uniform(s) => s,
            Page::Expanded(v) => &v[off],
        }
    }

    fn expand(&mut self) {
        if let Page::Uniform(s) = self {
            let v = vec![s.clone(); PAGE_SIZE];
            *self = Page::Expanded(v);
        }
    }

    /// Apply `f` to every byte in `[lo, hi)` of this page, expanding first
    /// unless the range already spans the whole page (in which case a
    /// uniform page can be updated in place and stay compressed).
    fn for_each_mut(&mut self, lo: usize, hi: usize, mut f: impl FnMut(&mut ByteState)) {
        if lo == 0 && hi == PAGE_SIZE {
            if let Page::Uniform(s) = self {
                f(s);
                return;
            }
        }
        self.expand();
        if let Page::Expanded(v) = self {
            for b in &mut v[lo..hi] {
                f(b);
            }
        }
        self.try_compress();
    }

    /// If every byte now agrees, collapse back to `Uniform`. Cheap check
    /// skipped for huge pages would be a further optimization; not needed
    /// at the page sizes this tool uses.
    fn try_compress(&mut self) {
        if let Page::Expanded(v) = self {
            let first = &v[0];
            if v.iter().all(|b| bytestate_eq(b, first)) {
                *self = Page::Uniform(first.clone());
            }
        }
    }
}

fn bytestate_eq(a: &ByteState, b: &ByteState) -> bool {
    a.writer == b.writer && a.readers == b.readers
}

/// The two-level shadow table.
pub struct ShadowMemory {
    directory: HashMap<u64, Page>,
    reader_set_k: usize,
}

impl ShadowMemory {
    pub fn new() -> Self {
        Self::with_reader_set_k(DEFAULT_READER_SET_K)
    }

    pub fn with_reader_set_k(k: usize) -> Self {
        Self { directory: HashMap::new(), reader_set_k: k.max(1) }
    }

    fn page_mut(&mut self, page_no: u64) -> &mut Page {
        self.directory.entry(page_no).or_insert_with(Page::new)
    }

    /// Run `op` over every byte of `[addr, addr+size)`, page by page. `op`
    /// receives the byte's current state and the address it belongs to,
    /// and mutates it in place.
    fn walk_range(
        &mut self,
        addr: u64,
        size: u64,
        mut op: impl FnMut(u64, &mut ByteState),
    ) {
        if size == 0 {
            return;
        }
        let end = addr + size;
        let mut cur = addr;
        while cur < end {
            let page_no = cur >> PAGE_BITS;
            let page_base = page_no << PAGE_BITS;
            let page_end = page_base + PAGE_SIZE as u64;
            let hi = end.min(page_end);
            let lo_off = (cur - page_base) as usize;
            let hi_off = (hi - page_base) as usize;
            let page = self.page_mut(page_no);
            for off in lo_off..hi_off {
                let a = page_base + off as u64;
                page.for_each_mut(off, off + 1, |b| op(a, b));
            }
            cur = hi;
        }
    }

    pub fn check_and_update_read(
        &mut self,
        forest: &mut SpBagForest,
        addr: u64,
        size: u64,
        iid: Iid,
        bid: Bid,
        lockset: &Lockset,
        in_atomic: bool,
    ) -> Vec<RaceHit> {
        let mut hits = Vec::new();
        let k = self.reader_set_k;
        self.walk_range(addr, size, |a, state| {
            if let Some(w) = &state.writer {
                if !in_atomic
                    && forest.are_parallel(w.bid, bid)
                    && !lockset.intersects(&w.lockset)
                {
                    hits.push(RaceHit {
                        kind: RaceKind::Wr,
                        addr: a,
                        prior: w.clone(),
                        current: AccessRecord { iid, bid, lockset: lockset.clone() },
                    });
                }
            }
            update_readers(state, forest, iid, bid, lockset, k);
        });
        hits
    }

    pub fn check_and_update_write(
        &mut self,
        forest: &mut SpBagForest,
        addr: u64,
        size: u64,
        iid: Iid,
        bid: Bid,
        lockset: &Lockset,
        in_atomic: bool,
    ) -> Vec<RaceHit> {
        let mut hits = Vec::new();
        self.walk_range(addr, size, |a, state| {
            if !in_atomic {
                for r in &state.readers {
                    if forest.are_parallel(r.bid, bid) && !lockset.intersects(&r.lockset) {
                        hits.push(RaceHit {
                            kind: RaceKind::Rw,
                            addr: a,
                            prior: r.clone(),
                            current: AccessRecord { iid, bid, lockset: lockset.clone() },
                        });
                    }
                }
                if let Some(w) = &state.writer {
                    if forest.are_parallel(w.bid, bid) && !lockset.intersects(&w.lockset) {
                        hits.push(RaceHit {
                            kind: RaceKind::Ww,
                            addr: a,
                            prior: w.clone(),
                            current: AccessRecord { iid, bid, lockset: lockset.clone() },
                        });
                    }
                }
            }
            // A write dominates: it replaces the writer and clears readers
            // for this byte, since any future access only needs to race
            // against the most recent write going forward.
            state.writer = Some(AccessRecord { iid, bid, lockset: lockset.clone() });
            state.readers.clear();
        });
        hits
    }

    /// `free(lo, hi)`: any still-resident access logically parallel to the
    /// freeing strand is a W-FREE/R-FREE race; the range is cleared
    /// unconditionally afterward regardless of whether a race fired.
    pub fn free(
        &mut self,
        forest: &mut SpBagForest,
        addr: u64,
        size: u64,
        free_iid: Iid,
        free_bid: Bid,
    ) -> Vec<RaceHit> {
        let mut hits = Vec::new();
        self.walk_range(addr, size, |a, state| {
            if let Some(w) = &state.writer {
                if forest.are_parallel(w.bid, free_bid) {
                    hits.push(RaceHit {
                        kind: RaceKind::WFree,
                        addr: a,
                        prior: w.clone(),
                        current: AccessRecord {
                            iid: free_iid,
                            bid: free_bid,
                            lockset: Lockset::empty(),
                        },
                    });
                }
            }
            for r in &state.readers {
                if forest.are_parallel(r.bid, free_bid) {
                    hits.push(RaceHit {
                        kind: RaceKind::RFree,
                        addr: a,
                        prior: r.clone(),
                        current: AccessRecord {
                            iid: free_iid,
                            bid: free_bid,
                            lockset: Lockset::empty(),
                        },
                    });
                }
            }
            *state = ByteState::default();
        });
        hits
    }

    #[cfg(test)]
    fn is_live(&self, addr: u64) -> bool {
        let page_no = addr >> PAGE_BITS;
        let off = (addr & PAGE_MASK) as usize;
        self.directory
            .get(&page_no)
            .map(|p| !p.byte(off).is_empty())
            .unwrap_or(false)
    }
}

impl Default for ShadowMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader-set update: a reader sequenced with the new access (`are_parallel`
/// false) is replaced in place, since the newer record strictly dominates
/// it for every future query. A genuinely parallel reader is added instead,
/// evicting from the middle of the set when full — an approximation of
/// "keep leftmost and rightmost" that needs no explicit position tracking.
fn update_readers(
    state: &mut ByteState,
    forest: &mut SpBagForest,
    iid: Iid,
    bid: Bid,
    lockset: &Lockset,
    k: usize,
) {
    let new_record = AccessRecord { iid, bid, lockset: lockset.clone() };
    for r in state.readers.iter_mut() {
        if !forest.are_parallel(r.bid, bid) {
            *r = new_record;
            return;
        }
    }
    if state.readers.len() >= k {
        let mid = state.readers.len() / 2;
        state.readers.remove(mid);
    }
    state.readers.push(new_record);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameId;
    use crate::spbag::BagKind;
    use detsan_abi::Iid;

    fn fid(n: u32) -> FrameId {
        FrameId::for_test(n)
    }

    /// Two sibling bags in the same shape every real spawn pair takes
    /// before its `sync`: `first` already returned into the shared,
    /// still-open P-bag (as if its frame already exited), `second` is
    /// fresh and live — so a record stored against `first` is parallel to
    /// whatever later queries it with `second`.
    fn sibling_bags(forest: &mut SpBagForest) -> (Bid, Bid) {
        let spawner = forest.make_bag(BagKind::S, fid(0));
        let p_bag = forest.make_bag(BagKind::P, fid(0));
        let first = forest.make_bag(BagKind::S, fid(1));
        forest.union_into(first, p_bag);
        let second = forest.make_bag(BagKind::S, fid(2));
        let _ = spawner;
        (first, second)
    }

    #[test]
    fn ww_race_between_parallel_writers() {
        let mut forest = SpBagForest::new();
        let (a, b) = sibling_bags(&mut forest);
        let mut shadow = ShadowMemory::new();
        let ls = Lockset::empty();

        let hits = shadow.check_and_update_write(&mut forest, 0x100, 4, Iid(1), a, &ls, false);
        assert!(hits.is_empty());
        let hits = shadow.check_and_update_write(&mut forest, 0x100, 4, Iid(2), b, &ls, false);
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|h| h.kind == RaceKind::Ww));
    }

    #[test]
    fn sequenced_writes_do_not_race() {
        let mut forest = SpBagForest::new();
        let a = forest.make_bag(BagKind::S, fid(0));
        let b = forest.make_bag(BagKind::S, fid(1));
        forest.union_into(b, a);
        let mut shadow = ShadowMemory::new();
        let ls = Lockset::empty();

        shadow.check_and_update_write(&mut forest, 0x100, 1, Iid(1), a, &ls, false);
        let hits = shadow.check_and_update_write(&mut forest, 0x100, 1, Iid(2), b, &ls, false);
        assert!(hits.is_empty());
    }

    #[test]
    fn read_then_parallel_write_is_rw() {
        let mut forest = SpBagForest::new();
        let (a, b) = sibling_bags(&mut forest);
        let mut shadow = ShadowMemory::new();
        let ls = Lockset::empty();

        shadow.check_and_update_read(&mut forest, 0x200, 1, Iid(1), a, &ls, false);
        let hits = shadow.check_and_update_write(&mut forest, 0x200, 1, Iid(2), b, &ls, false);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, RaceKind::Rw);
    }

    #[test]
    fn write_then_parallel_read_is_wr() {
        let mut forest = SpBagForest::new();
        let (a, b) = sibling_bags(&mut forest);
        let mut shadow = ShadowMemory::new();
        let ls = Lockset::empty();

        shadow.check_and_update_write(&mut forest, 0x300, 1, Iid(1), a, &ls, false);
        let hits = shadow.check_and_update_read(&mut forest, 0x300, 1, Iid(2), b, &ls, false);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, RaceKind::Wr);
    }

    #[test]
    fn shared_lockset_suppresses_race() {
        let mut forest = SpBagForest::new();
        let (a, b) = sibling_bags(&mut forest);
        let mut shadow = ShadowMemory::new();
        let ls = Lockset::empty();

        let mut held = crate::lockset::LockState::new();
        held.acquire(detsan_abi::LockId(1));
        let locked = held.current_lockset();

        shadow.check_and_update_write(&mut forest, 0x400, 1, Iid(1), a, &locked, false);
        let hits = shadow.check_and_update_write(&mut forest, 0x400, 1, Iid(2), b, &locked, false);
        assert!(hits.is_empty());
        let _ = ls;
    }

    #[test]
    fn atomic_region_suppresses_race() {
        let mut forest = SpBagForest::new();
        let (a, b) = sibling_bags(&mut forest);
        let mut shadow = ShadowMemory::new();
        let ls = Lockset::empty();

        shadow.check_and_update_write(&mut forest, 0x500, 1, Iid(1), a, &ls, true);
        let hits = shadow.check_and_update_write(&mut forest, 0x500, 1, Iid(2), b, &ls, true);
        assert!(hits.is_empty());
    }

    #[test]
    fn free_raises_w_free_against_parallel_writer_then_clears() {
        let mut forest = SpBagForest::new();
        let (a, b) = sibling_bags(&mut forest);
        let mut shadow = ShadowMemory::new();
        let ls = Lockset::empty();

        shadow.check_and_update_write(&mut forest, 0x600, 1, Iid(1), a, &ls, false);
        let hits = shadow.free(&mut forest, 0x600, 1, Iid(2), b);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, RaceKind::WFree);
        assert!(!shadow.is_live(0x600));
    }

    #[test]
    fn zero_size_access_is_a_no_op() {
        let mut forest = SpBagForest::new();
        let a = forest.make_bag(BagKind::S, fid(0));
        let mut shadow = ShadowMemory::new();
        let ls = Lockset::empty();
        let hits = shadow.check_and_update_write(&mut forest, 0x700, 0, Iid(1), a, &ls, false);
        assert!(hits.is_empty());
        assert!(!shadow.is_live(0x700));
    }

    #[test]
    fn whole_page_write_stays_compressed_then_expands_on_partial_access() {
        let mut forest = SpBagForest::new();
        let (a, b) = sibling_bags(&mut forest);
        let mut shadow = ShadowMemory::new();
        let ls = Lockset::empty();

        shadow.check_and_update_write(&mut forest, 0x1000, PAGE_SIZE as u64, Iid(1), a, &ls, false);
        assert!(matches!(
            shadow.directory.get(&(0x1000 >> PAGE_BITS)),
            Some(Page::Uniform(_))
        ));

        let hits = shadow.check_and_update_write(&mut forest, 0x1004, 4, Iid(2), b, &ls, false);
        assert_eq!(hits.len(), 4);
        assert!(matches!(
            shadow.directory.get(&(0x1000 >> PAGE_BITS)),
            Some(Page::Expanded(_))
        ));
    }
}
