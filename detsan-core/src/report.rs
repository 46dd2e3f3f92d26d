//! Race Report Store.
//!
//! Deduplicates race records by a canonical fingerprint derived from
//! `(kind, IID_min, IID_max, canonical_call_context)` and tallies distinct
//! vs. suppressed duplicates. `RW` detected from the write side and `WR`
//! detected from the read side of the same pair of accesses are the same
//! underlying race reported from opposite ends; canonicalizing the IID
//! order here, rather than in the shadow layer, keeps that collapse in
//! one place.

use std::collections::HashMap;

use detsan_abi::Iid;
use sha2::{Digest, Sha256};

use crate::shadow::{AccessRecord, RaceHit, RaceKind};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NormalizedKind {
    ReadWrite,
    WriteWrite,
    WriteFree,
    ReadFree,
}

impl std::fmt::Display for NormalizedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NormalizedKind::ReadWrite => "RW",
            NormalizedKind::WriteWrite => "WW",
            NormalizedKind::WriteFree => "W-FREE",
            NormalizedKind::ReadFree => "R-FREE",
        };
        f.write_str(s)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct Fingerprint {
    kind: NormalizedKind,
    iid_min: Iid,
    iid_max: Iid,
    call_context: u64,
}

#[derive(Clone, Debug)]
pub struct RaceReport {
    pub kind: NormalizedKind,
    pub addr: u64,
    /// The two sides of the race in canonical (min, max) IID order —
    /// `first` always carries `iid_min`.
    pub first: AccessRecord,
    pub second: AccessRecord,
    pub object_descriptor: Option<String>,
}

/// Hashes the chain of call-site IIDs from the live frame stack down to
/// the root, giving the "common calling context" the report format
/// names. `sha2` is used here the same way the rest of this workspace's
/// ambient persistence layer fingerprints content.
pub fn hash_call_context(chain: &[Iid]) -> u64 {
    let mut hasher = Sha256::new();
    for iid in chain {
        hasher.update(iid.0.to_le_bytes());
    }
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[0..8].try_into().unwrap())
}

pub struct ReportStore {
    seen: HashMap<Fingerprint, RaceReport>,
    distinct: u64,
    suppressed: u64,
}

impl ReportStore {
    pub fn new() -> Self {
        Self { seen: HashMap::new(), distinct: 0, suppressed: 0 }
    }

    /// Submit a raw shadow-memory hit. Returns `Some(&RaceReport)` the
    /// first time this fingerprint is seen, `None` for a suppressed
    /// duplicate.
    pub fn submit(
        &mut self,
        hit: &RaceHit,
        call_context: &[Iid],
        object_descriptor: Option<String>,
    ) -> Option<&RaceReport> {
        let (kind, first, second) = canonicalize(hit);
        let (iid_min, iid_max) = if first.iid.0 <= second.iid.0 {
            (first.iid, second.iid)
        } else {
            (second.iid, first.iid)
        };
        let fp = Fingerprint { kind, iid_min, iid_max, call_context: hash_call_context(call_context) };

        if self.seen.contains_key(&fp) {
            self.suppressed += 1;
            return None;
        }
        self.distinct += 1;
        let report = RaceReport { kind, addr: hit.addr, first, second, object_descriptor };
        Some(self.seen.entry(fp).or_insert(report))
    }

    pub fn distinct(&self) -> u64 {
        self.distinct
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn reports(&self) -> impl Iterator<Item = &RaceReport> {
        self.seen.values()
    }
}

impl Default for ReportStore {
    fn default() -> Self {
        Self::new()
    }
}

fn canonicalize(hit: &RaceHit) -> (NormalizedKind, AccessRecord, AccessRecord) {
    match hit.kind {
        RaceKind::Rw => (NormalizedKind::ReadWrite, hit.prior.clone(), hit.current.clone()),
        RaceKind::Wr => (NormalizedKind::ReadWrite, hit.current.clone(), hit.prior.clone()),
        RaceKind::Ww => (NormalizedKind::WriteWrite, hit.prior.clone(), hit.current.clone()),
        RaceKind::WFree => (NormalizedKind::WriteFree, hit.prior.clone(), hit.current.clone()),
        RaceKind::RFree => (NormalizedKind::ReadFree, hit.prior.clone(), hit.current.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsu::Dsu;
    use crate::lockset::Lockset;

    fn rec(iid: u32, bid_src: &mut Dsu) -> AccessRecord {
        AccessRecord { iid: Iid(iid), bid: bid_src.make(), lockset: Lockset::empty() }
    }

    #[test]
    fn rw_and_wr_of_the_same_pair_collapse_to_one_fingerprint() {
        let mut dsu = Dsu::new();
        let mut store = ReportStore::new();

        let a = rec(1, &mut dsu);
        let b = rec(2, &mut dsu);
        let hit_rw = RaceHit { kind: RaceKind::Rw, addr: 0x10, prior: a.clone(), current: b.clone() };
        let hit_wr = RaceHit { kind: RaceKind::Wr, addr: 0x10, prior: b, current: a };

        assert!(store.submit(&hit_rw, &[], None).is_some());
        assert!(store.submit(&hit_wr, &[], None).is_none());
        assert_eq!(store.distinct(), 1);
        assert_eq!(store.suppressed(), 1);
    }

    #[test]
    fn distinct_call_contexts_are_separate_fingerprints() {
        let mut dsu = Dsu::new();
        let mut store = ReportStore::new();
        let a = rec(1, &mut dsu);
        let b = rec(2, &mut dsu);
        let hit = RaceHit { kind: RaceKind::Ww, addr: 0x20, prior: a, current: b };

        store.submit(&hit, &[Iid(100)], None);
        store.submit(&hit, &[Iid(200)], None);
        assert_eq!(store.distinct(), 2);
        assert_eq!(store.suppressed(), 0);
    }
}
