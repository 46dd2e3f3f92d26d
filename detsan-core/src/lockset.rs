//! Lock Set & Atomic Region (spec §4.6).
//!
//! Two accesses that would otherwise race are suppressed if their locksets
//! intersect, or if either is inside an atomic region. Locks are process-
//! wide state (a real mutex is held across whatever frames happen to be
//! live while it's held), so — unlike the per-frame S/P bags — the active
//! lockset and atomic-region depth live on one shared [`LockState`], not on
//! individual [`crate::frame::Frame`]s.

use detsan_abi::LockId;

/// A lockset fingerprint: a sorted, deduplicated snapshot of held locks,
/// compared by set equality (spec §3: "compared by set equality, not by
/// hash collision"). Cheap to clone; shadow entries keep one per access.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Lockset(Vec<LockId>);

impl Lockset {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn intersects(&self, other: &Lockset) -> bool {
        // Both sides are sorted and deduplicated; a linear merge-scan
        // avoids allocating to answer a yes/no question.
        let (mut i, mut j) = (0, 0);
        while i < self.0.len() && j < other.0.len() {
            match self.0[i].0.cmp(&other.0[j].0) {
                std::cmp::Ordering::Equal => return true,
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Tracks the currently-held real and fake locks, and the atomic-region
/// nesting depth, for the whole process. A "fake lock" is any opaque
/// identifier user code registers purely to gain race suppression, with
/// no actual mutual-exclusion semantics enforced by this tool (spec §4.6;
/// the convenience RAII wrapper is [`FakeLockGuard`]).
pub struct LockState {
    held: Vec<LockId>,
    registered_fake: Vec<LockId>,
    atomic_depth: u32,
}

impl LockState {
    pub fn new() -> Self {
        Self { held: Vec::new(), registered_fake: Vec::new(), atomic_depth: 0 }
    }

    pub fn acquire(&mut self, lock: LockId) {
        if let Err(pos) = self.held.binary_search_by_key(&lock.0, |l| l.0) {
            self.held.insert(pos, lock);
        }
    }

    pub fn release(&mut self, lock: LockId) {
        if let Ok(pos) = self.held.binary_search_by_key(&lock.0, |l| l.0) {
            self.held.remove(pos);
        }
    }

    /// Register an opaque fake-lock identity; it behaves exactly like a
    /// real lock from the checker's point of view once acquired.
    pub fn register_fake(&mut self, lock: LockId) {
        if !self.registered_fake.contains(&lock) {
            self.registered_fake.push(lock);
        }
    }

    pub fn unregister_fake(&mut self, lock: LockId) {
        self.registered_fake.retain(|l| *l != lock);
    }

    pub fn atomic_begin(&mut self) {
        self.atomic_depth += 1;
    }

    pub fn atomic_end(&mut self) {
        self.atomic_depth = self.atomic_depth.saturating_sub(1);
    }

    pub fn in_atomic_region(&self) -> bool {
        self.atomic_depth > 0
    }

    /// Snapshot the current lockset for attaching to an access record.
    pub fn current_lockset(&self) -> Lockset {
        Lockset(self.held.clone())
    }
}

impl Default for LockState {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII convenience wrapper mirroring the control API's `Cilksan_fake_lock`
/// idiom (spec §9 supplement, grounded in the original tool's
/// `cilksan_fake_mutex`/`cilksan_fake_lock_guard`): acquiring a fake lock
/// for the scope of a value without the caller having to pair
/// `register_fake`/`acquire`/`release` calls by hand.
pub struct FakeLockGuard<'a> {
    state: &'a mut LockState,
    lock: LockId,
}

impl<'a> FakeLockGuard<'a> {
    pub fn new(state: &'a mut LockState, lock: LockId) -> Self {
        state.register_fake(lock);
        state.acquire(lock);
        Self { state, lock }
    }
}

impl Drop for FakeLockGuard<'_> {
    fn drop(&mut self) {
        self.state.release(self.lock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_locksets_do_not_intersect() {
        let mut a = LockState::new();
        a.acquire(LockId(1));
        let set_a = a.current_lockset();

        let mut b = LockState::new();
        b.acquire(LockId(2));
        let set_b = b.current_lockset();

        assert!(!set_a.intersects(&set_b));
    }

    #[test]
    fn shared_lock_makes_locksets_intersect() {
        let mut a = LockState::new();
        a.acquire(LockId(1));
        a.acquire(LockId(5));

        let mut b = LockState::new();
        b.acquire(LockId(5));

        assert!(a.current_lockset().intersects(&b.current_lockset()));
    }

    #[test]
    fn fake_lock_guard_releases_on_drop() {
        let mut state = LockState::new();
        {
            let _guard = FakeLockGuard::new(&mut state, LockId(9));
            assert!(!state.current_lockset().is_empty());
        }
        assert!(state.current_lockset().is_empty());
    }

    #[test]
    fn atomic_region_nests() {
        let mut state = LockState::new();
        assert!(!state.in_atomic_region());
        state.atomic_begin();
        state.atomic_begin();
        assert!(state.in_atomic_region());
        state.atomic_end();
        assert!(state.in_atomic_region());
        state.atomic_end();
        assert!(!state.in_atomic_region());
    }
}
