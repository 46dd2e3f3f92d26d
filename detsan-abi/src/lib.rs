//! Wire-format definitions shared between the (out-of-scope) compiler
//! instrumentation pass and the detsan core.
//!
//! The instrumentor calls a flat `__csan_*`/`__csi_*` callback table (see
//! spec §6). This crate defines the event shapes those calls carry so the
//! core can consume them without depending on the instrumentor's ABI
//! directly. Types here are `#[repr(C)]` and `Pod` so a real FFI shim can
//! hand them across the boundary without copies; the instrumentor itself
//! is never implemented in this workspace.

use bytemuck::{Pod, Zeroable};

/// Opaque instruction identifier assigned by the instrumentor to a static
/// memory-access (or call/spawn/sync) site. Resolvable out-of-band to a
/// source location by a symbolizer this crate does not implement.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Iid(pub u32);

impl Iid {
    pub const UNKNOWN: Iid = Iid(u32::MAX);

    pub const fn is_unknown(self) -> bool {
        self.0 == u32::MAX
    }
}

impl std::fmt::Display for Iid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A sync-region identifier, scoping which spawns a `sync` collapses.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncRegion(pub u32);

/// An opaque lock identity, as registered via `acquire_lock`/`release_lock`
/// or the fake-lock interface (spec §4.6, §9 of SPEC_FULL.md).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LockId(pub u64);

/// Allocation/heap-object kind, per spec §3's Allocation Record.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AllocKind {
    Heap = 0,
    Stack = 1,
    Global = 2,
    Vla = 3,
}

/// The memory-access side of an event: which intrinsic triggered it, if
/// any intrinsic beyond an ordinary load/store (spec §9's gather-intrinsic
/// supplement — modeled as a plain multi-byte access, see SPEC_FULL.md).
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AccessKind {
    Load,
    Store,
    AtomicRmw,
}

/// One event in the instrumented execution's event stream (spec §6's
/// callback table, flattened into a single tagged enum for replay).
///
/// Not `Copy`: `AllocBegin`'s `name_hint` carries an owned `String`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "event", rename_all = "snake_case"))]
pub enum Event {
    FuncEntry { iid: Iid },
    FuncExit { iid: Iid },
    /// `cilk_spawn` / detach: the callee is the spawned child.
    Detach { iid: Iid, syncreg: SyncRegion },
    /// Reached once the spawner's continuation resumes after a detach.
    DetachContinue { iid: Iid, syncreg: SyncRegion },
    Sync { syncreg: SyncRegion },
    Load { iid: Iid, addr: u64, size: u32 },
    Store { iid: Iid, addr: u64, size: u32 },
    AtomicRmw { iid: Iid, addr: u64, size: u32 },
    BeforeCall { iid: Iid, target: Option<Iid> },
    AfterCall { iid: Iid },
    AtomicBegin,
    AtomicEnd,
    AcquireLock { lock: LockId },
    ReleaseLock { lock: LockId },
    RegisterLock { lock: LockId },
    UnregisterLock { lock: LockId },
    AllocBegin {
        kind: AllocKind,
        addr: u64,
        size: u64,
        name_hint: Option<String>,
    },
    AllocEnd,
    Free { addr: u64 },
    /// `__cilksan_disable_checking` / `enable_checking` (spec §4.5, §6).
    DisableChecking,
    EnableChecking,
}

impl Event {
    /// True for events that carry a byte-granular memory access.
    pub const fn is_memory_access(&self) -> bool {
        matches!(self, Event::Load { .. } | Event::Store { .. } | Event::AtomicRmw { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iid_unknown_roundtrip() {
        assert!(Iid::UNKNOWN.is_unknown());
        assert!(!Iid(0).is_unknown());
    }

    #[test]
    fn iid_display_is_hex() {
        assert_eq!(format!("{}", Iid(0xBEEF)), "0xbeef");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn event_roundtrip() {
        let ev = Event::Store { iid: Iid(7), addr: 0x1000, size: 4 };
        let json = serde_json::to_string(&ev).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }

    #[test]
    fn pod_types_are_plain_old_data() {
        fn assert_pod<T: Pod>() {}
        assert_pod::<Iid>();
        assert_pod::<SyncRegion>();
        assert_pod::<LockId>();
    }
}
