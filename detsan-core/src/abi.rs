//! Thin FFI boundary illustrating how a compiler instrumentation pass
//! would actually reach the engine: flat `__csan_*`/`__csi_*` callbacks by
//! C linkage, each translating its fixed-arity arguments into one
//! [`Event`] and handing it to a process-wide [`Engine`].
//!
//! None of this is exercised by a real compiler pass in this workspace —
//! there is no instrumentor here — but the shape below is what a CSI
//! runtime shim would link against, and `scenarios.rs` drives the same
//! `Engine::handle` entry point these functions call.

use std::sync::OnceLock;
use std::sync::Mutex;

use detsan_abi::{AllocKind, Event, Iid, LockId, SyncRegion};

use crate::engine::{Engine, EngineConfig};

static ENGINE: OnceLock<Mutex<Engine>> = OnceLock::new();

fn engine() -> &'static Mutex<Engine> {
    ENGINE.get_or_init(|| Mutex::new(Engine::new(EngineConfig::default())))
}

fn dispatch(event: Event) {
    engine().lock().expect("engine mutex poisoned").handle(&event);
}

#[no_mangle]
pub extern "C" fn __csan_func_entry(iid: u32) {
    dispatch(Event::FuncEntry { iid: Iid(iid) });
}

#[no_mangle]
pub extern "C" fn __csan_func_exit(iid: u32) {
    dispatch(Event::FuncExit { iid: Iid(iid) });
}

#[no_mangle]
pub extern "C" fn __csan_detach(iid: u32, syncreg: u32) {
    dispatch(Event::Detach { iid: Iid(iid), syncreg: SyncRegion(syncreg) });
}

#[no_mangle]
pub extern "C" fn __csan_detach_continue(iid: u32, syncreg: u32) {
    dispatch(Event::DetachContinue { iid: Iid(iid), syncreg: SyncRegion(syncreg) });
}

#[no_mangle]
pub extern "C" fn __csan_sync(syncreg: u32) {
    dispatch(Event::Sync { syncreg: SyncRegion(syncreg) });
}

#[no_mangle]
pub extern "C" fn __csan_after_load(iid: u32, addr: u64, size: u32) {
    dispatch(Event::Load { iid: Iid(iid), addr, size });
}

#[no_mangle]
pub extern "C" fn __csan_after_store(iid: u32, addr: u64, size: u32) {
    dispatch(Event::Store { iid: Iid(iid), addr, size });
}

#[no_mangle]
pub extern "C" fn __csan_atomic_rmw(iid: u32, addr: u64, size: u32) {
    dispatch(Event::AtomicRmw { iid: Iid(iid), addr, size });
}

#[no_mangle]
pub extern "C" fn __csan_atomic_begin() {
    dispatch(Event::AtomicBegin);
}

#[no_mangle]
pub extern "C" fn __csan_atomic_end() {
    dispatch(Event::AtomicEnd);
}

#[no_mangle]
pub extern "C" fn __csan_acquire_lock(lock: u64) {
    dispatch(Event::AcquireLock { lock: LockId(lock) });
}

#[no_mangle]
pub extern "C" fn __csan_release_lock(lock: u64) {
    dispatch(Event::ReleaseLock { lock: LockId(lock) });
}

#[no_mangle]
pub extern "C" fn __csan_free(addr: u64) {
    dispatch(Event::Free { addr });
}

/// User-facing control API: idempotent, and a no-op when called
/// from outside an instrumented frame — which in this shim simply means
/// "the global engine hasn't been initialized yet," handled by
/// `OnceLock::get_or_init` above rather than by a readiness check here.
#[no_mangle]
pub extern "C" fn __cilksan_disable_checking() {
    dispatch(Event::DisableChecking);
}

#[no_mangle]
pub extern "C" fn __cilksan_enable_checking() {
    dispatch(Event::EnableChecking);
}

#[no_mangle]
pub extern "C" fn __csan_alloc_begin_heap(addr: u64, size: u64) {
    dispatch(Event::AllocBegin { kind: AllocKind::Heap, addr, size, name_hint: None });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_calls_share_one_process_wide_engine() {
        __csan_func_entry(1);
        __csan_after_store(2, 0x4000, 4);
        __csan_func_exit(1);
        let count = engine().lock().unwrap().events_processed();
        assert!(count >= 3);
    }
}
