//! The detector's single owning struct — a process-wide state block
//! initialized by the runtime's `atinit` hook and torn down by `atexit`.
//! Every other component in this crate — the DSU, the SP-bag forest,
//! shadow memory, the call stack, lockset/atomic state, the allocation
//! tracker, and the report store — lives here as a sibling field, and
//! [`Engine::handle`] is the sole entry point events reach.

use std::sync::Arc;

use detsan_abi::{AllocKind, Event};
use log::{debug, trace, warn};

use crate::alloc::AllocTracker;
use crate::checker;
use crate::frame::CallStack;
use crate::lockset::LockState;
use crate::metrics::Metrics;
use crate::report::ReportStore;
use crate::shadow::ShadowMemory;
use crate::spbag::SpBagForest;

pub struct EngineConfig {
    pub reader_set_k: usize,
    /// `CILKSAN_DISABLE`: when true, every event is accepted and ignored.
    pub disabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { reader_set_k: crate::shadow::DEFAULT_READER_SET_K, disabled: false }
    }
}

pub struct Engine {
    forest: SpBagForest,
    call_stack: CallStack,
    shadow: ShadowMemory,
    locks: LockState,
    alloc: AllocTracker,
    reports: ReportStore,
    enabled: bool,
    events_processed: u64,
    metrics: Option<Arc<Metrics>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let mut forest = SpBagForest::new();
        let call_stack = CallStack::new(&mut forest);
        Self {
            forest,
            call_stack,
            shadow: ShadowMemory::with_reader_set_k(config.reader_set_k),
            locks: LockState::new(),
            alloc: AllocTracker::new(),
            reports: ReportStore::new(),
            enabled: !config.disabled,
            events_processed: 0,
            metrics: None,
        }
    }

    /// Publish counters to a shared [`Metrics`] as events are processed —
    /// used by `main` and the optional monitoring surface (`api`), never
    /// required for correctness.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn reports(&self) -> &ReportStore {
        &self.reports
    }

    /// `__cilksan_is_checking_enabled` (SPEC_FULL.md §9 supplement): the
    /// control API's enable/disable pair implies a query, which spec.md's
    /// distillation dropped but `cilksan.h` exposes.
    pub fn is_checking_enabled(&self) -> bool {
        self.enabled && !self.call_stack.is_suppressed()
    }

    /// Process one event from the instrumented stream (spec §4.8: the
    /// dispatcher routes here in strict emission order; this is where
    /// well-formedness is enforced — a malformed stream is fatal).
    pub fn handle(&mut self, event: &Event) {
        self.events_processed += 1;
        trace!("event #{}: {:?}", self.events_processed, event);
        if let Some(m) = &self.metrics {
            m.inc_events();
        }

        if !self.enabled {
            return;
        }

        match event.clone() {
            Event::FuncEntry { iid } => self.call_stack.on_func_entry(&mut self.forest, iid),
            Event::FuncExit { .. } => self.call_stack.on_func_exit(&mut self.forest),
            Event::Detach { syncreg, .. } => self.call_stack.on_detach(&mut self.forest, syncreg),
            Event::DetachContinue { syncreg, .. } => self.call_stack.on_detach_continue(syncreg),
            Event::Sync { syncreg } => self.call_stack.on_sync(&mut self.forest, syncreg),

            Event::Load { iid, addr, size } => checker::on_load(
                self.enabled,
                &mut self.forest,
                &mut self.shadow,
                &self.call_stack,
                &self.locks,
                &self.alloc,
                &mut self.reports,
                iid,
                addr,
                size as u64,
            ),
            Event::Store { iid, addr, size } => checker::on_store(
                self.enabled,
                &mut self.forest,
                &mut self.shadow,
                &self.call_stack,
                &self.locks,
                &self.alloc,
                &mut self.reports,
                iid,
                addr,
                size as u64,
            ),
            Event::AtomicRmw { iid, addr, size } => checker::on_atomic_rmw(
                self.enabled,
                &mut self.forest,
                &mut self.shadow,
                &self.call_stack,
                &self.locks,
                &self.alloc,
                &mut self.reports,
                iid,
                addr,
                size as u64,
            ),

            Event::BeforeCall { .. } | Event::AfterCall { .. } => {
                // Call boundaries are only relevant to the (out-of-scope)
                // symbolizer's source attribution; the bag transitions they
                // bracket arrive as ordinary FuncEntry/FuncExit.
            }

            Event::AtomicBegin => self.locks.atomic_begin(),
            Event::AtomicEnd => self.locks.atomic_end(),
            Event::AcquireLock { lock } => self.locks.acquire(lock),
            Event::ReleaseLock { lock } => self.locks.release(lock),
            Event::RegisterLock { lock } => self.locks.register_fake(lock),
            Event::UnregisterLock { lock } => self.locks.unregister_fake(lock),

            Event::AllocBegin { kind, addr, size, ref name_hint } => {
                self.handle_alloc(kind, addr, size, name_hint.clone());
            }
            Event::AllocEnd => {}
            Event::Free { addr } => self.handle_free(addr),

            Event::DisableChecking => self.call_stack.disable_checking(),
            Event::EnableChecking => self.call_stack.enable_checking(),
        }

        if let Some(m) = &self.metrics {
            m.record_report_counts(self.reports.distinct(), self.reports.suppressed());
        }
    }

    fn handle_alloc(&mut self, kind: AllocKind, addr: u64, size: u64, name_hint: Option<String>) {
        if let Some(existing) = self.alloc.record_at(addr) {
            if existing.lo == addr {
                // Reallocation landing on the same address (spec B2): the
                // old range must be freed, and its races checked, before
                // the new allocation is recorded.
                debug!("realloc at {addr:#x} reuses its prior address");
                self.do_free(addr, detsan_abi::Iid::UNKNOWN);
                self.alloc.alloc(kind, addr, size, name_hint);
                if let Some(m) = &self.metrics {
                    m.inc_alloc();
                }
                return;
            }
        }
        self.alloc.alloc(kind, addr, size, name_hint);
        if let Some(m) = &self.metrics {
            m.inc_alloc();
        }
    }

    fn handle_free(&mut self, addr: u64) {
        self.do_free(addr, detsan_abi::Iid::UNKNOWN);
    }

    fn do_free(&mut self, addr: u64, free_iid: detsan_abi::Iid) {
        let record = match self.alloc.record_at(addr) {
            Some(r) if r.lo == addr => r.clone(),
            _ => {
                warn!("free of address {addr:#x} with no matching live allocation");
                return;
            }
        };
        let size = record.hi - record.lo;
        checker::on_free(
            &mut self.forest,
            &mut self.shadow,
            &self.call_stack,
            &self.alloc,
            &mut self.reports,
            free_iid,
            addr,
            size,
        );
        self.alloc.free(addr);
        if let Some(m) = &self.metrics {
            m.inc_free();
        }
    }
}
