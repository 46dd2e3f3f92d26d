//! Mode (b) concurrency model (spec §5): sharded per-worker state
//! reconciled at sync.
//!
//! Each worker owns its own [`Engine`] — its own DSU arena, shadow memory,
//! call stack and frame model — exactly as if it were running on its own
//! core of a fork-join program. `merge_at_sync` is the rendezvous a real
//! runtime integration would call when workers converge at a `sync`
//! event: spec §5 names the race report store, the allocation interval
//! map, and (optionally) a metrics snapshot as the only structures shared
//! across workers, so that is all this folds together here. No OS threads
//! are wired up (the host parallel runtime is out of scope per spec §1) —
//! this models the data-flow shape so a later runtime integration would
//! not require redesigning `Engine`.

use detsan_abi::Event;

use crate::engine::{Engine, EngineConfig};

pub struct Worker {
    id: usize,
    engine: Engine,
}

impl Worker {
    pub fn new(id: usize, config: EngineConfig) -> Self {
        Self { id, engine: Engine::new(config) }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn dispatch(&mut self, event: &Event) {
        self.engine.handle(event);
    }
}

/// Owns one [`Engine`] per worker and reconciles their race tallies at a
/// sync rendezvous.
pub struct ShardedDispatcher {
    workers: Vec<Worker>,
}

impl ShardedDispatcher {
    pub fn new(worker_count: usize, config_for: impl Fn(usize) -> EngineConfig) -> Self {
        let workers = (0..worker_count).map(|id| Worker::new(id, config_for(id))).collect();
        Self { workers }
    }

    pub fn worker(&mut self, id: usize) -> &mut Worker {
        &mut self.workers[id]
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Combine every worker's collected (distinct, suppressed) race
    /// counts. This is the one point mode (b) needs a shared view across
    /// workers; nothing here requires a lock held across an event
    /// boundary, since each worker's `Engine` runs to its own sync point
    /// before this is called.
    pub fn merge_at_sync(&self) -> (u64, u64) {
        self.workers.iter().fold((0, 0), |(distinct, suppressed), w| {
            (distinct + w.engine().reports().distinct(), suppressed + w.engine().reports().suppressed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detsan_abi::{Iid, SyncRegion};

    #[test]
    fn each_worker_keeps_independent_state() {
        let mut sharded = ShardedDispatcher::new(2, |_| EngineConfig::default());

        sharded.worker(0).dispatch(&Event::FuncEntry { iid: Iid(1) });
        sharded.worker(0).dispatch(&Event::Store { iid: Iid(2), addr: 0x1000, size: 4 });
        sharded.worker(0).dispatch(&Event::FuncExit { iid: Iid(1) });

        sharded.worker(1).dispatch(&Event::FuncEntry { iid: Iid(3) });
        sharded.worker(1).dispatch(&Event::Store { iid: Iid(4), addr: 0x2000, size: 4 });
        sharded.worker(1).dispatch(&Event::FuncExit { iid: Iid(3) });

        assert_eq!(sharded.worker(0).engine().events_processed(), 3);
        assert_eq!(sharded.worker(1).engine().events_processed(), 3);
        let (distinct, suppressed) = sharded.merge_at_sync();
        assert_eq!(distinct, 0);
        assert_eq!(suppressed, 0);
    }

    #[test]
    fn merge_at_sync_sums_every_worker_report_tally() {
        let mut sharded = ShardedDispatcher::new(2, |_| EngineConfig::default());
        let syncreg = SyncRegion(1);

        // Two siblings per worker racing `++x` on a shared address: the
        // first sibling's accesses are sequenced with nothing, but the
        // second sibling's load/store race the first's, same shape as
        // `scenarios::racy_increment_fan`.
        for worker_id in 0..2 {
            let w = sharded.worker(worker_id);
            for _ in 0..2 {
                w.dispatch(&Event::Detach { iid: Iid(11), syncreg });
                w.dispatch(&Event::FuncEntry { iid: Iid(12) });
                w.dispatch(&Event::Load { iid: Iid(13), addr: 0x9000, size: 4 });
                w.dispatch(&Event::Store { iid: Iid(14), addr: 0x9000, size: 4 });
                w.dispatch(&Event::FuncExit { iid: Iid(12) });
                w.dispatch(&Event::DetachContinue { iid: Iid(11), syncreg });
            }
            w.dispatch(&Event::Sync { syncreg });
        }

        let (distinct, _suppressed) = sharded.merge_at_sync();
        assert!(distinct >= 2, "each worker should find its own RW/WW pair on its own shard");
    }
}
