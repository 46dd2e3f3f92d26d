//! Event Dispatcher (spec §4.8).
//!
//! Routes the instrumented program's event stream into an [`Engine`] in
//! strict emission order — mode (a) of spec §5, the correctness reference.
//! Well-formedness is enforced by the components that notice a violation
//! (`frame.rs`'s unmatched exit/detach_continue, `dsu.rs`'s unknown bag id)
//! via the `fatal!` macro; the dispatcher itself adds no reordering or
//! buffering of its own. Mode (b), sharded per-worker state reconciled at
//! sync, lives in the sibling [`sequencer`] module.

pub mod sequencer;

pub use sequencer::{ShardedDispatcher, Worker};

use detsan_abi::Event;
use log::trace;

use crate::engine::Engine;

/// Serial dispatcher: one [`Engine`], one event at a time, in order.
pub struct Dispatcher {
    engine: Engine,
    events_dispatched: u64,
}

impl Dispatcher {
    pub fn new(engine: Engine) -> Self {
        Self { engine, events_dispatched: 0 }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Feed one event to the engine.
    pub fn dispatch(&mut self, event: &Event) {
        trace!("dispatch #{}: {event:?}", self.events_dispatched);
        self.engine.handle(event);
        self.events_dispatched += 1;
    }

    /// Feed a whole trace, in the order given — callers are responsible
    /// for emission order matching the well-nestedness spec §4.5 assumes.
    pub fn dispatch_all<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) {
        for event in events {
            self.dispatch(event);
        }
    }

    pub fn events_dispatched(&self) -> u64 {
        self.events_dispatched
    }

    pub fn into_engine(self) -> Engine {
        self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use detsan_abi::Iid;

    #[test]
    fn dispatch_all_feeds_events_in_order_and_counts_them() {
        let mut dispatcher = Dispatcher::new(Engine::new(EngineConfig::default()));
        let events = vec![
            Event::FuncEntry { iid: Iid(1) },
            Event::Store { iid: Iid(2), addr: 0x100, size: 4 },
            Event::FuncExit { iid: Iid(1) },
        ];
        dispatcher.dispatch_all(&events);
        assert_eq!(dispatcher.events_dispatched(), 3);
        assert_eq!(dispatcher.engine().events_processed(), 3);
    }
}
