//! Ambient metrics: one struct of atomics, safe to read from the optional
//! monitoring surface (`api`) concurrently with the detector's hot path
//! writing to it, with no lock anywhere on that path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Live counters for one detector run. Every field is an atomic so the
/// optional `/metrics` endpoint can snapshot them lock-free, without ever
/// blocking `Engine::handle`.
pub struct Metrics {
    pub events_processed: AtomicU64,
    pub races_distinct: AtomicU64,
    pub races_suppressed: AtomicU64,
    pub shadow_pages_allocated: AtomicU64,
    pub shadow_page_expansions: AtomicU64,
    pub shadow_page_recompressions: AtomicU64,
    pub dsu_unions: AtomicU64,
    pub dsu_nodes_allocated: AtomicU64,
    pub allocations_live: AtomicU64,
    pub allocations_total: AtomicU64,
    pub frees_total: AtomicU64,
    pub stale_shadow_entries_dropped: AtomicU64,
    start_time: SystemTime,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_processed: AtomicU64::new(0),
            races_distinct: AtomicU64::new(0),
            races_suppressed: AtomicU64::new(0),
            shadow_pages_allocated: AtomicU64::new(0),
            shadow_page_expansions: AtomicU64::new(0),
            shadow_page_recompressions: AtomicU64::new(0),
            dsu_unions: AtomicU64::new(0),
            dsu_nodes_allocated: AtomicU64::new(0),
            allocations_live: AtomicU64::new(0),
            allocations_total: AtomicU64::new(0),
            frees_total: AtomicU64::new(0),
            stale_shadow_entries_dropped: AtomicU64::new(0),
            start_time: SystemTime::now(),
        }
    }

    pub fn inc_events(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report_counts(&self, distinct: u64, suppressed: u64) {
        self.races_distinct.store(distinct, Ordering::Relaxed);
        self.races_suppressed.store(suppressed, Ordering::Relaxed);
    }

    pub fn inc_dsu_union(&self) {
        self.dsu_unions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dsu_node(&self) {
        self.dsu_nodes_allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_alloc(&self) {
        self.allocations_total.fetch_add(1, Ordering::Relaxed);
        self.allocations_live.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_free(&self) {
        self.frees_total.fetch_add(1, Ordering::Relaxed);
        self.allocations_live.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn inc_stale_shadow_dropped(&self) {
        self.stale_shadow_entries_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().map(|d| d.as_secs()).unwrap_or(0)
    }

    /// A point-in-time snapshot suitable for the `/metrics` JSON body or a
    /// closing summary line.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            races_distinct: self.races_distinct.load(Ordering::Relaxed),
            races_suppressed: self.races_suppressed.load(Ordering::Relaxed),
            shadow_pages_allocated: self.shadow_pages_allocated.load(Ordering::Relaxed),
            dsu_unions: self.dsu_unions.load(Ordering::Relaxed),
            allocations_live: self.allocations_live.load(Ordering::Relaxed),
            uptime_seconds: self.uptime_seconds(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub events_processed: u64,
    pub races_distinct: u64,
    pub races_suppressed: u64,
    pub shadow_pages_allocated: u64,
    pub dsu_unions: u64,
    pub allocations_live: u64,
    pub uptime_seconds: u64,
}
