//! Paging counters, updated lock-free from any faulting thread.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PagerStats {
    page_faults: AtomicU64,
    spurious_faults: AtomicU64,
    evictions: AtomicU64,
    page_ins: AtomicU64,
    page_outs: AtomicU64,
    image_loads: AtomicU64,
    zero_fills: AtomicU64,
}

/// Point-in-time copy of [`PagerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub page_faults: u64,
    /// Faults on a page that was already valid by the time they were handled.
    pub spurious_faults: u64,
    pub evictions: u64,
    pub page_ins: u64,
    pub page_outs: u64,
    /// Pages filled (at least partly) from the executable image.
    pub image_loads: u64,
    pub zero_fills: u64,
}

impl PagerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_fault(&self) {
        self.page_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_spurious_fault(&self) {
        self.spurious_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_page_in(&self) {
        self.page_ins.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_page_out(&self) {
        self.page_outs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_image_load(&self) {
        self.image_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_zero_fill(&self) {
        self.zero_fills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            page_faults: self.page_faults.load(Ordering::Relaxed),
            spurious_faults: self.spurious_faults.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            page_ins: self.page_ins.load(Ordering::Relaxed),
            page_outs: self.page_outs.load(Ordering::Relaxed),
            image_loads: self.image_loads.load(Ordering::Relaxed),
            zero_fills: self.zero_fills.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "faults={} (spurious {}) evictions={} page-ins={} page-outs={} image-loads={} zero-fills={}",
            self.page_faults,
            self.spurious_faults,
            self.evictions,
            self.page_ins,
            self.page_outs,
            self.image_loads,
            self.zero_fills
        )
    }
}
