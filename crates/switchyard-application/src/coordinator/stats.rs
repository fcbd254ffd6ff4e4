use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the coordinator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub fast_writes: u64,
    pub durable_writes: u64,
    /// Fast-tier writes that fell back to the durable tier.
    pub degraded_writes: u64,
    pub fast_hits: u64,
    pub durable_hits: u64,
    pub misses: u64,
    pub promotions: u64,
    pub throttled_promotions: u64,
}

/// Reachability of both tiers as last checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierHealth {
    pub fast_backend: &'static str,
    pub fast_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fast_error: Option<String>,
    pub durable_backend: &'static str,
    pub durable_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable_error: Option<String>,
}

impl TierHealth {
    pub fn is_healthy(&self) -> bool {
        self.fast_available && self.durable_available
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    pub fast_writes: AtomicU64,
    pub durable_writes: AtomicU64,
    pub degraded_writes: AtomicU64,
    pub fast_hits: AtomicU64,
    pub durable_hits: AtomicU64,
    pub misses: AtomicU64,
    pub promotions: AtomicU64,
    pub throttled_promotions: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            fast_writes: self.fast_writes.load(Ordering::Relaxed),
            durable_writes: self.durable_writes.load(Ordering::Relaxed),
            degraded_writes: self.degraded_writes.load(Ordering::Relaxed),
            fast_hits: self.fast_hits.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            throttled_promotions: self.throttled_promotions.load(Ordering::Relaxed),
        }
    }
}
