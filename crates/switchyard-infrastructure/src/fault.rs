//! Fault injection for the in-memory backends.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Simulated outage and latency shared by one in-memory backend.
#[derive(Debug, Default)]
pub struct FaultSwitch {
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl FaultSwitch {
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    /// Delay added before every call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Applies the configured latency, then reports whether the call may proceed.
    pub async fn pass(&self) -> bool {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.is_available()
    }
}
