use std::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot of a pool's live state
///
/// `live_buffers` counts leases currently held by callers; `pooled_buffers`
/// and `pooled_bytes` describe capacity retained inside the pool for reuse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub live_buffers: usize,
    pub pooled_buffers: usize,
    pub pooled_bytes: usize,
}

impl ResourceUsage {
    /// True when nothing is leased and nothing is retained
    pub fn is_zero(&self) -> bool {
        self.live_buffers == 0 && self.pooled_buffers == 0 && self.pooled_bytes == 0
    }
}

/// Per-pool atomic counters behind the `ResourceUsage` snapshots
#[derive(Debug, Default)]
pub(crate) struct UsageCounters {
    live_buffers: AtomicUsize,
    pooled_buffers: AtomicUsize,
    pooled_bytes: AtomicUsize,
}

impl UsageCounters {
    pub fn on_lease(&self, pooled_capacity: Option<usize>) {
        self.live_buffers.fetch_add(1, Ordering::Relaxed);
        if let Some(cap) = pooled_capacity {
            self.pooled_buffers.fetch_sub(1, Ordering::Relaxed);
            self.pooled_bytes.fetch_sub(cap, Ordering::Relaxed);
        }
    }

    pub fn on_return(&self, capacity: usize) {
        self.live_buffers.fetch_sub(1, Ordering::Relaxed);
        self.pooled_buffers.fetch_add(1, Ordering::Relaxed);
        self.pooled_bytes.fetch_add(capacity, Ordering::Relaxed);
    }

    pub fn on_drop_pooled(&self, capacity: usize) {
        self.pooled_buffers.fetch_sub(1, Ordering::Relaxed);
        self.pooled_bytes.fetch_sub(capacity, Ordering::Relaxed);
    }

    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ResourceUsage {
        ResourceUsage {
            live_buffers: self.live_buffers.load(Ordering::Relaxed),
            pooled_buffers: self.pooled_buffers.load(Ordering::Relaxed),
            pooled_bytes: self.pooled_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_lifecycle() {
        let counters = UsageCounters::default();
        assert!(counters.snapshot().is_zero());

        counters.on_lease(None);
        assert_eq!(counters.snapshot().live_buffers, 1);

        counters.on_return(1024);
        let usage = counters.snapshot();
        assert_eq!(usage.live_buffers, 0);
        assert_eq!(usage.pooled_buffers, 1);
        assert_eq!(usage.pooled_bytes, 1024);

        counters.on_lease(Some(1024));
        counters.on_return(2048);
        counters.on_drop_pooled(2048);
        assert!(counters.snapshot().is_zero());
    }
}
