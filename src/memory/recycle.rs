use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

use super::usage::UsageCounters;
use super::ResourceUsage;

/// Size-classed buffer pool
///
/// Blocks are binned by capacity rounded up to a power of two, so an
/// `acquire(min_capacity)` can serve the smallest retained block that fits
/// instead of the most recently returned one. Used for posting decode
/// blocks, whose sizes vary per term.
pub struct RecyclePool {
    classes: Mutex<BTreeMap<usize, Vec<Vec<u8>>>>,
    counters: UsageCounters,
}

impl RecyclePool {
    pub fn new() -> Self {
        Self {
            classes: Mutex::new(BTreeMap::new()),
            counters: UsageCounters::default(),
        }
    }

    /// Acquire a cleared buffer with at least `min_capacity` bytes
    pub fn acquire(&self, min_capacity: usize) -> RecycledBuffer<'_> {
        let class = size_class(min_capacity);
        let pooled = {
            let mut classes = self.classes.lock();
            let found = classes
                .range_mut(class..)
                .find_map(|(_, blocks)| blocks.pop());
            found
        };

        match pooled {
            Some(buf) => {
                self.counters.on_lease(Some(buf.capacity()));
                RecycledBuffer { pool: self, buf }
            }
            None => {
                self.counters.on_lease(None);
                RecycledBuffer {
                    pool: self,
                    buf: Vec::with_capacity(class),
                }
            }
        }
    }

    /// Keep retained blocks for reuse. All acquisitions must have been
    /// dropped.
    pub fn reset(&self) {
        debug_assert_eq!(
            self.counters.live_buffers(),
            0,
            "RecyclePool::reset with outstanding buffers"
        );
    }

    /// Drop every retained block
    pub fn release(&self) {
        debug_assert_eq!(
            self.counters.live_buffers(),
            0,
            "RecyclePool::release with outstanding buffers"
        );
        let mut classes = self.classes.lock();
        for (_, blocks) in classes.iter_mut() {
            for buf in blocks.drain(..) {
                self.counters.on_drop_pooled(buf.capacity());
            }
        }
        classes.clear();
    }

    pub fn usage(&self) -> ResourceUsage {
        self.counters.snapshot()
    }

    fn recycle(&self, mut buf: Vec<u8>) {
        buf.clear();
        let class = size_class(buf.capacity().max(1));
        self.counters.on_return(buf.capacity());
        self.classes.lock().entry(class).or_default().push(buf);
    }
}

impl Default for RecyclePool {
    fn default() -> Self {
        Self::new()
    }
}

fn size_class(capacity: usize) -> usize {
    capacity.next_power_of_two().max(64)
}

/// A buffer acquired from a `RecyclePool`; returns to its size class on drop
pub struct RecycledBuffer<'a> {
    pool: &'a RecyclePool,
    buf: Vec<u8>,
}

impl Deref for RecycledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for RecycledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for RecycledBuffer<'_> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.recycle(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_classes() {
        assert_eq!(size_class(1), 64);
        assert_eq!(size_class(64), 64);
        assert_eq!(size_class(65), 128);
        assert_eq!(size_class(1000), 1024);
    }

    #[test]
    fn test_acquire_prefers_fitting_block() {
        let pool = RecyclePool::new();
        {
            let mut small = pool.acquire(64);
            small.extend_from_slice(&[1u8; 64]);
            let mut large = pool.acquire(4096);
            large.extend_from_slice(&[2u8; 4096]);
        }
        assert_eq!(pool.usage().pooled_buffers, 2);

        // Asking for something small should not burn the 4K block
        let buf = pool.acquire(32);
        assert!(buf.capacity() < 4096);
        drop(buf);

        let buf = pool.acquire(2048);
        assert!(buf.capacity() >= 4096);
        drop(buf);
    }

    #[test]
    fn test_release_zeroes_usage() {
        let pool = RecyclePool::new();
        {
            let _a = pool.acquire(100);
            let _b = pool.acquire(200);
        }
        pool.release();
        assert!(pool.usage().is_zero());
    }
}
