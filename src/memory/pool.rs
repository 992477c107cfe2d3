use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

use super::usage::UsageCounters;
use super::ResourceUsage;

/// Default capacity for freshly allocated pool buffers
const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;

/// Byte-buffer pool with bulk reclamation
///
/// `lease` hands out a cleared buffer; dropping the lease returns the buffer
/// to the pool with its capacity intact. `reset` keeps retained capacity for
/// the next build cycle, `release` drops it. Leased buffers must be dropped
/// before either call; the usage counters make violations visible.
pub struct MemoryPool {
    free: Mutex<Vec<Vec<u8>>>,
    chunk_bytes: usize,
    counters: UsageCounters,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::with_chunk_bytes(DEFAULT_CHUNK_BYTES)
    }

    pub fn with_chunk_bytes(chunk_bytes: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            chunk_bytes,
            counters: UsageCounters::default(),
        }
    }

    /// Lease an empty buffer from the pool
    pub fn lease(&self) -> PoolBuffer<'_> {
        let pooled = self.free.lock().pop();
        match pooled {
            Some(buf) => {
                self.counters.on_lease(Some(buf.capacity()));
                PoolBuffer { pool: self, buf }
            }
            None => {
                self.counters.on_lease(None);
                PoolBuffer {
                    pool: self,
                    buf: Vec::with_capacity(self.chunk_bytes),
                }
            }
        }
    }

    /// Keep retained buffers for reuse; contents were already cleared on
    /// return. All leases must have been dropped.
    pub fn reset(&self) {
        debug_assert_eq!(
            self.counters.live_buffers(),
            0,
            "MemoryPool::reset with outstanding leases"
        );
    }

    /// Drop all retained buffers, returning their capacity to the allocator
    pub fn release(&self) {
        debug_assert_eq!(
            self.counters.live_buffers(),
            0,
            "MemoryPool::release with outstanding leases"
        );
        let mut free = self.free.lock();
        for buf in free.drain(..) {
            self.counters.on_drop_pooled(buf.capacity());
        }
    }

    /// Current lease and retention counters
    pub fn usage(&self) -> ResourceUsage {
        self.counters.snapshot()
    }

    fn recycle(&self, mut buf: Vec<u8>) {
        buf.clear();
        self.counters.on_return(buf.capacity());
        self.free.lock().push(buf);
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffer leased from a `MemoryPool`; returns to the pool on drop
pub struct PoolBuffer<'a> {
    pool: &'a MemoryPool,
    buf: Vec<u8>,
}

impl Deref for PoolBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PoolBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PoolBuffer<'_> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.recycle(buf);
    }
}
