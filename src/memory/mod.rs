//! Buffer pools for the index build path
//!
//! The build pipeline never frees intermediate buffers one by one: buffers
//! are leased from a pool, returned on drop, and reclaimed in bulk with
//! `reset` (capacity kept) or `release` (capacity dropped). Usage counters
//! on every pool can be asserted zero between builds to detect leaks.

mod pool;
mod recycle;
mod usage;

pub use pool::{MemoryPool, PoolBuffer};
pub use recycle::{RecycledBuffer, RecyclePool};
pub use usage::ResourceUsage;
