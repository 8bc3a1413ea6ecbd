//! FRKB caching subsystem: per-user bloom filters as a probabilistic
//! membership accelerator, plus a process-local LRU for read-mostly
//! snapshots. Both layers are advisory; authoritative answers always come
//! from the stores.

pub mod bloom;
pub mod ephemeral;

pub use bloom::{
    BloomAggregate, BloomAnswer, BloomBatchAnswer, BloomConfig, BloomFilterCache, BloomSource,
    BloomStats,
};
pub use ephemeral::{CacheStats, EphemeralCache, EphemeralCacheConfig};
