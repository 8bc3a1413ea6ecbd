//! Configuration for the sync engine.

use serde::{Deserialize, Serialize};

use frkb_cache::{BloomConfig, EphemeralCacheConfig};

/// Tuning for the sync engine and its caches.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Maximum elements per write-path batch.
    pub batch_size: usize,
    /// Page size for diff-session pulls.
    pub page_size: usize,
    /// Diff-session lifetime in seconds.
    pub session_ttl_secs: u64,
    /// Hard cap on the client payload of a whole-set analyze.
    pub analyze_max_client: usize,
    /// Default per-user fingerprint limit when the directory has no record.
    pub default_fingerprint_limit: u64,
    /// Age after which a live sync lock may be forcibly reclaimed by a new
    /// write-path request.
    pub lock_stale_secs: u64,
    /// Cadence of the periodic maintenance sweep.
    pub maintenance_interval_secs: u64,
    /// Lock age at which the maintenance sweep force-releases (defensive;
    /// per-request reclamation normally fires first).
    pub maintenance_lock_cutoff_secs: u64,
    /// Age at which in-memory session handles are dropped by maintenance.
    pub session_handle_max_age_secs: u64,
    /// Bloom-filter layer tuning.
    pub bloom: BloomConfig,
    /// Ephemeral LRU tuning.
    pub cache: EphemeralCacheConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            page_size: 1000,
            session_ttl_secs: 300,
            analyze_max_client: 100_000,
            default_fingerprint_limit: 200_000,
            lock_stale_secs: 300,
            maintenance_interval_secs: 300,
            maintenance_lock_cutoff_secs: 600,
            session_handle_max_age_secs: 3600,
            bloom: BloomConfig::default(),
            cache: EphemeralCacheConfig::default(),
        }
    }
}
