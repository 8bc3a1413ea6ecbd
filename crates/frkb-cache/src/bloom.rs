//! Per-user bloom filters for cheap "definitely absent" answers.
//!
//! A "not possible" answer guarantees absence from the snapshot at
//! filter-build time; a "possible" answer must always be verified against the
//! fingerprint store. Filters are built lazily (blocking on first use) from a
//! full enumeration, updated incrementally on every insert, and optionally
//! persisted into the user's meta record so a restart revives them without a
//! rebuild.

use std::sync::Arc;

use dashmap::DashMap;
use fastbloom::BloomFilter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use frkb_store::{Fingerprint, FingerprintStore, MetaService, StoreResult, UserKey};

/// Tuning for the bloom layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BloomConfig {
    /// Master switch; when false every answer is `possible` / `bloom_disabled`.
    pub enabled: bool,
    /// Target false-positive rate at build capacity.
    pub false_positive_rate: f64,
    /// Floor for build capacity, so small sets leave insert headroom.
    pub min_capacity: u64,
    /// Headroom multiplier over the current count at build time.
    pub capacity_multiplier: f64,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            false_positive_rate: 0.01,
            min_capacity: 50_000,
            capacity_multiplier: 1.2,
        }
    }
}

/// Where a bloom answer came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BloomSource {
    /// A real filter answered.
    Filter,
    /// The user has no fingerprints; absence is certain without a filter.
    NoData,
    /// The layer is disabled; the answer is a conservative `possible`.
    BloomDisabled,
}

/// A single membership answer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BloomAnswer {
    /// False means definitely absent at build time; true means "verify".
    pub possible: bool,
    /// Provenance of the answer.
    pub source: BloomSource,
}

/// A batched membership answer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloomBatchAnswer {
    /// Per-candidate `possible` flags, parallel to the input order.
    pub possible: Vec<bool>,
    /// How many candidates might be present.
    pub maybe_present: u64,
    /// How many candidates are definitely absent.
    pub definitely_absent: u64,
    /// Provenance shared by the whole batch.
    pub source: BloomSource,
}

/// Per-user filter stats for diagnostics.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloomStats {
    /// Bit-array size the filter was dimensioned for.
    pub size_bits: u64,
    /// Number of hash functions.
    pub hash_functions: u32,
    /// Elements inserted since build.
    pub inserted: u64,
    /// Build capacity.
    pub capacity: u64,
    /// Estimated false-positive rate at the current fill.
    pub estimated_fp_rate: f64,
    /// Approximate memory footprint in bytes.
    pub memory_bytes: u64,
}

/// Cache-wide aggregate for service stats.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloomAggregate {
    /// Number of resident filters.
    pub filters: u64,
    /// Sum of approximate filter footprints.
    pub memory_bytes: u64,
    /// Sum of inserted counts.
    pub inserted: u64,
}

/// A built filter plus the bookkeeping needed for stats and persistence.
#[derive(Serialize, Deserialize)]
struct UserFilter {
    filter: BloomFilter,
    capacity: u64,
    inserted: u64,
}

impl UserFilter {
    fn stats(&self, fp_rate: f64) -> BloomStats {
        let bits = optimal_bits(self.capacity, fp_rate);
        let hashes = optimal_hashes(bits, self.capacity);
        BloomStats {
            size_bits: bits,
            hash_functions: hashes,
            inserted: self.inserted,
            capacity: self.capacity,
            estimated_fp_rate: estimated_fp_rate(bits, hashes, self.inserted),
            memory_bytes: bits / 8,
        }
    }
}

/// Per-user bloom filter cache.
pub struct BloomFilterCache {
    config: BloomConfig,
    filters: DashMap<UserKey, UserFilter>,
    fingerprints: Arc<dyn FingerprintStore>,
    meta: Arc<MetaService>,
}

impl BloomFilterCache {
    /// Creates the cache over the fingerprint store (build source) and meta
    /// service (blob persistence).
    pub fn new(
        config: BloomConfig,
        fingerprints: Arc<dyn FingerprintStore>,
        meta: Arc<MetaService>,
    ) -> Self {
        Self {
            config,
            filters: DashMap::new(),
            fingerprints,
            meta,
        }
    }

    /// Probes one fingerprint, building the filter on first use.
    /// `rebuild` forces a fresh build from the fingerprint store.
    pub fn might_contain(
        &self,
        user: &UserKey,
        fingerprint: &Fingerprint,
        rebuild: bool,
        now: u64,
    ) -> StoreResult<BloomAnswer> {
        let batch =
            self.batch_might_contain(user, std::slice::from_ref(fingerprint), rebuild, now)?;
        Ok(BloomAnswer {
            possible: batch.possible.first().copied().unwrap_or(true),
            source: batch.source,
        })
    }

    /// Probes a batch of fingerprints with shared provenance.
    pub fn batch_might_contain(
        &self,
        user: &UserKey,
        fingerprints: &[Fingerprint],
        rebuild: bool,
        now: u64,
    ) -> StoreResult<BloomBatchAnswer> {
        if !self.config.enabled {
            return Ok(answer_all(fingerprints.len(), true, BloomSource::BloomDisabled));
        }

        if rebuild {
            self.filters.remove(user);
        }

        if !self.filters.contains_key(user) && !self.ensure_filter(user, rebuild, now)? {
            return Ok(answer_all(fingerprints.len(), false, BloomSource::NoData));
        }

        let Some(entry) = self.filters.get(user) else {
            // Lost a race with clear(); treat as unbuilt no-data.
            return Ok(answer_all(fingerprints.len(), false, BloomSource::NoData));
        };

        let possible: Vec<bool> = fingerprints
            .iter()
            .map(|fp| entry.filter.contains(fp.as_str()))
            .collect();
        let maybe = possible.iter().filter(|p| **p).count() as u64;
        Ok(BloomBatchAnswer {
            definitely_absent: possible.len() as u64 - maybe,
            maybe_present: maybe,
            possible,
            source: BloomSource::Filter,
        })
    }

    /// Best-effort incremental insertion; a failure never fails the caller.
    /// Absent filters are left absent; the next probe builds them from
    /// storage, which already includes these rows.
    pub fn add_fingerprints(&self, user: &UserKey, fingerprints: &[Fingerprint]) {
        if !self.config.enabled {
            return;
        }
        if let Some(mut entry) = self.filters.get_mut(user) {
            for fp in fingerprints {
                entry.filter.insert(fp.as_str());
            }
            entry.inserted += fingerprints.len() as u64;
        }
    }

    /// Drops the in-memory filter for a user.
    pub fn clear(&self, user: &UserKey) {
        self.filters.remove(user);
    }

    /// Stats for one user's resident filter.
    pub fn stats(&self, user: &UserKey) -> Option<BloomStats> {
        self.filters
            .get(user)
            .map(|entry| entry.stats(self.config.false_positive_rate))
    }

    /// Cache-wide aggregate.
    pub fn aggregate(&self) -> BloomAggregate {
        let mut agg = BloomAggregate::default();
        for entry in self.filters.iter() {
            let stats = entry.stats(self.config.false_positive_rate);
            agg.filters += 1;
            agg.memory_bytes += stats.memory_bytes;
            agg.inserted += stats.inserted;
        }
        agg
    }

    /// Returns whether the layer is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Ensures a filter is resident. Returns false when the user has no
    /// fingerprints (the no-data fast path).
    fn ensure_filter(&self, user: &UserKey, skip_blob: bool, now: u64) -> StoreResult<bool> {
        let count = self.fingerprints.count(user)?;
        if count == 0 {
            return Ok(false);
        }

        if !skip_blob {
            if let Some(revived) = self.try_revive(user)? {
                self.filters.insert(user.clone(), revived);
                return Ok(true);
            }
        }

        let all = self.fingerprints.enumerate(user)?;
        let capacity = self.build_capacity(all.len() as u64);
        let mut filter = BloomFilter::with_false_pos(self.config.false_positive_rate)
            .expected_items(capacity as usize);
        for fp in &all {
            filter.insert(fp.as_str());
        }
        let built = UserFilter {
            filter,
            capacity,
            inserted: all.len() as u64,
        };
        debug!(
            user = %user.short(),
            elements = all.len(),
            capacity,
            "built bloom filter"
        );

        self.persist(user, &built, now);
        self.filters.insert(user.clone(), built);
        Ok(true)
    }

    /// Attempts to revive a filter from the persisted meta blob.
    fn try_revive(&self, user: &UserKey) -> StoreResult<Option<UserFilter>> {
        let Some(blob) = self.meta.bloom_blob(user)? else {
            return Ok(None);
        };
        match bincode::deserialize::<UserFilter>(&blob) {
            Ok(filter) => {
                debug!(user = %user.short(), "revived bloom filter from meta blob");
                Ok(Some(filter))
            }
            Err(err) => {
                warn!(user = %user.short(), error = %err, "bloom blob undecodable, rebuilding");
                Ok(None)
            }
        }
    }

    /// Best-effort blob persistence.
    fn persist(&self, user: &UserKey, filter: &UserFilter, now: u64) {
        match bincode::serialize(filter) {
            Ok(blob) => {
                if let Err(err) = self.meta.store_bloom_blob(user, blob, now) {
                    warn!(user = %user.short(), error = %err, "bloom blob persistence failed");
                }
            }
            Err(err) => {
                warn!(user = %user.short(), error = %err, "bloom blob serialization failed");
            }
        }
    }

    fn build_capacity(&self, count: u64) -> u64 {
        let scaled = (count as f64 * self.config.capacity_multiplier) as u64;
        scaled.max(self.config.min_capacity)
    }
}

fn answer_all(len: usize, possible: bool, source: BloomSource) -> BloomBatchAnswer {
    BloomBatchAnswer {
        possible: vec![possible; len],
        maybe_present: if possible { len as u64 } else { 0 },
        definitely_absent: if possible { 0 } else { len as u64 },
        source,
    }
}

/// Optimal bit count for `n` items at false-positive rate `p`.
fn optimal_bits(n: u64, p: f64) -> u64 {
    let ln2 = std::f64::consts::LN_2;
    ((-(n as f64) * p.ln()) / (ln2 * ln2)).ceil() as u64
}

/// Optimal hash-function count for `m` bits over `n` items.
fn optimal_hashes(m: u64, n: u64) -> u32 {
    if n == 0 {
        return 1;
    }
    (((m as f64 / n as f64) * std::f64::consts::LN_2).round() as u32).max(1)
}

/// Expected false-positive rate with `inserted` items in an `m`-bit filter.
fn estimated_fp_rate(m: u64, k: u32, inserted: u64) -> f64 {
    if m == 0 {
        return 1.0;
    }
    let exponent = -(k as f64) * (inserted as f64) / (m as f64);
    (1.0 - exponent.exp()).powi(k as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use frkb_store::{MemoryFingerprintStore, MemoryMetaStore};

    fn user() -> UserKey {
        UserKey::parse("550e8400-e29b-41d4-a716-446655440000").unwrap()
    }

    fn fp(i: u32) -> Fingerprint {
        Fingerprint::parse(&format!("{:08x}", i).repeat(8)).unwrap()
    }

    fn harness(config: BloomConfig) -> (BloomFilterCache, Arc<MemoryFingerprintStore>, Arc<MetaService>) {
        let fingerprints = Arc::new(MemoryFingerprintStore::new());
        let meta = Arc::new(MetaService::new(
            Arc::new(MemoryMetaStore::new()),
            fingerprints.clone(),
        ));
        let cache = BloomFilterCache::new(config, fingerprints.clone(), meta.clone());
        (cache, fingerprints, meta)
    }

    fn small_config() -> BloomConfig {
        BloomConfig {
            min_capacity: 100,
            ..BloomConfig::default()
        }
    }

    #[test]
    fn test_disabled_answers_possible() {
        let (cache, _, _) = harness(BloomConfig {
            enabled: false,
            ..small_config()
        });
        let answer = cache.might_contain(&user(), &fp(1), false, 100).unwrap();
        assert!(answer.possible);
        assert_eq!(answer.source, BloomSource::BloomDisabled);
    }

    #[test]
    fn test_empty_user_answers_no_data() {
        let (cache, _, _) = harness(small_config());
        let answer = cache.might_contain(&user(), &fp(1), false, 100).unwrap();
        assert!(!answer.possible);
        assert_eq!(answer.source, BloomSource::NoData);
    }

    #[test]
    fn test_stored_fingerprints_are_possible() {
        let (cache, fingerprints, _) = harness(small_config());
        let stored: Vec<Fingerprint> = (0..50).map(fp).collect();
        fingerprints.insert_batch(&user(), &stored, 100).unwrap();

        for candidate in &stored {
            let answer = cache.might_contain(&user(), candidate, false, 100).unwrap();
            assert!(answer.possible, "stored fingerprint reported absent");
            assert_eq!(answer.source, BloomSource::Filter);
        }
    }

    #[test]
    fn test_not_possible_means_absent() {
        let (cache, fingerprints, _) = harness(small_config());
        let stored: Vec<Fingerprint> = (0..50).map(fp).collect();
        fingerprints.insert_batch(&user(), &stored, 100).unwrap();

        let probe: Vec<Fingerprint> = (1000..1100).map(fp).collect();
        let batch = cache
            .batch_might_contain(&user(), &probe, false, 100)
            .unwrap();
        for (i, possible) in batch.possible.iter().enumerate() {
            if !possible {
                let present = fingerprints.existing(&user(), &[probe[i].clone()]).unwrap();
                assert!(present.is_empty(), "bloom absence contradicted storage");
            }
        }
    }

    #[test]
    fn test_incremental_add_visible() {
        let (cache, fingerprints, _) = harness(small_config());
        fingerprints.insert_batch(&user(), &[fp(1)], 100).unwrap();
        cache.might_contain(&user(), &fp(1), false, 100).unwrap();

        cache.add_fingerprints(&user(), &[fp(2)]);
        let answer = cache.might_contain(&user(), &fp(2), false, 100).unwrap();
        assert!(answer.possible);
    }

    #[test]
    fn test_add_without_filter_is_noop() {
        let (cache, _, _) = harness(small_config());
        cache.add_fingerprints(&user(), &[fp(1)]);
        assert!(cache.stats(&user()).is_none());
    }

    #[test]
    fn test_clear_drops_filter() {
        let (cache, fingerprints, _) = harness(small_config());
        fingerprints.insert_batch(&user(), &[fp(1)], 100).unwrap();
        cache.might_contain(&user(), &fp(1), false, 100).unwrap();
        assert!(cache.stats(&user()).is_some());

        cache.clear(&user());
        assert!(cache.stats(&user()).is_none());
    }

    #[test]
    fn test_rebuild_picks_up_out_of_band_rows() {
        let (cache, fingerprints, _) = harness(small_config());
        fingerprints.insert_batch(&user(), &[fp(1)], 100).unwrap();
        cache.might_contain(&user(), &fp(1), false, 100).unwrap();

        // Row inserted without notifying the cache.
        fingerprints.insert_batch(&user(), &[fp(2)], 150).unwrap();

        let rebuilt = cache.might_contain(&user(), &fp(2), true, 200).unwrap();
        assert!(rebuilt.possible);
    }

    #[test]
    fn test_blob_revival_skips_enumeration_result_parity() {
        let (cache, fingerprints, meta) = harness(small_config());
        let stored: Vec<Fingerprint> = (0..30).map(fp).collect();
        fingerprints.insert_batch(&user(), &stored, 100).unwrap();
        cache.might_contain(&user(), &fp(0), false, 100).unwrap();
        assert!(meta.bloom_blob(&user()).unwrap().is_some());

        // Fresh cache instance revives from the blob.
        let revived = BloomFilterCache::new(small_config(), fingerprints, meta);
        for candidate in &stored {
            assert!(revived
                .might_contain(&user(), candidate, false, 200)
                .unwrap()
                .possible);
        }
    }

    #[test]
    fn test_corrupt_blob_falls_back_to_rebuild() {
        let (cache, fingerprints, meta) = harness(small_config());
        fingerprints.insert_batch(&user(), &[fp(1)], 100).unwrap();
        meta.store_bloom_blob(&user(), vec![0xde, 0xad], 100).unwrap();

        let answer = cache.might_contain(&user(), &fp(1), false, 200).unwrap();
        assert!(answer.possible);
        assert_eq!(answer.source, BloomSource::Filter);
    }

    #[test]
    fn test_stats_shape() {
        let (cache, fingerprints, _) = harness(small_config());
        let stored: Vec<Fingerprint> = (0..40).map(fp).collect();
        fingerprints.insert_batch(&user(), &stored, 100).unwrap();
        cache.might_contain(&user(), &fp(0), false, 100).unwrap();

        let stats = cache.stats(&user()).unwrap();
        assert_eq!(stats.inserted, 40);
        assert_eq!(stats.capacity, 100);
        assert!(stats.size_bits > 0);
        assert!(stats.hash_functions >= 1);
        assert!(stats.estimated_fp_rate > 0.0 && stats.estimated_fp_rate < 1.0);
    }

    #[test]
    fn test_aggregate_counts_filters() {
        let (cache, fingerprints, _) = harness(small_config());
        let other = UserKey::parse("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();
        fingerprints.insert_batch(&user(), &[fp(1)], 100).unwrap();
        fingerprints.insert_batch(&other, &[fp(2)], 100).unwrap();
        cache.might_contain(&user(), &fp(1), false, 100).unwrap();
        cache.might_contain(&other, &fp(2), false, 100).unwrap();

        let agg = cache.aggregate();
        assert_eq!(agg.filters, 2);
        assert!(agg.memory_bytes > 0);
    }

    #[test]
    fn test_capacity_floor() {
        let (cache, _, _) = harness(BloomConfig {
            min_capacity: 500,
            ..BloomConfig::default()
        });
        assert_eq!(cache.build_capacity(10), 500);
        assert_eq!(cache.build_capacity(1000), 1200);
    }
}
