//! Per-user aggregate meta records.
//!
//! One record per user holds the total count, the collection hash, the last
//! sync time, cumulative sync stats and the optional serialized bloom filter.
//! `MetaService` layers the invariant-preserving operations (get-or-create,
//! refresh, apply-delta) over a plain record store plus the fingerprint
//! store, so a backend only has to implement CRUD.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::fingerprint::FingerprintStore;
use crate::hash::collection_hash_sorted;
use crate::types::UserKey;

/// Cumulative synchronization statistics for one user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    /// Total completed write-path syncs.
    pub total_syncs: u64,
    /// Fingerprints added by the most recent sync.
    pub last_sync_added: u64,
    /// Duration of the most recent sync in milliseconds.
    pub last_sync_duration_ms: u64,
}

/// A per-user aggregate meta record.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMeta {
    /// The owning user key.
    pub user_key: UserKey,
    /// Count of stored fingerprints. Matches the fingerprint store whenever
    /// no write is in progress for the user.
    pub total_count: u64,
    /// SHA-256 of the sorted fingerprint concatenation. Empty string means
    /// "never computed" (the zero state of a fresh record).
    pub collection_hash: String,
    /// Unix seconds of the last successful sync, if any.
    pub last_sync_at: Option<u64>,
    /// Cumulative sync statistics.
    pub sync_stats: SyncStats,
    /// Serialized bloom filter, if one has been persisted. Opaque to the
    /// meta store; the cache layer owns the encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bloom_blob: Option<Vec<u8>>,
    /// Unix seconds when the record was created.
    pub created_at: u64,
    /// Unix seconds of the last record write.
    pub updated_at: u64,
}

impl UserMeta {
    /// Builds the zero-state record for a user that has never been touched.
    pub fn zero(user_key: UserKey, now: u64) -> Self {
        Self {
            user_key,
            total_count: 0,
            collection_hash: String::new(),
            last_sync_at: None,
            sync_stats: SyncStats::default(),
            bloom_blob: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// CRUD trait for meta record storage backends.
pub trait MetaRecordStore: Send + Sync {
    /// Fetches a record. Returns None if the user has no record.
    fn get(&self, user: &UserKey) -> StoreResult<Option<UserMeta>>;

    /// Inserts or replaces a record.
    fn put(&self, meta: UserMeta) -> StoreResult<()>;

    /// Deletes a record. Returns the number of records removed (0 or 1).
    fn delete(&self, user: &UserKey) -> StoreResult<u64>;
}

/// In-memory meta record store. Does not persist across restarts.
pub struct MemoryMetaStore {
    data: RwLock<HashMap<UserKey, UserMeta>>,
}

impl MemoryMetaStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaRecordStore for MemoryMetaStore {
    fn get(&self, user: &UserKey) -> StoreResult<Option<UserMeta>> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(user).cloned())
    }

    fn put(&self, meta: UserMeta) -> StoreResult<()> {
        let mut data = self.data.write().map_err(poisoned)?;
        data.insert(meta.user_key.clone(), meta);
        Ok(())
    }

    fn delete(&self, user: &UserKey) -> StoreResult<u64> {
        let mut data = self.data.write().map_err(poisoned)?;
        Ok(if data.remove(user).is_some() { 1 } else { 0 })
    }
}

/// Invariant-preserving meta operations over a record store and the
/// fingerprint store.
pub struct MetaService {
    records: Arc<dyn MetaRecordStore>,
    fingerprints: Arc<dyn FingerprintStore>,
}

impl MetaService {
    /// Creates a meta service over the given backends.
    pub fn new(records: Arc<dyn MetaRecordStore>, fingerprints: Arc<dyn FingerprintStore>) -> Self {
        Self {
            records,
            fingerprints,
        }
    }

    /// Fetches a record without creating one.
    pub fn get(&self, user: &UserKey) -> StoreResult<Option<UserMeta>> {
        self.records.get(user)
    }

    /// Fetches a user's record, creating the zero-state record if absent.
    ///
    /// The first-create path never enumerates the fingerprint store: the zero
    /// state is assumed and reconciled by the first mutation's refresh.
    pub fn get_or_create(&self, user: &UserKey, now: u64) -> StoreResult<UserMeta> {
        if let Some(meta) = self.records.get(user)? {
            return Ok(meta);
        }
        let meta = UserMeta::zero(user.clone(), now);
        self.records.put(meta.clone())?;
        debug!(user = %user.short(), "created zero-state meta record");
        Ok(meta)
    }

    /// Re-enumerates the user's fingerprints and rewrites `total_count` and
    /// `collection_hash` from live storage.
    pub fn refresh(&self, user: &UserKey, now: u64) -> StoreResult<UserMeta> {
        let all = self.fingerprints.enumerate(user)?;
        let mut meta = self.get_or_create(user, now)?;
        meta.total_count = all.len() as u64;
        meta.collection_hash = collection_hash_sorted(&all);
        meta.updated_at = now;
        self.records.put(meta.clone())?;
        Ok(meta)
    }

    /// Records a completed sync (stats + last-sync time) and refreshes the
    /// count and hash in the same logical step.
    pub fn apply_delta(
        &self,
        user: &UserKey,
        added: u64,
        duration_ms: u64,
        now: u64,
    ) -> StoreResult<UserMeta> {
        let all = self.fingerprints.enumerate(user)?;
        let mut meta = self.get_or_create(user, now)?;
        meta.total_count = all.len() as u64;
        meta.collection_hash = collection_hash_sorted(&all);
        meta.sync_stats.total_syncs += 1;
        meta.sync_stats.last_sync_added = added;
        meta.sync_stats.last_sync_duration_ms = duration_ms;
        meta.last_sync_at = Some(now);
        meta.updated_at = now;
        self.records.put(meta.clone())?;
        Ok(meta)
    }

    /// Persists a serialized bloom filter into the user's record.
    pub fn store_bloom_blob(&self, user: &UserKey, blob: Vec<u8>, now: u64) -> StoreResult<()> {
        let mut meta = self.get_or_create(user, now)?;
        meta.bloom_blob = Some(blob);
        meta.updated_at = now;
        self.records.put(meta)
    }

    /// Returns the persisted bloom filter blob, if any.
    pub fn bloom_blob(&self, user: &UserKey) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.records.get(user)?.and_then(|meta| meta.bloom_blob))
    }

    /// Deletes the user's record. Returns the number removed.
    pub fn delete(&self, user: &UserKey) -> StoreResult<u64> {
        self.records.delete(user)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Unavailable {
        reason: "meta store lock poisoned".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::MemoryFingerprintStore;
    use crate::hash::collection_hash;
    use crate::types::Fingerprint;

    fn user() -> UserKey {
        UserKey::parse("550e8400-e29b-41d4-a716-446655440000").unwrap()
    }

    fn fp(seed: &str) -> Fingerprint {
        Fingerprint::parse(&seed.repeat(32)).unwrap()
    }

    fn service() -> (MetaService, Arc<MemoryFingerprintStore>) {
        let fingerprints = Arc::new(MemoryFingerprintStore::new());
        let service = MetaService::new(
            Arc::new(MemoryMetaStore::new()),
            fingerprints.clone(),
        );
        (service, fingerprints)
    }

    #[test]
    fn test_get_or_create_zero_state() {
        let (service, _) = service();
        let meta = service.get_or_create(&user(), 100).unwrap();

        assert_eq!(meta.total_count, 0);
        assert_eq!(meta.collection_hash, "");
        assert!(meta.last_sync_at.is_none());
        assert_eq!(meta.sync_stats, SyncStats::default());
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (service, _) = service();
        let first = service.get_or_create(&user(), 100).unwrap();
        let second = service.get_or_create(&user(), 999).unwrap();
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn test_get_or_create_skips_enumeration() {
        // Rows inserted behind the meta store's back are not reconciled by
        // the create path; the first refresh picks them up.
        let (service, fingerprints) = service();
        fingerprints
            .insert_batch(&user(), &[fp("0a")], 50)
            .unwrap();

        let meta = service.get_or_create(&user(), 100).unwrap();
        assert_eq!(meta.total_count, 0);

        let refreshed = service.refresh(&user(), 200).unwrap();
        assert_eq!(refreshed.total_count, 1);
    }

    #[test]
    fn test_refresh_recomputes_count_and_hash() {
        let (service, fingerprints) = service();
        let batch = [fp("0a"), fp("0b"), fp("0c")];
        fingerprints.insert_batch(&user(), &batch, 50).unwrap();

        let meta = service.refresh(&user(), 100).unwrap();
        assert_eq!(meta.total_count, 3);
        assert_eq!(meta.collection_hash, collection_hash(&batch));
    }

    #[test]
    fn test_refresh_empty_set_uses_empty_hash() {
        let (service, _) = service();
        let meta = service.refresh(&user(), 100).unwrap();
        assert_eq!(meta.total_count, 0);
        assert_eq!(meta.collection_hash, collection_hash(&[]));
        assert_ne!(meta.collection_hash, "");
    }

    #[test]
    fn test_apply_delta_updates_stats_and_refreshes() {
        let (service, fingerprints) = service();
        fingerprints
            .insert_batch(&user(), &[fp("0a"), fp("0b")], 50)
            .unwrap();

        let meta = service.apply_delta(&user(), 2, 120, 100).unwrap();
        assert_eq!(meta.total_count, 2);
        assert_eq!(meta.sync_stats.total_syncs, 1);
        assert_eq!(meta.sync_stats.last_sync_added, 2);
        assert_eq!(meta.sync_stats.last_sync_duration_ms, 120);
        assert_eq!(meta.last_sync_at, Some(100));

        let again = service.apply_delta(&user(), 0, 30, 200).unwrap();
        assert_eq!(again.sync_stats.total_syncs, 2);
        assert_eq!(again.sync_stats.last_sync_added, 0);
        assert_eq!(again.last_sync_at, Some(200));
    }

    #[test]
    fn test_bloom_blob_round_trip() {
        let (service, _) = service();
        assert!(service.bloom_blob(&user()).unwrap().is_none());

        service
            .store_bloom_blob(&user(), vec![1, 2, 3], 100)
            .unwrap();
        assert_eq!(service.bloom_blob(&user()).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_delete_removes_record() {
        let (service, _) = service();
        service.get_or_create(&user(), 100).unwrap();

        assert_eq!(service.delete(&user()).unwrap(), 1);
        assert!(service.get(&user()).unwrap().is_none());
        assert_eq!(service.delete(&user()).unwrap(), 0);
    }
}
