//! Authoritative storage for per-user fingerprint sets.
//!
//! The store enforces uniqueness of `(userKey, fingerprint)` at the storage
//! layer: the in-memory backend keys each user's set by fingerprint, so a
//! colliding insert is observed as a duplicate rather than a second row.
//! Duplicates never fail a batch; they are counted and the non-duplicate
//! subset is inserted.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::types::{Fingerprint, UserKey};

/// A stored fingerprint row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// The fingerprint value.
    pub fingerprint: Fingerprint,
    /// Unix seconds when the row was first inserted.
    pub created_at: u64,
    /// Unix seconds of the last write touching the row.
    pub updated_at: u64,
}

/// Outcome of a batch insert: how many rows were new vs already present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInsert {
    /// Rows actually inserted.
    pub inserted: u64,
    /// Rows already present in storage (or repeated within the batch).
    pub duplicates: u64,
}

/// Storage trait for per-user fingerprint sets.
///
/// Abstracts over the backend so the engine can run against the in-memory
/// store in tests and an external database in production.
pub trait FingerprintStore: Send + Sync {
    /// Number of fingerprints stored for a user.
    fn count(&self, user: &UserKey) -> StoreResult<u64>;

    /// Returns the intersection of `candidates` with the stored set.
    /// Callers deduplicate candidates first.
    fn existing(&self, user: &UserKey, candidates: &[Fingerprint]) -> StoreResult<Vec<Fingerprint>>;

    /// Full enumeration of a user's set, in ascending lexicographic order.
    fn enumerate(&self, user: &UserKey) -> StoreResult<Vec<Fingerprint>>;

    /// Inserts a batch, counting duplicates instead of failing on them.
    /// The uniqueness constraint is the source of truth: the non-duplicate
    /// subset is inserted even when some elements collide.
    fn insert_batch(
        &self,
        user: &UserKey,
        fingerprints: &[Fingerprint],
        now: u64,
    ) -> StoreResult<BatchInsert>;

    /// Removes every fingerprint for a user. Returns the number removed.
    fn purge_user(&self, user: &UserKey) -> StoreResult<u64>;
}

/// In-memory fingerprint store backed by a per-user BTreeMap.
///
/// The BTreeMap key doubles as the unique `(userKey, fingerprint)` index and
/// makes `enumerate` sorted for free. Does not persist across restarts.
pub struct MemoryFingerprintStore {
    data: RwLock<HashMap<UserKey, BTreeMap<String, FingerprintRecord>>>,
}

impl MemoryFingerprintStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryFingerprintStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintStore for MemoryFingerprintStore {
    fn count(&self, user: &UserKey) -> StoreResult<u64> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(user).map(|set| set.len() as u64).unwrap_or(0))
    }

    fn existing(&self, user: &UserKey, candidates: &[Fingerprint]) -> StoreResult<Vec<Fingerprint>> {
        let data = self.data.read().map_err(poisoned)?;
        let Some(set) = data.get(user) else {
            return Ok(Vec::new());
        };
        Ok(candidates
            .iter()
            .filter(|fp| set.contains_key(fp.as_str()))
            .cloned()
            .collect())
    }

    fn enumerate(&self, user: &UserKey) -> StoreResult<Vec<Fingerprint>> {
        let data = self.data.read().map_err(poisoned)?;
        let Some(set) = data.get(user) else {
            return Ok(Vec::new());
        };
        Ok(set.values().map(|rec| rec.fingerprint.clone()).collect())
    }

    fn insert_batch(
        &self,
        user: &UserKey,
        fingerprints: &[Fingerprint],
        now: u64,
    ) -> StoreResult<BatchInsert> {
        let mut data = self.data.write().map_err(poisoned)?;
        let set = data.entry(user.clone()).or_default();

        let mut outcome = BatchInsert::default();
        for fp in fingerprints {
            if set.contains_key(fp.as_str()) {
                outcome.duplicates += 1;
                continue;
            }
            set.insert(
                fp.as_str().to_string(),
                FingerprintRecord {
                    fingerprint: fp.clone(),
                    created_at: now,
                    updated_at: now,
                },
            );
            outcome.inserted += 1;
        }
        Ok(outcome)
    }

    fn purge_user(&self, user: &UserKey) -> StoreResult<u64> {
        let mut data = self.data.write().map_err(poisoned)?;
        Ok(data
            .remove(user)
            .map(|set| set.len() as u64)
            .unwrap_or(0))
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Unavailable {
        reason: "fingerprint store lock poisoned".to_string(),
    }
}
