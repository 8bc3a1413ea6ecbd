//! External user-key directory.
//!
//! User records are created and revoked by the admin collaborator; the sync
//! core only reads them (activity flag, fingerprint limit) and bumps usage
//! counters. Reset explicitly preserves the counters.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::types::UserKey;

/// A user-key whitelist record.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// The user key.
    pub user_key: UserKey,
    /// Revoked users stay in the directory with this flag cleared.
    pub is_active: bool,
    /// Maximum fingerprints this user may store. Zero disables the limit.
    pub fingerprint_limit: u64,
    /// Total admitted requests.
    pub total_requests: u64,
    /// Total completed syncs.
    pub total_syncs: u64,
    /// Unix seconds when the record was created.
    pub created_at: u64,
}

impl UserRecord {
    /// Builds an active record with the default fingerprint limit.
    pub fn active(user_key: UserKey, now: u64) -> Self {
        Self {
            user_key,
            is_active: true,
            fingerprint_limit: 200_000,
            total_requests: 0,
            total_syncs: 0,
            created_at: now,
        }
    }
}

/// Read-mostly directory of admitted user keys.
pub trait UserDirectory: Send + Sync {
    /// Looks up a user record.
    fn resolve(&self, user: &UserKey) -> StoreResult<Option<UserRecord>>;

    /// Bumps the admitted-request counter.
    fn record_request(&self, user: &UserKey) -> StoreResult<()>;

    /// Bumps the completed-sync counter.
    fn record_sync(&self, user: &UserKey) -> StoreResult<()>;
}

/// In-memory user directory. The admin CLI that populates the production
/// directory is a separate collaborator; tests and the dev binary register
/// records directly.
pub struct MemoryUserDirectory {
    data: RwLock<HashMap<UserKey, UserRecord>>,
}

impl MemoryUserDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts or replaces a record.
    pub fn register(&self, record: UserRecord) {
        if let Ok(mut data) = self.data.write() {
            data.insert(record.user_key.clone(), record);
        }
    }
}

impl Default for MemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn resolve(&self, user: &UserKey) -> StoreResult<Option<UserRecord>> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(user).cloned())
    }

    fn record_request(&self, user: &UserKey) -> StoreResult<()> {
        let mut data = self.data.write().map_err(poisoned)?;
        if let Some(record) = data.get_mut(user) {
            record.total_requests += 1;
        }
        Ok(())
    }

    fn record_sync(&self, user: &UserKey) -> StoreResult<()> {
        let mut data = self.data.write().map_err(poisoned)?;
        if let Some(record) = data.get_mut(user) {
            record.total_syncs += 1;
        }
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Unavailable {
        reason: "user directory lock poisoned".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserKey {
        UserKey::parse("550e8400-e29b-41d4-a716-446655440000").unwrap()
    }

    #[test]
    fn test_resolve_unknown_is_none() {
        let dir = MemoryUserDirectory::new();
        assert!(dir.resolve(&user()).unwrap().is_none());
    }

    #[test]
    fn test_register_and_resolve() {
        let dir = MemoryUserDirectory::new();
        dir.register(UserRecord::active(user(), 100));

        let record = dir.resolve(&user()).unwrap().unwrap();
        assert!(record.is_active);
        assert_eq!(record.fingerprint_limit, 200_000);
    }

    #[test]
    fn test_counters_survive_re_register() {
        let dir = MemoryUserDirectory::new();
        dir.register(UserRecord::active(user(), 100));
        dir.record_request(&user()).unwrap();
        dir.record_request(&user()).unwrap();
        dir.record_sync(&user()).unwrap();

        let record = dir.resolve(&user()).unwrap().unwrap();
        assert_eq!(record.total_requests, 2);
        assert_eq!(record.total_syncs, 1);
    }

    #[test]
    fn test_counters_for_unknown_user_are_noops() {
        let dir = MemoryUserDirectory::new();
        dir.record_request(&user()).unwrap();
        dir.record_sync(&user()).unwrap();
        assert!(dir.resolve(&user()).unwrap().is_none());
    }
}
