//! Durable diff-session records with automatic expiry.
//!
//! A diff session is the handoff between a whole-set diff and the paginated
//! pulls that follow it. Sessions carry an `expires_at` stamped at create
//! time; `find` never returns an expired session, so callers can treat a hit
//! as live. The sorted projection of `missing_in_client` is recorded lazily
//! by the first page pull.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::types::{Fingerprint, UserKey};

/// A diff-session record.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSession {
    /// Opaque session token, `diff_`-prefixed.
    pub session_id: String,
    /// The owning user.
    pub user_key: UserKey,
    /// Fingerprints the client must pull from the server.
    pub missing_in_client: Vec<Fingerprint>,
    /// Fingerprints the server is missing (informational; the client pushes
    /// these through the add path).
    pub missing_in_server: Vec<Fingerprint>,
    /// Lazily materialized sorted projection of `missing_in_client`. Empty
    /// until the first page pull records it.
    pub sorted_missing_in_client: Vec<Fingerprint>,
    /// Client set size at analysis time.
    pub total_client: u64,
    /// Server set size at analysis time.
    pub total_server: u64,
    /// Unix seconds at creation.
    pub created_at: u64,
    /// Unix seconds after which the session is dead.
    pub expires_at: u64,
}

impl DiffSession {
    /// Builds a session expiring `ttl_secs` after `now`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        user_key: UserKey,
        missing_in_client: Vec<Fingerprint>,
        missing_in_server: Vec<Fingerprint>,
        total_client: u64,
        total_server: u64,
        ttl_secs: u64,
        now: u64,
    ) -> Self {
        Self {
            session_id,
            user_key,
            missing_in_client,
            missing_in_server,
            sorted_missing_in_client: Vec::new(),
            total_client,
            total_server,
            created_at: now,
            expires_at: now + ttl_secs,
        }
    }

    /// Returns true once `now` has passed the expiry stamp.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Storage trait for diff sessions.
pub trait SessionStore: Send + Sync {
    /// Persists a new session.
    fn create(&self, session: DiffSession) -> StoreResult<()>;

    /// Fetches a live session. An expired session is reported as absent;
    /// the storage layer is authoritative for liveness.
    fn find(&self, session_id: &str, now: u64) -> StoreResult<Option<DiffSession>>;

    /// Idempotent upsert of the precomputed sorted projection.
    fn record_sorted_view(&self, session_id: &str, sorted: Vec<Fingerprint>) -> StoreResult<()>;

    /// Deletes every session belonging to a user. Returns the count removed.
    fn delete_by_user(&self, user: &UserKey) -> StoreResult<u64>;

    /// Physically reclaims expired sessions. Returns the count removed.
    fn purge_expired(&self, now: u64) -> StoreResult<u64>;

    /// Number of live (non-expired) sessions across all users.
    fn live_count(&self, now: u64) -> StoreResult<u64>;
}

/// In-memory session store. Expiry is enforced on read; `purge_expired`
/// stands in for the storage-side TTL index reclamation.
pub struct MemorySessionStore {
    data: RwLock<HashMap<String, DiffSession>>,
}

impl MemorySessionStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, session: DiffSession) -> StoreResult<()> {
        let mut data = self.data.write().map_err(poisoned)?;
        data.insert(session.session_id.clone(), session);
        Ok(())
    }

    fn find(&self, session_id: &str, now: u64) -> StoreResult<Option<DiffSession>> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data
            .get(session_id)
            .filter(|session| !session.is_expired(now))
            .cloned())
    }

    fn record_sorted_view(&self, session_id: &str, sorted: Vec<Fingerprint>) -> StoreResult<()> {
        let mut data = self.data.write().map_err(poisoned)?;
        if let Some(session) = data.get_mut(session_id) {
            session.sorted_missing_in_client = sorted;
        }
        Ok(())
    }

    fn delete_by_user(&self, user: &UserKey) -> StoreResult<u64> {
        let mut data = self.data.write().map_err(poisoned)?;
        let before = data.len();
        data.retain(|_, session| session.user_key != *user);
        Ok((before - data.len()) as u64)
    }

    fn purge_expired(&self, now: u64) -> StoreResult<u64> {
        let mut data = self.data.write().map_err(poisoned)?;
        let before = data.len();
        data.retain(|_, session| !session.is_expired(now));
        Ok((before - data.len()) as u64)
    }

    fn live_count(&self, now: u64) -> StoreResult<u64> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data
            .values()
            .filter(|session| !session.is_expired(now))
            .count() as u64)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Unavailable {
        reason: "session store lock poisoned".to_string(),
    }
}
