//! Process-local LRU cache for read-mostly snapshots.
//!
//! Holds user meta snapshots, diff-session handles and bare collection
//! hashes under typed key families. Writers must clear a user's entries so
//! the next fast-path read cannot observe a stale snapshot. When disabled
//! every operation is a no-op.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use frkb_store::{DiffSession, UserKey, UserMeta};

/// Configuration for the ephemeral cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EphemeralCacheConfig {
    /// Master switch; disabled means every operation is a no-op.
    pub enabled: bool,
    /// Maximum resident entries across all key families.
    pub capacity: usize,
    /// TTL for meta and hash snapshots, in seconds.
    pub meta_ttl_secs: u64,
}

impl Default for EphemeralCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10_000,
            meta_ttl_secs: 3600,
        }
    }
}

/// Hit/miss/eviction counters.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Reads served from cache.
    pub hits: u64,
    /// Reads that fell through.
    pub misses: u64,
    /// Entries evicted by capacity pressure.
    pub evictions: u64,
    /// Current resident entries.
    pub size: u64,
}

enum Payload {
    Meta(UserMeta),
    Session(DiffSession),
    Hash(String),
}

struct Entry {
    payload: Payload,
    inserted_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

struct Inner {
    entries: LruCache<String, Entry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Process-local LRU over typed snapshot entries.
pub struct EphemeralCache {
    config: EphemeralCacheConfig,
    inner: Mutex<Inner>,
}

impl EphemeralCache {
    /// Creates a cache with the given configuration.
    pub fn new(config: EphemeralCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity)
            .unwrap_or_else(|| NonZeroUsize::new(10_000).expect("nonzero"));
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Cached meta snapshot for a user, if fresh.
    pub fn get_meta(&self, user: &UserKey) -> Option<UserMeta> {
        self.get(&meta_key(user)).and_then(|payload| match payload {
            Payload::Meta(meta) => Some(meta),
            _ => None,
        })
    }

    /// Caches a meta snapshot.
    pub fn put_meta(&self, meta: UserMeta) {
        let ttl = Duration::from_secs(self.config.meta_ttl_secs);
        self.put(meta_key(&meta.user_key), Payload::Meta(meta), ttl);
    }

    /// Cached session handle, if fresh.
    pub fn get_session(&self, session_id: &str) -> Option<DiffSession> {
        self.get(&session_key(session_id))
            .and_then(|payload| match payload {
                Payload::Session(session) => Some(session),
                _ => None,
            })
    }

    /// Caches a session handle for the remainder of its TTL.
    pub fn put_session(&self, session: DiffSession, now: u64) {
        let remaining = session.expires_at.saturating_sub(now);
        if remaining == 0 {
            return;
        }
        self.put(
            session_key(&session.session_id),
            Payload::Session(session),
            Duration::from_secs(remaining),
        );
    }

    /// Cached bare collection hash, if fresh.
    pub fn get_hash(&self, user: &UserKey) -> Option<String> {
        self.get(&hash_key(user)).and_then(|payload| match payload {
            Payload::Hash(hash) => Some(hash),
            _ => None,
        })
    }

    /// Caches a bare collection hash.
    pub fn put_hash(&self, user: &UserKey, hash: String) {
        let ttl = Duration::from_secs(self.config.meta_ttl_secs);
        self.put(hash_key(user), Payload::Hash(hash), ttl);
    }

    /// Removes every entry belonging to a user: the meta snapshot, the bare
    /// hash and any session handles. Called by every writer.
    pub fn clear_user(&self, user: &UserKey) {
        if !self.config.enabled {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.entries.pop(&meta_key(user));
        inner.entries.pop(&hash_key(user));

        let session_keys: Vec<String> = inner
            .entries
            .iter()
            .filter_map(|(key, entry)| match &entry.payload {
                Payload::Session(session) if session.user_key == *user => Some(key.clone()),
                _ => None,
            })
            .collect();
        for key in session_keys {
            inner.entries.pop(&key);
        }
    }

    /// Removes one session handle.
    pub fn remove_session(&self, session_id: &str) {
        if !self.config.enabled {
            return;
        }
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.pop(&session_key(session_id));
        }
    }

    /// Drops everything.
    pub fn clear_all(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
        }
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let Ok(inner) = self.inner.lock() else {
            return CacheStats::default();
        };
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            size: inner.entries.len() as u64,
        }
    }

    /// Returns whether the cache is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn get(&self, key: &str) -> Option<Payload> {
        if !self.config.enabled {
            return None;
        }
        let mut inner = self.inner.lock().ok()?;
        let expired = match inner.entries.peek(key) {
            Some(entry) => entry.is_expired(),
            None => {
                inner.misses += 1;
                return None;
            }
        };
        if expired {
            inner.entries.pop(key);
            inner.misses += 1;
            return None;
        }
        inner.hits += 1;
        let entry = inner.entries.get(key)?;
        Some(match &entry.payload {
            Payload::Meta(meta) => Payload::Meta(meta.clone()),
            Payload::Session(session) => Payload::Session(session.clone()),
            Payload::Hash(hash) => Payload::Hash(hash.clone()),
        })
    }

    fn put(&self, key: String, payload: Payload, ttl: Duration) {
        if !self.config.enabled {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let evicted = inner.entries.push(
            key.clone(),
            Entry {
                payload,
                inserted_at: Instant::now(),
                ttl,
            },
        );
        if let Some((old_key, _)) = evicted {
            if old_key != key {
                inner.evictions += 1;
            }
        }
    }
}

fn meta_key(user: &UserKey) -> String {
    format!("user_meta:{}", user.as_str())
}

fn session_key(session_id: &str) -> String {
    format!("diff_session:{}", session_id)
}

fn hash_key(user: &UserKey) -> String {
    format!("collection_hash:{}", user.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use frkb_store::Fingerprint;

    fn user() -> UserKey {
        UserKey::parse("550e8400-e29b-41d4-a716-446655440000").unwrap()
    }

    fn meta(now: u64) -> UserMeta {
        UserMeta::zero(user(), now)
    }

    fn session(id: &str, now: u64) -> DiffSession {
        DiffSession::new(
            id.to_string(),
            user(),
            vec![Fingerprint::parse(&"0a".repeat(32)).unwrap()],
            Vec::new(),
            0,
            1,
            300,
            now,
        )
    }

    #[test]
    fn test_meta_round_trip() {
        let cache = EphemeralCache::new(EphemeralCacheConfig::default());
        cache.put_meta(meta(100));

        let cached = cache.get_meta(&user()).unwrap();
        assert_eq!(cached.user_key, user());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_miss_counted() {
        let cache = EphemeralCache::new(EphemeralCacheConfig::default());
        assert!(cache.get_meta(&user()).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_disabled_is_noop() {
        let cache = EphemeralCache::new(EphemeralCacheConfig {
            enabled: false,
            ..EphemeralCacheConfig::default()
        });
        cache.put_meta(meta(100));
        assert!(cache.get_meta(&user()).is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_expired_meta_not_served() {
        let cache = EphemeralCache::new(EphemeralCacheConfig {
            meta_ttl_secs: 0,
            ..EphemeralCacheConfig::default()
        });
        cache.put_meta(meta(100));
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get_meta(&user()).is_none());
    }

    #[test]
    fn test_session_round_trip() {
        let cache = EphemeralCache::new(EphemeralCacheConfig::default());
        cache.put_session(session("diff_1_abc", 100), 100);

        let cached = cache.get_session("diff_1_abc").unwrap();
        assert_eq!(cached.session_id, "diff_1_abc");
    }

    #[test]
    fn test_session_already_expired_not_cached() {
        let cache = EphemeralCache::new(EphemeralCacheConfig::default());
        let expired = session("diff_1_abc", 100);
        cache.put_session(expired, 500);
        assert!(cache.get_session("diff_1_abc").is_none());
    }

    #[test]
    fn test_hash_round_trip() {
        let cache = EphemeralCache::new(EphemeralCacheConfig::default());
        cache.put_hash(&user(), "abc123".to_string());
        assert_eq!(cache.get_hash(&user()).unwrap(), "abc123");
    }

    #[test]
    fn test_clear_user_removes_all_families() {
        let cache = EphemeralCache::new(EphemeralCacheConfig::default());
        cache.put_meta(meta(100));
        cache.put_hash(&user(), "abc".to_string());
        cache.put_session(session("diff_1_abc", 100), 100);

        cache.clear_user(&user());

        assert!(cache.get_meta(&user()).is_none());
        assert!(cache.get_hash(&user()).is_none());
        assert!(cache.get_session("diff_1_abc").is_none());
    }

    #[test]
    fn test_clear_user_leaves_other_users() {
        let cache = EphemeralCache::new(EphemeralCacheConfig::default());
        let other = UserKey::parse("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();
        cache.put_meta(meta(100));
        cache.put_hash(&other, "other".to_string());

        cache.clear_user(&user());
        assert_eq!(cache.get_hash(&other).unwrap(), "other");
    }

    #[test]
    fn test_remove_session() {
        let cache = EphemeralCache::new(EphemeralCacheConfig::default());
        cache.put_session(session("diff_1_abc", 100), 100);
        cache.remove_session("diff_1_abc");
        assert!(cache.get_session("diff_1_abc").is_none());
    }

    #[test]
    fn test_eviction_counted() {
        let cache = EphemeralCache::new(EphemeralCacheConfig {
            capacity: 2,
            ..EphemeralCacheConfig::default()
        });
        cache.put_hash(&user(), "a".to_string());
        let other = UserKey::parse("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();
        cache.put_hash(&other, "b".to_string());
        cache.put_meta(meta(100));

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.size, 2);
    }
}
