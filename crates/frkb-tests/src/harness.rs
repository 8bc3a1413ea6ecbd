//! Shared fixtures for the cross-crate suites.

use std::sync::Arc;

use frkb_engine::{SyncConfig, SyncEngine};
use frkb_store::{
    collection_hash, Fingerprint, FingerprintStore, MemoryFingerprintStore, MemoryMetaStore,
    MemorySessionStore, MemoryUserDirectory, MetaService, SessionStore, UserKey, UserRecord,
};

/// The default scenario user.
pub const USER_KEY: &str = "550e8400-e29b-41d4-a716-446655440000";

/// A fully wired engine plus handles to every backend it runs on.
pub struct Harness {
    pub engine: SyncEngine,
    pub fingerprints: Arc<MemoryFingerprintStore>,
    pub meta: Arc<MetaService>,
    pub sessions: Arc<MemorySessionStore>,
    pub users: Arc<MemoryUserDirectory>,
}

impl Harness {
    /// Builds a harness with the default configuration and one registered
    /// active user.
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    /// Builds a harness with a custom configuration.
    pub fn with_config(config: SyncConfig) -> Self {
        let fingerprints = Arc::new(MemoryFingerprintStore::new());
        let meta = Arc::new(MetaService::new(
            Arc::new(MemoryMetaStore::new()),
            fingerprints.clone(),
        ));
        let sessions = Arc::new(MemorySessionStore::new());
        let users = Arc::new(MemoryUserDirectory::new());
        users.register(UserRecord::active(Self::user(), 1));

        let engine = SyncEngine::new(
            config,
            fingerprints.clone(),
            meta.clone(),
            sessions.clone(),
            users.clone(),
        );
        Self {
            engine,
            fingerprints,
            meta,
            sessions,
            users,
        }
    }

    /// The scenario user key.
    pub fn user() -> UserKey {
        UserKey::parse(USER_KEY).expect("scenario user key")
    }

    /// Deterministic distinct fingerprint for an index.
    pub fn hex(i: u32) -> String {
        format!("{:08x}", i).repeat(8)
    }

    /// Typed variant of [`Harness::hex`].
    pub fn fp(i: u32) -> Fingerprint {
        Fingerprint::parse(&Self::hex(i)).expect("deterministic fingerprint")
    }

    /// Uploads a range through the add path in chunks of at most 1000.
    pub fn upload(&self, range: std::ops::Range<u32>) {
        let all: Vec<u32> = range.collect();
        for chunk in all.chunks(1000) {
            let batch: Vec<String> = chunk.iter().map(|i| Self::hex(*i)).collect();
            self.engine
                .batch_add(&Self::user(), &batch)
                .expect("upload chunk");
        }
    }

    /// Collection hash of a fingerprint index range.
    pub fn hash_of(range: std::ops::Range<u32>) -> String {
        let fps: Vec<Fingerprint> = range.map(Self::fp).collect();
        collection_hash(&fps)
    }

    /// Asserts the P1/P2 quiescent-state invariants for the scenario user.
    pub fn assert_meta_invariants(&self) {
        let user = Self::user();
        let stored = self.fingerprints.enumerate(&user).expect("enumerate");
        let meta = self
            .meta
            .get(&user)
            .expect("meta read")
            .expect("meta record exists");
        assert_eq!(
            meta.total_count,
            stored.len() as u64,
            "P1: totalCount matches storage"
        );
        assert_eq!(
            meta.collection_hash,
            collection_hash(&stored),
            "P2: collectionHash matches storage"
        );
    }

    /// Number of live sessions right now.
    pub fn live_sessions(&self) -> u64 {
        self.sessions
            .live_count(frkb_store::now_secs())
            .expect("live count")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
