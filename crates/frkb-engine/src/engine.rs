//! The sync engine: orchestrator of the diff protocol.
//!
//! Owns the per-user lock table and wires the fingerprint, meta and session
//! stores together with the bloom and ephemeral caches. Write-path
//! operations (batch add, reset) serialize per user through the lock table;
//! read-path operations never block, and the `check` tie-break repairs any
//! staleness they may observe.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, warn};

use frkb_cache::{BloomFilterCache, EphemeralCache};
use frkb_store::{
    now_millis, now_secs, DiffSession, Fingerprint, FingerprintStore, MemoryFingerprintStore,
    MemoryMetaStore, MemorySessionStore, MemoryUserDirectory, MetaService, SessionStore, UserKey,
    UserMeta, UserRecord, UserDirectory,
};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::locks::SyncLockTable;
use crate::types::*;
use crate::validate;

/// The diff-protocol orchestrator.
pub struct SyncEngine {
    config: SyncConfig,
    fingerprints: Arc<dyn FingerprintStore>,
    meta: Arc<MetaService>,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    bloom: Arc<BloomFilterCache>,
    cache: Arc<EphemeralCache>,
    locks: SyncLockTable,
    /// In-memory registry of sessions this process created: id to created_at.
    /// Swept by maintenance; the session store remains authoritative.
    session_handles: DashMap<String, u64>,
}

impl SyncEngine {
    /// Wires an engine over explicit store backends.
    pub fn new(
        config: SyncConfig,
        fingerprints: Arc<dyn FingerprintStore>,
        meta: Arc<MetaService>,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        info!(
            batch_size = config.batch_size,
            page_size = config.page_size,
            session_ttl_secs = config.session_ttl_secs,
            bloom_enabled = config.bloom.enabled,
            "creating sync engine"
        );
        let bloom = Arc::new(BloomFilterCache::new(
            config.bloom.clone(),
            fingerprints.clone(),
            meta.clone(),
        ));
        let cache = Arc::new(EphemeralCache::new(config.cache.clone()));
        let locks = SyncLockTable::new(config.lock_stale_secs);
        Self {
            config,
            fingerprints,
            meta,
            sessions,
            users,
            bloom,
            cache,
            locks,
            session_handles: DashMap::new(),
        }
    }

    /// Convenience constructor over fresh in-memory backends.
    pub fn with_memory_stores(config: SyncConfig) -> (Self, Arc<MemoryUserDirectory>) {
        let fingerprints = Arc::new(MemoryFingerprintStore::new());
        let meta = Arc::new(MetaService::new(
            Arc::new(MemoryMetaStore::new()),
            fingerprints.clone(),
        ));
        let sessions = Arc::new(MemorySessionStore::new());
        let users = Arc::new(MemoryUserDirectory::new());
        let engine = Self::new(config, fingerprints, meta, sessions, users.clone());
        (engine, users)
    }

    /// The engine's configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The ephemeral cache (exposed for the transport layer's admin surface).
    pub fn cache(&self) -> &EphemeralCache {
        &self.cache
    }

    // ------------------------------------------------------------------
    // check
    // ------------------------------------------------------------------

    /// Fast-path decision: does this client need to sync at all?
    ///
    /// First matching row of the decision table wins. Equal counts with
    /// differing hashes trigger a tie-break refresh, because cached meta may
    /// lag a concurrent insert.
    pub fn check(&self, user: &UserKey, client_count: u64, client_hash: &str) -> SyncResult<CheckOutcome> {
        let record = self.admitted(user)?;
        let now = now_secs();

        let meta = self.meta_snapshot(user, now)?;
        let limit = record.fingerprint_limit;

        if self.locks.is_locked(user, now) {
            return Ok(outcome(&meta, false, CheckReason::SyncInProgress, limit));
        }
        if meta.total_count == 0 && client_count == 0 {
            return Ok(outcome(&meta, false, CheckReason::BothEmpty, limit));
        }
        if meta.total_count == 0 {
            return Ok(outcome(&meta, true, CheckReason::ServerEmpty, limit));
        }
        if client_count == 0 {
            return Ok(outcome(&meta, true, CheckReason::ClientEmpty, limit));
        }
        if meta.total_count != client_count {
            return Ok(outcome(&meta, true, CheckReason::CountMismatch, limit));
        }
        if meta.collection_hash == client_hash {
            return Ok(outcome(&meta, false, CheckReason::AlreadySynced, limit));
        }

        // Counts agree, hashes differ: the snapshot may be stale. Recompute
        // against live storage before declaring a real divergence.
        debug!(user = %user.short(), "check tie-break refresh");
        let refreshed = self.meta.refresh(user, now)?;
        self.cache.clear_user(user);
        self.cache.put_meta(refreshed.clone());

        if refreshed.collection_hash == client_hash {
            Ok(outcome(&refreshed, false, CheckReason::AlreadySynced, limit))
        } else {
            Ok(outcome(&refreshed, true, CheckReason::HashMismatch, limit))
        }
    }

    // ------------------------------------------------------------------
    // bidirectional diff
    // ------------------------------------------------------------------

    /// One round of the incremental diff: classifies a client batch into
    /// fingerprints the server is missing vs already has. Read-only; does
    /// not take the sync lock.
    pub fn bidirectional_diff(
        &self,
        user: &UserKey,
        client_batch: &[String],
        batch_index: u32,
        batch_size: usize,
    ) -> SyncResult<DiffBatchOutcome> {
        self.admitted(user)?;
        let now = now_secs();
        let batch = validate::parse_batch(client_batch, self.config.batch_size)?;

        // Cheap shrink for metrics; the store query below is authoritative.
        let bloom_answer = self.bloom.batch_might_contain(user, &batch, false, now)?;
        let bloom_stats = self.bloom.is_enabled().then(|| BloomBatchStats {
            maybe_present: bloom_answer.maybe_present,
            definitely_absent: bloom_answer.definitely_absent,
            source: bloom_answer.source,
        });

        let present = self.fingerprints.existing(user, &batch)?;
        let present_set: HashSet<&str> = present.iter().map(|fp| fp.as_str()).collect();

        let mut server_missing = Vec::new();
        let mut server_existing = Vec::new();
        for fp in &batch {
            if present_set.contains(fp.as_str()) {
                server_existing.push(fp.clone());
            } else {
                server_missing.push(fp.clone());
            }
        }

        let session_info = if batch_index == 0 {
            self.advisory_session(user, batch_size, now)?
        } else {
            None
        };

        Ok(DiffBatchOutcome {
            batch_index,
            batch_size,
            counts: DiffBatchCounts {
                submitted: batch.len() as u64,
                maybe_present: bloom_answer.maybe_present,
                server_missing: server_missing.len() as u64,
                server_existing: server_existing.len() as u64,
            },
            server_missing_fingerprints: server_missing,
            server_existing_fingerprints: server_existing,
            session_info,
            bloom_filter_stats: bloom_stats,
        })
    }

    /// Batch 0 estimates the client's total as one declared batch; when the
    /// server holds more than that, an advisory session is parked for a later
    /// whole-set analyze. Nothing downstream consumes it; `analyze_difference`
    /// is the definitive path to "missing in client".
    fn advisory_session(
        &self,
        user: &UserKey,
        declared_batch_size: usize,
        now: u64,
    ) -> SyncResult<Option<SessionInfo>> {
        let server_count = self.fingerprints.count(user)?;
        let estimated_missing = server_count.saturating_sub(declared_batch_size as u64);
        if estimated_missing == 0 {
            return Ok(None);
        }

        let session = DiffSession::new(
            self.new_session_id(),
            user.clone(),
            Vec::new(),
            Vec::new(),
            declared_batch_size as u64,
            server_count,
            self.config.session_ttl_secs,
            now,
        );
        let info = SessionInfo {
            session_id: session.session_id.clone(),
            estimated_client_missing: estimated_missing,
            expires_at: session.expires_at,
        };
        self.session_handles
            .insert(session.session_id.clone(), now);
        self.sessions.create(session)?;
        debug!(user = %user.short(), session = %info.session_id, "advisory diff session created");
        Ok(Some(info))
    }

    // ------------------------------------------------------------------
    // analyze difference
    // ------------------------------------------------------------------

    /// Whole-set diff: computes both missing-sets, persists a session for
    /// paginated pulls, and returns aggregate stats plus a recommendation.
    /// An empty client payload means "pull everything".
    pub fn analyze_difference(
        &self,
        user: &UserKey,
        client_fingerprints: &[String],
    ) -> SyncResult<AnalyzeOutcome> {
        self.admitted(user)?;
        let now = now_secs();
        let client = validate::parse_client_set(client_fingerprints, self.config.analyze_max_client)?;

        let server = self.fingerprints.enumerate(user)?;
        let client_set: HashSet<&str> = client.iter().map(|fp| fp.as_str()).collect();
        let server_set: HashSet<&str> = server.iter().map(|fp| fp.as_str()).collect();

        // Enumeration is sorted, so missing_in_client inherits the order.
        let missing_in_client: Vec<Fingerprint> = server
            .iter()
            .filter(|fp| !client_set.contains(fp.as_str()))
            .cloned()
            .collect();
        let missing_in_server: Vec<Fingerprint> = client
            .iter()
            .filter(|fp| !server_set.contains(fp.as_str()))
            .cloned()
            .collect();

        let client_missing_count = missing_in_client.len() as u64;
        let server_missing_count = missing_in_server.len() as u64;

        let session = DiffSession::new(
            self.new_session_id(),
            user.clone(),
            missing_in_client,
            missing_in_server,
            client.len() as u64,
            server.len() as u64,
            self.config.session_ttl_secs,
            now,
        );
        let session_id = session.session_id.clone();
        self.session_handles.insert(session_id.clone(), now);
        self.sessions.create(session.clone())?;
        self.cache.put_session(session, now);

        let meta = if client_missing_count == 0 && server_missing_count == 0 {
            // No diff: refresh so the next check answers already_synced
            // immediately. Best-effort; a failure self-heals on the next
            // check's tie-break.
            self.cache.clear_user(user);
            match self.meta.refresh(user, now) {
                Ok(meta) => {
                    self.cache.put_meta(meta.clone());
                    Some(meta)
                }
                Err(err) => {
                    warn!(user = %user.short(), error = %err, "post-analyze meta refresh failed");
                    None
                }
            }
        } else {
            self.meta.get(user)?
        };

        let total_pages = pages_for(client_missing_count, self.config.page_size);
        let mode = match (client_missing_count, server_missing_count) {
            (0, 0) => SyncMode::InSync,
            (0, _) => SyncMode::PushOnly,
            (_, 0) => SyncMode::PullOnly,
            _ => SyncMode::Bidirectional,
        };
        let priority = if client_missing_count > 10_000 || server_missing_count > 10_000 {
            Priority::High
        } else {
            Priority::Normal
        };

        info!(
            user = %user.short(),
            session = %session_id,
            client_missing = client_missing_count,
            server_missing = server_missing_count,
            "analyzed whole-set difference"
        );

        Ok(AnalyzeOutcome {
            diff_session_id: session_id,
            diff_stats: DiffStats {
                client_missing_count,
                server_missing_count,
                total_pages,
                page_size: self.config.page_size,
            },
            recommendations: Recommendations { mode, priority },
            server_stats: ServerStats {
                total_count: server.len() as u64,
                last_sync_at: meta.and_then(|m| m.last_sync_at),
            },
        })
    }

    // ------------------------------------------------------------------
    // pull diff page
    // ------------------------------------------------------------------

    /// Pulls one page of the session's `missing_in_client` set in stable
    /// sorted order. The sorted projection is computed by the first page and
    /// recorded back best-effort so later pages skip the sort.
    pub fn pull_diff_page(
        &self,
        user: &UserKey,
        session_id: &str,
        page_index: u32,
    ) -> SyncResult<PullPageOutcome> {
        self.admitted(user)?;
        let now = now_secs();

        let mut session = self.find_session(session_id, now)?.ok_or_else(|| {
            SyncError::DiffSessionNotFound {
                session_id: session_id.to_string(),
                retry_after_secs: self.config.session_ttl_secs,
            }
        })?;

        if session.user_key != *user {
            return Err(SyncError::DiffSessionUserMismatch {
                session_id: session_id.to_string(),
            });
        }

        // Sort on first page; record the projection so later pages (and other
        // concurrent fetchers) see the identical order.
        if session.sorted_missing_in_client.is_empty()
            || session.sorted_missing_in_client.len() != session.missing_in_client.len()
        {
            let mut sorted = session.missing_in_client.clone();
            sorted.sort();
            if let Err(err) = self
                .sessions
                .record_sorted_view(session_id, sorted.clone())
            {
                warn!(session = session_id, error = %err, "sorted view persistence failed");
            }
            session.sorted_missing_in_client = sorted;
            self.cache.put_session(session.clone(), now);
        }
        let sorted = &session.sorted_missing_in_client;

        let total_count = sorted.len() as u64;
        let total_pages = pages_for(total_count, self.config.page_size);
        let current_page = page_index.min(total_pages.saturating_sub(1));

        let start = current_page as usize * self.config.page_size;
        let end = (start + self.config.page_size).min(sorted.len());
        let page = if start < sorted.len() {
            sorted[start..end].to_vec()
        } else {
            Vec::new()
        };

        Ok(PullPageOutcome {
            session_id: session_id.to_string(),
            missing_fingerprints: page,
            page_info: PageInfo {
                current_page,
                page_size: self.config.page_size,
                total_pages,
                has_more: current_page + 1 < total_pages,
                total_count,
            },
        })
    }

    fn find_session(&self, session_id: &str, now: u64) -> SyncResult<Option<DiffSession>> {
        if let Some(cached) = self.cache.get_session(session_id) {
            if !cached.is_expired(now) {
                return Ok(Some(cached));
            }
            self.cache.remove_session(session_id);
        }
        let found = self.sessions.find(session_id, now)?;
        if let Some(session) = &found {
            self.cache.put_session(session.clone(), now);
        }
        Ok(found)
    }

    // ------------------------------------------------------------------
    // batch add
    // ------------------------------------------------------------------

    /// Idempotent union append. Takes the sync lock; duplicates (already on
    /// the server) are counted, never failed.
    pub fn batch_add(&self, user: &UserKey, raw_fingerprints: &[String]) -> SyncResult<AddOutcome> {
        let record = self.admitted(user)?;
        let now = now_secs();
        let _guard = self.locks.try_acquire(user, "batch_add", now)?;
        let started = Instant::now();

        let batch = validate::parse_batch(raw_fingerprints, self.config.batch_size)?;

        let limit = record.fingerprint_limit;
        if limit > 0 {
            let current = self.fingerprints.count(user)?;
            if current + batch.len() as u64 > limit {
                return Err(SyncError::FingerprintLimitExceeded {
                    current,
                    requested: batch.len() as u64,
                    limit,
                });
            }
        }

        let inserted = self.fingerprints.insert_batch(user, &batch, now)?;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.meta
            .apply_delta(user, inserted.inserted, duration_ms, now)?;

        if inserted.inserted > 0 {
            // The filter is idempotent; feeding duplicates too keeps it a
            // superset of storage.
            self.bloom.add_fingerprints(user, &batch);
        }
        self.cache.clear_user(user);
        if let Err(err) = self.users.record_sync(user) {
            warn!(user = %user.short(), error = %err, "sync counter bump failed");
        }

        info!(
            user = %user.short(),
            added = inserted.inserted,
            duplicates = inserted.duplicates,
            duration_ms,
            "batch add complete"
        );

        Ok(AddOutcome {
            added_count: inserted.inserted,
            duplicate_count: inserted.duplicates,
            total_requested: batch.len() as u64,
            batch_result: BatchResult {
                inserted: inserted.inserted,
                duplicates: inserted.duplicates,
                attempted: batch.len() as u64,
            },
        })
    }

    // ------------------------------------------------------------------
    // reset
    // ------------------------------------------------------------------

    /// Wipes the user's fingerprints, meta, sessions and caches. Usage
    /// counters on the user record are preserved. Steps are independent:
    /// a failure mid-way leaves earlier deletions in place, and cache
    /// clearing is best-effort.
    pub fn reset_user(&self, user: &UserKey, notes: Option<&str>) -> SyncResult<ResetOutcome> {
        let record = self.admitted(user)?;
        let now = now_secs();
        let _guard = self.locks.try_acquire(user, "reset", now)?;

        if let Some(notes) = notes {
            info!(user = %user.short(), notes, "user reset requested");
        }

        let before = ResetBefore {
            fingerprint_count: self.fingerprints.count(user)?,
            meta_count: if self.meta.get(user)?.is_some() { 1 } else { 0 },
            usage_stats: UsageStats {
                total_requests: record.total_requests,
                total_syncs: record.total_syncs,
            },
        };

        let mut first_error: Option<SyncError> = None;

        let cleared_fingerprints = self
            .fingerprints
            .purge_user(user)
            .unwrap_or_else(|err| {
                warn!(user = %user.short(), error = %err, "fingerprint purge failed");
                first_error.get_or_insert(err.into());
                0
            });
        let cleared_metas = self.meta.delete(user).unwrap_or_else(|err| {
            warn!(user = %user.short(), error = %err, "meta delete failed");
            first_error.get_or_insert(err.into());
            0
        });
        let deleted_sessions = self.sessions.delete_by_user(user).unwrap_or_else(|err| {
            warn!(user = %user.short(), error = %err, "session delete failed");
            first_error.get_or_insert(err.into());
            0
        });
        self.bloom.clear(user);
        self.cache.clear_user(user);

        if let Some(err) = first_error {
            return Err(err);
        }

        info!(
            user = %user.short(),
            cleared_fingerprints,
            cleared_metas,
            deleted_sessions,
            "user data reset"
        );

        Ok(ResetOutcome {
            before,
            result: ResetResult {
                cleared_fingerprints,
                cleared_metas,
                deleted_sessions,
                cleared_cache: self.cache.is_enabled(),
            },
        })
    }

    // ------------------------------------------------------------------
    // status & service stats
    // ------------------------------------------------------------------

    /// Side-effect-free snapshot of one user's sync state.
    pub fn sync_status(&self, user: &UserKey) -> SyncResult<SyncStatusReport> {
        self.admitted(user)?;
        Ok(SyncStatusReport {
            user_key: user.clone(),
            sync_lock: self.locks.current(user),
            user_meta: match self.cache.get_meta(user) {
                Some(meta) => Some(meta),
                None => self.meta.get(user)?,
            },
            bloom_filter_stats: self.bloom.stats(user),
        })
    }

    /// Side-effect-free service-wide aggregates.
    pub fn service_stats(&self) -> SyncResult<ServiceStats> {
        let now = now_secs();
        Ok(ServiceStats {
            active_sessions: self.sessions.live_count(now)?,
            sync_locks: self.locks.len() as u64,
            cache: self.cache.stats(),
            bloom: self.bloom.aggregate(),
        })
    }

    // ------------------------------------------------------------------
    // admin & maintenance
    // ------------------------------------------------------------------

    /// Administrative force-release of a user's sync lock.
    pub fn force_unlock(&self, user: &UserKey) -> bool {
        self.locks.force_release(user)
    }

    /// Administrative cache reset: drops the user's bloom filter and
    /// ephemeral entries. Authoritative storage is untouched.
    pub fn clear_user_caches(&self, user: &UserKey) {
        self.bloom.clear(user);
        self.cache.clear_user(user);
    }

    /// One maintenance sweep: stale locks, aged session handles, expired
    /// session records. Invoked periodically by the maintenance task.
    pub fn sweep(&self) {
        let now = now_secs();
        let released = self
            .locks
            .sweep_stale(self.config.maintenance_lock_cutoff_secs, now);

        let cutoff = now.saturating_sub(self.config.session_handle_max_age_secs);
        let before = self.session_handles.len();
        self.session_handles.retain(|_, created_at| *created_at > cutoff);
        let dropped_handles = before - self.session_handles.len();

        let purged = match self.sessions.purge_expired(now) {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "expired-session purge failed");
                0
            }
        };

        if released > 0 || dropped_handles > 0 || purged > 0 {
            info!(released, dropped_handles, purged, "maintenance sweep");
        }
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    /// Resolves the user against the directory, rejecting unknown or revoked
    /// keys. The auth collaborator performs the same check at the edge; the
    /// engine repeats it so direct embedders get the same contract.
    fn admitted(&self, user: &UserKey) -> SyncResult<UserRecord> {
        match self.users.resolve(user)? {
            Some(record) if record.is_active => Ok(record),
            Some(_) => Err(SyncError::UserKeyInactive),
            None => Err(SyncError::UserKeyNotFound),
        }
    }

    fn meta_snapshot(&self, user: &UserKey, now: u64) -> SyncResult<UserMeta> {
        if let Some(cached) = self.cache.get_meta(user) {
            return Ok(cached);
        }
        let meta = self.meta.get_or_create(user, now)?;
        self.cache.put_meta(meta.clone());
        Ok(meta)
    }

    fn new_session_id(&self) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(|c| (c as char).to_ascii_lowercase())
            .collect();
        format!("diff_{}_{}", now_millis(), suffix)
    }
}

fn outcome(meta: &UserMeta, need_sync: bool, reason: CheckReason, limit: u64) -> CheckOutcome {
    CheckOutcome {
        need_sync,
        reason,
        server_count: meta.total_count,
        server_hash: meta.collection_hash.clone(),
        last_sync_at: meta.last_sync_at,
        limit,
    }
}

fn pages_for(total: u64, page_size: usize) -> u32 {
    if total == 0 {
        0
    } else {
        total.div_ceil(page_size as u64) as u32
    }
}
