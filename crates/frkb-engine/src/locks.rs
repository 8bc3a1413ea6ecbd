//! Per-user sync locks.
//!
//! Write-path operations serialize per user through this table; read-path
//! operations never touch it beyond a lock-free presence probe. Acquisition
//! is try-only: a conflicting attempt fails with `SYNC_IN_PROGRESS` rather
//! than blocking, unless the held lock is older than the stale threshold, in
//! which case it is forcibly reclaimed and the reclaim is logged.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{info, warn};

use frkb_store::UserKey;

use crate::error::{SyncError, SyncResult};
use crate::types::LockView;

/// One held lock.
#[derive(Clone, Debug)]
pub struct LockInfo {
    /// The operation holding the lock.
    pub operation: &'static str,
    /// Unix seconds at acquisition.
    pub started_at: u64,
    /// Unique id of this acquisition.
    pub lock_id: u64,
}

/// The in-memory per-user lock table.
#[derive(Debug)]
pub struct SyncLockTable {
    locks: DashMap<UserKey, LockInfo>,
    next_id: AtomicU64,
    stale_secs: u64,
}

impl SyncLockTable {
    /// Creates a table whose locks become reclaimable after `stale_secs`.
    pub fn new(stale_secs: u64) -> Self {
        Self {
            locks: DashMap::new(),
            next_id: AtomicU64::new(1),
            stale_secs,
        }
    }

    /// Acquires the user's lock or fails with `SYNC_IN_PROGRESS`.
    ///
    /// A held lock older than the stale threshold is reclaimed: the previous
    /// holder is assumed dead and the new acquisition proceeds.
    pub fn try_acquire(
        &self,
        user: &UserKey,
        operation: &'static str,
        now: u64,
    ) -> SyncResult<SyncLockGuard<'_>> {
        let lock_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut conflict: Option<&'static str> = None;

        let entry = self.locks.entry(user.clone());
        let entry = entry.and_modify(|held| {
            if now.saturating_sub(held.started_at) >= self.stale_secs {
                warn!(
                    user = %user.short(),
                    operation = held.operation,
                    age_secs = now.saturating_sub(held.started_at),
                    "reclaiming stale sync lock"
                );
                *held = LockInfo {
                    operation,
                    started_at: now,
                    lock_id,
                };
            } else {
                conflict = Some(held.operation);
            }
        });
        entry.or_insert_with(|| LockInfo {
            operation,
            started_at: now,
            lock_id,
        });

        if let Some(holder) = conflict {
            return Err(SyncError::SyncInProgress {
                operation: holder.to_string(),
            });
        }

        Ok(SyncLockGuard {
            table: self,
            user: user.clone(),
            lock_id,
        })
    }

    /// Whether a live (non-stale) lock is currently held.
    pub fn is_locked(&self, user: &UserKey, now: u64) -> bool {
        self.locks
            .get(user)
            .map(|held| now.saturating_sub(held.started_at) < self.stale_secs)
            .unwrap_or(false)
    }

    /// Snapshot of the user's current lock, if any.
    pub fn current(&self, user: &UserKey) -> Option<LockView> {
        self.locks.get(user).map(|held| LockView {
            operation: held.operation.to_string(),
            started_at: held.started_at,
            lock_id: held.lock_id,
        })
    }

    /// Administrative force-release. Returns whether a lock was held.
    pub fn force_release(&self, user: &UserKey) -> bool {
        let released = self.locks.remove(user).is_some();
        if released {
            info!(user = %user.short(), "sync lock force-released");
        }
        released
    }

    /// Releases locks older than `cutoff_secs`. Maintenance-only; normal
    /// reclamation happens inside `try_acquire`.
    pub fn sweep_stale(&self, cutoff_secs: u64, now: u64) -> usize {
        let before = self.locks.len();
        self.locks
            .retain(|user, held| {
                let stale = now.saturating_sub(held.started_at) >= cutoff_secs;
                if stale {
                    warn!(
                        user = %user.short(),
                        operation = held.operation,
                        "maintenance released stale sync lock"
                    );
                }
                !stale
            });
        before - self.locks.len()
    }

    /// Number of held locks.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn release(&self, user: &UserKey, lock_id: u64) {
        self.locks
            .remove_if(user, |_, held| held.lock_id == lock_id);
    }
}

/// RAII guard releasing the lock on drop, error paths included.
#[derive(Debug)]
pub struct SyncLockGuard<'a> {
    table: &'a SyncLockTable,
    user: UserKey,
    lock_id: u64,
}

impl Drop for SyncLockGuard<'_> {
    fn drop(&mut self) {
        self.table.release(&self.user, self.lock_id);
    }
}
