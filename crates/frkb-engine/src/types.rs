//! Typed outcomes for the sync-engine operations.
//!
//! Every request/response crossing the engine boundary is a fixed struct;
//! the transport layer serializes these verbatim (camelCase) into the wire
//! envelope.

use serde::{Deserialize, Serialize};

use frkb_cache::{BloomAggregate, BloomStats, CacheStats};
use frkb_store::{Fingerprint, UserKey, UserMeta};

/// Why `check` decided the way it did. First matching row of the decision
/// table wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckReason {
    /// A write-path operation currently holds the user's lock.
    SyncInProgress,
    /// Server and client are both empty.
    BothEmpty,
    /// Server has nothing; client should push everything.
    ServerEmpty,
    /// Client has nothing; client should pull everything.
    ClientEmpty,
    /// Counts differ.
    CountMismatch,
    /// Counts and hashes agree.
    AlreadySynced,
    /// Counts agree but hashes still differ after the tie-break refresh.
    HashMismatch,
}

/// Outcome of the `check` fast path.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    /// Whether the client should start a sync.
    pub need_sync: bool,
    /// Which decision-table row fired.
    pub reason: CheckReason,
    /// Server-side fingerprint count.
    pub server_count: u64,
    /// Server-side collection hash ("" when never computed).
    pub server_hash: String,
    /// Unix seconds of the last completed sync.
    pub last_sync_at: Option<u64>,
    /// The user's fingerprint limit.
    pub limit: u64,
}

/// Per-batch counters for a bidirectional diff round.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffBatchCounts {
    /// Elements submitted in this batch.
    pub submitted: u64,
    /// Elements the bloom layer thought might be present.
    pub maybe_present: u64,
    /// Elements the server is missing.
    pub server_missing: u64,
    /// Elements already stored server-side.
    pub server_existing: u64,
}

/// Advisory session info returned by batch 0 when the server appears to hold
/// substantially more than the client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// The advisory session id.
    pub session_id: String,
    /// Rough lower bound on fingerprints the client is missing.
    pub estimated_client_missing: u64,
    /// Session expiry, unix seconds.
    pub expires_at: u64,
}

/// Summary of the bloom consultation for one diff batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloomBatchStats {
    /// Candidates the filter could not rule out.
    pub maybe_present: u64,
    /// Candidates the filter ruled out.
    pub definitely_absent: u64,
    /// Provenance (`filter`, `no_data`, `bloom_disabled`).
    pub source: frkb_cache::BloomSource,
}

/// Outcome of one bidirectional-diff batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffBatchOutcome {
    /// Echo of the request's batch index.
    pub batch_index: u32,
    /// Echo of the request's batch size.
    pub batch_size: usize,
    /// Fingerprints the server needs (client should push).
    pub server_missing_fingerprints: Vec<Fingerprint>,
    /// Fingerprints already stored server-side.
    pub server_existing_fingerprints: Vec<Fingerprint>,
    /// Batch counters.
    pub counts: DiffBatchCounts,
    /// Advisory session created by batch 0, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_info: Option<SessionInfo>,
    /// Bloom consultation summary, when the layer is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bloom_filter_stats: Option<BloomBatchStats>,
}

/// Aggregate numbers for a whole-set diff.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    /// Fingerprints the client must pull.
    pub client_missing_count: u64,
    /// Fingerprints the server is missing.
    pub server_missing_count: u64,
    /// Pages needed to pull `client_missing_count` at `page_size`.
    pub total_pages: u32,
    /// Server-controlled page size.
    pub page_size: usize,
}

/// Suggested sync direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Client only needs to push.
    PushOnly,
    /// Client only needs to pull.
    PullOnly,
    /// Both directions have work.
    Bidirectional,
    /// Nothing to do.
    InSync,
}

/// Purely informational recommendation attached to an analyze response.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendations {
    /// Suggested direction.
    pub mode: SyncMode,
    /// `high` when either missing count exceeds 10 000.
    pub priority: Priority,
}

/// Recommendation urgency label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Large diff; sync soon.
    High,
    /// Routine diff.
    Normal,
}

/// Server-side aggregates echoed in an analyze response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    /// Server-side fingerprint count at analysis time.
    pub total_count: u64,
    /// Unix seconds of the last completed sync.
    pub last_sync_at: Option<u64>,
}

/// Outcome of a whole-set diff analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeOutcome {
    /// Session to pull pages from.
    pub diff_session_id: String,
    /// Aggregate diff numbers.
    pub diff_stats: DiffStats,
    /// Informational hints.
    pub recommendations: Recommendations,
    /// Server aggregates.
    pub server_stats: ServerStats,
}

/// Pagination envelope for a pulled page.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// The (clamped) page this response carries.
    pub current_page: u32,
    /// Server-controlled page size.
    pub page_size: usize,
    /// Total pages in the session.
    pub total_pages: u32,
    /// Whether pages remain after this one.
    pub has_more: bool,
    /// Total fingerprints across all pages.
    pub total_count: u64,
}

/// Outcome of one page pull.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullPageOutcome {
    /// Echo of the session id.
    pub session_id: String,
    /// This page's fingerprints, in stable sorted order.
    pub missing_fingerprints: Vec<Fingerprint>,
    /// Pagination envelope.
    pub page_info: PageInfo,
}

/// Store-level summary of one insert, nested in the add response alongside
/// the flat top-level counters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// Rows the store actually wrote.
    pub inserted: u64,
    /// Rows the store's uniqueness constraint absorbed.
    pub duplicates: u64,
    /// Rows handed to the store.
    pub attempted: u64,
}

/// Outcome of an idempotent batch add.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutcome {
    /// Rows actually inserted.
    pub added_count: u64,
    /// Rows already present server-side.
    pub duplicate_count: u64,
    /// Rows submitted.
    pub total_requested: u64,
    /// The store's own view of the insert.
    pub batch_result: BatchResult,
}

/// Usage counters living on the external user record. Reset reports them
/// but never touches them.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    /// Total admitted requests.
    pub total_requests: u64,
    /// Total completed syncs.
    pub total_syncs: u64,
}

/// Pre-reset snapshot returned to the caller.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetBefore {
    /// Fingerprints stored before the wipe.
    pub fingerprint_count: u64,
    /// Meta records before the wipe (0 or 1).
    pub meta_count: u64,
    /// The preserved usage counters.
    pub usage_stats: UsageStats,
}

/// What the reset actually removed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResult {
    /// Fingerprint rows removed.
    pub cleared_fingerprints: u64,
    /// Meta records removed.
    pub cleared_metas: u64,
    /// Diff sessions removed.
    pub deleted_sessions: u64,
    /// Whether the ephemeral cache was cleared.
    pub cleared_cache: bool,
}

/// Outcome of a user-data reset.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutcome {
    /// State before the wipe.
    pub before: ResetBefore,
    /// What was removed.
    pub result: ResetResult,
}

/// A snapshot of one user's sync lock, for status reporting.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockView {
    /// The operation holding the lock.
    pub operation: String,
    /// Unix seconds when the lock was taken.
    pub started_at: u64,
    /// Unique id of this acquisition.
    pub lock_id: u64,
}

/// Outcome of a status query.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusReport {
    /// The queried user.
    pub user_key: UserKey,
    /// The current lock, if one is held.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_lock: Option<LockView>,
    /// The user's meta record, if one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_meta: Option<UserMeta>,
    /// Bloom-filter stats, if a filter is resident.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bloom_filter_stats: Option<BloomStats>,
}

/// Service-wide aggregates.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    /// Live diff sessions across all users.
    pub active_sessions: u64,
    /// Currently held sync locks.
    pub sync_locks: u64,
    /// Ephemeral-cache counters.
    pub cache: CacheStats,
    /// Bloom-layer aggregate.
    pub bloom: BloomAggregate,
}
