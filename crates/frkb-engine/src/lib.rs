#![warn(missing_docs)]

//! FRKB sync engine: the diff protocol, per-user sync locks, batch-insert
//! semantics and the periodic maintenance task.

/// Engine configuration
pub mod config;
/// The sync engine itself
pub mod engine;
/// Error taxonomy with wire codes and HTTP statuses
pub mod error;
/// Per-user sync-lock table
pub mod locks;
/// Periodic maintenance task
pub mod maintenance;
/// Typed operation outcomes
pub mod types;
/// Request validation: the typed parse step
pub mod validate;

pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use locks::{LockInfo, SyncLockTable};
pub use types::{
    AddOutcome, AnalyzeOutcome, BatchResult, BloomBatchStats, CheckOutcome, CheckReason,
    DiffBatchCounts, DiffBatchOutcome, DiffStats, LockView, PageInfo, Priority, PullPageOutcome,
    Recommendations, ResetBefore, ResetOutcome, ResetResult, ServerStats, ServiceStats,
    SessionInfo, SyncMode, SyncStatusReport, UsageStats,
};
