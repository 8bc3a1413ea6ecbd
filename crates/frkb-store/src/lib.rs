#![warn(missing_docs)]

//! FRKB storage subsystem: authoritative fingerprint sets, per-user meta
//! records, diff sessions and the user-key directory.

/// Error types for the storage subsystem
pub mod error;
/// Authoritative per-user fingerprint sets
pub mod fingerprint;
/// Collection-hash computation
pub mod hash;
/// Per-user aggregate meta records
pub mod meta;
/// Durable diff-session records with TTL
pub mod session;
/// Core identifier and record types
pub mod types;
/// External user-key directory
pub mod users;

pub use error::{StoreError, StoreResult};
pub use fingerprint::{BatchInsert, FingerprintRecord, FingerprintStore, MemoryFingerprintStore};
pub use hash::{collection_hash, collection_hash_sorted};
pub use meta::{MemoryMetaStore, MetaRecordStore, MetaService, SyncStats, UserMeta};
pub use session::{DiffSession, MemorySessionStore, SessionStore};
pub use types::{now_millis, now_secs, Fingerprint, UserKey};
pub use users::{MemoryUserDirectory, UserDirectory, UserRecord};
