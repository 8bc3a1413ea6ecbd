//! Error types for the FRKB storage subsystem.

use thiserror::Error;

/// Error types for fingerprint, meta, session and user-key storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The user key is not a valid UUID v4.
    #[error("invalid user key: {value}")]
    InvalidUserKey {
        /// The rejected input
        value: String,
    },
    /// The fingerprint is not 64 lowercase hex characters.
    #[error("invalid fingerprint format: {value}")]
    InvalidFingerprint {
        /// The rejected input (truncated for logging)
        value: String,
    },
    /// The storage backend could not be reached or failed mid-operation.
    #[error("storage unavailable: {reason}")]
    Unavailable {
        /// What failed
        reason: String,
    },
    /// A stored record failed to decode.
    #[error("corrupt record: {reason}")]
    Corrupt {
        /// What failed to decode
        reason: String,
    },
}

/// Result type alias using StoreError as the error type.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
