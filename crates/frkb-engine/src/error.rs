//! Error taxonomy for the sync engine.
//!
//! Every variant carries a stable wire code and an HTTP status so the
//! transport layer maps errors mechanically. Storage-layer failures surface
//! as `Internal` unless they are known-safe (the store consumes duplicate-key
//! responses itself).

use thiserror::Error;

use frkb_store::StoreError;

/// Error types for sync-engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The user key is not a valid UUID.
    #[error("invalid user key: {value}")]
    InvalidUserKey {
        /// The rejected input
        value: String,
    },
    /// The user key is not in the directory.
    #[error("user key not found")]
    UserKeyNotFound,
    /// The user key exists but has been revoked.
    #[error("user key inactive")]
    UserKeyInactive,
    /// A fingerprint failed the 64-hex format check.
    #[error("invalid fingerprint format: {value}")]
    InvalidFingerprintFormat {
        /// The rejected input
        value: String,
    },
    /// The request shape is invalid (duplicates in batch, empty field, …).
    #[error("validation error: {message}")]
    Validation {
        /// What failed
        message: String,
    },
    /// The payload exceeds a hard cap.
    #[error("request too large: {size} elements exceeds limit {limit}")]
    RequestTooLarge {
        /// Submitted element count
        size: usize,
        /// The enforced cap
        limit: usize,
    },
    /// The diff session does not exist or has expired.
    #[error("diff session not found: {session_id}")]
    DiffSessionNotFound {
        /// The session that was requested
        session_id: String,
        /// Hint: seconds after which a fresh analyze is worthwhile
        retry_after_secs: u64,
    },
    /// The diff session belongs to a different user.
    #[error("diff session user mismatch: {session_id}")]
    DiffSessionUserMismatch {
        /// The session that was requested
        session_id: String,
    },
    /// A write-path operation is already running for this user.
    #[error("sync already in progress: {operation}")]
    SyncInProgress {
        /// The operation holding the lock
        operation: String,
    },
    /// The add would push the user past their fingerprint limit.
    #[error("fingerprint limit exceeded: {current} stored + {requested} requested > {limit}")]
    FingerprintLimitExceeded {
        /// Fingerprints currently stored
        current: u64,
        /// Fingerprints in the rejected batch
        requested: u64,
        /// The user's limit
        limit: u64,
    },
    /// Storage failure or engine bug.
    #[error("internal error: {reason}")]
    Internal {
        /// What failed
        reason: String,
    },
}

impl SyncError {
    /// Stable wire code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::InvalidUserKey { .. } => "INVALID_USER_KEY",
            SyncError::UserKeyNotFound => "USER_KEY_NOT_FOUND",
            SyncError::UserKeyInactive => "USER_KEY_INACTIVE",
            SyncError::InvalidFingerprintFormat { .. } => "INVALID_FINGERPRINT_FORMAT",
            SyncError::Validation { .. } => "VALIDATION_ERROR",
            SyncError::RequestTooLarge { .. } => "REQUEST_TOO_LARGE",
            SyncError::DiffSessionNotFound { .. } => "DIFF_SESSION_NOT_FOUND",
            SyncError::DiffSessionUserMismatch { .. } => "DIFF_SESSION_USER_MISMATCH",
            SyncError::SyncInProgress { .. } => "SYNC_IN_PROGRESS",
            SyncError::FingerprintLimitExceeded { .. } => "FINGERPRINT_LIMIT_EXCEEDED",
            SyncError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for the transport layer.
    pub fn http_status(&self) -> u16 {
        match self {
            SyncError::InvalidUserKey { .. } => 400,
            SyncError::UserKeyNotFound => 404,
            SyncError::UserKeyInactive => 403,
            SyncError::InvalidFingerprintFormat { .. } => 400,
            SyncError::Validation { .. } => 400,
            SyncError::RequestTooLarge { .. } => 400,
            SyncError::DiffSessionNotFound { .. } => 404,
            SyncError::DiffSessionUserMismatch { .. } => 403,
            SyncError::SyncInProgress { .. } => 409,
            SyncError::FingerprintLimitExceeded { .. } => 403,
            SyncError::Internal { .. } => 500,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidUserKey { value } => SyncError::InvalidUserKey { value },
            StoreError::InvalidFingerprint { value } => {
                SyncError::InvalidFingerprintFormat { value }
            }
            StoreError::Unavailable { reason } | StoreError::Corrupt { reason } => {
                SyncError::Internal { reason }
            }
        }
    }
}

/// Result type alias using SyncError as the error type.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        let not_found = SyncError::DiffSessionNotFound {
            session_id: "diff_1_abc".to_string(),
            retry_after_secs: 300,
        };
        assert_eq!(not_found.code(), "DIFF_SESSION_NOT_FOUND");
        assert_eq!(not_found.http_status(), 404);

        let busy = SyncError::SyncInProgress {
            operation: "batch_add".to_string(),
        };
        assert_eq!(busy.code(), "SYNC_IN_PROGRESS");
        assert_eq!(busy.http_status(), 409);

        let limit = SyncError::FingerprintLimitExceeded {
            current: 199_900,
            requested: 200,
            limit: 200_000,
        };
        assert_eq!(limit.code(), "FINGERPRINT_LIMIT_EXCEEDED");
        assert_eq!(limit.http_status(), 403);
    }

    #[test]
    fn test_store_error_conversion() {
        let err: SyncError = StoreError::Unavailable {
            reason: "connection refused".to_string(),
        }
        .into();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(err.http_status(), 500);

        let err: SyncError = StoreError::InvalidFingerprint {
            value: "xyz".to_string(),
        }
        .into();
        assert_eq!(err.code(), "INVALID_FINGERPRINT_FORMAT");
        assert_eq!(err.http_status(), 400);
    }
}
