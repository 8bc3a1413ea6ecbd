//! Core identifier types for the FRKB storage subsystem.
//!
//! User keys are UUID v4 strings canonicalized to lowercase. Fingerprints are
//! 64-character lowercase hex strings (SHA-256 digests, opaque to the server).
//! Both are parse-validated newtypes: once constructed they are known-good, so
//! downstream code never re-validates.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StoreError;

/// A user key: a UUID v4, case-insensitive on input, stored lowercase.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserKey(String);

impl UserKey {
    /// Parses and canonicalizes a user key. Accepts any case, stores lowercase.
    pub fn parse(input: &str) -> Result<Self, StoreError> {
        let trimmed = input.trim();
        let parsed = uuid::Uuid::parse_str(trimmed).map_err(|_| StoreError::InvalidUserKey {
            value: trimmed.to_string(),
        })?;
        Ok(UserKey(parsed.to_string()))
    }

    /// Generates a fresh random user key.
    pub fn generate() -> Self {
        UserKey(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the canonical lowercase string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the short prefix used in cache keys and log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fingerprint: 64 lowercase hex characters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parses a fingerprint, lowercasing defensively. Rejects anything that is
    /// not exactly 64 hex characters.
    pub fn parse(input: &str) -> Result<Self, StoreError> {
        let lowered = input.trim().to_ascii_lowercase();
        let hex = lowered
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if lowered.len() != 64 || !hex {
            return Err(StoreError::InvalidFingerprint {
                value: truncate_for_error(input),
            });
        }
        Ok(Fingerprint(lowered))
    }

    /// Returns the lowercase hex string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn truncate_for_error(input: &str) -> String {
    if input.len() > 80 {
        let head: String = input.chars().take(80).collect();
        format!("{}...", head)
    } else {
        input.to_string()
    }
}

/// Returns the current unix time in whole seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before epoch")
        .as_secs()
}

/// Returns the current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before epoch")
        .as_millis() as u64
}
