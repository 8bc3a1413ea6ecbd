//! Request validation: the typed parse step.
//!
//! Raw wire strings become `UserKey` / `Fingerprint` values here or the
//! request dies with a typed error. Batch-shaped inputs additionally enforce
//! the size cap and reject within-batch duplicates; whole-set inputs enforce
//! the analyze payload cap and dedupe silently (clients send their entire
//! set, duplicates carry no information).

use std::collections::HashSet;

use frkb_store::{Fingerprint, UserKey};

use crate::error::{SyncError, SyncResult};

/// Parses and canonicalizes a user key.
pub fn parse_user_key(raw: &str) -> SyncResult<UserKey> {
    UserKey::parse(raw).map_err(|_| SyncError::InvalidUserKey {
        value: raw.to_string(),
    })
}

/// Parses a write-path batch: size-capped, 64-hex, no within-batch
/// duplicates.
pub fn parse_batch(raw: &[String], max: usize) -> SyncResult<Vec<Fingerprint>> {
    if raw.is_empty() {
        return Err(SyncError::Validation {
            message: "fingerprint batch is empty".to_string(),
        });
    }
    if raw.len() > max {
        return Err(SyncError::RequestTooLarge {
            size: raw.len(),
            limit: max,
        });
    }

    let mut parsed = Vec::with_capacity(raw.len());
    let mut seen: HashSet<&str> = HashSet::with_capacity(raw.len());
    for input in raw {
        let fp = parse_fingerprint(input)?;
        parsed.push(fp);
    }
    for fp in &parsed {
        if !seen.insert(fp.as_str()) {
            return Err(SyncError::Validation {
                message: format!("duplicate fingerprint in batch: {}", fp),
            });
        }
    }
    Ok(parsed)
}

/// Parses a whole-set client payload: capped, 64-hex, silently deduplicated.
pub fn parse_client_set(raw: &[String], cap: usize) -> SyncResult<Vec<Fingerprint>> {
    if raw.len() > cap {
        return Err(SyncError::RequestTooLarge {
            size: raw.len(),
            limit: cap,
        });
    }

    let mut seen: HashSet<Fingerprint> = HashSet::with_capacity(raw.len());
    let mut parsed = Vec::with_capacity(raw.len());
    for input in raw {
        let fp = parse_fingerprint(input)?;
        if seen.insert(fp.clone()) {
            parsed.push(fp);
        }
    }
    Ok(parsed)
}

/// Parses a single fingerprint, lowercasing defensively.
pub fn parse_fingerprint(raw: &str) -> SyncResult<Fingerprint> {
    Fingerprint::parse(raw).map_err(|err| match err {
        frkb_store::StoreError::InvalidFingerprint { value } => {
            SyncError::InvalidFingerprintFormat { value }
        }
        other => other.into(),
    })
}
