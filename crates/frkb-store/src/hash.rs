//! Collection-hash computation.
//!
//! The collection hash is the canonical fingerprint of a set's membership:
//! SHA-256 over the ASCII concatenation of the lexicographically sorted
//! fingerprints, no separator. The empty set hashes to SHA-256 of the empty
//! string; no code branches on the literal digest.

use sha2::{Digest, Sha256};

use crate::types::Fingerprint;

/// Computes the collection hash of an already-sorted fingerprint slice.
///
/// Callers that hold the store's sorted enumeration use this directly to
/// avoid a redundant sort.
pub fn collection_hash_sorted(sorted: &[Fingerprint]) -> String {
    let mut hasher = Sha256::new();
    for fp in sorted {
        hasher.update(fp.as_str().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Computes the collection hash of an unsorted fingerprint set.
pub fn collection_hash(fingerprints: &[Fingerprint]) -> String {
    let mut sorted: Vec<&Fingerprint> = fingerprints.iter().collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    for fp in sorted {
        hasher.update(fp.as_str().as_bytes());
    }
    hex::encode(hasher.finalize())
}
