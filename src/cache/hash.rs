//! Content hashing for schema versions and request fingerprints.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of a serializable value.
///
/// The value is serialized to JSON before hashing; callers are responsible
/// for canonicalizing field order (sorted maps, sorted lists) so that
/// equivalent values hash identically. Returns a 64-character lowercase
/// hexadecimal string.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
