//! Deterministic content hashing for manifests and queue snapshots.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a byte slice.
///
/// # Arguments
/// * `bytes` - Content to hash.
///
/// # Returns
/// Lowercase hex digest, 64 characters.
pub fn sha256_hex(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}

/// Hash emitted Markdown content for manifest entries.
pub fn content_hash(content: &str) -> String {
  sha256_hex(content.as_bytes())
}
