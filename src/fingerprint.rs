use sha2::{Digest, Sha256};

/// SHA-256 of the raw document bytes, hex encoded.
///
/// Depends only on content, never on file name or mtime.
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Whether `value` looks like a digest produced by [`fingerprint`]. Caches
/// written by older tooling hold other digests under the same key.
pub fn is_fingerprint(value: &str) -> bool {
    value.len() == 64 && hex::decode(value).is_ok()
}
