//! Content hashing helpers

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest
pub const SHA256_HEX_LEN: usize = 64;

/// Calculate SHA-256 of a byte slice and return it as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Incremental SHA-256 over a sequence of byte chunks.
///
/// Each chunk is length-prefixed before hashing so that `["ab", "c"]` and
/// `["a", "bc"]` produce different digests.
#[derive(Default)]
pub struct ChunkHasher {
    inner: Sha256,
}

impl ChunkHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update((chunk.len() as u64).to_be_bytes());
        self.inner.update(chunk);
    }

    pub fn finish_hex(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// Validate a hex SHA-256 digest (64 lowercase or uppercase hex characters)
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == SHA256_HEX_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_chunk_hasher_is_boundary_sensitive() {
        let mut a = ChunkHasher::new();
        a.update(b"ab");
        a.update(b"c");
        let mut b = ChunkHasher::new();
        b.update(b"a");
        b.update(b"bc");
        assert_ne!(a.finish_hex(), b.finish_hex());
    }

    #[test]
    fn test_is_sha256_hex() {
        assert!(is_sha256_hex(&sha256_hex(b"x")));
        assert!(!is_sha256_hex("abc123"));
        assert!(!is_sha256_hex(&"g".repeat(64)));
    }
}
