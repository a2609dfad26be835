//! SHA-256 digests for secret comparison.
//!
//! The API-key guard never compares raw secrets. Both sides are hashed and
//! the fixed-length hex digests are compared instead.

use sha2::{Digest, Sha256};

/// Lower-case hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// True when `presented` and `expected` hash to the same digest.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    sha256_hex(presented.as_bytes()) == sha256_hex(expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn equal_keys_match() {
        assert!(secrets_match("valuo-key-1", "valuo-key-1"));
    }

    // -----------------------------------------------------------------------
    // Near misses are rejected
    // -----------------------------------------------------------------------

    #[test]
    fn near_miss_keys_do_not_match() {
        for presented in ["valuo-key-2", "Valuo-key-1", "valuo-key-1 ", "valuo-key", ""] {
            assert!(!secrets_match(presented, "valuo-key-1"), "{presented:?}");
        }
    }
}
