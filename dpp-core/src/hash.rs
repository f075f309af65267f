//! Hashing utilities: SHA-256 and hex encoding.
//!
//! Bootstrap key hashes, chirp hashes and connector kids are always
//! SHA-256 regardless of curve. Curve-dependent hashing (SHA-384/512)
//! lives in [`crate::crypto`].

use sha2::{Digest, Sha256};

use crate::encoding;

/// Compute SHA-256 hash of arbitrary data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 over the concatenation of `parts`.
pub fn sha256_vector(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Compute SHA-256 and return lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    encoding::to_hex(&sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn sha256_known_value() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn vector_matches_concatenation() {
        assert_eq!(sha256_vector(&[b"ch", b"irp"]), sha256(b"chirp"));
        assert_eq!(sha256_vector(&[]), sha256(b""));
    }
}
