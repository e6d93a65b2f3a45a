//! Blake2b-256 hashing.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    blake2b_256_multi(&[data])
}

/// Hash several slices as if concatenated, without allocating.
pub fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_part_matches_concatenation() {
        let joined = blake2b_256(b"vote 42");
        let parts = blake2b_256_multi(&[b"vote ", b"42"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn different_input_gives_different_digest() {
        assert_ne!(blake2b_256(b"a"), blake2b_256(b"b"));
    }
}
