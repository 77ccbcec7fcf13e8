use alloy_primitives::B256;
use sha2::{Digest, Sha256};

/// SHA-256 applied twice, the digest used for block hashes and vote payloads.
pub fn hash256(data: &[u8]) -> B256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    B256::from_slice(&second)
}

/// Merkle root over a list of leaf hashes.
///
/// Levels are built by hashing concatenated pairs with `hash256`; an odd
/// node at the end of a level is paired with itself. An empty list yields
/// the zero hash.
pub fn merkle_root(leaves: &[B256]) -> B256 {
    if leaves.is_empty() {
        return B256::ZERO;
    }

    let mut level: Vec<B256> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = pair.get(1).copied().unwrap_or(left);
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(left.as_slice());
            buf[32..].copy_from_slice(right.as_slice());
            next.push(hash256(&buf));
        }
        level = next;
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_is_double_sha256() {
        let once = Sha256::digest(b"ember");
        let twice = Sha256::digest(once);
        assert_eq!(hash256(b"ember").as_slice(), twice.as_slice());
    }

    #[test]
    fn test_hash256_deterministic_and_input_sensitive() {
        assert_eq!(hash256(b"a"), hash256(b"a"));
        assert_ne!(hash256(b"a"), hash256(b"b"));
    }

    #[test]
    fn test_merkle_root_empty() {
        assert_eq!(merkle_root(&[]), B256::ZERO);
    }

    #[test]
    fn test_merkle_root_single_leaf_is_identity() {
        let leaf = B256::repeat_byte(0x11);
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn test_merkle_root_pair() {
        let a = B256::repeat_byte(0xAA);
        let b = B256::repeat_byte(0xBB);
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(a.as_slice());
        buf[32..].copy_from_slice(b.as_slice());
        assert_eq!(merkle_root(&[a, b]), hash256(&buf));
    }

    #[test]
    fn test_merkle_root_odd_count_duplicates_last() {
        let a = B256::repeat_byte(1);
        let b = B256::repeat_byte(2);
        let c = B256::repeat_byte(3);
        // Three leaves hash like four with the last one doubled.
        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[a, b, c, c]));
    }

    #[test]
    fn test_merkle_root_order_sensitive() {
        let a = B256::repeat_byte(1);
        let b = B256::repeat_byte(2);
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }
}
