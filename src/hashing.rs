//! Hashing utilities for kiln-evm
//!
//! Keccak256 for trie node hashes, code hashes, log topics, and address
//! derivation; SHA-256 for the corresponding precompile.

use crate::types::{Hash, B256};
use sha2::Sha256;
use sha3::{Digest, Keccak256};

/// Keccak256 hash of the empty byte string; code hash of a codeless account.
pub const KECCAK_EMPTY: B256 = B256::new([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03,
    0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85,
    0xa4, 0x70,
]);

/// Compute Keccak256 hash of arbitrary data
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    B256::from_slice(&hasher.finalize())
}

/// Compute SHA-256 hash of arbitrary data (precompile 0x02)
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    B256::from_slice(&hasher.finalize())
}

/// Hash multiple byte slices as one Keccak256 stream
pub fn keccak256_concat(values: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for value in values {
        hasher.update(value);
    }
    B256::from_slice(&hasher.finalize())
}

/// Hash a serializable struct
///
/// Uses bincode for deterministic serialization before hashing, so identical
/// values always produce identical hashes.
pub fn hash_struct<T: serde::Serialize>(value: &T) -> Hash {
    let bytes = bincode::serialize(value).expect("serialization should not fail");
    keccak256(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_empty() {
        assert_eq!(keccak256(&[]), KECCAK_EMPTY);
        assert_eq!(
            hex::encode(keccak256(&[])),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_keccak256_hello() {
        assert_eq!(
            hex::encode(keccak256(b"hello")),
            "1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8"
        );
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_concat_matches_single_stream() {
        assert_eq!(keccak256_concat(&[b"hello", b"world"]), keccak256(b"helloworld"));
    }

    #[test]
    fn test_hash_struct_deterministic() {
        #[derive(serde::Serialize)]
        struct Record {
            a: u64,
            b: u64,
        }

        let r1 = Record { a: 1, b: 2 };
        let r2 = Record { a: 1, b: 2 };
        let r3 = Record { a: 2, b: 1 };

        assert_eq!(hash_struct(&r1), hash_struct(&r2));
        assert_ne!(hash_struct(&r1), hash_struct(&r3));
    }
}
