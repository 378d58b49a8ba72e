//! Blake2b-256 hashing with the MMR position prefix.
//!
//! Every MMR node stores `Blake2b256(BE64(position) || payload)`. The
//! big-endian position prefix domain-separates a node hash by its location
//! in the forest, defeating second-preimage attacks across MMR sizes. The
//! prefix encoding is consensus-observable and must never change.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use std::fmt;

type Blake2b256 = Blake2b<U32>;

/// Size of a node hash in bytes.
pub const HASH_SIZE: usize = 32;

/// A 32-byte Blake2b hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; HASH_SIZE]);

impl Hash {
    /// The all-zeroes hash.
    pub const ZERO: Hash = Hash([0u8; HASH_SIZE]);

    /// Plain Blake2b-256 of `data`, without a position prefix.
    ///
    /// Used for identity hashes (e.g. block header hashes), never for MMR
    /// nodes.
    pub fn of(data: &[u8]) -> Hash {
        let mut hasher = Blake2b256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Interpret a 32-byte slice as a hash.
    pub fn from_slice(bytes: &[u8]) -> Option<Hash> {
        let arr: [u8; HASH_SIZE] = bytes.try_into().ok()?;
        Some(Hash(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes are plenty for log lines.
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hash `payload` prefixed with the node's 0-based MMR position.
pub fn hash_with_index(position: u64, payload: &[u8]) -> Hash {
    let mut hasher = Blake2b256::new();
    hasher.update(position.to_be_bytes());
    hasher.update(payload);
    Hash(hasher.finalize().into())
}

/// Hash of a parent node: position prefix, then left and right child hashes.
pub fn hash_parent(position: u64, left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Blake2b256::new();
    hasher.update(position.to_be_bytes());
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash(hasher.finalize().into())
}
