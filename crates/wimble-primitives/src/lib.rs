//! Consensus data types and protocol encoding for Wimble.
//!
//! Everything the transaction-output hash-set stores or hashes lives here:
//! kernels, output identifiers, range proofs, block headers and the
//! per-block sum cache. Encodings are the protocol encodings: byte-exact,
//! little-endian integers except for the big-endian MMR position prefix
//! used when hashing (see [`hash::hash_with_index`]).

mod block;
pub mod hash;
pub mod ser;
mod types;

pub use block::{Block, BlockHeader, BlockSums};
pub use hash::{Hash, HASH_SIZE};
pub use ser::DecodeError;
pub use types::{
    BlindingFactor, Commitment, Input, KernelFeatures, Output, OutputFeatures, OutputIdentifier,
    RangeProof, Signature, TxKernel, COMMITMENT_SIZE, OUTPUT_IDENT_SIZE, RANGE_PROOF_SIZE,
    SIGNATURE_SIZE,
};

/// Coinbase reward per block, in the smallest currency unit.
pub const REWARD: u64 = 60_000_000_000;
