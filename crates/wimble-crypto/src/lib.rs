//! The cryptography boundary.
//!
//! The hash-set core never interprets commitments, range proofs or kernel
//! signatures itself; it hands them to an implementation of [`Crypto`].
//! Production nodes plug in a real secp256k1-zkp backend. This workspace
//! ships only [`mock::MockCrypto`], a deterministic arithmetic stand-in
//! used by the test suites.

pub mod mock;

use thiserror::Error;
use wimble_primitives::{BlindingFactor, Commitment, RangeProof, TxKernel};

/// Commitment arithmetic failure.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A commitment did not parse as a curve point.
    #[error("malformed commitment")]
    InvalidCommitment,
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Everything the hash-set needs from the cryptographic layer.
///
/// Batch entry points are deliberate: verifying range proofs in batches of
/// thousands is roughly 4x cheaper per proof than one at a time, and the
/// validator is built around that.
pub trait Crypto: Send + Sync {
    /// Commitment to `value` with a zero blinding factor (supply terms).
    fn commit_value(&self, value: u64) -> Result<Commitment>;

    /// Commitment to a zero value with blinding factor `blind` (the
    /// accumulated kernel offset).
    fn commit_blind(&self, blind: &BlindingFactor) -> Result<Commitment>;

    /// Sum `positive` commitments minus `negative` commitments.
    fn sum_commitments(
        &self,
        positive: &[Commitment],
        negative: &[Commitment],
    ) -> Result<Commitment>;

    /// Batch-verify that every `(commitment, proof)` pair is a valid range
    /// proof. A single bad proof fails the whole batch.
    fn verify_range_proofs(&self, proofs: &[(Commitment, RangeProof)]) -> bool;

    /// Batch-verify the aggregate Schnorr signature of every kernel
    /// against its excess commitment.
    fn verify_kernel_signatures(&self, kernels: &[TxKernel]) -> bool;
}
