//! Error types for the hash-set coordinator and validator.

use wimble_primitives::Commitment;

/// Hash-set operation failure.
///
/// The `Invalid*` variants are consensus violations: non-retryable, the
/// candidate chain is rejected and the peer that supplied it penalized.
/// `Io`-level failures (via [`Error::Store`]) are fatal to the batch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Storage failure (file I/O or the block database).
    #[error(transparent)]
    Store(#[from] wimble_store::Error),

    /// MMR-level failure.
    #[error(transparent)]
    Mmr(#[from] wimble_mmr::MmrError),

    /// Commitment arithmetic failure at the crypto boundary.
    #[error(transparent)]
    Crypto(#[from] wimble_crypto::CryptoError),

    /// An MMR's size does not match the block header.
    #[error("MMR size does not match header")]
    InvalidMmrSize,

    /// A parent node hash does not match its children.
    #[error("MMR parent hash mismatch at position {0}")]
    InvalidMmrHash(u64),

    /// A bagged MMR root does not match the block header.
    #[error("MMR root does not match header")]
    InvalidMmrRoot,

    /// The kernel MMR is not a prefix of what a historical header
    /// committed to.
    #[error("kernel root mismatch at height {0}")]
    InvalidKernelHistory(u64),

    /// Output sums minus supply do not balance the kernel excesses.
    #[error("kernel sums do not balance")]
    InvalidKernelSum,

    /// A batched range-proof verification failed.
    #[error("invalid range proof")]
    InvalidRangeProof,

    /// A batched kernel signature verification failed.
    #[error("invalid kernel signature")]
    InvalidKernelSignature,

    /// Spending an output that does not exist or is already spent.
    #[error("output not found or already spent: {0:?}")]
    AlreadySpent(Commitment),

    /// Appending an output whose commitment is already unspent in the
    /// set.
    #[error("duplicate commitment: {0:?}")]
    DuplicateCommitment(Commitment),

    /// A header the operation needs is missing from the database.
    #[error("header not found at height {0}")]
    HeaderNotFound(u64),

    /// User-initiated abort, observed at a loop boundary.
    #[error("validation cancelled")]
    Cancelled,

    /// Snapshot packaging failure.
    #[error("snapshot archive error: {0}")]
    Snapshot(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::Snapshot(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Store(wimble_store::Error::Io(e))
    }
}
