//! Error types for the storage layer.

/// Errors that can occur in file-backed storage or the block database.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File read/write/fsync failure. Fatal to the surrounding batch.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// RocksDB failure. Fatal to the surrounding batch.
    #[error("database error: {0}")]
    Database(#[from] rocksdb::Error),

    /// MMR-level failure surfaced through a storage backend.
    #[error(transparent)]
    Mmr(#[from] wimble_mmr::MmrError),

    /// An on-disk record did not decode.
    #[error("corrupted store: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, Error>;
