//! The Wimble transaction-output hash-set.
//!
//! Three coordinated Merkle Mountain Ranges (kernels, outputs, range
//! proofs) over file-backed storage, plus the validator that proves a
//! whole set consistent with a block header. See [`TxHashSet`] for block
//! application, rewind and compaction, and [`TxHashSetValidator`] for the
//! validation pipeline.

mod error;
mod snapshot;
mod txhashset;
mod validator;

pub use error::{Error, Result};
pub use txhashset::{
    Extension, KernelMmr, OutputMmr, RangeProofMmr, SharedTxHashSet, TxHashSet, TxHashSetRoots,
    KERNEL_SUBDIR, OUTPUT_SUBDIR, RANGEPROOF_SUBDIR, TXHASHSET_SUBDIR,
};
pub use validator::{
    BlockChainView, ChainType, KernelSignatureValidator, KernelSumValidator, TxHashSetValidator,
    KERNEL_SIG_BATCH_SIZE, RANGE_PROOF_BATCH_SIZE,
};
pub use snapshot::{unzip_from_peer, SNAPSHOT_ZIP};
