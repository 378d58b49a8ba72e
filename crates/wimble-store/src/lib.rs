//! File-backed storage for the Wimble transaction-output hash-set.
//!
//! The MMR side: append-only hash and data files with staged writes and
//! crash-safe size sidecars, the unspent-leaf bitmap, the prune list and
//! the [`PmmrBackend`] tying them together. The chain side: [`BlockDB`],
//! a RocksDB store for blocks, headers, block sums and the output
//! position index. Everything writes under a coordinated batch (see
//! [`batch`]) so a failed block application leaves no trace.

mod append_file;
pub mod batch;
mod block_db;
mod data_file;
mod error;
mod hash_file;
mod leaf_set;
mod prune_list;
mod pmmr_backend;

pub use append_file::AppendOnlyFile;
pub use batch::{commit_all, rollback_all, WriteParticipant};
pub use block_db::{cf, BlockDB, BlockDBBatch};
pub use data_file::{DataFile, VariableFile};
pub use error::{Error, Result};
pub use hash_file::HashFile;
pub use leaf_set::{LeafSet, LEAF_SET_FILE, LEGACY_LEAF_FILE};
pub use pmmr_backend::{PmmrBackend, PMMR_DATA_FILE, PMMR_HASH_FILE};
pub use prune_list::{PruneList, PRUNE_LIST_FILE};
