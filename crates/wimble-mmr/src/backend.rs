//! Storage interface for a (prunable) MMR.

use crate::{MmrError, MmrLeaf};
use roaring::RoaringBitmap;
use wimble_primitives::Hash;

/// Backing storage for an MMR: a hash per position, a data record per
/// leaf, and, when prunable, the leaf set and prune list.
///
/// Positions are 0-indexed postorder MMR positions; the backend is
/// responsible for translating them to physical offsets (prune-list
/// shift).
pub trait Backend<L: MmrLeaf> {
    /// Append one leaf and the node hashes it completes (its own hash
    /// first, then every parent formed up the right spine).
    fn append(&mut self, leaf: &L, hashes: &[Hash]) -> Result<(), MmrError>;

    /// Node hash for reads that respect spent-ness: `None` for a spent or
    /// pruned-away leaf.
    fn get_hash(&self, pos: u64) -> Option<Hash>;

    /// Node hash straight from storage, ignoring the leaf set. Pruned
    /// subtree roots still answer; only positions compacted off disk
    /// return `None`.
    fn get_from_file(&self, pos: u64) -> Option<Hash>;

    /// Leaf record at `pos`; `None` when spent or pruned.
    fn get_data(&self, pos: u64) -> Option<L>;

    /// Mark the leaf at `pos` spent.
    fn remove(&mut self, pos: u64) -> Result<(), MmrError>;

    /// Shrink to `size` nodes, restoring the leaf-set bits in
    /// `spent_to_restore` (leaf indices spent by the blocks being
    /// rewound).
    fn rewind(&mut self, size: u64, spent_to_restore: &RoaringBitmap) -> Result<(), MmrError>;

    /// Drop all uncommitted changes.
    fn discard(&mut self);
}
