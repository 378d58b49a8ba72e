//! In-memory MMR backend for tests.

use crate::arith;
use crate::{Backend, MmrError, MmrLeaf};
use roaring::RoaringBitmap;
use wimble_primitives::Hash;

/// Test-support backend keeping everything in vectors. Spent leaves keep
/// their record so rewind can restore them, mimicking the on-disk
/// backend's behavior before compaction.
pub struct VecBackend<L> {
    hashes: Vec<Hash>,
    /// One entry per leaf: the record and whether it is unspent.
    leaves: Vec<(L, bool)>,
}

impl<L: MmrLeaf> VecBackend<L> {
    pub fn new() -> VecBackend<L> {
        VecBackend {
            hashes: vec![],
            leaves: vec![],
        }
    }

    /// Flip a stored hash, for corruption tests.
    pub fn corrupt_hash(&mut self, pos: u64) {
        let hash = &mut self.hashes[pos as usize];
        hash.0[0] ^= 0xff;
    }
}

impl<L: MmrLeaf> Default for VecBackend<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: MmrLeaf> Backend<L> for VecBackend<L> {
    fn append(&mut self, leaf: &L, hashes: &[Hash]) -> Result<(), MmrError> {
        self.leaves.push((leaf.clone(), true));
        self.hashes.extend_from_slice(hashes);
        Ok(())
    }

    fn get_hash(&self, pos: u64) -> Option<Hash> {
        if arith::is_leaf(pos) {
            let leaf_index = arith::pos_to_leaf(pos) as usize;
            if !self.leaves.get(leaf_index)?.1 {
                return None;
            }
        }
        self.get_from_file(pos)
    }

    fn get_from_file(&self, pos: u64) -> Option<Hash> {
        self.hashes.get(pos as usize).copied()
    }

    fn get_data(&self, pos: u64) -> Option<L> {
        if !arith::is_leaf(pos) {
            return None;
        }
        let (leaf, unspent) = self.leaves.get(arith::pos_to_leaf(pos) as usize)?;
        unspent.then(|| leaf.clone())
    }

    fn remove(&mut self, pos: u64) -> Result<(), MmrError> {
        let leaf_index = arith::pos_to_leaf(pos) as usize;
        let entry = self
            .leaves
            .get_mut(leaf_index)
            .ok_or(MmrError::OutOfBounds(pos))?;
        if !entry.1 {
            return Err(MmrError::AlreadySpent(pos));
        }
        entry.1 = false;
        Ok(())
    }

    fn rewind(&mut self, size: u64, spent_to_restore: &RoaringBitmap) -> Result<(), MmrError> {
        self.hashes.truncate(size as usize);
        self.leaves.truncate(arith::n_leaves(size) as usize);
        for leaf_index in spent_to_restore {
            if let Some(entry) = self.leaves.get_mut(leaf_index as usize) {
                entry.1 = true;
            }
        }
        Ok(())
    }

    fn discard(&mut self) {
        // Nothing staged: the vec backend applies everything eagerly.
    }
}
