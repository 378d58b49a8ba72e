//! The generic prunable MMR.

use crate::arith;
use crate::{Backend, MmrError, MmrLeaf};
use roaring::RoaringBitmap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use wimble_primitives::hash::{hash_parent, hash_with_index};
use wimble_primitives::Hash;

/// How often the long scans poll the cancellation flag.
const CANCEL_CHECK_INTERVAL: u64 = 1 << 12;

/// Root of the empty MMR: the bag of zero peaks, still size-prefixed.
pub fn empty_root() -> Hash {
    hash_with_index(0, &[])
}

/// A prunable MMR of `L` leaves over backend `B`.
///
/// Tracks the node count (`size`); all structure is derived from it via
/// [`arith`]. Appends stage in the backend until the surrounding batch
/// commits.
pub struct Pmmr<L, B> {
    backend: B,
    size: u64,
    _marker: PhantomData<L>,
}

impl<L, B> Pmmr<L, B>
where
    L: MmrLeaf,
    B: Backend<L>,
{
    /// Wrap a backend holding `size` nodes.
    pub fn at(backend: B, size: u64) -> Pmmr<L, B> {
        Pmmr {
            backend,
            size,
            _marker: PhantomData,
        }
    }

    /// Node count (positions, not leaves).
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of leaves appended so far.
    pub fn n_leaves(&self) -> u64 {
        arith::n_leaves(self.size)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Append a leaf, returning its position.
    ///
    /// Writes the leaf hash and every parent completed along the right
    /// spine, reading left-sibling hashes back from the backend (they may
    /// be pruned roots).
    pub fn push(&mut self, leaf: &L) -> Result<u64, MmrError> {
        let leaf_pos = self.size;
        let mut current_hash = hash_with_index(leaf_pos, &leaf.to_bytes());
        let mut hashes = vec![current_hash];

        let mut pos = leaf_pos;
        while arith::height(pos + 1) > arith::height(pos) {
            let parent = pos + 1;
            let parent_height = arith::height(parent);
            let left_pos = parent - (1 << parent_height);
            let left_hash = self
                .backend
                .get_from_file(left_pos)
                .ok_or(MmrError::MissingHash(left_pos))?;
            current_hash = hash_parent(parent, &left_hash, &current_hash);
            hashes.push(current_hash);
            pos = parent;
        }

        self.backend.append(leaf, &hashes)?;
        self.size = pos + 1;
        Ok(leaf_pos)
    }

    /// Mark the leaf at `pos` spent. The data record stays on disk until
    /// compaction.
    pub fn remove(&mut self, pos: u64) -> Result<(), MmrError> {
        if pos >= self.size {
            return Err(MmrError::OutOfBounds(pos));
        }
        if !arith::is_leaf(pos) {
            return Err(MmrError::NotLeaf(pos));
        }
        self.backend.remove(pos)
    }

    /// Node hash, `None` for spent leaves and pruned positions.
    pub fn get_hash(&self, pos: u64) -> Option<Hash> {
        if pos >= self.size {
            return None;
        }
        self.backend.get_hash(pos)
    }

    /// Leaf record, `None` when spent or pruned.
    pub fn get_data(&self, pos: u64) -> Option<L> {
        if pos >= self.size {
            return None;
        }
        self.backend.get_data(pos)
    }

    /// Bagged root at the current size.
    pub fn root(&self) -> Result<Hash, MmrError> {
        self.root_at(self.size)
    }

    /// Bagged root as of an earlier `size`.
    ///
    /// Right-folds the peak hashes: the accumulator starts as the
    /// rightmost peak and each earlier peak hashes in under the size
    /// prefix. Kernel-history validation calls this for every historical
    /// header size.
    pub fn root_at(&self, size: u64) -> Result<Hash, MmrError> {
        if size > self.size {
            return Err(MmrError::OutOfBounds(size));
        }
        if size == 0 {
            return Ok(empty_root());
        }
        let peaks = arith::peaks(size);
        if peaks.is_empty() {
            return Err(MmrError::InvalidSize(size));
        }

        let mut acc: Option<Hash> = None;
        for &peak in peaks.iter().rev() {
            let peak_hash = self
                .backend
                .get_from_file(peak)
                .ok_or(MmrError::MissingHash(peak))?;
            acc = Some(match acc {
                None => peak_hash,
                Some(bagged) => hash_parent(size, &peak_hash, &bagged),
            });
        }
        Ok(acc.expect("at least one peak"))
    }

    /// Verify every parent hash whose children are still present.
    ///
    /// Leaf hashes are not re-derived from leaf data here; root equality
    /// against the block header anchors them.
    pub fn validate(&self, cancel: &AtomicBool) -> Result<(), MmrError> {
        for pos in 0..self.size {
            if pos % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                return Err(MmrError::Cancelled);
            }
            let height = arith::height(pos);
            if height == 0 {
                continue;
            }
            let Some(parent_hash) = self.backend.get_from_file(pos) else {
                continue;
            };
            let left = self.backend.get_from_file(pos - (1 << height));
            let right = self.backend.get_from_file(pos - 1);
            if let (Some(left), Some(right)) = (left, right) {
                if hash_parent(pos, &left, &right) != parent_hash {
                    return Err(MmrError::HashMismatch(pos));
                }
            }
        }
        Ok(())
    }

    /// Shrink back to `size` nodes and restore previously spent leaves.
    pub fn rewind(
        &mut self,
        size: u64,
        spent_to_restore: &RoaringBitmap,
    ) -> Result<(), MmrError> {
        if size > self.size {
            return Err(MmrError::OutOfBounds(size));
        }
        if arith::peaks(size).is_empty() && size != 0 {
            return Err(MmrError::InvalidSize(size));
        }
        self.backend.rewind(size, spent_to_restore)?;
        self.size = size;
        Ok(())
    }

    /// Drop all staged changes; `size` snaps back to what the backend
    /// reports committed.
    pub fn discard(&mut self, committed_size: u64) {
        self.backend.discard();
        self.size = committed_size;
    }
}
