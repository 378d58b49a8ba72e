//! File-backed MMR storage.
//!
//! One directory per MMR holding `pmmr_hash.bin`, `pmmr_data.bin` and,
//! when prunable, `pmmr_leafset.bin` and `pmmr_prun.bin`. Implements the
//! [`Backend`] trait the generic MMR drives, plus compaction, which the
//! coordinator invokes directly.

use crate::batch::WriteParticipant;
use crate::data_file::{DataFile, VariableFile};
use crate::hash_file::HashFile;
use crate::leaf_set::{LeafSet, LEAF_SET_FILE};
use crate::prune_list::{PruneList, PRUNE_LIST_FILE};
use crate::{Error, Result};
use roaring::RoaringBitmap;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::PathBuf;
use wimble_mmr::{arith, Backend, MmrError, MmrLeaf};
use wimble_primitives::Hash;

/// Node hash file name.
pub const PMMR_HASH_FILE: &str = "pmmr_hash.bin";

/// Leaf data file name.
pub const PMMR_DATA_FILE: &str = "pmmr_data.bin";

enum LeafData {
    Fixed(DataFile),
    Variable(VariableFile),
}

/// On-disk backend for one MMR.
pub struct PmmrBackend<L> {
    dir: PathBuf,
    hash_file: HashFile,
    data: LeafData,
    leaf_set: Option<LeafSet>,
    prune_list: Option<PruneList>,
    _marker: PhantomData<L>,
}

impl<L: MmrLeaf> PmmrBackend<L> {
    /// Open or create the backend under `dir`.
    pub fn open(dir: impl Into<PathBuf>, prunable: bool) -> Result<PmmrBackend<L>> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let hash_file = HashFile::open(dir.join(PMMR_HASH_FILE))?;
        let data = match L::ELEM_SIZE {
            Some(size) => LeafData::Fixed(DataFile::open(dir.join(PMMR_DATA_FILE), size)?),
            None => LeafData::Variable(VariableFile::open(dir.join(PMMR_DATA_FILE))?),
        };
        let (leaf_set, prune_list) = if prunable {
            (
                Some(LeafSet::open(dir.join(LEAF_SET_FILE))?),
                Some(PruneList::open(dir.join(PRUNE_LIST_FILE))?),
            )
        } else {
            (None, None)
        };

        Ok(PmmrBackend {
            dir,
            hash_file,
            data,
            leaf_set,
            prune_list,
            _marker: PhantomData,
        })
    }

    /// Logical node count implied by the stored hashes and prune shifts.
    pub fn unpruned_size(&self) -> u64 {
        let shift = self
            .prune_list
            .as_ref()
            .map(|p| p.total_shift())
            .unwrap_or(0);
        self.hash_file.size() + shift
    }

    /// The working leaf-set bitmap (prunable backends only).
    pub fn leaf_set_snapshot(&self) -> RoaringBitmap {
        self.leaf_set
            .as_ref()
            .map(|l| l.snapshot())
            .unwrap_or_default()
    }

    /// Pruned-root view, for diagnostics and tests.
    pub fn pruned_roots(&self) -> Vec<u64> {
        self.prune_list
            .as_ref()
            .map(|p| p.roots())
            .unwrap_or_default()
    }

    /// Whether `pos` lies inside (or is the root of) a pruned subtree.
    pub fn is_pruned(&self, pos: u64) -> bool {
        self.prune_list
            .as_ref()
            .map(|p| p.is_pruned(pos))
            .unwrap_or(false)
    }

    fn data_records(&self) -> u64 {
        match &self.data {
            LeafData::Fixed(f) => f.size(),
            LeafData::Variable(v) => v.size(),
        }
    }

    fn total_leaf_shift(&self) -> u64 {
        self.prune_list
            .as_ref()
            .map(|p| p.total_leaf_shift())
            .unwrap_or(0)
    }

    fn shift(&self, pos: u64) -> u64 {
        self.prune_list.as_ref().map(|p| p.shift(pos)).unwrap_or(0)
    }

    fn read_raw_leaf(&self, leaf_index: u64) -> Option<Vec<u8>> {
        match &self.data {
            LeafData::Fixed(file) => {
                let shift = self
                    .prune_list
                    .as_ref()
                    .map(|p| p.leaf_shift(arith::leaf_to_pos(leaf_index)))
                    .unwrap_or(0);
                file.get(leaf_index - shift)
            }
            LeafData::Variable(file) => file.get(leaf_index),
        }
    }

    /// Compact the files: physically drop every spent leaf below
    /// `cutoff_size` and the internal nodes of fully-spent subtrees,
    /// keeping subtree root hashes. Returns whether anything changed.
    ///
    /// Runs between batches; all files must be in their committed state.
    pub fn compact(&mut self, cutoff_size: u64) -> Result<bool> {
        let leaf_set = self
            .leaf_set
            .as_ref()
            .ok_or_else(|| Error::Corrupted("compacting a non-prunable MMR".into()))?;
        if matches!(self.data, LeafData::Variable(_)) {
            return Err(Error::Corrupted(
                "variable-record MMRs are not prunable".into(),
            ));
        }
        let size = self.unpruned_size();
        // The cutoff may never fall below what is already compacted, or
        // the rebuilt root set would no longer describe the files.
        let compacted_end = self
            .prune_list
            .as_ref()
            .and_then(|p| p.compacted_max_pos())
            .map(|pos| pos + 1)
            .unwrap_or(0);
        let cutoff = cutoff_size.min(size).max(compacted_end);

        // Every spent leaf below the cutoff is a pruned subtree of one.
        let mut queue: BTreeSet<u64> = BTreeSet::new();
        for leaf_index in 0..arith::n_leaves(cutoff) {
            if !leaf_set.contains(leaf_index) {
                queue.insert(arith::leaf_to_pos(leaf_index));
            }
        }

        // Collapse sibling pairs into parents until a fixpoint. The queue
        // is processed in ascending order; a popped node's sibling is
        // either still queued (to the right) or already a root (to the
        // left).
        let mut roots: BTreeSet<u64> = BTreeSet::new();
        while let Some(pos) = pop_first(&mut queue) {
            let (parent, sibling) = arith::family(pos);
            if queue.remove(&sibling) || roots.remove(&sibling) {
                queue.insert(parent);
            } else {
                roots.insert(pos);
            }
        }

        let new_roots: RoaringBitmap = roots.iter().map(|&pos| pos as u32).collect();
        let prune_list = self.prune_list.as_mut().expect("prunable");
        let unchanged = new_roots
            == prune_list.roots().iter().map(|&p| p as u32).collect::<RoaringBitmap>()
            && prune_list.total_shift() == shift_of(&roots);
        if roots.is_empty() || unchanged {
            prune_list.apply_compaction(new_roots);
            prune_list.flush()?;
            return Ok(false);
        }

        // Rewrite the hash file without the positions strictly inside a
        // pruned subtree (roots keep their hash).
        let tmp_hash = self.dir.join(format!("{PMMR_HASH_FILE}.tmp"));
        {
            let mut writer = BufWriter::new(File::create(&tmp_hash)?);
            for pos in 0..size {
                match covering_root(&roots, pos) {
                    Some(root) if root != pos => continue,
                    _ => {}
                }
                let hash = self.get_from_file(pos).ok_or_else(|| {
                    Error::Corrupted(format!("hash missing at {pos} during compaction"))
                })?;
                writer.write_all(hash.as_bytes())?;
            }
            writer.into_inner().map_err(|e| e.into_error())?.sync_data()?;
        }

        // Rewrite the data file without the leaves of pruned subtrees
        // (the root's own record goes too when the root is a leaf).
        let tmp_data = self.dir.join(format!("{PMMR_DATA_FILE}.tmp"));
        {
            let mut writer = BufWriter::new(File::create(&tmp_data)?);
            for leaf_index in 0..arith::n_leaves(size) {
                let pos = arith::leaf_to_pos(leaf_index);
                if covering_root(&roots, pos).is_some() {
                    continue;
                }
                let record = self.read_raw_leaf(leaf_index).ok_or_else(|| {
                    Error::Corrupted(format!("leaf {leaf_index} missing during compaction"))
                })?;
                writer.write_all(&record)?;
            }
            writer.into_inner().map_err(|e| e.into_error())?.sync_data()?;
        }

        self.hash_file.replace(&tmp_hash)?;
        if let LeafData::Fixed(file) = &mut self.data {
            file.replace(&tmp_data)?;
        }

        let prune_list = self.prune_list.as_mut().expect("prunable");
        let n_roots = roots.len();
        prune_list.apply_compaction(new_roots);
        prune_list.flush()?;

        tracing::debug!(
            dir = %self.dir.display(),
            size,
            roots = n_roots,
            "compacted MMR files"
        );
        Ok(true)
    }
}

fn pop_first(set: &mut BTreeSet<u64>) -> Option<u64> {
    let first = *set.iter().next()?;
    set.remove(&first);
    Some(first)
}

/// The pruned root whose subtree contains `pos`, if any. Roots are
/// disjoint, so only the first root at or after `pos` can cover it.
fn covering_root(roots: &BTreeSet<u64>, pos: u64) -> Option<u64> {
    let root = *roots.range(pos..).next()?;
    let (lo, _) = arith::bintree_range(root);
    (lo <= pos).then_some(root)
}

fn shift_of(roots: &BTreeSet<u64>) -> u64 {
    roots
        .iter()
        .map(|&root| (1u64 << (arith::height(root) + 1)) - 2)
        .sum()
}

impl<L: MmrLeaf> Backend<L> for PmmrBackend<L> {
    fn append(&mut self, leaf: &L, hashes: &[Hash]) -> Result<(), MmrError> {
        let bytes = leaf.to_bytes();
        match &mut self.data {
            LeafData::Fixed(file) => file
                .append(&bytes)
                .map_err(|e| MmrError::Backend(e.to_string()))?,
            LeafData::Variable(file) => {
                file.append(&bytes)
                    .map_err(|e| MmrError::Backend(e.to_string()))?;
            }
        }
        let leaf_index = self.total_leaf_shift() + self.data_records() - 1;
        if let Some(leaf_set) = &mut self.leaf_set {
            leaf_set.set(leaf_index);
        }
        for hash in hashes {
            self.hash_file.append(hash);
        }
        Ok(())
    }

    fn get_hash(&self, pos: u64) -> Option<Hash> {
        if arith::is_leaf(pos) {
            if let Some(leaf_set) = &self.leaf_set {
                if !leaf_set.contains(arith::pos_to_leaf(pos)) {
                    return None;
                }
            }
        }
        self.get_from_file(pos)
    }

    fn get_from_file(&self, pos: u64) -> Option<Hash> {
        if let Some(prune_list) = &self.prune_list {
            if prune_list.is_compacted(pos) {
                return None;
            }
        }
        self.hash_file.get(pos - self.shift(pos))
    }

    fn get_data(&self, pos: u64) -> Option<L> {
        if !arith::is_leaf(pos) {
            return None;
        }
        let leaf_index = arith::pos_to_leaf(pos);
        if let Some(leaf_set) = &self.leaf_set {
            if !leaf_set.contains(leaf_index) {
                return None;
            }
        }
        let bytes = self.read_raw_leaf(leaf_index)?;
        L::from_bytes(&bytes).ok()
    }

    fn remove(&mut self, pos: u64) -> Result<(), MmrError> {
        let size = self.unpruned_size();
        let leaf_set = self
            .leaf_set
            .as_mut()
            .ok_or_else(|| MmrError::Backend("removing from a non-prunable MMR".into()))?;
        let leaf_index = arith::pos_to_leaf(pos);
        if !leaf_set.contains(leaf_index) {
            return Err(MmrError::AlreadySpent(pos));
        }
        leaf_set.clear(leaf_index);

        // When the sibling leaf is already gone the pair collapses into
        // the parent, which may cascade further up via the prune list.
        let (parent, sibling) = arith::family(pos);
        if sibling < size && !leaf_set.contains(arith::pos_to_leaf(sibling)) {
            if let Some(prune_list) = &mut self.prune_list {
                prune_list.add(parent);
            }
        }
        Ok(())
    }

    fn rewind(&mut self, size: u64, spent_to_restore: &RoaringBitmap) -> Result<(), MmrError> {
        if let Some(prune_list) = &mut self.prune_list {
            prune_list
                .rewind(spent_to_restore)
                .map_err(|e| MmrError::Backend(e.to_string()))?;
        }
        if let Some(leaf_set) = &mut self.leaf_set {
            leaf_set.rewind(arith::n_leaves(size), spent_to_restore);
        }

        let below_horizon = || MmrError::Backend("rewind below compaction horizon".into());
        let hash_target = size
            .checked_sub(self.shift(size))
            .ok_or_else(below_horizon)?;
        self.hash_file.rewind(hash_target);

        let leaf_target = arith::n_leaves(size);
        let leaf_shift = self.total_leaf_shift();
        match &mut self.data {
            LeafData::Fixed(file) => {
                file.rewind(leaf_target.checked_sub(leaf_shift).ok_or_else(below_horizon)?);
            }
            LeafData::Variable(file) => file.rewind(leaf_target),
        }
        Ok(())
    }

    fn discard(&mut self) {
        self.hash_file.discard();
        match &mut self.data {
            LeafData::Fixed(file) => file.discard(),
            LeafData::Variable(file) => file.discard(),
        }
        if let Some(leaf_set) = &mut self.leaf_set {
            leaf_set.discard();
        }
        if let Some(prune_list) = &mut self.prune_list {
            prune_list.discard();
        }
    }
}

impl<L: MmrLeaf> WriteParticipant for PmmrBackend<L> {
    /// Commit the files in dependency order: leaf data before hashes,
    /// leaf set before prune list. Any failure rolls all of them back.
    fn commit(&mut self) -> Result<()> {
        let data: &mut dyn WriteParticipant = match &mut self.data {
            LeafData::Fixed(file) => file,
            LeafData::Variable(file) => file,
        };
        let mut participants: Vec<&mut dyn WriteParticipant> =
            vec![data, &mut self.hash_file];
        if let Some(leaf_set) = &mut self.leaf_set {
            participants.push(leaf_set);
        }
        if let Some(prune_list) = &mut self.prune_list {
            participants.push(prune_list);
        }
        crate::batch::commit_all(&mut participants)
    }

    fn rollback(&mut self) {
        self.discard();
    }
}
