//! Prune list: roots of subtrees pruned out of the MMR.
//!
//! Two layers share this type. The *pruned* layer is updated eagerly as
//! sibling spends collapse into parents; it answers `is_pruned` and feeds
//! compaction. The *compacted* layer is the subset whose subtrees have
//! actually been rewritten out of the hash and data files; only it is
//! persisted (`pmmr_prun.bin`) and only it drives the position shifts,
//! because shifts must mirror the physical file layout exactly. Pruned
//! but not-yet-compacted roots are recovered from the leaf set by the
//! next compaction, so losing them on restart is harmless.

use crate::{Error, Result};
use roaring::RoaringBitmap;
use std::fs;
use std::path::{Path, PathBuf};
use wimble_mmr::arith;

/// On-disk file name.
pub const PRUNE_LIST_FILE: &str = "pmmr_prun.bin";

fn write_bitmap(path: &Path, bitmap: &RoaringBitmap) -> Result<()> {
    let mut bytes = Vec::with_capacity(bitmap.serialized_size());
    bitmap.serialize_into(&mut bytes)?;
    let tmp = path.with_extension("bin.tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Bitmap of pruned subtree root positions.
///
/// Entries of the persisted (compacted) set are pairwise disjoint: no
/// entry is an ancestor of another.
pub struct PruneList {
    path: Option<PathBuf>,
    /// Compacted roots: subtrees physically removed from the files.
    compacted: RoaringBitmap,
    /// Roots pruned since the last compaction; files untouched so far.
    pending: RoaringBitmap,
    pending_bak: RoaringBitmap,
    /// Cumulative hash-file / data-file shifts, one entry per compacted
    /// root in ascending position order.
    shift_cache: Vec<u64>,
    leaf_shift_cache: Vec<u64>,
}

impl PruneList {
    pub fn open(path: impl Into<PathBuf>) -> Result<PruneList> {
        let path = path.into();
        let compacted = if path.exists() {
            let bytes = fs::read(&path)?;
            RoaringBitmap::deserialize_from(&bytes[..]).map_err(Error::Io)?
        } else {
            RoaringBitmap::new()
        };
        let mut list = PruneList {
            path: Some(path),
            compacted,
            pending: RoaringBitmap::new(),
            pending_bak: RoaringBitmap::new(),
            shift_cache: vec![],
            leaf_shift_cache: vec![],
        };
        list.rebuild_caches();
        Ok(list)
    }

    /// An unbacked prune list, for tests.
    pub fn empty() -> PruneList {
        PruneList {
            path: None,
            compacted: RoaringBitmap::new(),
            pending: RoaringBitmap::new(),
            pending_bak: RoaringBitmap::new(),
            shift_cache: vec![],
            leaf_shift_cache: vec![],
        }
    }

    fn rebuild_caches(&mut self) {
        self.shift_cache.clear();
        self.leaf_shift_cache.clear();
        let mut shift = 0u64;
        let mut leaf_shift = 0u64;
        for pos in self.compacted.iter() {
            let height = arith::height(u64::from(pos));
            shift += (1u64 << (height + 1)) - 2;
            leaf_shift += 1u64 << height;
            self.shift_cache.push(shift);
            self.leaf_shift_cache.push(leaf_shift);
        }
    }

    /// Hash-file positions physically removed at or before `pos`. The
    /// on-disk index of an unpruned position `p` is `p - shift(p)`.
    pub fn shift(&self, pos: u64) -> u64 {
        let idx = self.compacted.rank(pos as u32) as usize;
        if idx == 0 {
            0
        } else {
            self.shift_cache[idx - 1]
        }
    }

    /// Data-file leaf slots physically removed at or before `pos`.
    pub fn leaf_shift(&self, pos: u64) -> u64 {
        let idx = self.compacted.rank(pos as u32) as usize;
        if idx == 0 {
            0
        } else {
            self.leaf_shift_cache[idx - 1]
        }
    }

    /// Highest compacted root position, if any.
    pub fn compacted_max_pos(&self) -> Option<u64> {
        self.compacted.max().map(u64::from)
    }

    /// Total positions removed from the hash file.
    pub fn total_shift(&self) -> u64 {
        self.shift_cache.last().copied().unwrap_or(0)
    }

    /// Total leaf slots removed from the data file.
    pub fn total_leaf_shift(&self) -> u64 {
        self.leaf_shift_cache.last().copied().unwrap_or(0)
    }

    /// Whether `pos` is a pruned root (either layer).
    pub fn is_root(&self, pos: u64) -> bool {
        self.compacted.contains(pos as u32) || self.pending.contains(pos as u32)
    }

    /// Whether `pos` is a pruned root or lies inside a pruned subtree.
    pub fn is_pruned(&self, pos: u64) -> bool {
        self.is_root(pos) || self.ancestor_root(pos).is_some()
    }

    /// Whether `pos` has been physically removed from the files. Pruned
    /// roots themselves stay on disk; only their descendants go.
    pub fn is_compacted(&self, pos: u64) -> bool {
        if self.compacted.contains(pos as u32) {
            return false;
        }
        let mut current = pos;
        loop {
            let (parent, _) = arith::family(current);
            // Roots are stored as u32; nothing above can match.
            if parent > u64::from(u32::MAX) {
                return false;
            }
            if self.compacted.contains(parent as u32) {
                return true;
            }
            current = parent;
        }
    }

    fn ancestor_root(&self, pos: u64) -> Option<u64> {
        let mut current = pos;
        loop {
            let (parent, _) = arith::family(current);
            if parent > u64::from(u32::MAX) {
                return None;
            }
            if self.is_root(parent) {
                return Some(parent);
            }
            current = parent;
        }
    }

    /// Record a newly fully-pruned subtree root, collapsing with its
    /// sibling into the parent whenever the sibling is already pruned.
    pub fn add(&mut self, pos: u64) {
        let mut current = pos;
        loop {
            let (parent, sibling) = arith::family(current);
            if self.is_root(sibling) {
                self.pending.remove(sibling as u32);
                current = parent;
            } else {
                break;
            }
        }
        if !self.is_pruned(current) {
            self.pending.insert(current as u32);
        }
    }

    /// All pruned roots (both layers), ascending.
    pub fn roots(&self) -> Vec<u64> {
        let mut roots: Vec<u64> = (&self.compacted | &self.pending)
            .iter()
            .map(u64::from)
            .collect();
        roots.sort_unstable();
        roots
    }

    /// Drop pending roots whose subtrees contain any of the leaves being
    /// restored by a rewind. Restoring a leaf under a *compacted* root is
    /// refused: that data is physically gone, and rewinding below the
    /// compaction horizon requires a resync.
    pub fn rewind(&mut self, restored_leaves: &RoaringBitmap) -> Result<()> {
        if restored_leaves.is_empty() {
            return Ok(());
        }
        let covers = |root: u64| -> bool {
            let (first_pos, _) = arith::bintree_range(root);
            let first_leaf = arith::pos_to_leaf(first_pos) as u32;
            let width = 1u64 << arith::height(root);
            let last_leaf = first_leaf + (width as u32) - 1;
            let below_first = if first_leaf == 0 {
                0
            } else {
                restored_leaves.rank(first_leaf - 1)
            };
            restored_leaves.rank(last_leaf) > below_first
        };

        for root in self.compacted.iter() {
            if covers(u64::from(root)) {
                return Err(Error::Corrupted(format!(
                    "rewind restores leaves under compacted subtree {root}"
                )));
            }
        }

        let doomed: Vec<u32> = self
            .pending
            .iter()
            .filter(|root| covers(u64::from(*root)))
            .collect();
        for root in doomed {
            self.pending.remove(root);
        }
        Ok(())
    }

    /// Install the post-compaction root set: everything in it is now
    /// physically absent from the files.
    pub fn apply_compaction(&mut self, new_roots: RoaringBitmap) {
        self.compacted = new_roots;
        self.pending.clear();
        self.pending_bak.clear();
        self.rebuild_caches();
    }

    /// Persist the compacted set via temp file + rename and commit the
    /// pending layer.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(path) = &self.path {
            write_bitmap(path, &self.compacted)?;
        }
        self.pending_bak = self.pending.clone();
        Ok(())
    }

    /// Revert the pending layer to the last flush.
    pub fn discard(&mut self) {
        self.pending = self.pending_bak.clone();
    }
}

impl crate::batch::WriteParticipant for PruneList {
    fn commit(&mut self) -> Result<()> {
        self.flush()
    }

    fn rollback(&mut self) {
        self.discard();
    }
}
