//! Leaf set: which leaves are still unspent.
//!
//! A roaring bitmap over leaf indices. Bit set means the leaf is unspent
//! and its data record readable; clearing the bit is how an output is
//! spent. The data record itself stays on disk until compaction.

use crate::{Error, Result};
use parking_lot::Mutex;
use roaring::RoaringBitmap;
use std::fs;
use std::path::{Path, PathBuf};

/// Current on-disk file name.
pub const LEAF_SET_FILE: &str = "pmmr_leafset.bin";

/// Pre-migration file name, promoted on first open.
pub const LEGACY_LEAF_FILE: &str = "pmmr_leaf.bin";

/// Serializes the legacy-file promotion: two concurrent opens must not
/// interleave the read-promote-rename sequence.
static MIGRATION_LOCK: Mutex<()> = Mutex::new(());

fn write_bitmap(path: &Path, bitmap: &RoaringBitmap) -> Result<()> {
    let mut bytes = Vec::with_capacity(bitmap.serialized_size());
    bitmap.serialize_into(&mut bytes)?;
    let tmp = path.with_extension("bin.tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_bitmap(path: &Path) -> Result<RoaringBitmap> {
    let bytes = fs::read(path)?;
    RoaringBitmap::deserialize_from(&bytes[..]).map_err(Error::Io)
}

/// Persistent bitmap of unspent leaf indices with batch semantics:
/// mutations act on a working copy until `flush`, and `discard` reverts
/// to the last flushed state.
pub struct LeafSet {
    path: PathBuf,
    bitmap: RoaringBitmap,
    bitmap_bak: RoaringBitmap,
}

impl LeafSet {
    /// Open the leaf set, promoting a legacy `pmmr_leaf.bin` if that is
    /// all that exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<LeafSet> {
        let path = path.into();
        if !path.exists() {
            let legacy = path.with_file_name(LEGACY_LEAF_FILE);
            if legacy.exists() {
                let _guard = MIGRATION_LOCK.lock();
                // Re-check: another open may have promoted meanwhile.
                if !path.exists() {
                    let bitmap = read_bitmap(&legacy)?;
                    write_bitmap(&path, &bitmap)?;
                    tracing::info!(
                        path = %path.display(),
                        "promoted legacy leaf set file"
                    );
                }
            }
        }

        let bitmap = if path.exists() {
            read_bitmap(&path)?
        } else {
            RoaringBitmap::new()
        };

        Ok(LeafSet {
            path,
            bitmap_bak: bitmap.clone(),
            bitmap,
        })
    }

    pub fn contains(&self, leaf_index: u64) -> bool {
        self.bitmap.contains(leaf_index as u32)
    }

    pub fn set(&mut self, leaf_index: u64) {
        self.bitmap.insert(leaf_index as u32);
    }

    pub fn clear(&mut self, leaf_index: u64) {
        self.bitmap.remove(leaf_index as u32);
    }

    /// Number of unspent leaves.
    pub fn len(&self) -> u64 {
        self.bitmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    /// The current working bitmap, by value.
    pub fn snapshot(&self) -> RoaringBitmap {
        self.bitmap.clone()
    }

    /// Rewind to a state with `n_leaves` leaves: restore the bits in
    /// `spent_to_restore` (inputs of the blocks being reversed), then
    /// drop every bit past the target. The trim comes second so an
    /// output both created and spent inside the rewound span does not
    /// reappear.
    pub fn rewind(&mut self, n_leaves: u64, spent_to_restore: &RoaringBitmap) {
        self.bitmap |= spent_to_restore;
        self.bitmap.remove_range(n_leaves as u32..);
    }

    /// Serialize to disk via temp file + rename.
    pub fn flush(&mut self) -> Result<()> {
        write_bitmap(&self.path, &self.bitmap)?;
        self.bitmap_bak = self.bitmap.clone();
        Ok(())
    }

    /// Revert the working bitmap to the last flushed state.
    pub fn discard(&mut self) {
        self.bitmap = self.bitmap_bak.clone();
    }
}

impl crate::batch::WriteParticipant for LeafSet {
    fn commit(&mut self) -> Result<()> {
        self.flush()
    }

    fn rollback(&mut self) {
        self.discard();
    }
}
