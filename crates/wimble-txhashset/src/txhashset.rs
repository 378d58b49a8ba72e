//! The transaction-output hash-set: three coordinated MMRs plus the
//! block database.
//!
//! The kernel MMR is append-only; the output and range-proof MMRs are
//! prunable and always the same size. All mutation runs inside an
//! extension: a closure over the staged MMRs and an open database
//! transaction. On success the file participants commit in dependency
//! order with the database transaction last; on failure everything rolls
//! back and the set is byte-identical to its pre-batch state.

use crate::{Error, Result};
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wimble_mmr::{arith, Pmmr};
use wimble_primitives::{
    Block, BlockHeader, Commitment, Hash, OutputIdentifier, RangeProof, TxKernel,
};
use wimble_store::{BlockDB, BlockDBBatch, PmmrBackend, WriteParticipant};

/// Directory layout under the node's data directory.
pub const TXHASHSET_SUBDIR: &str = "txhashset";
pub const KERNEL_SUBDIR: &str = "kernel";
pub const OUTPUT_SUBDIR: &str = "output";
pub const RANGEPROOF_SUBDIR: &str = "rangeproof";

pub type KernelMmr = Pmmr<TxKernel, PmmrBackend<TxKernel>>;
pub type OutputMmr = Pmmr<OutputIdentifier, PmmrBackend<OutputIdentifier>>;
pub type RangeProofMmr = Pmmr<RangeProof, PmmrBackend<RangeProof>>;

/// Writers take the write half for the whole batch; readers observe only
/// committed state.
pub type SharedTxHashSet = Arc<RwLock<TxHashSet>>;

/// The three MMR roots a header commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHashSetRoots {
    pub output_root: Hash,
    pub range_proof_root: Hash,
    pub kernel_root: Hash,
}

/// The coordinated hash-set.
pub struct TxHashSet {
    kernel_pmmr: KernelMmr,
    output_pmmr: OutputMmr,
    rproof_pmmr: RangeProofMmr,
    db: Arc<BlockDB>,
    root_dir: PathBuf,
}

impl TxHashSet {
    /// Open (or create) the hash-set under `root_dir/txhashset/`.
    ///
    /// When the last committed header is known, file sizes are snapped
    /// back to it: a crash after the file flush but before the database
    /// commit leaves the files ahead of the committed chain state, and
    /// the surplus is discarded here.
    pub fn open(
        root_dir: impl Into<PathBuf>,
        db: Arc<BlockDB>,
        header: Option<&BlockHeader>,
    ) -> Result<TxHashSet> {
        let root_dir = root_dir.into();
        let base = root_dir.join(TXHASHSET_SUBDIR);

        let kernel_backend: PmmrBackend<TxKernel> =
            PmmrBackend::open(base.join(KERNEL_SUBDIR), false)?;
        let output_backend: PmmrBackend<OutputIdentifier> =
            PmmrBackend::open(base.join(OUTPUT_SUBDIR), true)?;
        let rproof_backend: PmmrBackend<RangeProof> =
            PmmrBackend::open(base.join(RANGEPROOF_SUBDIR), true)?;

        let kernel_size = kernel_backend.unpruned_size();
        let output_size = output_backend.unpruned_size();
        let rproof_size = rproof_backend.unpruned_size();

        let mut set = TxHashSet {
            kernel_pmmr: Pmmr::at(kernel_backend, kernel_size),
            output_pmmr: Pmmr::at(output_backend, output_size),
            rproof_pmmr: Pmmr::at(rproof_backend, rproof_size),
            db,
            root_dir,
        };

        if let Some(header) = header {
            set.snap_to(header)?;
        }

        tracing::info!(
            kernel_size = set.kernel_pmmr.size(),
            output_size = set.output_pmmr.size(),
            rproof_size = set.rproof_pmmr.size(),
            "opened txhashset"
        );
        Ok(set)
    }

    /// Truncate files that ran ahead of the committed header.
    fn snap_to(&mut self, header: &BlockHeader) -> Result<()> {
        let empty = RoaringBitmap::new();
        let mut changed = false;
        if self.kernel_pmmr.size() > header.kernel_mmr_size {
            self.kernel_pmmr.rewind(header.kernel_mmr_size, &empty)?;
            changed = true;
        }
        if self.output_pmmr.size() > header.output_mmr_size {
            self.output_pmmr.rewind(header.output_mmr_size, &empty)?;
            self.rproof_pmmr.rewind(header.output_mmr_size, &empty)?;
            changed = true;
        }
        if changed {
            tracing::warn!(
                height = header.height,
                "txhashset files ahead of committed header, truncating"
            );
            wimble_store::commit_all(&mut [
                self.kernel_pmmr.backend_mut() as &mut dyn WriteParticipant,
                self.output_pmmr.backend_mut(),
                self.rproof_pmmr.backend_mut(),
            ])?;
        }
        Ok(())
    }

    pub fn kernel_pmmr(&self) -> &KernelMmr {
        &self.kernel_pmmr
    }

    pub fn output_pmmr(&self) -> &OutputMmr {
        &self.output_pmmr
    }

    pub fn rproof_pmmr(&self) -> &RangeProofMmr {
        &self.rproof_pmmr
    }

    pub fn db(&self) -> &BlockDB {
        &self.db
    }

    /// (kernel, output, range-proof) MMR sizes.
    pub fn sizes(&self) -> (u64, u64, u64) {
        (
            self.kernel_pmmr.size(),
            self.output_pmmr.size(),
            self.rproof_pmmr.size(),
        )
    }

    /// Current bagged roots of the three MMRs.
    pub fn roots(&self) -> Result<TxHashSetRoots> {
        Ok(TxHashSetRoots {
            output_root: self.output_pmmr.root()?,
            range_proof_root: self.rproof_pmmr.root()?,
            kernel_root: self.kernel_pmmr.root()?,
        })
    }

    /// Compare the current roots against a header.
    pub fn validate_roots(&self, header: &BlockHeader) -> Result<()> {
        let roots = self.roots()?;
        if roots.output_root != header.output_root
            || roots.range_proof_root != header.range_proof_root
            || roots.kernel_root != header.kernel_root
        {
            return Err(Error::InvalidMmrRoot);
        }
        Ok(())
    }

    /// Look an unspent output up by commitment. The position index is not
    /// authoritative (only the MMR decides spent-ness), so the indexed
    /// record is cross-checked before answering.
    pub fn get_output_by_commitment(
        &self,
        commit: &Commitment,
    ) -> Result<Option<(OutputIdentifier, u64)>> {
        let Some(pos) = self.db.get_output_pos(commit)? else {
            return Ok(None);
        };
        match self.output_pmmr.get_data(pos) {
            Some(out) if out.commit == *commit => Ok(Some((out, pos))),
            _ => Ok(None),
        }
    }

    /// Apply a block: kernels, then outputs with their range proofs, then
    /// input removals. The resulting roots and sizes must match the
    /// block's own header or the whole batch rolls back.
    pub fn apply_block(&mut self, block: &Block) -> Result<()> {
        let height = block.header.height;
        self.extending(|ext| {
            ext.apply_block(block)?;
            ext.validate_sizes(&block.header)?;
            ext.validate_roots(&block.header)?;
            Ok(())
        })?;
        tracing::debug!(
            height,
            inputs = block.inputs.len(),
            outputs = block.outputs.len(),
            kernels = block.kernels.len(),
            "applied block"
        );
        Ok(())
    }

    /// Rewind the set to `target`, restoring the leaf bits of every input
    /// spent by the blocks being reversed.
    pub fn rewind(&mut self, target: &BlockHeader) -> Result<()> {
        let head_hash = self
            .db
            .head()?
            .ok_or(Error::HeaderNotFound(target.height))?;
        let head = self
            .db
            .get_header(&head_hash)?
            .ok_or(Error::HeaderNotFound(target.height))?;
        self.extending(|ext| ext.rewind(&head, target))?;
        tracing::debug!(
            from = head.height,
            to = target.height,
            "rewound txhashset"
        );
        Ok(())
    }

    /// Background compaction: physically drop spent leaves below the
    /// horizon header's output size. Runs between batches under the
    /// write lease.
    pub fn compact(&mut self, horizon: &BlockHeader) -> Result<()> {
        let cutoff = horizon.output_mmr_size;
        let output_changed = self.output_pmmr.backend_mut().compact(cutoff)?;
        let rproof_changed = self.rproof_pmmr.backend_mut().compact(cutoff)?;
        if output_changed || rproof_changed {
            tracing::info!(cutoff, "compacted txhashset");
        }
        Ok(())
    }

    /// Rebuild the commitment-to-position index by scanning the output
    /// MMR. Costly; used after installing a peer snapshot.
    pub fn rebuild_output_index(&self) -> Result<()> {
        let mut batch = self.db.batch();
        let mut indexed = 0u64;
        for leaf_index in 0..self.output_pmmr.n_leaves() {
            let pos = arith::leaf_to_pos(leaf_index);
            if let Some(out) = self.output_pmmr.get_data(pos) {
                batch.save_output_pos(&out.commit, pos)?;
                indexed += 1;
            }
        }
        wimble_store::commit_all(&mut [&mut batch as &mut dyn WriteParticipant])?;
        tracing::info!(indexed, "rebuilt output position index");
        Ok(())
    }

    /// Run `inner` in a writable extension; commit on success, roll
    /// everything back on failure.
    pub fn extending<T>(
        &mut self,
        inner: impl FnOnce(&mut Extension<'_, '_>) -> Result<T>,
    ) -> Result<T> {
        let committed = self.sizes();
        let db = Arc::clone(&self.db);
        let mut kv = db.batch();

        let res = {
            let mut ext = Extension {
                kernel_pmmr: &mut self.kernel_pmmr,
                output_pmmr: &mut self.output_pmmr,
                rproof_pmmr: &mut self.rproof_pmmr,
                batch: &mut kv,
            };
            inner(&mut ext)
        };

        match res {
            Ok(value) => {
                let commit_res = wimble_store::commit_all(&mut [
                    self.kernel_pmmr.backend_mut() as &mut dyn WriteParticipant,
                    self.output_pmmr.backend_mut(),
                    self.rproof_pmmr.backend_mut(),
                    &mut kv,
                ]);
                match commit_res {
                    Ok(()) => Ok(value),
                    Err(e) => {
                        self.reset_to(committed);
                        Err(e.into())
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "discarding txhashset extension");
                wimble_store::rollback_all(&mut [
                    self.kernel_pmmr.backend_mut() as &mut dyn WriteParticipant,
                    self.output_pmmr.backend_mut(),
                    self.rproof_pmmr.backend_mut(),
                    &mut kv,
                ]);
                self.reset_to(committed);
                Err(e)
            }
        }
    }

    /// Run `inner` against the staged state, then always roll back.
    /// Useful for dry-runs: computing the roots a candidate block would
    /// produce without keeping anything.
    pub fn extending_readonly<T>(
        &mut self,
        inner: impl FnOnce(&mut Extension<'_, '_>) -> Result<T>,
    ) -> Result<T> {
        let committed = self.sizes();
        let db = Arc::clone(&self.db);
        let mut kv = db.batch();

        let res = {
            let mut ext = Extension {
                kernel_pmmr: &mut self.kernel_pmmr,
                output_pmmr: &mut self.output_pmmr,
                rproof_pmmr: &mut self.rproof_pmmr,
                batch: &mut kv,
            };
            inner(&mut ext)
        };

        wimble_store::rollback_all(&mut [
            self.kernel_pmmr.backend_mut() as &mut dyn WriteParticipant,
            self.output_pmmr.backend_mut(),
            self.rproof_pmmr.backend_mut(),
            &mut kv,
        ]);
        self.reset_to(committed);
        res
    }

    fn reset_to(&mut self, sizes: (u64, u64, u64)) {
        self.kernel_pmmr.discard(sizes.0);
        self.output_pmmr.discard(sizes.1);
        self.rproof_pmmr.discard(sizes.2);
    }

    pub(crate) fn txhashset_dir(&self) -> PathBuf {
        self.root_dir.join(TXHASHSET_SUBDIR)
    }

    pub(crate) fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Copy the committed hash-set files into `out_dir`.
    pub fn save_snapshot(&self, out_dir: &Path) -> Result<()> {
        crate::snapshot::copy_txhashset_dir(&self.txhashset_dir(), out_dir)?;
        Ok(())
    }
}

/// A unit of work over the staged hash-set.
pub struct Extension<'a, 'db> {
    kernel_pmmr: &'a mut KernelMmr,
    output_pmmr: &'a mut OutputMmr,
    rproof_pmmr: &'a mut RangeProofMmr,
    /// Open database transaction; committed or rolled back with the
    /// extension.
    pub batch: &'a mut BlockDBBatch<'db>,
}

impl Extension<'_, '_> {
    /// Append order is consensus-relevant: kernels first, then outputs
    /// paired with their range proofs, then input removals.
    pub fn apply_block(&mut self, block: &Block) -> Result<()> {
        for kernel in &block.kernels {
            self.kernel_pmmr.push(kernel)?;
        }

        for output in &block.outputs {
            let pos = self.apply_output(output)?;
            self.batch.save_output_pos(&output.commit, pos)?;
        }

        let mut spent = RoaringBitmap::new();
        for input in &block.inputs {
            let leaf_index = self.apply_input(&input.commit)?;
            spent.insert(leaf_index as u32);
        }

        let hash = block.hash();
        self.batch.save_spent_bitmap(&hash, &spent)?;
        self.batch.save_block(block)?;
        self.batch.save_header(&block.header)?;
        self.batch.save_head(&hash)?;
        Ok(())
    }

    fn apply_output(&mut self, output: &wimble_primitives::Output) -> Result<u64> {
        // A commitment may reappear only if its previous incarnation is
        // spent.
        if let Some(pos) = self.batch.get_output_pos(&output.commit)? {
            if let Some(existing) = self.output_pmmr.get_data(pos) {
                if existing.commit == output.commit {
                    return Err(Error::DuplicateCommitment(output.commit));
                }
            }
        }

        let output_pos = self.output_pmmr.push(&output.identifier())?;
        let rproof_pos = self.rproof_pmmr.push(&output.proof)?;
        debug_assert_eq!(output_pos, rproof_pos);
        if self.output_pmmr.size() != self.rproof_pmmr.size() {
            return Err(Error::Mmr(wimble_mmr::MmrError::Backend(
                "output and range-proof MMRs diverged".into(),
            )));
        }
        Ok(output_pos)
    }

    fn apply_input(&mut self, commit: &Commitment) -> Result<u64> {
        let pos = self
            .batch
            .get_output_pos(commit)?
            .ok_or(Error::AlreadySpent(*commit))?;

        // The input must spend what is actually stored there.
        match self.output_pmmr.get_data(pos) {
            Some(stored) if stored.commit == *commit => {}
            _ => return Err(Error::AlreadySpent(*commit)),
        }

        self.output_pmmr.remove(pos).map_err(|e| match e {
            wimble_mmr::MmrError::AlreadySpent(_) => Error::AlreadySpent(*commit),
            other => Error::Mmr(other),
        })?;
        self.rproof_pmmr.remove(pos)?;
        Ok(arith::pos_to_leaf(pos))
    }

    /// Rewind from `head` back to `target`, accumulating the spent-leaf
    /// bitmaps of every reversed block so their leaf bits are restored.
    pub fn rewind(&mut self, head: &BlockHeader, target: &BlockHeader) -> Result<()> {
        let mut spent = RoaringBitmap::new();
        let mut current = head.clone();
        while current.hash() != target.hash() {
            if let Some(bitmap) = self.batch.get_spent_bitmap(&current.hash())? {
                spent |= bitmap;
            }
            if current.height == 0 {
                break;
            }
            let prev_height = current.height - 1;
            current = self
                .batch
                .get_header(&current.prev_hash)?
                .ok_or(Error::HeaderNotFound(prev_height))?;
        }

        self.output_pmmr.rewind(target.output_mmr_size, &spent)?;
        self.rproof_pmmr.rewind(target.output_mmr_size, &spent)?;
        self.kernel_pmmr
            .rewind(target.kernel_mmr_size, &RoaringBitmap::new())?;
        self.batch.save_head(&target.hash())?;
        Ok(())
    }

    pub fn sizes(&self) -> (u64, u64, u64) {
        (
            self.kernel_pmmr.size(),
            self.output_pmmr.size(),
            self.rproof_pmmr.size(),
        )
    }

    pub fn roots(&self) -> Result<TxHashSetRoots> {
        Ok(TxHashSetRoots {
            output_root: self.output_pmmr.root()?,
            range_proof_root: self.rproof_pmmr.root()?,
            kernel_root: self.kernel_pmmr.root()?,
        })
    }

    pub fn validate_sizes(&self, header: &BlockHeader) -> Result<()> {
        let (kernel, output, rproof) = self.sizes();
        if kernel != header.kernel_mmr_size
            || output != header.output_mmr_size
            || rproof != header.output_mmr_size
        {
            return Err(Error::InvalidMmrSize);
        }
        Ok(())
    }

    pub fn validate_roots(&self, header: &BlockHeader) -> Result<()> {
        let roots = self.roots()?;
        if roots.output_root != header.output_root
            || roots.range_proof_root != header.range_proof_root
            || roots.kernel_root != header.kernel_root
        {
            return Err(Error::InvalidMmrRoot);
        }
        Ok(())
    }
}
