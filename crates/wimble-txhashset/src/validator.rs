//! Whole-set validation.
//!
//! Runs when a full hash-set candidate arrives from a peer (state sync)
//! or on operator demand. Seven steps, strictly ordered, cheapest first;
//! the first failing step rejects the candidate outright and no partial
//! state is retained. The three MMR hash scans run concurrently; range
//! proofs and kernel signatures verify in mandatory batches, which is
//! roughly 4x cheaper per proof than one-at-a-time verification.

use crate::txhashset::TxHashSet;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use wimble_crypto::Crypto;
use wimble_mmr::{arith, MmrError};
use wimble_primitives::{BlockHeader, BlockSums, Commitment, RangeProof, TxKernel, REWARD};

/// Range proofs per batched verification call.
pub const RANGE_PROOF_BATCH_SIZE: usize = 2000;

/// Kernel signatures per batched verification call.
pub const KERNEL_SIG_BATCH_SIZE: usize = 2000;

/// How often the scan loops poll the cancellation flag.
const CANCEL_CHECK_INTERVAL: u64 = 1 << 12;

/// Which chain a header lookup refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainType {
    /// The candidate chain being validated.
    Candidate,
    /// The confirmed active chain.
    Confirmed,
}

/// The slice of the block chain the validator consumes.
pub trait BlockChainView: Sync {
    fn get_block_header_by_height(
        &self,
        height: u64,
        chain: ChainType,
    ) -> Result<Option<BlockHeader>>;
}

/// Validates a complete hash-set against a block header.
pub struct TxHashSetValidator<'a, C, V> {
    crypto: &'a C,
    chain: &'a V,
    cancel: Arc<AtomicBool>,
}

impl<'a, C, V> TxHashSetValidator<'a, C, V>
where
    C: Crypto,
    V: BlockChainView,
{
    pub fn new(crypto: &'a C, chain: &'a V) -> TxHashSetValidator<'a, C, V> {
        TxHashSetValidator {
            crypto,
            chain,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share the cancellation flag with the caller; setting it aborts the
    /// validation at the next loop boundary with [`Error::Cancelled`].
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the full pipeline. On success returns the [`BlockSums`] to
    /// persist beside the tip header.
    pub fn validate(&self, txhashset: &TxHashSet, header: &BlockHeader) -> Result<BlockSums> {
        let started = Instant::now();

        self.validate_sizes(txhashset, header)?;
        self.validate_mmr_hashes(txhashset)?;
        txhashset.validate_roots(header)?;
        self.validate_kernel_history(txhashset, header)?;

        let (output_sum, kernel_sum) =
            KernelSumValidator::new(self.crypto).validate(txhashset, header)?;

        self.validate_range_proofs(txhashset)?;
        KernelSignatureValidator::new(self.crypto).validate(txhashset, &self.cancel)?;

        tracing::info!(
            height = header.height,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "txhashset validated"
        );
        Ok(BlockSums {
            output_sum,
            kernel_sum,
        })
    }

    fn validate_sizes(&self, txhashset: &TxHashSet, header: &BlockHeader) -> Result<()> {
        let (kernel, output, rproof) = txhashset.sizes();
        if kernel != header.kernel_mmr_size
            || output != header.output_mmr_size
            || rproof != header.output_mmr_size
        {
            tracing::warn!(
                kernel,
                output,
                rproof,
                header_kernel = header.kernel_mmr_size,
                header_output = header.output_mmr_size,
                "MMR sizes do not match header"
            );
            return Err(Error::InvalidMmrSize);
        }
        Ok(())
    }

    /// Parent-hash scan of all three MMRs, concurrently.
    ///
    /// Checks `H(p) = Blake2b(p || H(left) || H(right))` for every parent
    /// whose children are still present. Leaf hashes are not re-derived
    /// from leaf data: root equality against the header (step 3) anchors
    /// them, so a leaf-data flip without a matching leaf-hash flip still
    /// fails there.
    fn validate_mmr_hashes(&self, txhashset: &TxHashSet) -> Result<()> {
        let cancel = &self.cancel;
        let (kernel_res, (output_res, rproof_res)) = rayon::join(
            || txhashset.kernel_pmmr().validate(cancel),
            || {
                rayon::join(
                    || txhashset.output_pmmr().validate(cancel),
                    || txhashset.rproof_pmmr().validate(cancel),
                )
            },
        );
        for res in [kernel_res, output_res, rproof_res] {
            match res {
                Ok(()) => {}
                Err(MmrError::Cancelled) => return Err(Error::Cancelled),
                Err(MmrError::HashMismatch(pos)) => return Err(Error::InvalidMmrHash(pos)),
                Err(other) => return Err(other.into()),
            }
        }
        Ok(())
    }

    /// The kernel MMR must be a prefix of the log every historical header
    /// committed to.
    fn validate_kernel_history(&self, txhashset: &TxHashSet, header: &BlockHeader) -> Result<()> {
        for height in 0..=header.height {
            if height % CANCEL_CHECK_INTERVAL == 0 && self.cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            let historic = self
                .chain
                .get_block_header_by_height(height, ChainType::Candidate)?
                .ok_or(Error::InvalidKernelHistory(height))?;
            let root = txhashset
                .kernel_pmmr()
                .root_at(historic.kernel_mmr_size)
                .map_err(|_| Error::InvalidKernelHistory(height))?;
            if root != historic.kernel_root {
                tracing::warn!(height, "kernel root mismatch in history");
                return Err(Error::InvalidKernelHistory(height));
            }
        }
        Ok(())
    }

    /// Walk every unspent output leaf and batch-verify its range proof.
    fn validate_range_proofs(&self, txhashset: &TxHashSet) -> Result<()> {
        let mut pending: Vec<(Commitment, RangeProof)> =
            Vec::with_capacity(RANGE_PROOF_BATCH_SIZE);
        let mut verified = 0u64;

        let output_pmmr = txhashset.output_pmmr();
        let rproof_pmmr = txhashset.rproof_pmmr();
        for leaf_index in 0..output_pmmr.n_leaves() {
            if leaf_index % CANCEL_CHECK_INTERVAL == 0 && self.cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            let pos = arith::leaf_to_pos(leaf_index);
            let Some(output) = output_pmmr.get_data(pos) else {
                continue;
            };
            let Some(proof) = rproof_pmmr.get_data(pos) else {
                tracing::warn!(pos, "unspent output without a range proof");
                return Err(Error::InvalidRangeProof);
            };
            pending.push((output.commit, proof));

            if pending.len() >= RANGE_PROOF_BATCH_SIZE {
                if !self.crypto.verify_range_proofs(&pending) {
                    return Err(Error::InvalidRangeProof);
                }
                verified += pending.len() as u64;
                pending.clear();
            }
        }

        if !pending.is_empty() {
            if !self.crypto.verify_range_proofs(&pending) {
                return Err(Error::InvalidRangeProof);
            }
            verified += pending.len() as u64;
        }

        tracing::debug!(verified, "range proofs verified");
        Ok(())
    }
}

/// Checks that the unspent output commitments minus the total supply
/// balance the kernel excesses plus the accumulated offset.
pub struct KernelSumValidator<'a, C> {
    crypto: &'a C,
}

impl<'a, C: Crypto> KernelSumValidator<'a, C> {
    pub fn new(crypto: &'a C) -> KernelSumValidator<'a, C> {
        KernelSumValidator { crypto }
    }

    /// Returns `(output_sum, kernel_sum)` on success.
    pub fn validate(
        &self,
        txhashset: &TxHashSet,
        header: &BlockHeader,
    ) -> Result<(Commitment, Commitment)> {
        let output_pmmr = txhashset.output_pmmr();
        let mut output_commits = vec![];
        for leaf_index in 0..output_pmmr.n_leaves() {
            if let Some(output) = output_pmmr.get_data(arith::leaf_to_pos(leaf_index)) {
                output_commits.push(output.commit);
            }
        }
        let output_sum = self.crypto.sum_commitments(&output_commits, &[])?;

        let kernel_pmmr = txhashset.kernel_pmmr();
        let mut excess_commits = vec![];
        for leaf_index in 0..kernel_pmmr.n_leaves() {
            if let Some(kernel) = kernel_pmmr.get_data(arith::leaf_to_pos(leaf_index)) {
                excess_commits.push(kernel.excess);
            }
        }
        let kernel_sum = self.crypto.sum_commitments(&excess_commits, &[])?;

        // Every block, genesis included, issues one reward.
        let supply = REWARD
            .checked_mul(header.height + 1)
            .ok_or(Error::InvalidKernelSum)?;
        let supply_commit = self.crypto.commit_value(supply)?;
        let offset_commit = self.crypto.commit_blind(&header.total_kernel_offset)?;

        let lhs = self
            .crypto
            .sum_commitments(&[output_sum], &[supply_commit])?;
        let rhs = self
            .crypto
            .sum_commitments(&[kernel_sum, offset_commit], &[])?;
        if lhs != rhs {
            tracing::warn!(height = header.height, "kernel sums do not balance");
            return Err(Error::InvalidKernelSum);
        }
        Ok((output_sum, kernel_sum))
    }
}

/// Batch-verifies the aggregate signature of every kernel in the MMR.
pub struct KernelSignatureValidator<'a, C> {
    crypto: &'a C,
}

impl<'a, C: Crypto> KernelSignatureValidator<'a, C> {
    pub fn new(crypto: &'a C) -> KernelSignatureValidator<'a, C> {
        KernelSignatureValidator { crypto }
    }

    pub fn validate(&self, txhashset: &TxHashSet, cancel: &AtomicBool) -> Result<()> {
        let kernel_pmmr = txhashset.kernel_pmmr();
        let mut pending: Vec<TxKernel> = Vec::with_capacity(KERNEL_SIG_BATCH_SIZE);
        let mut verified = 0u64;

        for leaf_index in 0..kernel_pmmr.n_leaves() {
            if leaf_index % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            if let Some(kernel) = kernel_pmmr.get_data(arith::leaf_to_pos(leaf_index)) {
                pending.push(kernel);
            }
            if pending.len() >= KERNEL_SIG_BATCH_SIZE {
                if !self.crypto.verify_kernel_signatures(&pending) {
                    return Err(Error::InvalidKernelSignature);
                }
                verified += pending.len() as u64;
                pending.clear();
            }
        }

        if !pending.is_empty() {
            if !self.crypto.verify_kernel_signatures(&pending) {
                return Err(Error::InvalidKernelSignature);
            }
            verified += pending.len() as u64;
        }

        tracing::debug!(verified, "kernel signatures verified");
        Ok(())
    }
}
