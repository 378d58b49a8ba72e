//! Deterministic stand-in for the real cryptography.
//!
//! NOT cryptography. A mock "commitment" packs two wrapping `i128`
//! accumulators (value term, blinding term) into the 33-byte commitment
//! layout, so commitment sums behave exactly like Pedersen sums do over
//! the integers. Range proofs and signatures are keyed Blake2b digests of
//! the data they notionally sign. This is enough for the validator and
//! coordinator test suites to exercise every consensus path end to end.

use crate::{Crypto, CryptoError, Result};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use byteorder::{ByteOrder, LittleEndian};
use wimble_primitives::{
    BlindingFactor, Commitment, RangeProof, Signature, TxKernel, COMMITMENT_SIZE,
    RANGE_PROOF_SIZE, SIGNATURE_SIZE,
};

type Blake2b256 = Blake2b<U32>;

const MOCK_TAG: u8 = 0x08;

fn pack(value: i128, blind: i128) -> Commitment {
    let mut bytes = [0u8; COMMITMENT_SIZE];
    bytes[0] = MOCK_TAG;
    LittleEndian::write_i128(&mut bytes[1..17], value);
    LittleEndian::write_i128(&mut bytes[17..33], blind);
    Commitment(bytes)
}

fn unpack(commit: &Commitment) -> Result<(i128, i128)> {
    if commit.0[0] != MOCK_TAG {
        return Err(CryptoError::InvalidCommitment);
    }
    let value = LittleEndian::read_i128(&commit.0[1..17]);
    let blind = LittleEndian::read_i128(&commit.0[17..33]);
    Ok((value, blind))
}

fn blind_scalar(blind: &BlindingFactor) -> i128 {
    LittleEndian::read_i128(&blind.0[..16])
}

/// The deterministic mock backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockCrypto;

impl MockCrypto {
    /// Mock commitment to `value` under `blind`, for building test blocks.
    pub fn commit(value: u64, blind: i128) -> Commitment {
        pack(value as i128, blind)
    }

    /// The range proof [`Crypto::verify_range_proofs`] will accept for
    /// `commit`.
    pub fn range_proof_for(commit: &Commitment) -> RangeProof {
        let mut hasher = Blake2b256::new();
        hasher.update(b"wimble.mock.rangeproof");
        hasher.update(commit.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; RANGE_PROOF_SIZE];
        for (i, chunk) in bytes.chunks_mut(32).enumerate() {
            let mut round = Blake2b256::new();
            round.update(digest);
            round.update((i as u64).to_le_bytes());
            let out = round.finalize();
            chunk.copy_from_slice(&out[..chunk.len()]);
        }
        RangeProof(bytes)
    }

    /// The signature [`Crypto::verify_kernel_signatures`] will accept for
    /// a kernel with the given fields.
    pub fn sign_kernel(kernel: &TxKernel) -> Signature {
        let mut hasher = Blake2b256::new();
        hasher.update(b"wimble.mock.kernel_sig");
        hasher.update([kernel.features as u8]);
        hasher.update(kernel.fee.to_le_bytes());
        hasher.update(kernel.lock_height.to_le_bytes());
        hasher.update(kernel.excess.as_bytes());
        let digest: [u8; 32] = hasher.finalize().into();

        let mut bytes = [0u8; SIGNATURE_SIZE];
        bytes[..32].copy_from_slice(&digest);
        bytes[32..].copy_from_slice(&digest);
        Signature(bytes)
    }
}

impl Crypto for MockCrypto {
    fn commit_value(&self, value: u64) -> Result<Commitment> {
        Ok(pack(value as i128, 0))
    }

    fn commit_blind(&self, blind: &BlindingFactor) -> Result<Commitment> {
        Ok(pack(0, blind_scalar(blind)))
    }

    fn sum_commitments(
        &self,
        positive: &[Commitment],
        negative: &[Commitment],
    ) -> Result<Commitment> {
        let mut value: i128 = 0;
        let mut blind: i128 = 0;
        for commit in positive {
            let (v, b) = unpack(commit)?;
            value = value.wrapping_add(v);
            blind = blind.wrapping_add(b);
        }
        for commit in negative {
            let (v, b) = unpack(commit)?;
            value = value.wrapping_sub(v);
            blind = blind.wrapping_sub(b);
        }
        Ok(pack(value, blind))
    }

    fn verify_range_proofs(&self, proofs: &[(Commitment, RangeProof)]) -> bool {
        proofs
            .iter()
            .all(|(commit, proof)| *proof == Self::range_proof_for(commit))
    }

    fn verify_kernel_signatures(&self, kernels: &[TxKernel]) -> bool {
        kernels
            .iter()
            .all(|kernel| kernel.excess_sig == Self::sign_kernel(kernel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wimble_primitives::KernelFeatures;

    #[test]
    fn commitment_sums_balance() {
        let crypto = MockCrypto;

        // 40 + 60 in, 100 out: values cancel, blinds accumulate.
        let inputs = [MockCrypto::commit(40, 11), MockCrypto::commit(60, 22)];
        let outputs = [MockCrypto::commit(100, 50)];

        let sum = crypto.sum_commitments(&outputs, &inputs).unwrap();
        assert_eq!(sum, pack(0, 17));
    }

    #[test]
    fn range_proof_bound_to_commitment() {
        let crypto = MockCrypto;
        let commit = MockCrypto::commit(5, 9);
        let proof = MockCrypto::range_proof_for(&commit);

        assert!(crypto.verify_range_proofs(&[(commit, proof)]));

        let other = MockCrypto::commit(6, 9);
        assert!(!crypto.verify_range_proofs(&[(other, proof)]));
    }

    #[test]
    fn kernel_signature_covers_excess() {
        let crypto = MockCrypto;
        let mut kernel = TxKernel {
            features: KernelFeatures::Plain,
            fee: 10,
            lock_height: 0,
            excess: MockCrypto::commit(0, 42),
            excess_sig: Signature([0u8; SIGNATURE_SIZE]),
        };
        kernel.excess_sig = MockCrypto::sign_kernel(&kernel);
        assert!(crypto.verify_kernel_signatures(&[kernel]));

        kernel.fee = 11;
        assert!(!crypto.verify_kernel_signatures(&[kernel]));
    }

    #[test]
    fn foreign_commitment_rejected() {
        let crypto = MockCrypto;
        let bogus = Commitment([0xffu8; COMMITMENT_SIZE]);
        assert!(matches!(
            crypto.sum_commitments(&[bogus], &[]),
            Err(CryptoError::InvalidCommitment)
        ));
    }
}
