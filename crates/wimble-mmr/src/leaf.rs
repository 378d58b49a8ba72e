//! What an MMR can store.

use wimble_primitives::{DecodeError, OutputIdentifier, RangeProof, TxKernel, OUTPUT_IDENT_SIZE, RANGE_PROOF_SIZE};

/// A record storable as an MMR leaf.
///
/// `ELEM_SIZE` is `Some(n)` for fixed-size records addressed by leaf index
/// in the data file, `None` for variable-size records stored
/// length-prefixed.
pub trait MmrLeaf: Clone + Send + Sync {
    const ELEM_SIZE: Option<usize>;

    /// Protocol encoding; this is also the hashing payload.
    fn to_bytes(&self) -> Vec<u8>;

    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError>;
}

impl MmrLeaf for OutputIdentifier {
    const ELEM_SIZE: Option<usize> = Some(OUTPUT_IDENT_SIZE);

    fn to_bytes(&self) -> Vec<u8> {
        self.encode()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        OutputIdentifier::decode(bytes)
    }
}

impl MmrLeaf for RangeProof {
    const ELEM_SIZE: Option<usize> = Some(RANGE_PROOF_SIZE);

    fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        RangeProof::from_slice(bytes)
    }
}

impl MmrLeaf for TxKernel {
    // Kernels are stored length-prefixed.
    const ELEM_SIZE: Option<usize> = None;

    fn to_bytes(&self) -> Vec<u8> {
        self.encode()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        TxKernel::decode(bytes)
    }
}
