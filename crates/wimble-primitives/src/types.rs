//! Kernel, output and range-proof records stored in the hash-set MMRs.

use crate::ser::{self, DecodeError};
use byteorder::{LittleEndian, WriteBytesExt};
use std::fmt;
use std::io::Cursor;

macro_rules! fmt_short_hex {
    () => {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            for b in &self.0[..8] {
                write!(f, "{b:02x}")?;
            }
            Ok(())
        }
    };
}

/// Size of a Pedersen commitment in bytes.
pub const COMMITMENT_SIZE: usize = 33;

/// Size of a Bulletproof range proof in bytes.
pub const RANGE_PROOF_SIZE: usize = 683;

/// Size of an aggregate Schnorr signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Encoded size of an [`OutputIdentifier`]: one feature byte plus the
/// commitment.
pub const OUTPUT_IDENT_SIZE: usize = 1 + COMMITMENT_SIZE;

/// A 33-byte Pedersen commitment to an output amount.
///
/// Opaque at this layer; only the crypto boundary interprets it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Commitment(pub [u8; COMMITMENT_SIZE]);

impl Commitment {
    /// The identity commitment (commitment to zero with zero blinding).
    pub const ZERO: Commitment = Commitment([0u8; COMMITMENT_SIZE]);

    pub fn from_slice(bytes: &[u8]) -> Option<Commitment> {
        let arr: [u8; COMMITMENT_SIZE] = bytes.try_into().ok()?;
        Some(Commitment(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Commitment {
    fmt_short_hex!();
}

/// A 32-byte blinding factor (the accumulated kernel offset in headers).
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct BlindingFactor(pub [u8; 32]);

impl fmt::Debug for BlindingFactor {
    fmt_short_hex!();
}

/// A 683-byte Bulletproof showing an output commits to a value in range.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RangeProof(pub [u8; RANGE_PROOF_SIZE]);

impl RangeProof {
    pub fn from_slice(bytes: &[u8]) -> Result<RangeProof, DecodeError> {
        let arr: [u8; RANGE_PROOF_SIZE] =
            bytes.try_into().map_err(|_| DecodeError::BadLength {
                expected: RANGE_PROOF_SIZE,
                got: bytes.len(),
            })?;
        Ok(RangeProof(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RangeProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RangeProof(..{} bytes)", RANGE_PROOF_SIZE)
    }
}

/// A 64-byte aggregate Schnorr signature over a kernel.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_SIZE]);

impl fmt::Debug for Signature {
    fmt_short_hex!();
}

/// Kernel feature discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KernelFeatures {
    /// Ordinary transaction kernel.
    Plain = 0,
    /// Coinbase kernel; carries no fee.
    Coinbase = 1,
    /// Kernel invalid before `lock_height`.
    HeightLocked = 2,
}

impl KernelFeatures {
    fn from_u8(b: u8) -> Result<KernelFeatures, DecodeError> {
        match b {
            0 => Ok(KernelFeatures::Plain),
            1 => Ok(KernelFeatures::Coinbase),
            2 => Ok(KernelFeatures::HeightLocked),
            other => Err(DecodeError::UnknownFeatures(other)),
        }
    }
}

/// Output feature discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputFeatures {
    /// Ordinary transaction output.
    Plain = 0,
    /// Coinbase output, subject to maturity rules.
    Coinbase = 1,
}

impl OutputFeatures {
    fn from_u8(b: u8) -> Result<OutputFeatures, DecodeError> {
        match b {
            0 => Ok(OutputFeatures::Plain),
            1 => Ok(OutputFeatures::Coinbase),
            other => Err(DecodeError::UnknownFeatures(other)),
        }
    }
}

/// Immutable per-transaction record: fee, lock height, excess commitment
/// and the aggregate signature proving the excess is a valid public key.
///
/// Encoded as `features || fee (u64 LE) || lock_height (u64 LE) || excess
/// || excess_sig`. Kernels are stored length-prefixed in the kernel MMR
/// data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxKernel {
    pub features: KernelFeatures,
    pub fee: u64,
    pub lock_height: u64,
    pub excess: Commitment,
    pub excess_sig: Signature,
}

impl TxKernel {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 8 + 8 + COMMITMENT_SIZE + SIGNATURE_SIZE);
        buf.push(self.features as u8);
        buf.write_u64::<LittleEndian>(self.fee).expect("vec write");
        buf.write_u64::<LittleEndian>(self.lock_height)
            .expect("vec write");
        buf.extend_from_slice(&self.excess.0);
        buf.extend_from_slice(&self.excess_sig.0);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<TxKernel, DecodeError> {
        let mut cursor = Cursor::new(bytes);
        let features = KernelFeatures::from_u8(ser::read_u8(&mut cursor)?)?;
        let fee = ser::read_u64(&mut cursor)?;
        let lock_height = ser::read_u64(&mut cursor)?;
        let excess = Commitment(ser::read_fixed::<COMMITMENT_SIZE, _>(&mut cursor)?);
        let excess_sig = Signature(ser::read_fixed::<SIGNATURE_SIZE, _>(&mut cursor)?);
        Ok(TxKernel {
            features,
            fee,
            lock_height,
            excess,
            excess_sig,
        })
    }
}

/// What the output MMR actually stores: the features byte and the
/// commitment. The range proof lives in its own MMR at the same leaf
/// index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputIdentifier {
    pub features: OutputFeatures,
    pub commit: Commitment,
}

impl OutputIdentifier {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(OUTPUT_IDENT_SIZE);
        buf.push(self.features as u8);
        buf.extend_from_slice(&self.commit.0);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<OutputIdentifier, DecodeError> {
        let mut cursor = Cursor::new(bytes);
        let features = OutputFeatures::from_u8(ser::read_u8(&mut cursor)?)?;
        let commit = Commitment(ser::read_fixed::<COMMITMENT_SIZE, _>(&mut cursor)?);
        Ok(OutputIdentifier { features, commit })
    }
}

/// A full transaction output: identifier plus its range proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Output {
    pub features: OutputFeatures,
    pub commit: Commitment,
    pub proof: RangeProof,
}

impl Output {
    pub fn identifier(&self) -> OutputIdentifier {
        OutputIdentifier {
            features: self.features,
            commit: self.commit,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.identifier().encode();
        buf.extend_from_slice(&self.proof.0);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Output, DecodeError> {
        let mut cursor = Cursor::new(bytes);
        let features = OutputFeatures::from_u8(ser::read_u8(&mut cursor)?)?;
        let commit = Commitment(ser::read_fixed::<COMMITMENT_SIZE, _>(&mut cursor)?);
        let proof = RangeProof(ser::read_fixed::<RANGE_PROOF_SIZE, _>(&mut cursor)?);
        Ok(Output {
            features,
            commit,
            proof,
        })
    }
}

/// A transaction input: a reference to the output being spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Input {
    pub features: OutputFeatures,
    pub commit: Commitment,
}

impl Input {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(OUTPUT_IDENT_SIZE);
        buf.push(self.features as u8);
        buf.extend_from_slice(&self.commit.0);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Input, DecodeError> {
        let mut cursor = Cursor::new(bytes);
        let features = OutputFeatures::from_u8(ser::read_u8(&mut cursor)?)?;
        let commit = Commitment(ser::read_fixed::<COMMITMENT_SIZE, _>(&mut cursor)?);
        Ok(Input { features, commit })
    }
}
