//! Block, block header and the per-block sum cache.
//!
//! Only the fields the hash-set interacts with are modeled: the three MMR
//! roots, the two MMR sizes and the accumulated kernel offset. Everything
//! else about the wire format is out of scope.

use crate::hash::{Hash, HASH_SIZE};
use crate::ser::{self, DecodeError};
use crate::types::{BlindingFactor, Commitment, Input, Output, TxKernel, COMMITMENT_SIZE};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Cursor;

/// A block header, as far as the hash-set is concerned.
///
/// `output_mmr_size` and `kernel_mmr_size` are node counts (positions, not
/// leaves); the range-proof MMR always shares the output MMR's size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u16,
    pub height: u64,
    pub prev_hash: Hash,
    pub timestamp: u64,
    pub output_root: Hash,
    pub range_proof_root: Hash,
    pub kernel_root: Hash,
    pub total_kernel_offset: BlindingFactor,
    pub output_mmr_size: u64,
    pub kernel_mmr_size: u64,
}

impl BlockHeader {
    /// The header's identity hash.
    pub fn hash(&self) -> Hash {
        Hash::of(&self.encode())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + 8 + 8 + 4 * HASH_SIZE + 32 + 16);
        buf.write_u16::<LittleEndian>(self.version).expect("vec write");
        buf.write_u64::<LittleEndian>(self.height).expect("vec write");
        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf.write_u64::<LittleEndian>(self.timestamp).expect("vec write");
        buf.extend_from_slice(self.output_root.as_bytes());
        buf.extend_from_slice(self.range_proof_root.as_bytes());
        buf.extend_from_slice(self.kernel_root.as_bytes());
        buf.extend_from_slice(&self.total_kernel_offset.0);
        buf.write_u64::<LittleEndian>(self.output_mmr_size)
            .expect("vec write");
        buf.write_u64::<LittleEndian>(self.kernel_mmr_size)
            .expect("vec write");
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<BlockHeader, DecodeError> {
        let mut cursor = Cursor::new(bytes);
        let version = ser::read_u16(&mut cursor)?;
        let height = ser::read_u64(&mut cursor)?;
        let prev_hash = Hash(ser::read_fixed::<HASH_SIZE, _>(&mut cursor)?);
        let timestamp = ser::read_u64(&mut cursor)?;
        let output_root = Hash(ser::read_fixed::<HASH_SIZE, _>(&mut cursor)?);
        let range_proof_root = Hash(ser::read_fixed::<HASH_SIZE, _>(&mut cursor)?);
        let kernel_root = Hash(ser::read_fixed::<HASH_SIZE, _>(&mut cursor)?);
        let total_kernel_offset = BlindingFactor(ser::read_fixed::<32, _>(&mut cursor)?);
        let output_mmr_size = ser::read_u64(&mut cursor)?;
        let kernel_mmr_size = ser::read_u64(&mut cursor)?;
        Ok(BlockHeader {
            version,
            height,
            prev_hash,
            timestamp,
            output_root,
            range_proof_root,
            kernel_root,
            total_kernel_offset,
            output_mmr_size,
            kernel_mmr_size,
        })
    }
}

/// A full block body plus its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub kernels: Vec<TxKernel>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.header.encode();
        buf.write_u32::<LittleEndian>(self.inputs.len() as u32)
            .expect("vec write");
        buf.write_u32::<LittleEndian>(self.outputs.len() as u32)
            .expect("vec write");
        buf.write_u32::<LittleEndian>(self.kernels.len() as u32)
            .expect("vec write");
        for input in &self.inputs {
            buf.extend_from_slice(&input.encode());
        }
        for output in &self.outputs {
            buf.extend_from_slice(&output.encode());
        }
        for kernel in &self.kernels {
            buf.extend_from_slice(&kernel.encode());
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Block, DecodeError> {
        const HEADER_SIZE: usize = 2 + 8 + HASH_SIZE + 8 + 3 * HASH_SIZE + 32 + 8 + 8;
        if bytes.len() < HEADER_SIZE {
            return Err(DecodeError::UnexpectedEof);
        }
        let header = BlockHeader::decode(&bytes[..HEADER_SIZE])?;

        let mut cursor = Cursor::new(&bytes[HEADER_SIZE..]);
        let n_inputs = ser::read_u32(&mut cursor)? as usize;
        let n_outputs = ser::read_u32(&mut cursor)? as usize;
        let n_kernels = ser::read_u32(&mut cursor)? as usize;

        let mut inputs = Vec::with_capacity(n_inputs);
        for _ in 0..n_inputs {
            let raw = ser::read_fixed::<{ 1 + COMMITMENT_SIZE }, _>(&mut cursor)?;
            inputs.push(Input::decode(&raw)?);
        }
        let mut outputs = Vec::with_capacity(n_outputs);
        for _ in 0..n_outputs {
            let raw =
                ser::read_fixed::<{ 1 + COMMITMENT_SIZE + crate::types::RANGE_PROOF_SIZE }, _>(
                    &mut cursor,
                )?;
            outputs.push(Output::decode(&raw)?);
        }
        let mut kernels = Vec::with_capacity(n_kernels);
        for _ in 0..n_kernels {
            let raw = ser::read_fixed::<
                { 1 + 8 + 8 + COMMITMENT_SIZE + crate::types::SIGNATURE_SIZE },
                _,
            >(&mut cursor)?;
            kernels.push(TxKernel::decode(&raw)?);
        }

        Ok(Block {
            header,
            inputs,
            outputs,
            kernels,
        })
    }
}

/// The cached commitment sums for a block, persisted beside the tip header
/// so descendant validation can skip re-summing ancestors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSums {
    /// Sum of unspent output commitments.
    pub output_sum: Commitment,
    /// Sum of kernel excess commitments.
    pub kernel_sum: Commitment,
}

impl BlockSums {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 * COMMITMENT_SIZE);
        buf.extend_from_slice(&self.output_sum.0);
        buf.extend_from_slice(&self.kernel_sum.0);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<BlockSums, DecodeError> {
        let mut cursor = Cursor::new(bytes);
        let output_sum = Commitment(ser::read_fixed::<COMMITMENT_SIZE, _>(&mut cursor)?);
        let kernel_sum = Commitment(ser::read_fixed::<COMMITMENT_SIZE, _>(&mut cursor)?);
        Ok(BlockSums {
            output_sum,
            kernel_sum,
        })
    }
}
