//! Protocol (de)serialization helpers.
//!
//! Types encode themselves into plain byte vectors with fixed layouts;
//! these helpers cover the reading side so decode errors surface as
//! [`DecodeError`] instead of raw I/O errors.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

/// Failure to decode a protocol record.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Input ended before the record was complete.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A feature byte outside the known range.
    #[error("unknown feature byte: {0}")]
    UnknownFeatures(u8),

    /// A fixed-size record arrived with the wrong length.
    #[error("record length {got} does not match expected {expected}")]
    BadLength { expected: usize, got: usize },
}

pub fn read_u8<R: Read>(reader: &mut R) -> Result<u8, DecodeError> {
    reader.read_u8().map_err(|_| DecodeError::UnexpectedEof)
}

pub fn read_u16<R: Read>(reader: &mut R) -> Result<u16, DecodeError> {
    reader
        .read_u16::<LittleEndian>()
        .map_err(|_| DecodeError::UnexpectedEof)
}

pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32, DecodeError> {
    reader
        .read_u32::<LittleEndian>()
        .map_err(|_| DecodeError::UnexpectedEof)
}

pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64, DecodeError> {
    reader
        .read_u64::<LittleEndian>()
        .map_err(|_| DecodeError::UnexpectedEof)
}

pub fn read_fixed<const N: usize, R: Read>(reader: &mut R) -> Result<[u8; N], DecodeError> {
    let mut buf = [0u8; N];
    reader
        .read_exact(&mut buf)
        .map_err(|_| DecodeError::UnexpectedEof)?;
    Ok(buf)
}
