//! Leaf data files.
//!
//! [`DataFile`] stores fixed-size records addressed by leaf index (output
//! identifiers, range proofs). [`VariableFile`] stores `u16`
//! length-prefixed records (kernels), with an offset table rebuilt by
//! scanning the file at open.

use crate::append_file::AppendOnlyFile;
use crate::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::path::{Path, PathBuf};

/// Fixed-size records, one per (shifted) leaf index.
pub struct DataFile {
    file: AppendOnlyFile,
    record_size: usize,
}

impl DataFile {
    pub fn open(path: impl Into<PathBuf>, record_size: usize) -> Result<DataFile> {
        let file = AppendOnlyFile::open(path)?;
        if file.size() % record_size as u64 != 0 {
            return Err(Error::Corrupted(format!(
                "data file {} not a multiple of record size {record_size}",
                file.path().display()
            )));
        }
        Ok(DataFile { file, record_size })
    }

    /// Number of records (committed plus staged).
    pub fn size(&self) -> u64 {
        self.file.size() / self.record_size as u64
    }

    pub fn append(&mut self, record: &[u8]) -> Result<()> {
        if record.len() != self.record_size {
            return Err(Error::Corrupted(format!(
                "record of {} bytes in file of {}-byte records",
                record.len(),
                self.record_size
            )));
        }
        self.file.append(record);
        Ok(())
    }

    pub fn get(&self, index: u64) -> Option<Vec<u8>> {
        self.file
            .read(index * self.record_size as u64, self.record_size)
    }

    pub fn rewind(&mut self, n_records: u64) {
        self.file.rewind(n_records * self.record_size as u64);
    }

    pub fn discard(&mut self) {
        self.file.discard();
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()
    }

    pub fn replace(&mut self, replacement: &Path) -> Result<()> {
        self.file.replace(replacement)
    }
}

/// `u16` length-prefixed records addressed by insertion index.
///
/// The offset table lives in memory (8 bytes per record) and is rebuilt
/// by scanning the committed file on open.
pub struct VariableFile {
    file: AppendOnlyFile,
    offsets: Vec<u64>,
    flushed_offsets: Vec<u64>,
}

impl VariableFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<VariableFile> {
        let file = AppendOnlyFile::open(path)?;
        let mut offsets = vec![];
        let mut offset = 0u64;
        let total = file.size();
        while offset < total {
            let prefix = file.read(offset, 2).ok_or_else(|| {
                Error::Corrupted(format!("truncated length prefix in {}", file.path().display()))
            })?;
            let len = u64::from(LittleEndian::read_u16(&prefix));
            if offset + 2 + len > total {
                return Err(Error::Corrupted(format!(
                    "record at offset {offset} overruns {}",
                    file.path().display()
                )));
            }
            offsets.push(offset);
            offset += 2 + len;
        }
        let flushed_offsets = offsets.clone();
        Ok(VariableFile {
            file,
            offsets,
            flushed_offsets,
        })
    }

    /// Number of records (committed plus staged).
    pub fn size(&self) -> u64 {
        self.offsets.len() as u64
    }

    pub fn append(&mut self, record: &[u8]) -> Result<u64> {
        let len = u16::try_from(record.len()).map_err(|_| {
            Error::Corrupted(format!("record of {} bytes exceeds u16 prefix", record.len()))
        })?;
        let index = self.offsets.len() as u64;
        self.offsets.push(self.file.size());
        let mut prefix = [0u8; 2];
        LittleEndian::write_u16(&mut prefix, len);
        self.file.append(&prefix);
        self.file.append(record);
        Ok(index)
    }

    pub fn get(&self, index: u64) -> Option<Vec<u8>> {
        let offset = *self.offsets.get(index as usize)?;
        let prefix = self.file.read(offset, 2)?;
        let len = LittleEndian::read_u16(&prefix) as usize;
        self.file.read(offset + 2, len)
    }

    pub fn rewind(&mut self, n_records: u64) {
        let n = n_records as usize;
        if n >= self.offsets.len() {
            return;
        }
        let byte_end = self.offsets[n];
        self.offsets.truncate(n);
        self.file.rewind(byte_end);
    }

    pub fn discard(&mut self) {
        self.file.discard();
        self.offsets = self.flushed_offsets.clone();
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.flushed_offsets = self.offsets.clone();
        Ok(())
    }
}

impl crate::batch::WriteParticipant for DataFile {
    fn commit(&mut self) -> Result<()> {
        self.flush()
    }

    fn rollback(&mut self) {
        self.discard();
    }
}

impl crate::batch::WriteParticipant for VariableFile {
    fn commit(&mut self) -> Result<()> {
        self.flush()
    }

    fn rollback(&mut self) {
        self.discard();
    }
}
