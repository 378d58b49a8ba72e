//! Hash file: 32-byte node hashes, one per stored MMR position.

use crate::append_file::AppendOnlyFile;
use crate::Result;
use std::path::PathBuf;
use wimble_primitives::{Hash, HASH_SIZE};

/// Append-only file of node hashes, addressed by file index (MMR
/// position less the prune-list shift).
pub struct HashFile {
    file: AppendOnlyFile,
}

impl HashFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<HashFile> {
        Ok(HashFile {
            file: AppendOnlyFile::open(path)?,
        })
    }

    /// Number of hashes stored (committed plus staged).
    pub fn size(&self) -> u64 {
        self.file.size() / HASH_SIZE as u64
    }

    pub fn append(&mut self, hash: &Hash) {
        self.file.append(hash.as_bytes());
    }

    pub fn get(&self, index: u64) -> Option<Hash> {
        let bytes = self.file.read(index * HASH_SIZE as u64, HASH_SIZE)?;
        Hash::from_slice(&bytes)
    }

    pub fn rewind(&mut self, n_hashes: u64) {
        self.file.rewind(n_hashes * HASH_SIZE as u64);
    }

    pub fn discard(&mut self) {
        self.file.discard();
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()
    }

    pub fn replace(&mut self, replacement: &std::path::Path) -> Result<()> {
        self.file.replace(replacement)
    }
}

impl crate::batch::WriteParticipant for HashFile {
    fn commit(&mut self) -> Result<()> {
        self.flush()
    }

    fn rollback(&mut self) {
        self.discard();
    }
}
