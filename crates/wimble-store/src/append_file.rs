//! Append-only file with staged writes and an atomic size sidecar.
//!
//! All MMR files (hashes, leaf data) build on this. Writes stage in
//! memory and reach disk only on `flush`; reads consult staging first and
//! fall back to a memory map of the committed region. The committed
//! logical length lives in a `<name>.sz` sidecar replaced atomically on
//! every flush, so a crash mid-extend leaves at worst a torn tail past
//! the sidecar length, which the next open truncates away.

use crate::{Error, Result};
use memmap2::Mmap;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

fn sidecar_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".sz");
    PathBuf::from(os)
}

fn read_sidecar(path: &Path) -> Result<Option<u64>> {
    match fs::read(path) {
        Ok(bytes) => {
            let arr: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| Error::Corrupted(format!("bad size sidecar {}", path.display())))?;
            Ok(Some(u64::from_le_bytes(arr)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_sidecar(path: &Path, len: u64) -> Result<()> {
    let tmp = {
        let mut os = path.as_os_str().to_os_string();
        os.push(".tmp");
        PathBuf::from(os)
    };
    fs::write(&tmp, len.to_le_bytes())?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// An append-only flat file.
pub struct AppendOnlyFile {
    path: PathBuf,
    file: File,
    mmap: Option<Mmap>,
    /// Committed logical length in bytes, as recorded by the sidecar.
    committed: u64,
    /// Staged appends past the (possibly rewound) committed region.
    buffer: Vec<u8>,
    /// Pending truncation below `committed`, applied at the next flush.
    truncate_to: Option<u64>,
}

impl AppendOnlyFile {
    /// Open or create the file, snapping it back to the sidecar length.
    pub fn open(path: impl Into<PathBuf>) -> Result<AppendOnlyFile> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let disk_len = file.metadata()?.len();
        let sidecar = sidecar_path(&path);
        let committed = match read_sidecar(&sidecar)? {
            Some(recorded) => {
                let committed = recorded.min(disk_len);
                if disk_len > committed {
                    tracing::warn!(
                        path = %path.display(),
                        disk_len,
                        committed,
                        "truncating torn tail past size sidecar"
                    );
                    file.set_len(committed)?;
                }
                committed
            }
            None => {
                write_sidecar(&sidecar, disk_len)?;
                disk_len
            }
        };

        let mmap = if committed > 0 {
            Some(unsafe { Mmap::map(&file)? })
        } else {
            None
        };

        Ok(AppendOnlyFile {
            path,
            file,
            mmap,
            committed,
            buffer: vec![],
            truncate_to: None,
        })
    }

    fn base(&self) -> u64 {
        self.truncate_to.unwrap_or(self.committed)
    }

    /// Logical length: committed region (less any pending truncation)
    /// plus staging.
    pub fn size(&self) -> u64 {
        self.base() + self.buffer.len() as u64
    }

    /// Length durably on disk as of the last flush.
    pub fn committed_size(&self) -> u64 {
        self.committed
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stage `data` for the next flush.
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Read `len` bytes at `offset`, consulting staging first.
    pub fn read(&self, offset: u64, len: usize) -> Option<Vec<u8>> {
        if offset + len as u64 > self.size() {
            return None;
        }
        let base = self.base();
        let end = offset + len as u64;

        if end <= base {
            let mmap = self.mmap.as_ref()?;
            Some(mmap[offset as usize..end as usize].to_vec())
        } else if offset >= base {
            let start = (offset - base) as usize;
            Some(self.buffer[start..start + len].to_vec())
        } else {
            // Straddles the committed/staged boundary.
            let mmap = self.mmap.as_ref()?;
            let mut out = Vec::with_capacity(len);
            out.extend_from_slice(&mmap[offset as usize..base as usize]);
            out.extend_from_slice(&self.buffer[..(end - base) as usize]);
            Some(out)
        }
    }

    /// Shrink the logical length to `new_len`. Below the committed length
    /// the truncation is recorded and applied only at the next flush.
    pub fn rewind(&mut self, new_len: u64) {
        let base = self.base();
        if new_len >= base {
            self.buffer.truncate((new_len - base) as usize);
        } else {
            self.buffer.clear();
            self.truncate_to = Some(new_len);
        }
    }

    /// Drop staged appends and any pending truncation.
    pub fn discard(&mut self) {
        self.buffer.clear();
        self.truncate_to = None;
    }

    /// Apply the pending truncation, write out staging, fsync, replace
    /// the size sidecar, remap.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(target) = self.truncate_to.take() {
            self.mmap = None;
            self.file.set_len(target)?;
            self.committed = target;
        }
        if !self.buffer.is_empty() {
            self.file.seek(SeekFrom::Start(self.committed))?;
            self.file.write_all(&self.buffer)?;
            self.committed += self.buffer.len() as u64;
            self.buffer.clear();
        }
        self.file.sync_data()?;
        write_sidecar(&sidecar_path(&self.path), self.committed)?;
        self.mmap = if self.committed > 0 {
            Some(unsafe { Mmap::map(&self.file)? })
        } else {
            None
        };
        Ok(())
    }

    /// Replace the file's contents with an already-written replacement
    /// (compaction rewrite). Staging must be empty.
    pub fn replace(&mut self, replacement: &Path) -> Result<()> {
        debug_assert!(self.buffer.is_empty() && self.truncate_to.is_none());
        self.mmap = None;
        fs::rename(replacement, &self.path)?;
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.committed = self.file.metadata()?.len();
        write_sidecar(&sidecar_path(&self.path), self.committed)?;
        self.mmap = if self.committed > 0 {
            Some(unsafe { Mmap::map(&self.file)? })
        } else {
            None
        };
        Ok(())
    }
}
