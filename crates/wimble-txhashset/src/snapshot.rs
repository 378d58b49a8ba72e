//! Snapshot packaging for state sync.
//!
//! A peer snapshot is a zip of the txhashset directory at a rewound
//! header. Both directions sanitize: only the known MMR files are
//! copied in or out, so a malicious archive cannot plant extra files or
//! escape the target directory.

use crate::txhashset::{TxHashSet, KERNEL_SUBDIR, OUTPUT_SUBDIR, RANGEPROOF_SUBDIR, TXHASHSET_SUBDIR};
use crate::{Error, Result};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use wimble_primitives::BlockHeader;
use wimble_store::{LEAF_SET_FILE, PMMR_DATA_FILE, PMMR_HASH_FILE, PRUNE_LIST_FILE};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

/// Archive file name under the node's data directory.
pub const SNAPSHOT_ZIP: &str = "txhashset_snapshot.zip";

/// Relative paths a snapshot may contain. Size sidecars travel with the
/// append-only files so the receiver can detect torn tails.
fn expected_files() -> HashSet<PathBuf> {
    let mut files = HashSet::new();
    for subdir in [KERNEL_SUBDIR, OUTPUT_SUBDIR, RANGEPROOF_SUBDIR] {
        for name in [PMMR_HASH_FILE, PMMR_DATA_FILE] {
            files.insert(PathBuf::from(subdir).join(name));
            files.insert(PathBuf::from(subdir).join(format!("{name}.sz")));
        }
        if subdir != KERNEL_SUBDIR {
            files.insert(PathBuf::from(subdir).join(LEAF_SET_FILE));
            files.insert(PathBuf::from(subdir).join(PRUNE_LIST_FILE));
        }
    }
    files
}

/// Copy the recognized txhashset files from `src` into `dst`.
pub(crate) fn copy_txhashset_dir(src: &Path, dst: &Path) -> Result<()> {
    for rel in expected_files() {
        let from = src.join(&rel);
        if !from.exists() {
            continue;
        }
        let to = dst.join(&rel);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&from, &to)?;
    }
    Ok(())
}

fn compress(dir: &Path, zip_path: &Path) -> Result<()> {
    let mut writer = ZipWriter::new(File::create(zip_path)?);
    let options = FileOptions::default();
    let mut names: Vec<PathBuf> = expected_files().into_iter().collect();
    names.sort();
    for rel in names {
        let path = dir.join(&rel);
        if !path.exists() {
            continue;
        }
        let name = rel
            .to_str()
            .ok_or_else(|| Error::Snapshot("non-utf8 snapshot path".into()))?;
        writer.start_file(name, options)?;
        io::copy(&mut File::open(&path)?, &mut writer)?;
    }
    writer.finish()?;
    Ok(())
}

/// Extract a peer snapshot archive into `root_dir/txhashset/`.
///
/// Entries outside the expected file set (or escaping the directory) are
/// ignored.
pub fn unzip_from_peer(root_dir: &Path, archive: File) -> Result<()> {
    let dest = root_dir.join(TXHASHSET_SUBDIR);
    fs::create_dir_all(&dest)?;
    let expected = expected_files();

    let mut zip = ZipArchive::new(archive)?;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let Some(rel) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            tracing::warn!(name = entry.name(), "skipping unsafe snapshot entry");
            continue;
        };
        if !expected.contains(&rel) {
            tracing::warn!(name = entry.name(), "skipping unexpected snapshot entry");
            continue;
        }
        let target = dest.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        io::copy(&mut entry, &mut File::create(&target)?)?;
    }
    Ok(())
}

impl TxHashSet {
    /// Package the committed hash-set files for a peer requesting state
    /// sync at `header`. Returns the archive opened for reading.
    ///
    /// The caller is responsible for having rewound the set to `header`
    /// first; this only snapshots what is on disk.
    pub fn zip_for_peer(&self, header: &BlockHeader) -> Result<File> {
        let staging = self.root_dir().join("txhashset_zip");
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        copy_txhashset_dir(&self.txhashset_dir(), &staging)?;

        let zip_path = self.root_dir().join(SNAPSHOT_ZIP);
        compress(&staging, &zip_path)?;
        fs::remove_dir_all(&staging)?;

        tracing::debug!(
            height = header.height,
            path = %zip_path.display(),
            "packaged txhashset snapshot"
        );
        Ok(File::open(zip_path)?)
    }
}
