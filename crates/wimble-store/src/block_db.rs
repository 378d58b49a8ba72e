//! Block database: RocksDB with optimistic transactions.
//!
//! Column families hold full blocks, headers, per-block sums, the
//! commitment-to-position index and per-block spent-leaf bitmaps. Writes
//! go through [`BlockDBBatch`], a thin wrapper over an optimistic
//! transaction committed by the batch coordinator (always last, after
//! the file participants). Reads inside an open batch see the
//! transaction's own writes; plain reads hit the base DB. Missing keys
//! are `Ok(None)`; everything else is an error.

use crate::batch::WriteParticipant;
use crate::{Error, Result};
use parking_lot::Mutex;
use roaring::RoaringBitmap;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, OptimisticTransactionDB, Options, Transaction};
use schnellru::{ByLength, LruMap};
use std::path::Path;
use wimble_primitives::{Block, BlockHeader, BlockSums, Commitment, Hash};

/// Column family names.
pub mod cf {
    /// Miscellaneous: the chain head pointer.
    pub const DEFAULT: &str = "default";
    /// Full blocks by header hash.
    pub const BLOCK: &str = "BLOCK";
    /// Headers by header hash.
    pub const HEADER: &str = "HEADER";
    /// Per-block commitment sums by header hash.
    pub const BLOCK_SUMS: &str = "BLOCK_SUMS";
    /// Output commitment to output-MMR position.
    pub const OUTPUT_POS: &str = "OUTPUT_POS";
    /// Per-block bitmap of spent output leaf indices.
    pub const INPUT_BITMAP: &str = "INPUT_BITMAP";
}

const HEAD_KEY: &[u8] = b"head";

/// Headers cached in front of the HEADER column family.
const HEADER_CACHE_SIZE: u32 = 128;

fn corrupt(what: &str, e: impl std::fmt::Display) -> Error {
    Error::Corrupted(format!("{what}: {e}"))
}

/// The block database. The header cache is bounded and owned by the
/// instance, so independent databases (and tests) never share state.
pub struct BlockDB {
    db: OptimisticTransactionDB,
    header_cache: Mutex<LruMap<Hash, BlockHeader, ByLength>>,
}

impl BlockDB {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<BlockDB> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let point_lookup = || {
            let mut opts = Options::default();
            opts.optimize_for_point_lookup(64);
            opts
        };
        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(cf::BLOCK, point_lookup()),
            ColumnFamilyDescriptor::new(cf::HEADER, point_lookup()),
            ColumnFamilyDescriptor::new(cf::BLOCK_SUMS, point_lookup()),
            ColumnFamilyDescriptor::new(cf::OUTPUT_POS, point_lookup()),
            ColumnFamilyDescriptor::new(cf::INPUT_BITMAP, point_lookup()),
        ];

        let db = OptimisticTransactionDB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "opened block database");

        Ok(BlockDB {
            db,
            header_cache: Mutex::new(LruMap::new(ByLength::new(HEADER_CACHE_SIZE))),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Corrupted(format!("missing column family {name}")))
    }

    /// Open a write batch backed by an optimistic transaction.
    pub fn batch(&self) -> BlockDBBatch<'_> {
        BlockDBBatch {
            db: self,
            txn: Some(self.db.transaction()),
            pending_headers: vec![],
        }
    }

    /// The committed chain head, if any.
    pub fn head(&self) -> Result<Option<Hash>> {
        match self.db.get_cf(self.cf(cf::DEFAULT)?, HEAD_KEY)? {
            Some(bytes) => Ok(Some(
                Hash::from_slice(&bytes).ok_or_else(|| corrupt("head", "bad length"))?,
            )),
            None => Ok(None),
        }
    }

    pub fn get_header(&self, hash: &Hash) -> Result<Option<BlockHeader>> {
        if let Some(header) = self.header_cache.lock().get(hash) {
            return Ok(Some(header.clone()));
        }
        match self.db.get_cf(self.cf(cf::HEADER)?, hash.as_bytes())? {
            Some(bytes) => {
                let header = BlockHeader::decode(&bytes).map_err(|e| corrupt("header", e))?;
                self.header_cache.lock().insert(*hash, header.clone());
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>> {
        match self.db.get_cf(self.cf(cf::BLOCK)?, hash.as_bytes())? {
            Some(bytes) => Ok(Some(Block::decode(&bytes).map_err(|e| corrupt("block", e))?)),
            None => Ok(None),
        }
    }

    pub fn get_block_sums(&self, hash: &Hash) -> Result<Option<BlockSums>> {
        match self.db.get_cf(self.cf(cf::BLOCK_SUMS)?, hash.as_bytes())? {
            Some(bytes) => Ok(Some(
                BlockSums::decode(&bytes).map_err(|e| corrupt("block sums", e))?,
            )),
            None => Ok(None),
        }
    }

    /// Output MMR position for a commitment, if indexed.
    pub fn get_output_pos(&self, commit: &Commitment) -> Result<Option<u64>> {
        match self.db.get_cf(self.cf(cf::OUTPUT_POS)?, commit.as_bytes())? {
            Some(bytes) => Ok(Some(decode_pos(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Spent-leaf bitmap recorded for a block.
    pub fn get_spent_bitmap(&self, hash: &Hash) -> Result<Option<RoaringBitmap>> {
        match self.db.get_cf(self.cf(cf::INPUT_BITMAP)?, hash.as_bytes())? {
            Some(bytes) => Ok(Some(
                RoaringBitmap::deserialize_from(&bytes[..]).map_err(Error::Io)?,
            )),
            None => Ok(None),
        }
    }
}

fn decode_pos(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| corrupt("output position", "bad length"))?;
    Ok(u64::from_le_bytes(arr))
}

/// A write batch over the block database.
///
/// Reads prefer the open transaction so a batch observes its own writes.
pub struct BlockDBBatch<'a> {
    db: &'a BlockDB,
    txn: Option<Transaction<'a, OptimisticTransactionDB>>,
    /// Headers written in this batch, promoted into the cache on commit.
    pending_headers: Vec<BlockHeader>,
}

impl<'a> BlockDBBatch<'a> {
    fn txn(&self) -> Result<&Transaction<'a, OptimisticTransactionDB>> {
        self.txn
            .as_ref()
            .ok_or_else(|| Error::Corrupted("batch already closed".into()))
    }

    pub fn save_head(&mut self, hash: &Hash) -> Result<()> {
        self.txn()?
            .put_cf(self.db.cf(cf::DEFAULT)?, HEAD_KEY, hash.as_bytes())?;
        Ok(())
    }

    pub fn save_header(&mut self, header: &BlockHeader) -> Result<()> {
        self.txn()?.put_cf(
            self.db.cf(cf::HEADER)?,
            header.hash().as_bytes(),
            header.encode(),
        )?;
        self.pending_headers.push(header.clone());
        Ok(())
    }

    pub fn get_header(&self, hash: &Hash) -> Result<Option<BlockHeader>> {
        match self.txn()?.get_cf(self.db.cf(cf::HEADER)?, hash.as_bytes())? {
            Some(bytes) => Ok(Some(
                BlockHeader::decode(&bytes).map_err(|e| corrupt("header", e))?,
            )),
            None => Ok(None),
        }
    }

    pub fn save_block(&mut self, block: &Block) -> Result<()> {
        self.txn()?.put_cf(
            self.db.cf(cf::BLOCK)?,
            block.hash().as_bytes(),
            block.encode(),
        )?;
        Ok(())
    }

    pub fn save_block_sums(&mut self, hash: &Hash, sums: &BlockSums) -> Result<()> {
        self.txn()?
            .put_cf(self.db.cf(cf::BLOCK_SUMS)?, hash.as_bytes(), sums.encode())?;
        Ok(())
    }

    pub fn save_output_pos(&mut self, commit: &Commitment, pos: u64) -> Result<()> {
        self.txn()?.put_cf(
            self.db.cf(cf::OUTPUT_POS)?,
            commit.as_bytes(),
            pos.to_le_bytes(),
        )?;
        Ok(())
    }

    pub fn get_output_pos(&self, commit: &Commitment) -> Result<Option<u64>> {
        match self
            .txn()?
            .get_cf(self.db.cf(cf::OUTPUT_POS)?, commit.as_bytes())?
        {
            Some(bytes) => Ok(Some(decode_pos(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn delete_output_pos(&mut self, commit: &Commitment) -> Result<()> {
        self.txn()?
            .delete_cf(self.db.cf(cf::OUTPUT_POS)?, commit.as_bytes())?;
        Ok(())
    }

    pub fn get_spent_bitmap(&self, hash: &Hash) -> Result<Option<RoaringBitmap>> {
        match self
            .txn()?
            .get_cf(self.db.cf(cf::INPUT_BITMAP)?, hash.as_bytes())?
        {
            Some(bytes) => Ok(Some(
                RoaringBitmap::deserialize_from(&bytes[..]).map_err(Error::Io)?,
            )),
            None => Ok(None),
        }
    }

    pub fn save_spent_bitmap(&mut self, hash: &Hash, bitmap: &RoaringBitmap) -> Result<()> {
        let mut bytes = Vec::with_capacity(bitmap.serialized_size());
        bitmap.serialize_into(&mut bytes)?;
        self.txn()?
            .put_cf(self.db.cf(cf::INPUT_BITMAP)?, hash.as_bytes(), bytes)?;
        Ok(())
    }
}

impl WriteParticipant for BlockDBBatch<'_> {
    fn commit(&mut self) -> Result<()> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| Error::Corrupted("batch already closed".into()))?;
        txn.commit()?;
        let mut cache = self.db.header_cache.lock();
        for header in self.pending_headers.drain(..) {
            cache.insert(header.hash(), header);
        }
        Ok(())
    }

    fn rollback(&mut self) {
        if let Some(txn) = self.txn.take() {
            if let Err(e) = txn.rollback() {
                tracing::warn!(error = %e, "transaction rollback failed");
            }
        }
        self.pending_headers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wimble_primitives::{BlindingFactor, COMMITMENT_SIZE};

    fn sample_header(height: u64) -> BlockHeader {
        BlockHeader {
            version: 1,
            height,
            prev_hash: Hash::of(b"prev"),
            timestamp: 0,
            output_root: Hash::of(b"o"),
            range_proof_root: Hash::of(b"r"),
            kernel_root: Hash::of(b"k"),
            total_kernel_offset: BlindingFactor::default(),
            output_mmr_size: 1,
            kernel_mmr_size: 1,
        }
    }

    #[test]
    fn batch_commit_makes_reads_visible() {
        let dir = tempfile::tempdir().unwrap();
        let db = BlockDB::open(dir.path()).unwrap();
        let header = sample_header(1);
        let hash = header.hash();

        let mut batch = db.batch();
        batch.save_header(&header).unwrap();
        // Visible inside the batch, not outside.
        assert_eq!(batch.get_header(&hash).unwrap(), Some(header.clone()));
        assert_eq!(db.get_header(&hash).unwrap(), None);

        batch.commit().unwrap();
        assert_eq!(db.get_header(&hash).unwrap(), Some(header));
    }

    #[test]
    fn rollback_discards_writes_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = BlockDB::open(dir.path()).unwrap();
        let header = sample_header(2);

        let mut batch = db.batch();
        batch.save_header(&header).unwrap();
        batch.rollback();
        batch.rollback();

        assert_eq!(db.get_header(&header.hash()).unwrap(), None);
    }

    #[test]
    fn output_pos_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = BlockDB::open(dir.path()).unwrap();
        let commit = Commitment([5u8; COMMITMENT_SIZE]);

        let mut batch = db.batch();
        batch.save_output_pos(&commit, 42).unwrap();
        assert_eq!(batch.get_output_pos(&commit).unwrap(), Some(42));
        batch.commit().unwrap();

        assert_eq!(db.get_output_pos(&commit).unwrap(), Some(42));
        assert_eq!(db.get_output_pos(&Commitment::ZERO).unwrap(), None);

        let mut batch = db.batch();
        batch.delete_output_pos(&commit).unwrap();
        batch.commit().unwrap();
        assert_eq!(db.get_output_pos(&commit).unwrap(), None);
    }

    #[test]
    fn spent_bitmap_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = BlockDB::open(dir.path()).unwrap();
        let hash = Hash::of(b"block");

        let mut bitmap = RoaringBitmap::new();
        bitmap.insert(3);
        bitmap.insert(17);

        let mut batch = db.batch();
        batch.save_spent_bitmap(&hash, &bitmap).unwrap();
        batch.commit().unwrap();

        assert_eq!(db.get_spent_bitmap(&hash).unwrap(), Some(bitmap));
    }

    #[test]
    fn head_pointer_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = BlockDB::open(dir.path()).unwrap();
        assert_eq!(db.head().unwrap(), None);

        let hash = Hash::of(b"tip");
        let mut batch = db.batch();
        batch.save_head(&hash).unwrap();
        batch.commit().unwrap();
        assert_eq!(db.head().unwrap(), Some(hash));
    }
}
