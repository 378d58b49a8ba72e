//! End-to-end tests: block application, rewind, snapshot packaging and
//! the full validation pipeline, driven by the deterministic mock
//! crypto backend.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wimble_crypto::mock::MockCrypto;
use wimble_crypto::Crypto;
use wimble_primitives::{
    BlindingFactor, Block, BlockHeader, Commitment, Hash, Input, KernelFeatures, Output,
    OutputFeatures, RangeProof, Signature, TxKernel, REWARD, SIGNATURE_SIZE,
};
use wimble_store::BlockDB;
use wimble_txhashset::{
    unzip_from_peer, BlockChainView, ChainType, Error, TxHashSet, TxHashSetValidator,
    OUTPUT_SUBDIR, TXHASHSET_SUBDIR,
};

struct HeaderChain(Vec<BlockHeader>);

impl BlockChainView for HeaderChain {
    fn get_block_header_by_height(
        &self,
        height: u64,
        _chain: ChainType,
    ) -> wimble_txhashset::Result<Option<BlockHeader>> {
        Ok(self.0.get(height as usize).cloned())
    }
}

/// Crypto wrapper recording range-proof batch sizes.
struct CountingCrypto {
    inner: MockCrypto,
    batches: Mutex<Vec<usize>>,
}

impl CountingCrypto {
    fn new() -> CountingCrypto {
        CountingCrypto {
            inner: MockCrypto,
            batches: Mutex::new(vec![]),
        }
    }
}

impl Crypto for CountingCrypto {
    fn commit_value(&self, value: u64) -> wimble_crypto::Result<Commitment> {
        self.inner.commit_value(value)
    }
    fn commit_blind(&self, blind: &BlindingFactor) -> wimble_crypto::Result<Commitment> {
        self.inner.commit_blind(blind)
    }
    fn sum_commitments(
        &self,
        positive: &[Commitment],
        negative: &[Commitment],
    ) -> wimble_crypto::Result<Commitment> {
        self.inner.sum_commitments(positive, negative)
    }
    fn verify_range_proofs(&self, proofs: &[(Commitment, RangeProof)]) -> bool {
        self.batches.lock().unwrap().push(proofs.len());
        self.inner.verify_range_proofs(proofs)
    }
    fn verify_kernel_signatures(&self, kernels: &[TxKernel]) -> bool {
        self.inner.verify_kernel_signatures(kernels)
    }
}

/// Crypto wrapper whose range-proof verification always fails.
struct RejectingCrypto(MockCrypto);

impl Crypto for RejectingCrypto {
    fn commit_value(&self, value: u64) -> wimble_crypto::Result<Commitment> {
        self.0.commit_value(value)
    }
    fn commit_blind(&self, blind: &BlindingFactor) -> wimble_crypto::Result<Commitment> {
        self.0.commit_blind(blind)
    }
    fn sum_commitments(
        &self,
        positive: &[Commitment],
        negative: &[Commitment],
    ) -> wimble_crypto::Result<Commitment> {
        self.0.sum_commitments(positive, negative)
    }
    fn verify_range_proofs(&self, _proofs: &[(Commitment, RangeProof)]) -> bool {
        false
    }
    fn verify_kernel_signatures(&self, kernels: &[TxKernel]) -> bool {
        self.0.verify_kernel_signatures(kernels)
    }
}

/// A spendable output the tests keep track of.
#[derive(Clone, Copy)]
struct Coin {
    commit: Commitment,
    value: u64,
    blind: i128,
}

struct TestNode {
    _dir: TempDir,
    root: std::path::PathBuf,
    db: Arc<BlockDB>,
    set: TxHashSet,
    headers: Vec<BlockHeader>,
}

fn new_node() -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let db = Arc::new(BlockDB::open(&root.join("chain_data")).unwrap());
    let set = TxHashSet::open(&root, Arc::clone(&db), None).unwrap();
    TestNode {
        _dir: dir,
        root,
        db,
        set,
        headers: vec![],
    }
}

fn output_for(value: u64, blind: i128, features: OutputFeatures) -> Output {
    let commit = MockCrypto::commit(value, blind);
    Output {
        features,
        commit,
        proof: MockCrypto::range_proof_for(&commit),
    }
}

fn signed_kernel(features: KernelFeatures, fee: u64, excess: Commitment) -> TxKernel {
    let mut kernel = TxKernel {
        features,
        fee,
        lock_height: 0,
        excess,
        excess_sig: Signature([0u8; SIGNATURE_SIZE]),
    };
    kernel.excess_sig = MockCrypto::sign_kernel(&kernel);
    kernel
}

/// A coinbase output/kernel pair for the given height, balanced under
/// the mock arithmetic.
fn coinbase(height: u64) -> (Output, TxKernel, Coin) {
    let blind = 1_000 + height as i128;
    let output = output_for(REWARD, blind, OutputFeatures::Coinbase);
    let kernel = signed_kernel(
        KernelFeatures::Coinbase,
        0,
        MockCrypto::commit(0, blind),
    );
    let coin = Coin {
        commit: output.commit,
        value: REWARD,
        blind,
    };
    (output, kernel, coin)
}

/// Assemble and apply the next block: a coinbase plus one optional
/// transaction spending `spends` into `creates` (value-conserving).
/// Returns the coins minted by the block.
fn apply_next_block(node: &mut TestNode, spends: &[Coin], creates: &[(u64, i128)]) -> Vec<Coin> {
    let height = node.headers.len() as u64;
    let (cb_output, cb_kernel, cb_coin) = coinbase(height);

    let mut outputs = vec![cb_output];
    let mut kernels = vec![cb_kernel];
    let mut inputs = vec![];
    let mut minted = vec![cb_coin];

    if !spends.is_empty() || !creates.is_empty() {
        for coin in spends {
            inputs.push(Input {
                features: OutputFeatures::Plain,
                commit: coin.commit,
            });
        }
        let mut excess_blind = 0i128;
        for (value, blind) in creates {
            outputs.push(output_for(*value, *blind, OutputFeatures::Plain));
            minted.push(Coin {
                commit: MockCrypto::commit(*value, *blind),
                value: *value,
                blind: *blind,
            });
            excess_blind += blind;
        }
        for coin in spends {
            excess_blind -= coin.blind;
        }
        kernels.push(signed_kernel(
            KernelFeatures::Plain,
            0,
            MockCrypto::commit(0, excess_blind),
        ));
    }

    let prev_hash = node
        .headers
        .last()
        .map(|h| h.hash())
        .unwrap_or(Hash::ZERO);
    let draft_header = BlockHeader {
        version: 1,
        height,
        prev_hash,
        timestamp: 1_700_000_000 + height,
        output_root: Hash::ZERO,
        range_proof_root: Hash::ZERO,
        kernel_root: Hash::ZERO,
        total_kernel_offset: BlindingFactor::default(),
        output_mmr_size: 0,
        kernel_mmr_size: 0,
    };
    let mut block = Block {
        header: draft_header,
        inputs,
        outputs,
        kernels,
    };

    // Dry-run to learn the roots and sizes this block produces.
    let (roots, sizes) = node
        .set
        .extending_readonly(|ext| {
            ext.apply_block(&block)?;
            Ok((ext.roots()?, ext.sizes()))
        })
        .unwrap();
    block.header.kernel_root = roots.kernel_root;
    block.header.output_root = roots.output_root;
    block.header.range_proof_root = roots.range_proof_root;
    block.header.kernel_mmr_size = sizes.0;
    block.header.output_mmr_size = sizes.1;

    node.set.apply_block(&block).unwrap();
    node.headers.push(block.header.clone());
    minted
}

fn head(node: &TestNode) -> BlockHeader {
    node.headers.last().unwrap().clone()
}

#[test]
fn apply_blocks_and_validate() {
    let mut node = new_node();
    let coins0 = apply_next_block(&mut node, &[], &[]);
    let coins1 = apply_next_block(&mut node, &[], &[]);
    // Spend the genesis coinbase into two outputs.
    let spent = coins0[0];
    let coins2 = apply_next_block(
        &mut node,
        &[spent],
        &[(REWARD - 7, 21), (7, 9)],
    );

    // Unspent outputs resolve through the index; spent ones do not.
    assert!(node
        .set
        .get_output_by_commitment(&coins2[1].commit)
        .unwrap()
        .is_some());
    assert!(node
        .set
        .get_output_by_commitment(&spent.commit)
        .unwrap()
        .is_none());

    let crypto = MockCrypto;
    let chain = HeaderChain(node.headers.clone());
    let validator = TxHashSetValidator::new(&crypto, &chain);
    let sums = validator.validate(&node.set, &head(&node)).unwrap();

    // The returned output sum covers exactly the unspent outputs.
    let unspent = [
        coins1[0].commit,
        coins2[0].commit,
        coins2[1].commit,
        coins2[2].commit,
    ];
    assert_eq!(
        sums.output_sum,
        crypto.sum_commitments(&unspent, &[]).unwrap()
    );
}

#[test]
fn validator_rejects_mismatched_sizes() {
    let mut node = new_node();
    apply_next_block(&mut node, &[], &[]);

    let mut tampered = head(&node);
    tampered.kernel_mmr_size += 1;

    let crypto = MockCrypto;
    let chain = HeaderChain(node.headers.clone());
    let validator = TxHashSetValidator::new(&crypto, &chain);
    assert!(matches!(
        validator.validate(&node.set, &tampered),
        Err(Error::InvalidMmrSize)
    ));
}

#[test]
fn validator_rejects_corrupted_parent_hash() {
    let mut node = new_node();
    apply_next_block(&mut node, &[], &[]);
    apply_next_block(&mut node, &[], &[]);
    let tip = head(&node);

    // Two kernels mean a parent node at position 2. Flip a byte of its
    // stored hash on disk.
    let TestNode { root, db, set, headers, _dir } = node;
    drop(set);
    let hash_file = root
        .join(TXHASHSET_SUBDIR)
        .join("kernel")
        .join("pmmr_hash.bin");
    {
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&hash_file)
            .unwrap();
        file.seek(SeekFrom::Start(2 * 32)).unwrap();
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).unwrap();
        file.seek(SeekFrom::Start(2 * 32)).unwrap();
        file.write_all(&[byte[0] ^ 0xff]).unwrap();
    }

    let set = TxHashSet::open(&root, Arc::clone(&db), Some(&tip)).unwrap();
    let crypto = MockCrypto;
    let chain = HeaderChain(headers);
    let validator = TxHashSetValidator::new(&crypto, &chain);
    assert!(matches!(
        validator.validate(&set, &tip),
        Err(Error::InvalidMmrHash(2))
    ));
}

#[test]
fn validator_rejects_mismatched_root() {
    let mut node = new_node();
    apply_next_block(&mut node, &[], &[]);

    let mut tampered = head(&node);
    tampered.output_root = Hash::of(b"tampered");

    let crypto = MockCrypto;
    let chain = HeaderChain(node.headers.clone());
    let validator = TxHashSetValidator::new(&crypto, &chain);
    assert!(matches!(
        validator.validate(&node.set, &tampered),
        Err(Error::InvalidMmrRoot)
    ));
}

#[test]
fn validator_rejects_rewritten_kernel_history() {
    let mut node = new_node();
    apply_next_block(&mut node, &[], &[]);
    apply_next_block(&mut node, &[], &[]);

    let mut headers = node.headers.clone();
    headers[0].kernel_root = Hash::of(b"rewritten");

    let crypto = MockCrypto;
    let chain = HeaderChain(headers);
    let validator = TxHashSetValidator::new(&crypto, &chain);
    assert!(matches!(
        validator.validate(&node.set, &head(&node)),
        Err(Error::InvalidKernelHistory(0))
    ));
}

#[test]
fn validator_rejects_unbalanced_kernel_sums() {
    let mut node = new_node();
    let coins = apply_next_block(&mut node, &[], &[]);
    // A "transaction" minting 5 units out of thin air: values no longer
    // balance the supply even though roots match the header.
    apply_next_block(
        &mut node,
        &[coins[0]],
        &[(REWARD + 5, 33)],
    );

    let crypto = MockCrypto;
    let chain = HeaderChain(node.headers.clone());
    let validator = TxHashSetValidator::new(&crypto, &chain);
    assert!(matches!(
        validator.validate(&node.set, &head(&node)),
        Err(Error::InvalidKernelSum)
    ));
}

#[test]
fn validator_rejects_bad_kernel_signature() {
    let mut node = new_node();
    apply_next_block(&mut node, &[], &[]);

    // Forge a block whose kernel signature does not cover its fields.
    let height = node.headers.len() as u64;
    let blind = 1_000 + height as i128;
    let output = output_for(REWARD, blind, OutputFeatures::Coinbase);
    let mut kernel = signed_kernel(
        KernelFeatures::Coinbase,
        0,
        MockCrypto::commit(0, blind),
    );
    kernel.excess_sig = Signature([0xaa; SIGNATURE_SIZE]);

    let mut block = Block {
        header: BlockHeader {
            version: 1,
            height,
            prev_hash: head(&node).hash(),
            timestamp: 0,
            output_root: Hash::ZERO,
            range_proof_root: Hash::ZERO,
            kernel_root: Hash::ZERO,
            total_kernel_offset: BlindingFactor::default(),
            output_mmr_size: 0,
            kernel_mmr_size: 0,
        },
        inputs: vec![],
        outputs: vec![output],
        kernels: vec![kernel],
    };
    let (roots, sizes) = node
        .set
        .extending_readonly(|ext| {
            ext.apply_block(&block)?;
            Ok((ext.roots()?, ext.sizes()))
        })
        .unwrap();
    block.header.kernel_root = roots.kernel_root;
    block.header.output_root = roots.output_root;
    block.header.range_proof_root = roots.range_proof_root;
    block.header.kernel_mmr_size = sizes.0;
    block.header.output_mmr_size = sizes.1;
    node.set.apply_block(&block).unwrap();
    node.headers.push(block.header.clone());

    let crypto = MockCrypto;
    let chain = HeaderChain(node.headers.clone());
    let validator = TxHashSetValidator::new(&crypto, &chain);
    assert!(matches!(
        validator.validate(&node.set, &head(&node)),
        Err(Error::InvalidKernelSignature)
    ));
}

#[test]
fn range_proofs_verify_in_batches_of_2000() {
    let mut node = new_node();
    // One block minting 2,001 outputs: the coinbase plus a transaction
    // splitting it into 2,000 pieces.
    let creates: Vec<(u64, i128)> = (0..2_000)
        .map(|i| {
            if i == 0 {
                (REWARD - 1_999, 50_000 + i as i128)
            } else {
                (1, 50_000 + i as i128)
            }
        })
        .collect();
    let coins = apply_next_block(&mut node, &[], &[]);
    apply_next_block(&mut node, &[coins[0]], &creates);

    let crypto = CountingCrypto::new();
    let chain = HeaderChain(node.headers.clone());
    let validator = TxHashSetValidator::new(&crypto, &chain);
    validator.validate(&node.set, &head(&node)).unwrap();

    // 2,001 unspent outputs: one full batch of 2,000 and one straggler.
    assert_eq!(*crypto.batches.lock().unwrap(), vec![2_000, 1]);

    let rejecting = RejectingCrypto(MockCrypto);
    let validator = TxHashSetValidator::new(&rejecting, &chain);
    assert!(matches!(
        validator.validate(&node.set, &head(&node)),
        Err(Error::InvalidRangeProof)
    ));
}

#[test]
fn cancelled_validation_aborts() {
    let mut node = new_node();
    apply_next_block(&mut node, &[], &[]);

    let crypto = MockCrypto;
    let chain = HeaderChain(node.headers.clone());
    let cancel = Arc::new(AtomicBool::new(true));
    let validator = TxHashSetValidator::new(&crypto, &chain).with_cancel(cancel);
    assert!(matches!(
        validator.validate(&node.set, &head(&node)),
        Err(Error::Cancelled)
    ));
}

#[test]
fn rewind_restores_files_and_roots() {
    let mut node = new_node();
    let coins0 = apply_next_block(&mut node, &[], &[]);
    apply_next_block(&mut node, &[], &[]);
    let checkpoint = head(&node);

    let output_dir = node.root.join(TXHASHSET_SUBDIR).join(OUTPUT_SUBDIR);
    let hash_bytes = fs::read(output_dir.join("pmmr_hash.bin")).unwrap();
    let data_bytes = fs::read(output_dir.join("pmmr_data.bin")).unwrap();
    let roots_before = node.set.roots().unwrap();
    let sizes_before = node.set.sizes();

    // A block appending outputs and spending one pre-existing output.
    apply_next_block(&mut node, &[coins0[0]], &[(REWARD, 77)]);
    assert_ne!(node.set.roots().unwrap(), roots_before);

    node.set.rewind(&checkpoint).unwrap();

    assert_eq!(node.set.sizes(), sizes_before);
    assert_eq!(node.set.roots().unwrap(), roots_before);
    assert_eq!(
        fs::read(output_dir.join("pmmr_hash.bin")).unwrap(),
        hash_bytes
    );
    assert_eq!(
        fs::read(output_dir.join("pmmr_data.bin")).unwrap(),
        data_bytes
    );
    // The spent output is spendable again.
    assert!(node
        .set
        .get_output_by_commitment(&coins0[0].commit)
        .unwrap()
        .is_some());
    assert_eq!(node.db.head().unwrap(), Some(checkpoint.hash()));
}

#[test]
fn snapshot_zip_roundtrip_validates() {
    let mut node = new_node();
    let coins = apply_next_block(&mut node, &[], &[]);
    apply_next_block(&mut node, &[coins[0]], &[(REWARD, 11)]);
    let tip = head(&node);

    let archive = node.set.zip_for_peer(&tip).unwrap();

    // A fresh node installs the snapshot.
    let peer_dir = tempfile::tempdir().unwrap();
    unzip_from_peer(peer_dir.path(), archive).unwrap();
    let peer_db = Arc::new(BlockDB::open(&peer_dir.path().join("chain_data")).unwrap());
    let peer_set = TxHashSet::open(peer_dir.path(), Arc::clone(&peer_db), Some(&tip)).unwrap();
    peer_set.rebuild_output_index().unwrap();

    let crypto = MockCrypto;
    let chain = HeaderChain(node.headers.clone());
    let validator = TxHashSetValidator::new(&crypto, &chain);
    let sums = validator.validate(&peer_set, &tip).unwrap();
    let original = validator.validate(&node.set, &tip).unwrap();
    assert_eq!(sums, original);

    // The rebuilt index answers lookups.
    assert!(peer_set
        .get_output_by_commitment(&MockCrypto::commit(REWARD, 11))
        .unwrap()
        .is_some());
}

#[test]
fn failed_block_application_leaves_no_trace() {
    let mut node = new_node();
    apply_next_block(&mut node, &[], &[]);
    let roots_before = node.set.roots().unwrap();
    let sizes_before = node.set.sizes();
    let head_before = node.db.head().unwrap();

    // A block that appends outputs, then spends a commitment that does
    // not exist: application fails after the appends.
    let ghost = Coin {
        commit: MockCrypto::commit(5, 5),
        value: 5,
        blind: 5,
    };
    let (output, kernel, _) = coinbase(1);
    let block = Block {
        header: BlockHeader {
            version: 1,
            height: 1,
            prev_hash: head(&node).hash(),
            timestamp: 0,
            output_root: Hash::ZERO,
            range_proof_root: Hash::ZERO,
            kernel_root: Hash::ZERO,
            total_kernel_offset: BlindingFactor::default(),
            output_mmr_size: 0,
            kernel_mmr_size: 0,
        },
        inputs: vec![Input {
            features: OutputFeatures::Plain,
            commit: ghost.commit,
        }],
        outputs: vec![output],
        kernels: vec![kernel],
    };

    assert!(matches!(
        node.set.apply_block(&block),
        Err(Error::AlreadySpent(_))
    ));
    assert_eq!(node.set.sizes(), sizes_before);
    assert_eq!(node.set.roots().unwrap(), roots_before);
    assert_eq!(node.db.head().unwrap(), head_before);
}
